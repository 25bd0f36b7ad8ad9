use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::domain::{AccountFilter, AccountId, ClientMeta, Role, SessionId};

pub mod migrator;
pub mod repositories;

pub use repositories::account::{Account, NewAccount};
pub use repositories::session::{Session, SessionTokens};

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        if !db_url.contains(":memory:") {
            let path_str = db_url.trim_start_matches("sqlite://").trim_start_matches("sqlite:");
            let path_str = path_str.split('?').next().unwrap_or(path_str);
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    fn account_repo(&self) -> repositories::account::AccountRepository {
        repositories::account::AccountRepository::new(self.conn.clone())
    }

    fn session_repo(&self) -> repositories::session::SessionRepository {
        repositories::session::SessionRepository::new(self.conn.clone())
    }

    // ========== Account Repository Methods ==========

    pub async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        self.account_repo().get(id).await
    }

    pub async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        self.account_repo().find_by_email(email).await
    }

    pub async fn find_account_by_email_or_username(
        &self,
        email: &str,
        username: &str,
    ) -> Result<Option<Account>> {
        self.account_repo()
            .find_by_email_or_username(email, username)
            .await
    }

    pub async fn find_account_by_verification_token(&self, token: &str) -> Result<Option<Account>> {
        self.account_repo().find_by_verification_token(token).await
    }

    pub async fn create_account(&self, new: NewAccount) -> Result<Account> {
        self.account_repo().create(new).await
    }

    pub async fn increment_failed_logins(&self, id: AccountId) -> Result<u32> {
        self.account_repo().increment_failed_logins(id).await
    }

    pub async fn lock_account(&self, id: AccountId, until: DateTime<Utc>) -> Result<()> {
        self.account_repo().lock(id, until).await
    }

    pub async fn record_successful_login(&self, id: AccountId, at: DateTime<Utc>) -> Result<()> {
        self.account_repo().record_successful_login(id, at).await
    }

    pub async fn set_verification_token(
        &self,
        id: AccountId,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.account_repo()
            .set_verification_token(id, token, expires_at)
            .await
    }

    pub async fn mark_account_verified(&self, id: AccountId, token: &str) -> Result<bool> {
        self.account_repo().mark_verified(id, token).await
    }

    pub async fn set_account_active(&self, id: AccountId, is_active: bool) -> Result<bool> {
        self.account_repo().set_active(id, is_active).await
    }

    pub async fn set_account_role(&self, id: AccountId, role: Role) -> Result<bool> {
        self.account_repo().set_role(id, role).await
    }

    pub async fn list_accounts(
        &self,
        filter: &AccountFilter,
        page: u64,
        limit: u64,
    ) -> Result<Vec<Account>> {
        self.account_repo().list(filter, page, limit).await
    }

    pub async fn count_accounts(&self, filter: &AccountFilter) -> Result<u64> {
        self.account_repo().count(filter).await
    }

    // ========== Session Repository Methods ==========

    pub async fn create_session(
        &self,
        account_id: AccountId,
        tokens: SessionTokens,
        expires_at: DateTime<Utc>,
        client: &ClientMeta,
    ) -> Result<Session> {
        self.session_repo()
            .create(account_id, tokens, expires_at, client)
            .await
    }

    pub async fn get_session(&self, id: SessionId) -> Result<Option<Session>> {
        self.session_repo().get(id).await
    }

    pub async fn find_session_by_refresh_token(&self, token: &str) -> Result<Option<Session>> {
        self.session_repo().find_by_refresh_token(token).await
    }

    pub async fn find_active_session_by_access_token(
        &self,
        token: &str,
    ) -> Result<Option<Session>> {
        self.session_repo().find_active_by_access_token(token).await
    }

    pub async fn list_sessions_for_account(&self, account_id: AccountId) -> Result<Vec<Session>> {
        self.session_repo().list_for_account(account_id).await
    }

    pub async fn rotate_session(
        &self,
        id: SessionId,
        expected_refresh_token: &str,
        tokens: SessionTokens,
    ) -> Result<bool> {
        self.session_repo()
            .rotate(id, expected_refresh_token, tokens)
            .await
    }

    pub async fn deactivate_session(&self, id: SessionId) -> Result<bool> {
        self.session_repo().deactivate(id).await
    }

    pub async fn deactivate_session_by_token(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<u64> {
        self.session_repo()
            .deactivate_by_token(access_token, refresh_token)
            .await
    }

    pub async fn deactivate_sessions_for_account(&self, account_id: AccountId) -> Result<u64> {
        self.session_repo()
            .deactivate_all_for_account(account_id)
            .await
    }

    pub async fn purge_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        self.session_repo().purge(now).await
    }
}
