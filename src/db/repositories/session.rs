use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};

use crate::domain::{AccountId, ClientMeta, SessionId};
use crate::entities::{prelude::*, sessions};

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub account_id: AccountId,
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Whether the refresh token on this row can still be exchanged at `now`.
    #[must_use]
    pub fn is_refreshable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.refresh_token_expires_at > now && self.expires_at > now
    }
}

impl From<sessions::Model> for Session {
    fn from(model: sessions::Model) -> Self {
        Self {
            id: SessionId::new(model.id),
            account_id: AccountId::new(model.account_id),
            access_token: model.access_token,
            access_token_expires_at: model.access_token_expires_at,
            refresh_token: model.refresh_token,
            refresh_token_expires_at: model.refresh_token_expires_at,
            expires_at: model.expires_at,
            is_active: model.is_active,
            ip_address: model.ip_address,
            user_agent: model.user_agent,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Token values and expiries written on login and on every rotation.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
}

pub struct SessionRepository {
    conn: DatabaseConnection,
}

impl SessionRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn create(
        &self,
        account_id: AccountId,
        tokens: SessionTokens,
        expires_at: DateTime<Utc>,
        client: &ClientMeta,
    ) -> Result<Session> {
        let now = Utc::now();

        let active = sessions::ActiveModel {
            account_id: Set(account_id.value()),
            access_token: Set(tokens.access_token),
            access_token_expires_at: Set(tokens.access_token_expires_at),
            refresh_token: Set(tokens.refresh_token),
            refresh_token_expires_at: Set(tokens.refresh_token_expires_at),
            expires_at: Set(expires_at),
            is_active: Set(true),
            ip_address: Set(client.ip_address.clone()),
            user_agent: Set(client.user_agent.clone()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let model = active
            .insert(&self.conn)
            .await
            .context("Failed to insert session")?;

        Ok(Session::from(model))
    }

    pub async fn get(&self, id: SessionId) -> Result<Option<Session>> {
        let session = Sessions::find_by_id(id.value())
            .one(&self.conn)
            .await
            .context("Failed to query session by ID")?;

        Ok(session.map(Session::from))
    }

    /// Lookup by refresh token in any state, so that reuse of a revoked
    /// token can be told apart from an unknown one.
    pub async fn find_by_refresh_token(&self, refresh_token: &str) -> Result<Option<Session>> {
        let session = Sessions::find()
            .filter(sessions::Column::RefreshToken.eq(refresh_token))
            .one(&self.conn)
            .await
            .context("Failed to query session by refresh token")?;

        Ok(session.map(Session::from))
    }

    pub async fn find_active_by_access_token(&self, access_token: &str) -> Result<Option<Session>> {
        let session = Sessions::find()
            .filter(sessions::Column::AccessToken.eq(access_token))
            .filter(sessions::Column::IsActive.eq(true))
            .one(&self.conn)
            .await
            .context("Failed to query session by access token")?;

        Ok(session.map(Session::from))
    }

    pub async fn list_for_account(&self, account_id: AccountId) -> Result<Vec<Session>> {
        let rows = Sessions::find()
            .filter(sessions::Column::AccountId.eq(account_id.value()))
            .order_by_asc(sessions::Column::CreatedAt)
            .all(&self.conn)
            .await
            .context("Failed to list sessions for account")?;

        Ok(rows.into_iter().map(Session::from).collect())
    }

    /// Overwrites the token fields of session `id` with `tokens`, provided the
    /// row is still active and still holds `expected_refresh_token`.
    ///
    /// This is a single conditional UPDATE, so of two callers racing with the
    /// same refresh token exactly one sees `true`.
    pub async fn rotate(
        &self,
        id: SessionId,
        expected_refresh_token: &str,
        tokens: SessionTokens,
    ) -> Result<bool> {
        let result = Sessions::update_many()
            .col_expr(
                sessions::Column::AccessToken,
                Expr::value(tokens.access_token),
            )
            .col_expr(
                sessions::Column::AccessTokenExpiresAt,
                Expr::value(tokens.access_token_expires_at),
            )
            .col_expr(
                sessions::Column::RefreshToken,
                Expr::value(tokens.refresh_token),
            )
            .col_expr(
                sessions::Column::RefreshTokenExpiresAt,
                Expr::value(tokens.refresh_token_expires_at),
            )
            .col_expr(sessions::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(sessions::Column::Id.eq(id.value()))
            .filter(sessions::Column::RefreshToken.eq(expected_refresh_token))
            .filter(sessions::Column::IsActive.eq(true))
            .exec(&self.conn)
            .await
            .context("Failed to rotate session tokens")?;

        Ok(result.rows_affected == 1)
    }

    pub async fn deactivate(&self, id: SessionId) -> Result<bool> {
        let result = Sessions::update_many()
            .col_expr(sessions::Column::IsActive, Expr::value(false))
            .col_expr(sessions::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(sessions::Column::Id.eq(id.value()))
            .filter(sessions::Column::IsActive.eq(true))
            .exec(&self.conn)
            .await
            .context("Failed to deactivate session")?;

        Ok(result.rows_affected > 0)
    }

    /// Deactivates whichever active session holds the given access or refresh token.
    pub async fn deactivate_by_token(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<u64> {
        let mut any = Condition::any();
        if let Some(token) = access_token {
            any = any.add(sessions::Column::AccessToken.eq(token));
        }
        if let Some(token) = refresh_token {
            any = any.add(sessions::Column::RefreshToken.eq(token));
        }
        if any.is_empty() {
            return Ok(0);
        }

        let result = Sessions::update_many()
            .col_expr(sessions::Column::IsActive, Expr::value(false))
            .col_expr(sessions::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(any)
            .filter(sessions::Column::IsActive.eq(true))
            .exec(&self.conn)
            .await
            .context("Failed to deactivate session by token")?;

        Ok(result.rows_affected)
    }

    pub async fn deactivate_all_for_account(&self, account_id: AccountId) -> Result<u64> {
        let result = Sessions::update_many()
            .col_expr(sessions::Column::IsActive, Expr::value(false))
            .col_expr(sessions::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(sessions::Column::AccountId.eq(account_id.value()))
            .filter(sessions::Column::IsActive.eq(true))
            .exec(&self.conn)
            .await
            .context("Failed to deactivate sessions for account")?;

        Ok(result.rows_affected)
    }

    /// Deletes inactive sessions and sessions whose overall lifetime has ended.
    pub async fn purge(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = Sessions::delete_many()
            .filter(
                Condition::any()
                    .add(sessions::Column::IsActive.eq(false))
                    .add(sessions::Column::ExpiresAt.lt(now)),
            )
            .exec(&self.conn)
            .await
            .context("Failed to purge sessions")?;

        Ok(result.rows_affected)
    }
}
