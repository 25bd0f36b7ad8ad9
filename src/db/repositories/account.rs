use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, Func, LikeExpr, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};

use crate::domain::{AccountFilter, AccountId, Role};
use crate::entities::{accounts, prelude::*};

/// Full account record, including the password hash.
///
/// Never hand this to the HTTP layer; services convert it to `AccountInfo`.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub is_email_verified: bool,
    pub failed_login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub email_verification_token: Option<String>,
    pub email_verification_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Whether a lockout is in effect at `now`.
    #[must_use]
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}

impl From<accounts::Model> for Account {
    fn from(model: accounts::Model) -> Self {
        Self {
            id: AccountId::new(model.id),
            username: model.username,
            email: model.email,
            password_hash: model.password_hash,
            role: model.role.parse().unwrap_or_default(),
            is_active: model.is_active,
            is_email_verified: model.is_email_verified,
            failed_login_attempts: u32::try_from(model.failed_login_attempts).unwrap_or(0),
            locked_until: model.locked_until,
            last_login_at: model.last_login_at,
            email_verification_token: model.email_verification_token,
            email_verification_expires_at: model.email_verification_expires_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Fields for a new account row.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub email_verification_token: String,
    pub email_verification_expires_at: DateTime<Utc>,
}

pub struct AccountRepository {
    conn: DatabaseConnection,
}

const LIKE_ESCAPE: char = '\\';

/// `%term%` with the term's own wildcards matched literally.
fn contains_pattern(term: &str) -> LikeExpr {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE) {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escaped.push('%');
    LikeExpr::new(escaped).escape(LIKE_ESCAPE)
}

fn lower(column: accounts::Column) -> SimpleExpr {
    Expr::expr(Func::lower(Expr::col(column))).into()
}

fn filter_condition(filter: &AccountFilter) -> Condition {
    let mut condition = Condition::all();

    if let Some(role) = filter.role {
        condition = condition.add(accounts::Column::Role.eq(role.as_str()));
    }

    if let Some(is_active) = filter.is_active {
        condition = condition.add(accounts::Column::IsActive.eq(is_active));
    }

    if let Some(term) = filter.search_term() {
        condition = condition.add(
            Condition::any()
                .add(Expr::expr(lower(accounts::Column::Username)).like(contains_pattern(&term)))
                .add(Expr::col(accounts::Column::Email).like(contains_pattern(&term))),
        );
    }

    condition
}

impl AccountRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn get(&self, id: AccountId) -> Result<Option<Account>> {
        let account = Accounts::find_by_id(id.value())
            .one(&self.conn)
            .await
            .context("Failed to query account by ID")?;

        Ok(account.map(Account::from))
    }

    /// Lookup by email, case-insensitively.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let account = Accounts::find()
            .filter(accounts::Column::Email.eq(email.trim().to_lowercase()))
            .one(&self.conn)
            .await
            .context("Failed to query account by email")?;

        Ok(account.map(Account::from))
    }

    /// Finds an account whose email or username collides with the given pair.
    pub async fn find_by_email_or_username(
        &self,
        email: &str,
        username: &str,
    ) -> Result<Option<Account>> {
        let account = Accounts::find()
            .filter(
                Condition::any()
                    .add(accounts::Column::Email.eq(email.trim().to_lowercase()))
                    .add(Expr::expr(lower(accounts::Column::Username)).eq(username.to_lowercase())),
            )
            .one(&self.conn)
            .await
            .context("Failed to query account by email or username")?;

        Ok(account.map(Account::from))
    }

    /// Lookup by verification token, regardless of its expiry.
    pub async fn find_by_verification_token(&self, token: &str) -> Result<Option<Account>> {
        let account = Accounts::find()
            .filter(accounts::Column::EmailVerificationToken.eq(token))
            .one(&self.conn)
            .await
            .context("Failed to query account by verification token")?;

        Ok(account.map(Account::from))
    }

    pub async fn create(&self, new: NewAccount) -> Result<Account> {
        let now = Utc::now();

        let active = accounts::ActiveModel {
            username: Set(new.username.trim().to_string()),
            email: Set(new.email.trim().to_lowercase()),
            password_hash: Set(new.password_hash),
            role: Set(new.role.as_str().to_string()),
            is_active: Set(true),
            is_email_verified: Set(false),
            failed_login_attempts: Set(0),
            locked_until: Set(None),
            last_login_at: Set(None),
            email_verification_token: Set(Some(new.email_verification_token)),
            email_verification_expires_at: Set(Some(new.email_verification_expires_at)),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let model = active
            .insert(&self.conn)
            .await
            .context("Failed to insert account")?;

        Ok(Account::from(model))
    }

    /// Atomically bumps the failure counter and returns the new value.
    pub async fn increment_failed_logins(&self, id: AccountId) -> Result<u32> {
        Accounts::update_many()
            .col_expr(
                accounts::Column::FailedLoginAttempts,
                Expr::col(accounts::Column::FailedLoginAttempts).add(1),
            )
            .col_expr(accounts::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(accounts::Column::Id.eq(id.value()))
            .exec(&self.conn)
            .await
            .context("Failed to increment failed login counter")?;

        let attempts: Option<i32> = Accounts::find_by_id(id.value())
            .select_only()
            .column(accounts::Column::FailedLoginAttempts)
            .into_tuple()
            .one(&self.conn)
            .await
            .context("Failed to read failed login counter")?;

        Ok(attempts.and_then(|n| u32::try_from(n).ok()).unwrap_or(0))
    }

    /// Locks the account until `until` and resets its failure counter.
    pub async fn lock(&self, id: AccountId, until: DateTime<Utc>) -> Result<()> {
        Accounts::update_many()
            .col_expr(accounts::Column::FailedLoginAttempts, Expr::value(0))
            .col_expr(accounts::Column::LockedUntil, Expr::value(until))
            .col_expr(accounts::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(accounts::Column::Id.eq(id.value()))
            .exec(&self.conn)
            .await
            .context("Failed to lock account")?;

        Ok(())
    }

    /// Clears the failure counter and lockout, and stamps the login time.
    pub async fn record_successful_login(&self, id: AccountId, at: DateTime<Utc>) -> Result<()> {
        Accounts::update_many()
            .col_expr(accounts::Column::FailedLoginAttempts, Expr::value(0))
            .col_expr(
                accounts::Column::LockedUntil,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(accounts::Column::LastLoginAt, Expr::value(at))
            .col_expr(accounts::Column::UpdatedAt, Expr::value(at))
            .filter(accounts::Column::Id.eq(id.value()))
            .exec(&self.conn)
            .await
            .context("Failed to record successful login")?;

        Ok(())
    }

    pub async fn set_verification_token(
        &self,
        id: AccountId,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        Accounts::update_many()
            .col_expr(
                accounts::Column::EmailVerificationToken,
                Expr::value(token.to_string()),
            )
            .col_expr(
                accounts::Column::EmailVerificationExpiresAt,
                Expr::value(expires_at),
            )
            .col_expr(accounts::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(accounts::Column::Id.eq(id.value()))
            .exec(&self.conn)
            .await
            .context("Failed to store verification token")?;

        Ok(())
    }

    /// Marks the account verified and clears the token, but only if `token`
    /// is still the one on record and the account is not yet verified.
    pub async fn mark_verified(&self, id: AccountId, token: &str) -> Result<bool> {
        let result = Accounts::update_many()
            .col_expr(accounts::Column::IsEmailVerified, Expr::value(true))
            .col_expr(
                accounts::Column::EmailVerificationToken,
                Expr::value(Option::<String>::None),
            )
            .col_expr(
                accounts::Column::EmailVerificationExpiresAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(accounts::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(accounts::Column::Id.eq(id.value()))
            .filter(accounts::Column::EmailVerificationToken.eq(token))
            .filter(accounts::Column::IsEmailVerified.eq(false))
            .exec(&self.conn)
            .await
            .context("Failed to mark account verified")?;

        Ok(result.rows_affected == 1)
    }

    pub async fn set_active(&self, id: AccountId, is_active: bool) -> Result<bool> {
        let result = Accounts::update_many()
            .col_expr(accounts::Column::IsActive, Expr::value(is_active))
            .col_expr(accounts::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(accounts::Column::Id.eq(id.value()))
            .exec(&self.conn)
            .await
            .context("Failed to update account active flag")?;

        Ok(result.rows_affected > 0)
    }

    pub async fn set_role(&self, id: AccountId, role: Role) -> Result<bool> {
        let result = Accounts::update_many()
            .col_expr(accounts::Column::Role, Expr::value(role.as_str()))
            .col_expr(accounts::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(accounts::Column::Id.eq(id.value()))
            .exec(&self.conn)
            .await
            .context("Failed to update account role")?;

        Ok(result.rows_affected > 0)
    }

    /// Page through accounts matching `filter`, newest first. `page` is 1-based.
    pub async fn list(&self, filter: &AccountFilter, page: u64, limit: u64) -> Result<Vec<Account>> {
        let paginator = Accounts::find()
            .filter(filter_condition(filter))
            .order_by_desc(accounts::Column::CreatedAt)
            .order_by_desc(accounts::Column::Id)
            .paginate(&self.conn, limit.max(1));

        let rows = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .context("Failed to list accounts")?;

        Ok(rows.into_iter().map(Account::from).collect())
    }

    pub async fn count(&self, filter: &AccountFilter) -> Result<u64> {
        Accounts::find()
            .filter(filter_condition(filter))
            .count(&self.conn)
            .await
            .context("Failed to count accounts")
    }
}
