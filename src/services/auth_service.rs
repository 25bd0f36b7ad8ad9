//! Domain service for registration, login, token refresh and email verification.
//!
//! The HTTP layer talks to this trait only; it never sees password hashes or
//! raw store records.

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::Account;
use crate::domain::{AccountFilter, AccountId, ClientMeta, Role, SessionId};
use crate::services::tokens::TokenPair;

/// Errors specific to authentication operations.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Username is already taken")]
    UsernameTaken,

    #[error("Email is already registered")]
    EmailTaken,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account is deactivated")]
    AccountDeactivated,

    #[error("Account is temporarily locked")]
    AccountLocked { until: DateTime<Utc> },

    #[error("Access token required")]
    AccessTokenRequired,

    #[error("Access token expired")]
    AccessTokenExpired,

    #[error("Invalid access token")]
    InvalidAccessToken,

    #[error("Refresh token required")]
    RefreshTokenRequired,

    #[error("Token refresh failed")]
    TokenRefreshFailed,

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("Invalid email verification token")]
    EmailVerificationTokenInvalid,

    #[error("Email verification token expired")]
    EmailVerificationTokenExpired,

    #[error("Email is already verified")]
    EmailAlreadyVerified,

    #[error("Failed to send email: {0}")]
    EmailSendFailed(String),

    #[error("User not found")]
    UserNotFound,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Stable machine-readable code returned to clients.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::UsernameTaken => "USERNAME_TAKEN",
            Self::EmailTaken => "EMAIL_TAKEN",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::AccountDeactivated => "ACCOUNT_DEACTIVATED",
            Self::AccountLocked { .. } => "ACCOUNT_LOCKED",
            Self::AccessTokenRequired => "ACCESS_TOKEN_REQUIRED",
            Self::AccessTokenExpired => "ACCESS_TOKEN_EXPIRED",
            Self::InvalidAccessToken => "INVALID_ACCESS_TOKEN",
            Self::RefreshTokenRequired => "REFRESH_TOKEN_REQUIRED",
            Self::TokenRefreshFailed => "TOKEN_REFRESH_FAILED",
            Self::Forbidden => "FORBIDDEN",
            Self::EmailVerificationTokenInvalid => "EMAIL_VERIFICATION_TOKEN_INVALID",
            Self::EmailVerificationTokenExpired => "EMAIL_VERIFICATION_TOKEN_EXPIRED",
            Self::EmailAlreadyVerified => "EMAIL_ALREADY_VERIFIED",
            Self::EmailSendFailed(_) => "EMAIL_SEND_FAILED",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::UsernameTaken
            | Self::EmailTaken
            | Self::EmailVerificationTokenInvalid
            | Self::EmailVerificationTokenExpired
            | Self::EmailAlreadyVerified => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials
            | Self::AccessTokenRequired
            | Self::AccessTokenExpired
            | Self::InvalidAccessToken
            | Self::RefreshTokenRequired
            | Self::TokenRefreshFailed => StatusCode::UNAUTHORIZED,
            Self::AccountDeactivated | Self::AccountLocked { .. } | Self::Forbidden => {
                StatusCode::FORBIDDEN
            }
            Self::UserNotFound => StatusCode::NOT_FOUND,
            Self::EmailSendFailed(_) | Self::Database(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Infrastructure failures whose details must not reach clients.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::EmailSendFailed(_) | Self::Database(_) | Self::Internal(_)
        )
    }
}

/// Store failures carry a `DbErr` under their context; everything else is internal.
impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        if err.downcast_ref::<sea_orm::DbErr>().is_some() {
            Self::Database(format!("{err:#}"))
        } else {
            Self::Internal(format!("{err:#}"))
        }
    }
}

/// Account DTO for responses. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub id: AccountId,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    pub is_email_verified: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Account> for AccountInfo {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            username: account.username,
            email: account.email,
            role: account.role,
            is_active: account.is_active,
            is_email_verified: account.is_email_verified,
            last_login_at: account.last_login_at,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Successful login: the account plus a fresh token pair for the new session.
#[derive(Debug, Clone)]
pub struct LoginResult {
    pub account: AccountInfo,
    pub session_id: SessionId,
    pub tokens: TokenPair,
}

/// The caller behind a valid access token.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub account: AccountInfo,
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailStatus {
    pub email: String,
    pub is_email_verified: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountPage {
    pub accounts: Vec<AccountInfo>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

/// Admin-side changes to an account. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountUpdate {
    pub is_active: Option<bool>,
    pub role: Option<Role>,
}

/// Domain service trait for authentication.
#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    /// Creates an unverified account and sends a verification email.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UsernameTaken`] or [`AuthError::EmailTaken`] when
    /// either identity field collides with an existing account. A failed
    /// verification email does not fail registration.
    async fn register(&self, input: RegisterInput) -> Result<AccountInfo, AuthError>;

    /// Verifies credentials and opens a new session.
    ///
    /// # Errors
    ///
    /// Unknown email and wrong password both return
    /// [`AuthError::InvalidCredentials`].
    async fn login(
        &self,
        email: &str,
        password: &str,
        client: &ClientMeta,
    ) -> Result<LoginResult, AuthError>;

    /// Exchanges a refresh token for a new pair, rotating the session in place.
    ///
    /// # Errors
    ///
    /// Any failure, including losing a race with a concurrent refresh of the
    /// same token, is [`AuthError::TokenRefreshFailed`].
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError>;

    /// Ends the session holding either token. Succeeds if there is none.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::AccessTokenRequired`] if neither token is given.
    async fn logout(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<(), AuthError>;

    async fn verify_email(&self, token: &str) -> Result<AccountInfo, AuthError>;

    /// Mints a new verification token and sends it.
    ///
    /// # Errors
    ///
    /// Unlike registration, a failed send is [`AuthError::EmailSendFailed`].
    async fn resend_verification(&self, email: &str) -> Result<(), AuthError>;

    /// Resolves an access token to its account and live session.
    async fn authenticate(&self, access_token: &str) -> Result<AuthContext, AuthError>;

    async fn get_account(&self, id: AccountId) -> Result<AccountInfo, AuthError>;

    async fn email_status(&self, id: AccountId) -> Result<EmailStatus, AuthError>;

    /// Lists accounts matching `filter`. `page` is 1-based.
    async fn list_accounts(
        &self,
        filter: &AccountFilter,
        page: u64,
        limit: u64,
    ) -> Result<AccountPage, AuthError>;

    /// Applies an admin update. Deactivating an account ends all its sessions.
    async fn update_account(
        &self,
        id: AccountId,
        update: AccountUpdate,
    ) -> Result<AccountInfo, AuthError>;
}
