//! `SeaORM` implementation of the `AuthService` trait.

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use rand::Rng;
use sea_orm::{DbErr, SqlErr};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::{NewAccount, SessionTokens, Store};
use crate::domain::{AccountFilter, AccountId, ClientMeta, Role, TokenClass};
use crate::services::auth_service::{
    AccountInfo, AccountPage, AccountUpdate, AuthContext, AuthError, AuthService, EmailStatus,
    LoginResult, RegisterInput,
};
use crate::services::guard::{AccountGuard, FailureOutcome, GuardRejection};
use crate::services::hasher::{CredentialHasher, HasherError};
use crate::services::notifier::Notifier;
use crate::services::tokens::{TokenError, TokenIssuer, TokenPair};

const MAX_PAGE_SIZE: u64 = 100;

/// Lifetimes and policy knobs the orchestrator needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Overall session lifetime, measured from login.
    pub session_ttl: TimeDelta,
    pub verification_ttl: TimeDelta,
    pub admin_emails: Vec<String>,
}

fn seconds(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

impl AuthSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let tokens = &config.tokens;
        Self {
            session_ttl: seconds(
                tokens
                    .session_ttl_seconds
                    .max(tokens.refresh_token_ttl_seconds),
            ),
            verification_ttl: seconds(tokens.email_verification_ttl_seconds),
            admin_emails: config.security.admin_emails.clone(),
        }
    }

    fn is_admin_email(&self, email: &str) -> bool {
        self.admin_emails
            .iter()
            .any(|admin| admin.trim().eq_ignore_ascii_case(email))
    }
}

/// 64-character hex string from 32 random bytes.
fn generate_verification_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();

    bytes.iter().fold(String::with_capacity(64), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

fn hasher_error(err: HasherError) -> AuthError {
    match err {
        HasherError::EmptyInput => AuthError::Validation("Password must not be empty".to_string()),
        other => AuthError::Internal(other.to_string()),
    }
}

fn issue_error(err: TokenError) -> AuthError {
    AuthError::Internal(format!("Failed to issue tokens: {err}"))
}

/// Maps a unique-index violation on insert to the identity field it hit.
fn identity_conflict(err: &anyhow::Error) -> Option<AuthError> {
    match err.downcast_ref::<DbErr>()?.sql_err()? {
        SqlErr::UniqueConstraintViolation(msg) if msg.contains("email") => {
            Some(AuthError::EmailTaken)
        }
        SqlErr::UniqueConstraintViolation(_) => Some(AuthError::UsernameTaken),
        _ => None,
    }
}

fn to_session_tokens(pair: &TokenPair) -> SessionTokens {
    SessionTokens {
        access_token: pair.access.token.clone(),
        access_token_expires_at: pair.access.expires_at,
        refresh_token: pair.refresh.token.clone(),
        refresh_token_expires_at: pair.refresh.expires_at,
    }
}

pub struct SeaOrmAuthService {
    store: Store,
    hasher: CredentialHasher,
    tokens: Arc<TokenIssuer>,
    guard: AccountGuard,
    notifier: Arc<dyn Notifier>,
    settings: AuthSettings,
}

impl SeaOrmAuthService {
    #[must_use]
    pub fn new(
        store: Store,
        hasher: CredentialHasher,
        tokens: Arc<TokenIssuer>,
        guard: AccountGuard,
        notifier: Arc<dyn Notifier>,
        settings: AuthSettings,
    ) -> Self {
        Self {
            store,
            hasher,
            tokens,
            guard,
            notifier,
            settings,
        }
    }

    fn login_rejected(reason: &'static str) {
        metrics::counter!("warden_logins_total", "outcome" => reason).increment(1);
    }

    fn refresh_rejected(reason: &'static str) -> AuthError {
        debug!(reason, "Token refresh rejected");
        metrics::counter!("warden_refresh_total", "outcome" => reason).increment(1);
        AuthError::TokenRefreshFailed
    }

    /// Best-effort send; the caller never waits on or sees the outcome.
    fn spawn_verification_email(&self, email: String, username: String, token: String) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.send_verification(&email, &username, &token).await {
                warn!(to_email = %email, error = %e, "Failed to send verification email");
            }
        });
    }

    fn spawn_welcome_email(&self, email: String, username: String) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.send_welcome(&email, &username).await {
                warn!(to_email = %email, error = %e, "Failed to send welcome email");
            }
        });
    }
}

#[async_trait]
impl AuthService for SeaOrmAuthService {
    async fn register(&self, input: RegisterInput) -> Result<AccountInfo, AuthError> {
        let username = input.username.trim().to_string();
        let email = input.email.trim().to_lowercase();

        if let Some(existing) = self
            .store
            .find_account_by_email_or_username(&email, &username)
            .await?
        {
            return Err(if existing.email == email {
                AuthError::EmailTaken
            } else {
                AuthError::UsernameTaken
            });
        }

        let password_hash = self
            .hasher
            .hash(&input.password)
            .await
            .map_err(hasher_error)?;

        let token = generate_verification_token();
        let role = if self.settings.is_admin_email(&email) {
            Role::Admin
        } else {
            Role::User
        };

        let account = self
            .store
            .create_account(NewAccount {
                username,
                email,
                password_hash,
                role,
                email_verification_token: token.clone(),
                email_verification_expires_at: Utc::now() + self.settings.verification_ttl,
            })
            .await
            .map_err(|e| identity_conflict(&e).unwrap_or_else(|| AuthError::from(e)))?;

        info!(account_id = %account.id, username = %account.username, role = %account.role, "Account registered");
        metrics::counter!("warden_registrations_total").increment(1);

        self.spawn_verification_email(account.email.clone(), account.username.clone(), token);

        Ok(AccountInfo::from(account))
    }

    async fn login(
        &self,
        email: &str,
        password: &str,
        client: &ClientMeta,
    ) -> Result<LoginResult, AuthError> {
        let Some(mut account) = self.store.find_account_by_email(email).await? else {
            Self::login_rejected("unknown_email");
            return Err(AuthError::InvalidCredentials);
        };

        let now = Utc::now();
        if let Err(rejection) = self.guard.check_authorized_to_attempt(&account, now) {
            return Err(match rejection {
                GuardRejection::Inactive => {
                    Self::login_rejected("deactivated");
                    AuthError::AccountDeactivated
                }
                GuardRejection::Locked { until } => {
                    Self::login_rejected("locked");
                    AuthError::AccountLocked { until }
                }
            });
        }

        if !self.hasher.verify(password, &account.password_hash).await {
            match self.guard.record_failure(&account, now).await? {
                FailureOutcome::Counted {
                    attempts,
                    remaining,
                } => {
                    warn!(account_id = %account.id, attempts, remaining, "Failed login");
                }
                FailureOutcome::Locked { .. } => {}
            }
            Self::login_rejected("wrong_password");
            return Err(AuthError::InvalidCredentials);
        }

        self.guard.record_success(&account, now).await?;
        account.failed_login_attempts = 0;
        account.locked_until = None;
        account.last_login_at = Some(now);

        let session_expires_at = now + self.settings.session_ttl;
        let tokens = self
            .tokens
            .issue_pair_until(&account.id.to_string(), session_expires_at)
            .map_err(issue_error)?;

        let session = self
            .store
            .create_session(
                account.id,
                to_session_tokens(&tokens),
                session_expires_at,
                client,
            )
            .await?;

        info!(
            account_id = %account.id,
            session_id = %session.id,
            ip_address = client.ip_address.as_deref().unwrap_or("unknown"),
            "Login succeeded"
        );
        metrics::counter!("warden_logins_total", "outcome" => "success").increment(1);

        Ok(LoginResult {
            account: AccountInfo::from(account),
            session_id: session.id,
            tokens,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        if refresh_token.is_empty() {
            return Err(AuthError::RefreshTokenRequired);
        }

        let claims = match self.tokens.verify(refresh_token, TokenClass::Refresh) {
            Ok(claims) => claims,
            Err(TokenError::Expired) => return Err(Self::refresh_rejected("expired")),
            Err(_) => return Err(Self::refresh_rejected("invalid")),
        };

        let Some(session) = self.store.find_session_by_refresh_token(refresh_token).await? else {
            return Err(Self::refresh_rejected("unknown_session"));
        };

        if !session.is_active {
            warn!(
                session_id = %session.id,
                account_id = %session.account_id,
                "Refresh token presented for an inactive session; possible token reuse"
            );
            return Err(Self::refresh_rejected("reused"));
        }

        let now = Utc::now();
        if !session.is_refreshable(now) {
            return Err(Self::refresh_rejected("session_expired"));
        }

        if session.account_id.to_string() != claims.sub {
            warn!(
                session_id = %session.id,
                account_id = %session.account_id,
                subject = %claims.sub,
                "Refresh token subject does not own the session"
            );
            return Err(Self::refresh_rejected("subject_mismatch"));
        }

        let account_active = self
            .store
            .get_account(session.account_id)
            .await?
            .is_some_and(|account| account.is_active);
        if !account_active {
            self.store.deactivate_session(session.id).await?;
            return Err(Self::refresh_rejected("account_inactive"));
        }

        let tokens = match self.tokens.issue_pair_until(&claims.sub, session.expires_at) {
            Ok(tokens) => tokens,
            // Less than one access lifetime left; the client has to log in again
            Err(TokenError::Expired) => return Err(Self::refresh_rejected("session_ending")),
            Err(err) => return Err(issue_error(err)),
        };

        let rotated = self
            .store
            .rotate_session(session.id, refresh_token, to_session_tokens(&tokens))
            .await?;
        if !rotated {
            info!(session_id = %session.id, "Lost refresh race for session");
            return Err(Self::refresh_rejected("race_lost"));
        }

        debug!(session_id = %session.id, account_id = %session.account_id, "Session rotated");
        metrics::counter!("warden_refresh_total", "outcome" => "success").increment(1);

        Ok(tokens)
    }

    async fn logout(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<(), AuthError> {
        let access_token = access_token.filter(|t| !t.is_empty());
        let refresh_token = refresh_token.filter(|t| !t.is_empty());

        if access_token.is_none() && refresh_token.is_none() {
            return Err(AuthError::AccessTokenRequired);
        }

        let ended = self
            .store
            .deactivate_session_by_token(access_token, refresh_token)
            .await?;

        if ended == 0 {
            debug!("Logout found no active session");
        } else {
            info!(sessions = ended, "Session ended");
        }

        Ok(())
    }

    async fn verify_email(&self, token: &str) -> Result<AccountInfo, AuthError> {
        let Some(account) = self.store.find_account_by_verification_token(token).await? else {
            return Err(AuthError::EmailVerificationTokenInvalid);
        };

        let still_valid = account
            .email_verification_expires_at
            .is_some_and(|expires| expires > Utc::now());
        if !still_valid {
            return Err(AuthError::EmailVerificationTokenExpired);
        }

        if account.is_email_verified {
            return Err(AuthError::EmailAlreadyVerified);
        }

        if !self.store.mark_account_verified(account.id, token).await? {
            // Someone else consumed the token between our read and write
            return Err(AuthError::EmailAlreadyVerified);
        }

        info!(account_id = %account.id, "Email verified");
        self.spawn_welcome_email(account.email.clone(), account.username.clone());

        let account = self
            .store
            .get_account(account.id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        Ok(AccountInfo::from(account))
    }

    async fn resend_verification(&self, email: &str) -> Result<(), AuthError> {
        let account = self
            .store
            .find_account_by_email(email)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if account.is_email_verified {
            return Err(AuthError::EmailAlreadyVerified);
        }

        let token = generate_verification_token();
        self.store
            .set_verification_token(
                account.id,
                &token,
                Utc::now() + self.settings.verification_ttl,
            )
            .await?;

        self.notifier
            .send_verification(&account.email, &account.username, &token)
            .await
            .map_err(|e| {
                warn!(account_id = %account.id, error = %e, "Failed to resend verification email");
                AuthError::EmailSendFailed(e.to_string())
            })?;

        info!(account_id = %account.id, "Verification email resent");
        Ok(())
    }

    async fn authenticate(&self, access_token: &str) -> Result<AuthContext, AuthError> {
        if access_token.is_empty() {
            return Err(AuthError::AccessTokenRequired);
        }

        let claims = self
            .tokens
            .verify(access_token, TokenClass::Access)
            .map_err(|e| match e {
                TokenError::Expired => AuthError::AccessTokenExpired,
                _ => AuthError::InvalidAccessToken,
            })?;

        let session = self
            .store
            .find_active_session_by_access_token(access_token)
            .await?
            .filter(|session| session.account_id.to_string() == claims.sub)
            .ok_or(AuthError::InvalidAccessToken)?;

        let account = self
            .store
            .get_account(session.account_id)
            .await?
            .ok_or(AuthError::InvalidAccessToken)?;

        if !account.is_active {
            return Err(AuthError::AccountDeactivated);
        }

        Ok(AuthContext {
            account: AccountInfo::from(account),
            session_id: session.id,
        })
    }

    async fn get_account(&self, id: AccountId) -> Result<AccountInfo, AuthError> {
        self.store
            .get_account(id)
            .await?
            .map(AccountInfo::from)
            .ok_or(AuthError::UserNotFound)
    }

    async fn email_status(&self, id: AccountId) -> Result<EmailStatus, AuthError> {
        let account = self.get_account(id).await?;
        Ok(EmailStatus {
            email: account.email,
            is_email_verified: account.is_email_verified,
        })
    }

    async fn list_accounts(
        &self,
        filter: &AccountFilter,
        page: u64,
        limit: u64,
    ) -> Result<AccountPage, AuthError> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);

        let total = self.store.count_accounts(filter).await?;
        let accounts = self
            .store
            .list_accounts(filter, page, limit)
            .await?
            .into_iter()
            .map(AccountInfo::from)
            .collect();

        Ok(AccountPage {
            accounts,
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit),
        })
    }

    async fn update_account(
        &self,
        id: AccountId,
        update: AccountUpdate,
    ) -> Result<AccountInfo, AuthError> {
        if self.store.get_account(id).await?.is_none() {
            return Err(AuthError::UserNotFound);
        }

        if let Some(role) = update.role {
            self.store.set_account_role(id, role).await?;
            info!(account_id = %id, role = %role, "Account role changed");
        }

        if let Some(is_active) = update.is_active {
            self.store.set_account_active(id, is_active).await?;
            if is_active {
                info!(account_id = %id, "Account reactivated");
            } else {
                let ended = self.store.deactivate_sessions_for_account(id).await?;
                info!(account_id = %id, sessions_ended = ended, "Account deactivated");
            }
        }

        self.get_account(id).await
    }
}
