pub mod hasher;
pub use hasher::{CredentialHasher, HasherError};

pub mod tokens;
pub use tokens::{Claims, IssuedToken, TokenError, TokenIssuer, TokenPair};

pub mod guard;
pub use guard::{AccountGuard, FailureOutcome, GuardRejection};

pub mod notifier;
pub use notifier::{LogNotifier, MessageRenderer, Notifier, NotifyError, WebhookNotifier};

pub mod auth_service;
pub mod auth_service_impl;
pub use auth_service::{
    AccountInfo, AccountPage, AccountUpdate, AuthContext, AuthError, AuthService, EmailStatus,
    LoginResult, RegisterInput,
};
pub use auth_service_impl::{AuthSettings, SeaOrmAuthService};
