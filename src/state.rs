use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use crate::config::{Config, NotifierBackend};
use crate::db::Store;
use crate::services::{
    AccountGuard, AuthService, AuthSettings, CredentialHasher, LogNotifier, MessageRenderer,
    Notifier, SeaOrmAuthService, TokenIssuer, WebhookNotifier,
};

/// Builds the notification sink selected in the config.
pub fn build_notifier(config: &Config) -> anyhow::Result<Arc<dyn Notifier>> {
    let renderer = MessageRenderer::new(
        &config.server,
        &config.notifications,
        config.tokens.email_verification_ttl_seconds,
    )
        .context("Failed to build notification renderer")?;

    let notifier: Arc<dyn Notifier> = match config.notifications.backend {
        NotifierBackend::Log => Arc::new(LogNotifier::new(renderer)),
        NotifierBackend::Webhook => Arc::new(
            WebhookNotifier::new(renderer, &config.notifications)
                .context("Failed to build webhook notifier")?,
        ),
    };

    info!(backend = ?config.notifications.backend, "Notification sink ready");
    Ok(notifier)
}

/// Process-wide services, built once at startup and shared by handle.
#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<Config>,

    pub store: Store,

    pub auth_service: Arc<dyn AuthService>,
}

impl SharedState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let notifier = build_notifier(&config)?;
        Self::with_notifier(config, notifier).await
    }

    pub async fn with_notifier(
        config: Config,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        let store = Store::with_pool_options(
            &config.general.database_url,
            config.general.max_db_connections,
            config.general.min_db_connections,
        )
        .await?;

        Self::with_store(config, store, notifier)
    }

    pub fn with_store(
        config: Config,
        store: Store,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        let hasher =
            CredentialHasher::new(&config.security).context("Invalid password hashing config")?;
        let tokens = Arc::new(TokenIssuer::new(&config.tokens).context("Invalid token config")?);
        let guard = AccountGuard::new(store.clone(), &config.security.lockout);

        let auth_service = Arc::new(SeaOrmAuthService::new(
            store.clone(),
            hasher,
            tokens,
            guard,
            notifier,
            AuthSettings::from_config(&config),
        )) as Arc<dyn AuthService>;

        Ok(Self {
            config: Arc::new(config),
            store,
            auth_service,
        })
    }
}
