//! Optional background purge of dead session rows.
//!
//! Expired and inactive sessions are already rejected on use; this only keeps
//! the table from growing without bound.

use anyhow::Result;
use chrono::Utc;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{error, info};

use crate::config::HousekeepingConfig;
use crate::db::Store;

pub struct SessionJanitor {
    store: Store,
    interval_minutes: u64,
}

impl SessionJanitor {
    #[must_use]
    pub const fn new(store: Store, config: &HousekeepingConfig) -> Self {
        Self {
            store,
            interval_minutes: config.session_purge_interval_minutes,
        }
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.interval_minutes > 0
    }

    /// Deletes inactive and fully expired sessions, returning how many went.
    pub async fn run_once(&self) -> Result<u64> {
        let start = std::time::Instant::now();
        info!(event = "job_started", job_name = "purge_sessions", "Starting session purge");

        let purged = self.store.purge_sessions(Utc::now()).await?;

        info!(
            event = "job_finished",
            job_name = "purge_sessions",
            purged,
            duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Session purge finished"
        );
        Ok(purged)
    }

    /// Runs forever; spawn it and abort the handle on shutdown.
    pub async fn start(self) {
        if !self.enabled() {
            info!("Session purge is disabled in config");
            return;
        }

        info!("Session purge running every {}m", self.interval_minutes);

        let mut ticker = interval(Duration::from_secs(self.interval_minutes.saturating_mul(60)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                error!(event = "job_failed", job_name = "purge_sessions", error = %e, "Session purge failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewAccount, SessionTokens};
    use crate::domain::{ClientMeta, Role};
    use chrono::TimeDelta;

    fn tokens(tag: &str) -> SessionTokens {
        let now = Utc::now();
        SessionTokens {
            access_token: format!("access-{tag}"),
            access_token_expires_at: now + TimeDelta::minutes(15),
            refresh_token: format!("refresh-{tag}"),
            refresh_token_expires_at: now + TimeDelta::days(1),
        }
    }

    #[tokio::test]
    async fn purges_inactive_and_expired_sessions_only() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let account = store
            .create_account(NewAccount {
                username: "janitor".to_string(),
                email: "janitor@example.com".to_string(),
                password_hash: "unused".to_string(),
                role: Role::User,
                email_verification_token: "tok".to_string(),
                email_verification_expires_at: Utc::now(),
            })
            .await
            .unwrap();
        let client = ClientMeta::default();
        let now = Utc::now();

        let live = store
            .create_session(account.id, tokens("live"), now + TimeDelta::days(1), &client)
            .await
            .unwrap();
        let ended = store
            .create_session(account.id, tokens("ended"), now + TimeDelta::days(1), &client)
            .await
            .unwrap();
        store.deactivate_session(ended.id).await.unwrap();
        store
            .create_session(account.id, tokens("stale"), now - TimeDelta::minutes(1), &client)
            .await
            .unwrap();

        let janitor = SessionJanitor::new(
            store.clone(),
            &HousekeepingConfig {
                session_purge_interval_minutes: 5,
            },
        );
        assert!(janitor.enabled());
        assert_eq!(janitor.run_once().await.unwrap(), 2);

        let remaining = store.list_sessions_for_account(account.id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, live.id);
    }

    #[test]
    fn disabled_by_default() {
        let config = HousekeepingConfig::default();
        assert_eq!(config.session_purge_interval_minutes, 0);
    }
}
