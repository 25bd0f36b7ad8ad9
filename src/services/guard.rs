//! Failed-login counting and temporary lockout.

use chrono::{DateTime, TimeDelta, Utc};
use tracing::warn;

use crate::config::LockoutConfig;
use crate::db::{Account, Store};

/// Why an account may not attempt authentication right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardRejection {
    Inactive,
    Locked { until: DateTime<Utc> },
}

/// Outcome of recording a wrong-password attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Counter bumped; `remaining` attempts left before lockout.
    Counted { attempts: u32, remaining: u32 },
    /// Threshold reached; the account is now locked.
    Locked { until: DateTime<Utc> },
}

#[derive(Clone)]
pub struct AccountGuard {
    store: Store,
    max_failed_attempts: u32,
    lockout: TimeDelta,
}

impl AccountGuard {
    #[must_use]
    pub fn new(store: Store, config: &LockoutConfig) -> Self {
        let lockout = i64::try_from(config.lockout_seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);

        Self {
            store,
            max_failed_attempts: config.max_failed_attempts.max(1),
            lockout,
        }
    }

    /// Inactive takes precedence over locked.
    pub fn check_authorized_to_attempt(
        &self,
        account: &Account,
        now: DateTime<Utc>,
    ) -> Result<(), GuardRejection> {
        if !account.is_active {
            return Err(GuardRejection::Inactive);
        }

        match account.locked_until {
            Some(until) if until > now => Err(GuardRejection::Locked { until }),
            _ => Ok(()),
        }
    }

    pub async fn record_failure(
        &self,
        account: &Account,
        now: DateTime<Utc>,
    ) -> anyhow::Result<FailureOutcome> {
        let attempts = self.store.increment_failed_logins(account.id).await?;

        if attempts >= self.max_failed_attempts {
            let until = now.checked_add_signed(self.lockout).unwrap_or(DateTime::<Utc>::MAX_UTC);
            self.store.lock_account(account.id, until).await?;
            warn!(
                account_id = %account.id,
                attempts,
                locked_until = %until,
                "Account locked after repeated failed logins"
            );
            metrics::counter!("warden_lockouts_total").increment(1);
            return Ok(FailureOutcome::Locked { until });
        }

        Ok(FailureOutcome::Counted {
            attempts,
            remaining: self.max_failed_attempts - attempts,
        })
    }

    pub async fn record_success(&self, account: &Account, now: DateTime<Utc>) -> anyhow::Result<()> {
        self.store.record_successful_login(account.id, now).await
    }
}
