//! Per-user cap on concurrently active sessions.

use crate::refresh::record::{RefreshTokenRecord, RevokeReason};
use crate::storage::StoreTransaction;
use chrono::{DateTime, Utc};
use rust_common::PlatformError;
use tracing::{debug, info};

/// Evicts the oldest active sessions of a user above the cap.
///
/// Runs inside the transaction of the issuance that triggered it, so two
/// concurrent logins cannot both slip under the cap.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimiter {
    max_sessions: usize,
}

impl SessionLimiter {
    /// Limiter allowing `max_sessions` active sessions. A cap of zero is treated as one.
    #[must_use]
    pub fn new(max_sessions: usize) -> Self {
        Self {
            max_sessions: max_sessions.max(1),
        }
    }

    /// Configured cap.
    #[must_use]
    pub const fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Revoke the oldest `count - cap` active records of `user_id`.
    ///
    /// Only the evicted token itself is revoked; its family history is left
    /// alone. Returns the evicted records as they were before revocation.
    /// A candidate that a concurrent writer revoked first is already gone and
    /// is left out of the result.
    ///
    /// # Errors
    ///
    /// Propagates store failures other than a lost compare-and-set.
    pub async fn enforce(
        &self,
        tx: &mut dyn StoreTransaction,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshTokenRecord>, PlatformError> {
        let mut active = tx.find_active_by_user(user_id, now).await?;
        if active.len() <= self.max_sessions {
            return Ok(Vec::new());
        }

        // Stores promise this order; sort anyway so ties are deterministic.
        active.sort_by_key(RefreshTokenRecord::age_key);
        let excess = active.len() - self.max_sessions;
        active.truncate(excess);

        let mut evicted = Vec::with_capacity(active.len());
        for record in active {
            match tx
                .mark_revoked(&record.token_hash, RevokeReason::SessionLimitExceeded, None, now)
                .await
            {
                Ok(()) => {}
                Err(PlatformError::Conflict(_)) => {
                    debug!(
                        user_id = %user_id,
                        family_id = %record.token_family,
                        "Eviction candidate already revoked"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
            info!(
                user_id = %user_id,
                family_id = %record.token_family,
                issued_at = %record.issued_at,
                "Evicted session over concurrent-session cap"
            );
            evicted.push(record);
        }
        Ok(evicted)
    }
}
