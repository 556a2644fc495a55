//! Refresh-token rotation engine.
//!
//! The engine holds no session state of its own. Every decision is made
//! against the store, whose conditional updates (`revoked_at IS NULL`) are the
//! only coordination point between concurrent callers and replicas.

use crate::audit::{SecurityEvent, SecurityEventKind, SecurityEventSink, TracingEventSink};
use crate::clock::Clock;
use crate::config::RotationPolicy;
use crate::error::RotationError;
use crate::jwt::AccessTokenSigner;
use crate::metrics;
use crate::refresh::generator::{hashes_match, RefreshTokenGenerator};
use crate::refresh::limiter::SessionLimiter;
use crate::refresh::record::{describe_device, NewRefreshToken, RefreshTokenRecord, RevokeReason, TokenState};
use crate::storage::RefreshTokenStore;
use chrono::{DateTime, Utc};
use rust_common::PlatformError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Request metadata recorded with every issued token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    pub ip: String,
    pub user_agent: String,
    /// Raw device fingerprint; only its hash is persisted.
    pub device_fingerprint: Option<String>,
    /// Display name; derived from the user agent when absent.
    pub device_name: Option<String>,
}

impl ClientContext {
    /// Context without fingerprint or device name.
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.into(),
            device_fingerprint: None,
            device_name: None,
        }
    }

    /// Attach a device fingerprint.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.device_fingerprint = Some(fingerprint.into());
        self
    }

    /// Attach an explicit device name.
    #[must_use]
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }

    fn resolved_device_name(&self) -> String {
        self.device_name
            .clone()
            .unwrap_or_else(|| describe_device(&self.user_agent))
    }
}

/// Credentials handed back to the client after login or refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    /// Raw refresh token. Returned exactly once and never persisted.
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish()
    }
}

/// Result of the rotation transaction.
enum Persisted {
    /// Presented token rotated; the new record and any evicted sessions.
    Rotated {
        record: RefreshTokenRecord,
        evicted: Vec<RefreshTokenRecord>,
    },
    /// The presented token was no longer unrevoked when the transaction ran.
    Superseded,
}

fn unexpected_conflict(err: PlatformError) -> PlatformError {
    match err {
        PlatformError::Conflict(msg) => PlatformError::unavailable(format!("rotation aborted: {}", msg)),
        other => other,
    }
}

/// Issues, rotates and revokes refresh tokens.
pub struct TokenRotationEngine {
    store: Arc<dyn RefreshTokenStore>,
    signer: Arc<dyn AccessTokenSigner>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn SecurityEventSink>,
    generator: RefreshTokenGenerator,
    limiter: SessionLimiter,
    policy: RotationPolicy,
}

impl fmt::Debug for TokenRotationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRotationEngine")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl TokenRotationEngine {
    /// Create an engine that reports security events to the log.
    pub fn new(
        store: Arc<dyn RefreshTokenStore>,
        signer: Arc<dyn AccessTokenSigner>,
        clock: Arc<dyn Clock>,
        policy: RotationPolicy,
    ) -> Self {
        Self {
            store,
            signer,
            clock,
            events: Arc::new(TracingEventSink),
            generator: RefreshTokenGenerator::new(policy.refresh_token_bytes),
            limiter: SessionLimiter::new(policy.max_concurrent_sessions),
            policy,
        }
    }

    /// Replace the security event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn SecurityEventSink>) -> Self {
        self.events = events;
        self
    }

    /// Active policy.
    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    /// Start a new token family for a freshly authenticated user.
    ///
    /// # Errors
    ///
    /// `Signing` if the access token cannot be produced, `StoreUnavailable`
    /// if the record cannot be persisted. Nothing is stored in either case.
    pub async fn issue_initial(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
        client: &ClientContext,
    ) -> Result<TokenPair, RotationError> {
        let now = self.clock.now();
        let access = self.signer.issue(user_id, tenant_id, now).await?;

        let refresh_token = self.generator.generate();
        let token = self.new_record(
            &refresh_token,
            user_id,
            tenant_id.map(str::to_string),
            RefreshTokenGenerator::generate_family_id(),
            client,
            now,
        );

        let (record, evicted) = self
            .bounded("issue_initial", self.persist_issue(token, now))
            .await
            .map_err(|e| {
                warn!(user_id = %user_id, error = %e, "Failed to persist new session");
                RotationError::StoreUnavailable
            })?;

        metrics::record_token_issued("login");
        self.report_evictions(&evicted, now);
        info!(
            user_id = %user_id,
            family_id = %record.token_family,
            device = %record.device_name,
            "Issued new token family"
        );

        Ok(TokenPair {
            access_token: access.token,
            refresh_token,
            access_expires_at: access.expires_at,
            refresh_expires_at: record.expires_at,
        })
    }

    /// Exchange an active refresh token for a new pair.
    ///
    /// Presenting a token that was already rotated or revoked revokes its
    /// whole family and fails with `TokenReuseDetected`. This also happens to
    /// a legitimate client that retries after a rotation whose response it
    /// never received; callers must render it as "sign in again".
    ///
    /// # Errors
    ///
    /// Any [`RotationError`]. Only `TokenReuseDetected` leaves the store changed.
    pub async fn rotate(&self, raw_token: &str, client: &ClientContext) -> Result<TokenPair, RotationError> {
        let result = self.try_rotate(raw_token, client).await;
        match &result {
            Ok(_) => metrics::record_token_refreshed("success"),
            Err(e) => metrics::record_token_refreshed(e.metric_label()),
        }
        result
    }

    async fn try_rotate(&self, raw_token: &str, client: &ClientContext) -> Result<TokenPair, RotationError> {
        if !self.generator.is_well_formed(raw_token) {
            debug!(ip = %client.ip, "Rejected malformed refresh token");
            return Err(RotationError::Malformed);
        }

        let token_hash = RefreshTokenGenerator::hash(raw_token);
        let now = self.clock.now();

        let record = self
            .bounded("find_by_hash", self.store.find_by_hash(&token_hash))
            .await?
            .filter(|r| !r.is_deleted)
            .ok_or(RotationError::UnknownToken)?;

        match record.state(now) {
            TokenState::Active => {}
            TokenState::Expired => {
                debug!(
                    user_id = %record.user_id,
                    family_id = %record.token_family,
                    "Rejected expired refresh token"
                );
                return Err(RotationError::Expired);
            }
            TokenState::Rotated | TokenState::Revoked => {
                return Err(self
                    .revoke_compromised_family(&record, SecurityEventKind::ReuseDetected, &client.ip, now)
                    .await);
            }
        }

        if !self.fingerprint_matches(&record, client) {
            if self.policy.strict_device_binding {
                return Err(self
                    .revoke_compromised_family(
                        &record,
                        SecurityEventKind::DeviceMismatch { escalated: true },
                        &client.ip,
                        now,
                    )
                    .await);
            }
            let kind = SecurityEventKind::DeviceMismatch { escalated: false };
            metrics::record_security_event(kind.as_str());
            self.events
                .publish(SecurityEvent::for_record(kind, &record, Some(&client.ip), now));
            return Err(RotationError::DeviceMismatch);
        }

        let access = self
            .signer
            .issue(&record.user_id, record.tenant_id.as_deref(), now)
            .await?;

        let refresh_token = self.generator.generate();
        let token = self.new_record(
            &refresh_token,
            &record.user_id,
            record.tenant_id.clone(),
            record.token_family,
            client,
            now,
        );

        let (next, evicted) = match self
            .bounded("rotate", self.persist_rotation(&record.token_hash, token, now))
            .await
        {
            Ok(Persisted::Rotated { record: next, evicted }) => (next, evicted),
            Ok(Persisted::Superseded) => {
                // A concurrent rotation of the same token won the compare-and-set.
                return Err(self
                    .revoke_compromised_family(&record, SecurityEventKind::ReuseDetected, &client.ip, now)
                    .await);
            }
            Err(PlatformError::NotFound(_)) => return Err(RotationError::UnknownToken),
            Err(e) => {
                warn!(
                    family_id = %record.token_family,
                    error = %e,
                    "Rotation not persisted; presented token remains active"
                );
                return Err(RotationError::StoreUnavailable);
            }
        };

        metrics::record_token_issued("rotation");
        metrics::record_tokens_revoked(RevokeReason::Rotated.as_str(), 1);
        self.report_evictions(&evicted, now);
        info!(
            user_id = %next.user_id,
            family_id = %next.token_family,
            "Rotated refresh token"
        );

        Ok(TokenPair {
            access_token: access.token,
            refresh_token,
            access_expires_at: access.expires_at,
            refresh_expires_at: next.expires_at,
        })
    }

    /// Revoke one session without touching the rest of its family.
    ///
    /// Returns `false` if the record is unknown or no longer active.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` on store failure or timeout.
    pub async fn revoke_session(
        &self,
        token_hash: &str,
        reason: RevokeReason,
        revoked_by_ip: Option<&str>,
    ) -> Result<bool, RotationError> {
        let now = self.clock.now();
        let Some(record) = self
            .bounded("find_by_hash", self.store.find_by_hash(token_hash))
            .await?
        else {
            return Ok(false);
        };

        match self
            .bounded(
                "mark_revoked",
                self.store.mark_revoked(token_hash, reason, revoked_by_ip, now),
            )
            .await
        {
            Ok(()) => {}
            Err(PlatformError::Conflict(_) | PlatformError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        metrics::record_tokens_revoked(reason.as_str(), 1);
        self.events.publish(SecurityEvent::for_record(
            SecurityEventKind::SessionRevoked { reason },
            &record,
            revoked_by_ip,
            now,
        ));
        info!(
            user_id = %record.user_id,
            family_id = %record.token_family,
            reason = reason.as_str(),
            "Revoked session"
        );
        Ok(true)
    }

    /// Like [`revoke_session`](Self::revoke_session), for a raw token.
    ///
    /// # Errors
    ///
    /// `Malformed` if the token fails the structural check, otherwise as
    /// `revoke_session`.
    pub async fn revoke_session_by_token(
        &self,
        raw_token: &str,
        reason: RevokeReason,
        revoked_by_ip: Option<&str>,
    ) -> Result<bool, RotationError> {
        if !self.generator.is_well_formed(raw_token) {
            return Err(RotationError::Malformed);
        }
        self.revoke_session(&RefreshTokenGenerator::hash(raw_token), reason, revoked_by_ip)
            .await
    }

    /// Revoke every family of a user (password change, account compromise).
    ///
    /// Returns the number of records revoked.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` on store failure or timeout. Families revoked before
    /// the failure stay revoked; calling again finishes the job.
    pub async fn revoke_all_for_user(&self, user_id: &str, reason: RevokeReason) -> Result<usize, RotationError> {
        let now = self.clock.now();
        let families = self
            .bounded("find_families_by_user", self.store.find_families_by_user(user_id))
            .await?;

        let mut revoked = 0;
        for family in &families {
            revoked += self
                .bounded("revoke_family", self.store.revoke_family(*family, reason, now))
                .await?;
        }

        if revoked == 0 {
            debug!(user_id = %user_id, "No active sessions to revoke");
            return Ok(0);
        }

        metrics::record_tokens_revoked(reason.as_str(), revoked);
        self.events.publish(SecurityEvent::for_user(
            SecurityEventKind::SessionRevoked { reason },
            user_id,
            now,
        ));
        info!(
            user_id = %user_id,
            families = families.len(),
            revoked,
            reason = reason.as_str(),
            "Revoked all sessions for user"
        );
        Ok(revoked)
    }

    /// Run a store call under the configured timeout.
    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, PlatformError>
    where
        F: Future<Output = Result<T, PlatformError>>,
    {
        match tokio::time::timeout(self.policy.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = u64::try_from(self.policy.store_timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(operation, timeout_ms, "Store call timed out");
                Err(PlatformError::timeout(operation))
            }
        }
    }

    async fn persist_issue(
        &self,
        token: NewRefreshToken,
        now: DateTime<Utc>,
    ) -> Result<(RefreshTokenRecord, Vec<RefreshTokenRecord>), PlatformError> {
        let mut tx = self.store.begin().await?;
        let record = tx.insert(token).await?;
        let evicted = self.limiter.enforce(tx.as_mut(), &record.user_id, now).await?;
        tx.commit().await?;
        Ok((record, evicted))
    }

    async fn persist_rotation(
        &self,
        presented_hash: &str,
        token: NewRefreshToken,
        now: DateTime<Utc>,
    ) -> Result<Persisted, PlatformError> {
        let mut tx = self.store.begin().await?;
        match tx.mark_rotated(presented_hash, &token.token_hash, now).await {
            Ok(()) => {}
            Err(PlatformError::Conflict(_)) => return Ok(Persisted::Superseded),
            Err(e) => return Err(e),
        }
        // Past this point a conflict concerns some other record and is not
        // evidence about the presented token.
        let record = tx.insert(token).await.map_err(unexpected_conflict)?;
        let evicted = self
            .limiter
            .enforce(tx.as_mut(), &record.user_id, now)
            .await
            .map_err(unexpected_conflict)?;
        tx.commit().await?;
        Ok(Persisted::Rotated { record, evicted })
    }

    /// Revoke the family of `record` and build the error to return.
    ///
    /// If the revocation itself fails the caller gets `StoreUnavailable`; a
    /// retry observes the same state and tries again.
    async fn revoke_compromised_family(
        &self,
        record: &RefreshTokenRecord,
        kind: SecurityEventKind,
        ip: &str,
        now: DateTime<Utc>,
    ) -> RotationError {
        let revoked = match self
            .bounded(
                "revoke_family",
                self.store
                    .revoke_family(record.token_family, RevokeReason::ReuseDetected, now),
            )
            .await
        {
            Ok(revoked) => revoked,
            Err(e) => {
                warn!(
                    family_id = %record.token_family,
                    error = %e,
                    "Failed to revoke compromised token family"
                );
                return RotationError::StoreUnavailable;
            }
        };

        warn!(
            event_type = kind.as_str(),
            user_id = %record.user_id,
            family_id = %record.token_family,
            ip = %ip,
            revoked,
            "Refresh token reuse detected - token family revoked"
        );
        metrics::record_tokens_revoked(RevokeReason::ReuseDetected.as_str(), revoked);
        metrics::record_security_event(kind.as_str());
        self.events
            .publish(SecurityEvent::for_record(kind, record, Some(ip), now));
        RotationError::TokenReuseDetected
    }

    fn fingerprint_matches(&self, record: &RefreshTokenRecord, client: &ClientContext) -> bool {
        if !self.policy.device_fingerprinting {
            return true;
        }
        let Some(bound) = record.device_fingerprint.as_deref() else {
            return true;
        };
        client
            .device_fingerprint
            .as_deref()
            .map(RefreshTokenGenerator::hash_fingerprint)
            .is_some_and(|presented| hashes_match(bound, &presented))
    }

    fn new_record(
        &self,
        raw_token: &str,
        user_id: &str,
        tenant_id: Option<String>,
        token_family: uuid::Uuid,
        client: &ClientContext,
        now: DateTime<Utc>,
    ) -> NewRefreshToken {
        let device_fingerprint = if self.policy.device_fingerprinting {
            client
                .device_fingerprint
                .as_deref()
                .map(RefreshTokenGenerator::hash_fingerprint)
        } else {
            None
        };

        NewRefreshToken {
            token_hash: RefreshTokenGenerator::hash(raw_token),
            user_id: user_id.to_string(),
            tenant_id,
            token_family,
            issued_at: now,
            expires_at: now + self.policy.refresh_token_ttl,
            created_by_ip: client.ip.clone(),
            device_fingerprint,
            user_agent: client.user_agent.clone(),
            device_name: client.resolved_device_name(),
        }
    }

    fn report_evictions(&self, evicted: &[RefreshTokenRecord], now: DateTime<Utc>) {
        if evicted.is_empty() {
            return;
        }
        metrics::record_tokens_revoked(RevokeReason::SessionLimitExceeded.as_str(), evicted.len());
        for record in evicted {
            self.events.publish(SecurityEvent::for_record(
                SecurityEventKind::SessionEvicted,
                record,
                None,
                now,
            ));
        }
    }
}
