//! In-process reference implementation of [`RefreshTokenStore`].
//!
//! Transactions hold an owned lock on the whole state and stage their writes
//! on a copy, so they are serialisable and all-or-nothing. Fault hooks let
//! tests simulate a slow or failing backend.

use crate::refresh::record::{NewRefreshToken, RefreshTokenRecord, RevokeReason};
use crate::storage::store::{RefreshTokenStore, StoreTransaction};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_common::PlatformError;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct StoreState {
    records: HashMap<String, RefreshTokenRecord>,
    next_id: u64,
}

impl StoreState {
    fn insert(&mut self, token: NewRefreshToken) -> Result<RefreshTokenRecord, PlatformError> {
        if self.records.contains_key(&token.token_hash) {
            return Err(PlatformError::conflict("token hash already exists"));
        }
        self.next_id += 1;
        let record = token.into_record(self.next_id);
        self.records.insert(record.token_hash.clone(), record.clone());
        Ok(record)
    }

    fn unrevoked_mut(&mut self, token_hash: &str) -> Result<&mut RefreshTokenRecord, PlatformError> {
        let record = self
            .records
            .get_mut(token_hash)
            .ok_or_else(|| PlatformError::not_found("refresh token"))?;
        if !record.is_unrevoked() {
            return Err(PlatformError::conflict("refresh token already revoked"));
        }
        Ok(record)
    }

    fn mark_rotated(
        &mut self,
        old_hash: &str,
        new_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PlatformError> {
        let record = self.unrevoked_mut(old_hash)?;
        record.revoked_at = Some(now);
        record.replaced_by_token_hash = Some(new_hash.to_string());
        record.revoke_reason = Some(RevokeReason::Rotated);
        Ok(())
    }

    fn mark_revoked(
        &mut self,
        token_hash: &str,
        reason: RevokeReason,
        revoked_by_ip: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), PlatformError> {
        let record = self.unrevoked_mut(token_hash)?;
        record.revoked_at = Some(now);
        record.revoked_by_ip = revoked_by_ip.map(str::to_string);
        record.revoke_reason = Some(reason);
        Ok(())
    }

    fn active_by_user(&self, user_id: &str, now: DateTime<Utc>) -> Vec<RefreshTokenRecord> {
        let mut active: Vec<_> = self
            .records
            .values()
            .filter(|r| r.user_id == user_id && !r.is_deleted && r.is_active(now))
            .cloned()
            .collect();
        active.sort_by_key(RefreshTokenRecord::age_key);
        active
    }
}

#[derive(Debug, Default)]
struct Faults {
    latency_ms: AtomicU64,
    unavailable: AtomicBool,
    fail_commits: AtomicBool,
}

/// Thread-safe in-memory store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRefreshTokenStore {
    state: Arc<Mutex<StoreState>>,
    faults: Arc<Faults>,
}

impl InMemoryRefreshTokenStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.faults.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Make every call fail with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make every commit fail (changes are discarded).
    pub fn set_fail_commits(&self, fail: bool) {
        self.faults.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// All records of a family, in insertion order.
    pub async fn family_records(&self, token_family: Uuid) -> Vec<RefreshTokenRecord> {
        let state = self.state.lock().await;
        let mut records: Vec<_> = state
            .records
            .values()
            .filter(|r| r.token_family == token_family)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }

    /// Total number of records, deleted or not.
    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn simulate_io(&self) -> Result<(), PlatformError> {
        let latency = self.faults.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(PlatformError::unavailable("in-memory store offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, PlatformError> {
        self.simulate_io().await?;
        Ok(self.state.lock().await.records.get(token_hash).cloned())
    }

    async fn find_active_by_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshTokenRecord>, PlatformError> {
        self.simulate_io().await?;
        Ok(self.state.lock().await.active_by_user(user_id, now))
    }

    async fn find_families_by_user(&self, user_id: &str) -> Result<Vec<Uuid>, PlatformError> {
        self.simulate_io().await?;
        let state = self.state.lock().await;
        let families: BTreeSet<Uuid> = state
            .records
            .values()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.token_family)
            .collect();
        Ok(families.into_iter().collect())
    }

    async fn revoke_family(
        &self,
        token_family: Uuid,
        reason: RevokeReason,
        now: DateTime<Utc>,
    ) -> Result<usize, PlatformError> {
        self.simulate_io().await?;
        let mut state = self.state.lock().await;
        let mut revoked = 0;
        for record in state
            .records
            .values_mut()
            .filter(|r| r.token_family == token_family && r.is_unrevoked())
        {
            record.revoked_at = Some(now);
            record.revoke_reason = Some(reason);
            revoked += 1;
        }
        debug!(family_id = %token_family, revoked, "Family revoked in store");
        Ok(revoked)
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, PlatformError> {
        self.simulate_io().await?;
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            faults: Arc::clone(&self.faults),
        }))
    }

    async fn sweep_expired(&self, cutoff: DateTime<Utc>) -> Result<usize, PlatformError> {
        self.simulate_io().await?;
        let mut state = self.state.lock().await;
        let mut swept = 0;
        for record in state
            .records
            .values_mut()
            .filter(|r| !r.is_deleted && r.expires_at <= cutoff)
        {
            record.is_deleted = true;
            swept += 1;
        }
        Ok(swept)
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<StoreState>,
    working: StoreState,
    faults: Arc<Faults>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn insert(&mut self, token: NewRefreshToken) -> Result<RefreshTokenRecord, PlatformError> {
        self.working.insert(token)
    }

    async fn mark_rotated(
        &mut self,
        old_hash: &str,
        new_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PlatformError> {
        self.working.mark_rotated(old_hash, new_hash, now)
    }

    async fn mark_revoked(
        &mut self,
        token_hash: &str,
        reason: RevokeReason,
        revoked_by_ip: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), PlatformError> {
        self.working.mark_revoked(token_hash, reason, revoked_by_ip, now)
    }

    async fn find_active_by_user(
        &mut self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshTokenRecord>, PlatformError> {
        Ok(self.working.active_by_user(user_id, now))
    }

    async fn commit(self: Box<Self>) -> Result<(), PlatformError> {
        if self.faults.fail_commits.load(Ordering::SeqCst) {
            return Err(PlatformError::unavailable("commit rejected"));
        }
        let MemoryTransaction {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }
}
