//! Persistence contract for refresh-token records.
//!
//! Every mutating operation is conditional on `revoked_at IS NULL` and reports
//! a lost race as [`PlatformError::Conflict`]. Multi-step changes go through a
//! [`StoreTransaction`]; dropping one without `commit` discards its changes.

use crate::refresh::record::{NewRefreshToken, RefreshTokenRecord, RevokeReason};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_common::PlatformError;
use uuid::Uuid;

/// Unit of work spanning several conditional updates.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Insert a new active record. Fails with `Conflict` if the hash exists.
    async fn insert(&mut self, token: NewRefreshToken) -> Result<RefreshTokenRecord, PlatformError>;

    /// Mark `old_hash` as rotated into `new_hash`, only if it is still unrevoked.
    async fn mark_rotated(
        &mut self,
        old_hash: &str,
        new_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PlatformError>;

    /// Revoke a single record, only if it is still unrevoked.
    async fn mark_revoked(
        &mut self,
        token_hash: &str,
        reason: RevokeReason,
        revoked_by_ip: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), PlatformError>;

    /// Active records of a user as seen by this transaction, oldest first.
    async fn find_active_by_user(
        &mut self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshTokenRecord>, PlatformError>;

    /// Apply every change atomically.
    async fn commit(self: Box<Self>) -> Result<(), PlatformError>;
}

/// Durable store of refresh-token records.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Look up a record by token hash, including soft-deleted ones.
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, PlatformError>;

    /// Active records of a user ordered by `issued_at`, then insertion sequence.
    async fn find_active_by_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshTokenRecord>, PlatformError>;

    /// Every token family that has at least one record for the user.
    async fn find_families_by_user(&self, user_id: &str) -> Result<Vec<Uuid>, PlatformError>;

    /// Revoke every unrevoked record of a family in one all-or-nothing step.
    ///
    /// Returns the number of records revoked.
    async fn revoke_family(
        &self,
        token_family: Uuid,
        reason: RevokeReason,
        now: DateTime<Utc>,
    ) -> Result<usize, PlatformError>;

    /// Open a transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, PlatformError>;

    /// Retention sweep: flag records that expired at or before `cutoff` as deleted.
    ///
    /// Returns the number of records newly flagged.
    async fn sweep_expired(&self, cutoff: DateTime<Utc>) -> Result<usize, PlatformError>;

    /// Insert a record in its own transaction.
    async fn insert(&self, token: NewRefreshToken) -> Result<RefreshTokenRecord, PlatformError> {
        let mut tx = self.begin().await?;
        let record = tx.insert(token).await?;
        tx.commit().await?;
        Ok(record)
    }

    /// Compare-and-set rotation in its own transaction.
    async fn mark_rotated(
        &self,
        old_hash: &str,
        new_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PlatformError> {
        let mut tx = self.begin().await?;
        tx.mark_rotated(old_hash, new_hash, now).await?;
        tx.commit().await
    }

    /// Compare-and-set revocation in its own transaction.
    async fn mark_revoked(
        &self,
        token_hash: &str,
        reason: RevokeReason,
        revoked_by_ip: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), PlatformError> {
        let mut tx = self.begin().await?;
        tx.mark_revoked(token_hash, reason, revoked_by_ip, now).await?;
        tx.commit().await
    }
}
