//! Security events raised by the rotation engine.
//!
//! Reuse detection must reach an external audit or alerting pipeline. The
//! engine publishes to a [`SecurityEventSink`]; the embedding service decides
//! where events go.

use crate::refresh::record::{RefreshTokenRecord, RevokeReason};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecurityEventKind {
    /// A rotated or revoked token was presented; the family was revoked.
    ReuseDetected,
    /// Presented device fingerprint did not match the bound one.
    DeviceMismatch {
        /// Whether strict binding escalated the mismatch to a family revocation.
        escalated: bool,
    },
    /// A session was evicted to honour the concurrent-session cap.
    SessionEvicted,
    /// Sessions were revoked on request (logout, admin action).
    SessionRevoked {
        /// Reason given by the caller.
        reason: RevokeReason,
    },
}

impl SecurityEventKind {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ReuseDetected => "REUSE_DETECTED",
            Self::DeviceMismatch { escalated: true } => "DEVICE_MISMATCH_ESCALATED",
            Self::DeviceMismatch { escalated: false } => "DEVICE_MISMATCH",
            Self::SessionEvicted => "SESSION_EVICTED",
            Self::SessionRevoked { .. } => "SESSION_REVOKED",
        }
    }

    /// Whether the event indicates possible credential theft.
    #[must_use]
    pub const fn is_alert(&self) -> bool {
        matches!(
            self,
            Self::ReuseDetected | Self::DeviceMismatch { escalated: true }
        )
    }
}

/// A single security event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    pub user_id: String,
    pub tenant_id: Option<String>,
    pub token_family: Option<Uuid>,
    /// Address of the request that triggered the event, if any.
    pub ip: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl SecurityEvent {
    /// Event concerning the family of `record`.
    #[must_use]
    pub fn for_record(
        kind: SecurityEventKind,
        record: &RefreshTokenRecord,
        ip: Option<&str>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            user_id: record.user_id.clone(),
            tenant_id: record.tenant_id.clone(),
            token_family: Some(record.token_family),
            ip: ip.map(str::to_string),
            occurred_at,
        }
    }

    /// Event concerning every session of a user.
    #[must_use]
    pub fn for_user(kind: SecurityEventKind, user_id: &str, occurred_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            user_id: user_id.to_string(),
            tenant_id: None,
            token_family: None,
            ip: None,
            occurred_at,
        }
    }
}

/// Destination for security events. Publishing must not fail the caller.
pub trait SecurityEventSink: Send + Sync {
    /// Deliver one event.
    fn publish(&self, event: SecurityEvent);
}

/// Writes events to the structured log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl SecurityEventSink for TracingEventSink {
    fn publish(&self, event: SecurityEvent) {
        let family = event.token_family.map(|f| f.to_string()).unwrap_or_default();
        if event.kind.is_alert() {
            warn!(
                event_type = event.kind.as_str(),
                user_id = %event.user_id,
                family_id = %family,
                ip = event.ip.as_deref().unwrap_or("-"),
                "Security event"
            );
        } else {
            info!(
                event_type = event.kind.as_str(),
                user_id = %event.user_id,
                family_id = %family,
                "Security event"
            );
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<SecurityEvent>>>,
}

impl RecordingEventSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of events published so far.
    #[must_use]
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Number of events of the given kind.
    #[must_use]
    pub fn count(&self, kind: SecurityEventKind) -> usize {
        self.events().iter().filter(|e| e.kind == kind).count()
    }
}

impl SecurityEventSink for RecordingEventSink {
    fn publish(&self, event: SecurityEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
