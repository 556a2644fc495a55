use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a refresh token stopped being active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevokeReason {
    /// Superseded by a newer token in the same family.
    Rotated,
    /// A superseded token was presented again.
    ReuseDetected,
    /// Evicted to keep the user under the concurrent-session cap.
    SessionLimitExceeded,
    /// The user signed out.
    UserLogout,
    /// An administrator or security process revoked it.
    AdminRevoked,
}

impl RevokeReason {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Rotated => "rotated",
            Self::ReuseDetected => "reuse_detected",
            Self::SessionLimitExceeded => "session_limit_exceeded",
            Self::UserLogout => "user_logout",
            Self::AdminRevoked => "admin_revoked",
        }
    }
}

/// Lifecycle state of a record at a given instant. Always derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// Usable for rotation.
    Active,
    /// Replaced by a newer token in the same family.
    Rotated,
    /// Revoked without a successor.
    Revoked,
    /// Past its expiry without being revoked.
    Expired,
}

/// One persisted refresh token. The raw secret is never stored, only its hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    /// Store-assigned id; increases with insertion order.
    pub id: u64,
    pub token_hash: String,
    pub user_id: String,
    pub tenant_id: Option<String>,
    /// Shared by every token of one rotation chain.
    pub token_family: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_by_ip: String,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by_ip: Option<String>,
    pub replaced_by_token_hash: Option<String>,
    pub revoke_reason: Option<RevokeReason>,
    /// Hash of the device fingerprint bound at issuance.
    pub device_fingerprint: Option<String>,
    pub user_agent: String,
    pub device_name: String,
    /// Retention marker, set only by the store's sweep.
    pub is_deleted: bool,
}

impl RefreshTokenRecord {
    /// Derive the state at `now`.
    #[must_use]
    pub fn state(&self, now: DateTime<Utc>) -> TokenState {
        match (self.revoked_at, &self.replaced_by_token_hash) {
            (Some(_), Some(_)) => TokenState::Rotated,
            (Some(_), None) => TokenState::Revoked,
            (None, _) if now >= self.expires_at => TokenState::Expired,
            (None, _) => TokenState::Active,
        }
    }

    /// Shorthand for `state(now) == Active`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.state(now) == TokenState::Active
    }

    /// Whether the conditional-update guard (`revoked_at IS NULL`) holds.
    #[must_use]
    pub const fn is_unrevoked(&self) -> bool {
        self.revoked_at.is_none()
    }

    /// Session ordering key: issuance time, then insertion sequence.
    #[must_use]
    pub fn age_key(&self) -> (DateTime<Utc>, u64) {
        (self.issued_at, self.id)
    }
}

/// Insertable part of a [`RefreshTokenRecord`]; the store assigns the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRefreshToken {
    pub token_hash: String,
    pub user_id: String,
    pub tenant_id: Option<String>,
    pub token_family: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_by_ip: String,
    pub device_fingerprint: Option<String>,
    pub user_agent: String,
    pub device_name: String,
}

impl NewRefreshToken {
    /// Materialise into a full, active record with the given id.
    #[must_use]
    pub fn into_record(self, id: u64) -> RefreshTokenRecord {
        RefreshTokenRecord {
            id,
            token_hash: self.token_hash,
            user_id: self.user_id,
            tenant_id: self.tenant_id,
            token_family: self.token_family,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            created_by_ip: self.created_by_ip,
            revoked_at: None,
            revoked_by_ip: None,
            replaced_by_token_hash: None,
            revoke_reason: None,
            device_fingerprint: self.device_fingerprint,
            user_agent: self.user_agent,
            device_name: self.device_name,
            is_deleted: false,
        }
    }
}

/// Human-readable device label derived from a User-Agent header.
#[must_use]
pub fn describe_device(user_agent: &str) -> String {
    let browser = if user_agent.contains("Edg/") {
        Some("Edge")
    } else if user_agent.contains("OPR/") {
        Some("Opera")
    } else if user_agent.contains("Firefox/") {
        Some("Firefox")
    } else if user_agent.contains("Chrome/") {
        Some("Chrome")
    } else if user_agent.contains("Safari/") {
        Some("Safari")
    } else {
        None
    };

    // iOS user agents also say "like Mac OS X"; check them first.
    let os = if user_agent.contains("iPhone") || user_agent.contains("iPad") {
        Some("iOS")
    } else if user_agent.contains("Android") {
        Some("Android")
    } else if user_agent.contains("Windows") {
        Some("Windows")
    } else if user_agent.contains("Mac OS X") {
        Some("macOS")
    } else if user_agent.contains("Linux") {
        Some("Linux")
    } else {
        None
    };

    match (browser, os) {
        (Some(b), Some(o)) => format!("{} on {}", b, o),
        (Some(b), None) => b.to_string(),
        (None, Some(o)) => format!("Unknown browser on {}", o),
        (None, None) => "Unknown device".to_string(),
    }
}
