//! Test fixtures with sample data.
//!
//! This module provides pre-built test data for use in tests.

use chrono::{DateTime, TimeZone, Utc};

/// Fixed instant every deterministic test starts from.
#[must_use]
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 9, 30, 0)
        .single()
        .unwrap_or_default()
}

/// HMAC key material long enough for HS256 signing in tests.
pub const SIGNING_KEY: &[u8] = b"test-signing-key-0123456789abcdef-0123456789";

/// Replacement key used by key-rotation tests.
pub const ROTATED_SIGNING_KEY: &[u8] = b"rotated-signing-key-fedcba9876543210-fedcba98";

/// Sample client metadata as a login or refresh endpoint would see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleClient {
    /// Source IP address
    pub ip: String,
    /// User-Agent header
    pub user_agent: String,
    /// Raw device fingerprint
    pub fingerprint: String,
}

impl SampleClient {
    /// A desktop Firefox session.
    #[must_use]
    pub fn desktop_firefox() -> Self {
        Self {
            ip: "203.0.113.10".to_string(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:127.0) Gecko/20100101 Firefox/127.0"
                .to_string(),
            fingerprint: "9f2c1a7e4b3d5c6a8e0f1b2c3d4e5f60".to_string(),
        }
    }

    /// A mobile Safari session.
    #[must_use]
    pub fn mobile_safari() -> Self {
        Self {
            ip: "198.51.100.42".to_string(),
            user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1".to_string(),
            fingerprint: "0a1b2c3d4e5f60718293a4b5c6d7e8f9".to_string(),
        }
    }

    /// A second browser on another network, used as the "attacker" in reuse tests.
    #[must_use]
    pub fn attacker() -> Self {
        Self {
            ip: "192.0.2.66".to_string(),
            user_agent: "curl/8.5.0".to_string(),
            fingerprint: "ffffffffffffffffffffffffffffffff".to_string(),
        }
    }
}
