//! Prometheus metrics for refresh-token lifecycle.
//!
//! Counters are registered in the default registry on first use.

use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, CounterVec};

/// Tokens issued counter.
pub static TOKENS_ISSUED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "token_rotation_tokens_issued_total",
        "Total number of refresh tokens issued",
        &["origin"]
    )
    .expect("Failed to register tokens_issued metric")
});

/// Refresh outcomes counter.
pub static TOKENS_REFRESHED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "token_rotation_refresh_total",
        "Total number of refresh attempts by outcome",
        &["status"]
    )
    .expect("Failed to register tokens_refreshed metric")
});

/// Tokens revoked counter.
pub static TOKENS_REVOKED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "token_rotation_tokens_revoked_total",
        "Total number of refresh tokens revoked",
        &["reason"]
    )
    .expect("Failed to register tokens_revoked metric")
});

/// Security events counter.
pub static SECURITY_EVENTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "token_rotation_security_events_total",
        "Total number of security events",
        &["event_type"]
    )
    .expect("Failed to register security_events metric")
});

/// Record a token issuance (`login` or `rotation`).
pub fn record_token_issued(origin: &str) {
    TOKENS_ISSUED.with_label_values(&[origin]).inc();
}

/// Record a refresh outcome.
pub fn record_token_refreshed(status: &str) {
    TOKENS_REFRESHED.with_label_values(&[status]).inc();
}

/// Record `count` revocations.
#[allow(clippy::cast_precision_loss)]
pub fn record_tokens_revoked(reason: &str, count: usize) {
    TOKENS_REVOKED.with_label_values(&[reason]).inc_by(count as f64);
}

/// Record a security event.
pub fn record_security_event(event_type: &str) {
    SECURITY_EVENTS.with_label_values(&[event_type]).inc();
}
