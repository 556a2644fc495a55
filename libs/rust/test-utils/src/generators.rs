//! Shared proptest generators for the refresh-token domain.
//!
//! Strategies produce plain values (strings, counts, durations) so they can be
//! fed into any crate's constructors without this crate depending on them.

use proptest::prelude::*;
use std::time::Duration;

/// Generate arbitrary user IDs.
pub fn user_id_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{8,32}"
}

/// Generate optional tenant IDs (roughly half the cases carry a tenant).
pub fn tenant_id_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of("tenant-[a-z0-9]{4,12}")
}

/// Generate IPv4 addresses in dotted-quad form.
pub fn ipv4_strategy() -> impl Strategy<Value = String> {
    (1u8..=223, any::<u8>(), any::<u8>(), 1u8..=254)
        .prop_map(|(a, b, c, d)| format!("{}.{}.{}.{}", a, b, c, d))
}

/// Generate realistic browser user agents.
pub fn user_agent_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36"
                .to_string()
        ),
        Just("Mozilla/5.0 (X11; Linux x86_64; rv:127.0) Gecko/20100101 Firefox/127.0".to_string()),
        Just(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1"
                .to_string()
        ),
        Just(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36 Edg/126.0"
                .to_string()
        ),
        "[a-zA-Z]{3,10}/[0-9]\\.[0-9]".prop_map(|s| s),
    ]
}

/// Generate raw device fingerprints as a client would send them.
pub fn device_fingerprint_strategy() -> impl Strategy<Value = String> {
    "[a-f0-9]{32,64}"
}

/// Generate session caps used by limiter tests.
pub fn session_cap_strategy() -> impl Strategy<Value = usize> {
    1usize..6
}

/// Generate rotation chain lengths.
pub fn rotation_count_strategy() -> impl Strategy<Value = usize> {
    1usize..8
}

/// Generate strings that can never be a well-formed refresh token.
///
/// Covers characters outside the base64url alphabet and lengths that do not
/// decode to the expected byte count.
pub fn malformed_token_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "[A-Za-z0-9_-]{1,40}",
        "[A-Za-z0-9_-]{90,120}",
        "[A-Za-z0-9+/=!@#$% ]{10,100}".prop_filter("must contain a non-url-safe char", |s| {
            s.chars().any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        }),
    ]
}

/// Generate token TTL values (1 minute to 30 days).
pub fn ttl_strategy() -> impl Strategy<Value = Duration> {
    (60u64..2_592_000).prop_map(Duration::from_secs)
}
