//! Centralized configuration for the token rotation engine.
//!
//! All configuration is loaded from environment variables and validated
//! at startup. [`RotationPolicy`] is the part the engine consumes.

use crate::error::ConfigError;
use crate::jwt::{JwtAccessTokenSigner, SigningKeyRing};
use crate::refresh::generator::DEFAULT_TOKEN_BYTES;
use base64::Engine as _;
use rust_common::TracingConfig;
use std::env;
use std::fmt;
use std::time::Duration;
use zeroize::Zeroizing;

/// Longest accepted token lifetime.
const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Accepted range for the decoded refresh-token length.
const TOKEN_BYTES_RANGE: std::ops::RangeInclusive<usize> = 32..=128;

/// Behaviour switches and limits for the rotation engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Lifetime of every refresh token, counted from its own issuance.
    pub refresh_token_ttl: chrono::Duration,
    /// Maximum number of concurrently active sessions per user.
    pub max_concurrent_sessions: usize,
    /// Bind tokens to a device fingerprint and compare on rotation.
    pub device_fingerprinting: bool,
    /// Treat a fingerprint mismatch like token reuse.
    pub strict_device_binding: bool,
    /// Decoded length of raw refresh tokens.
    pub refresh_token_bytes: usize,
    /// Upper bound for every store call.
    pub store_timeout: Duration,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            refresh_token_ttl: chrono::Duration::days(7),
            max_concurrent_sessions: 5,
            device_fingerprinting: true,
            strict_device_binding: false,
            refresh_token_bytes: DEFAULT_TOKEN_BYTES,
            store_timeout: Duration::from_secs(2),
        }
    }
}

impl RotationPolicy {
    /// Set the refresh-token lifetime.
    #[must_use]
    pub fn with_refresh_token_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.refresh_token_ttl = ttl;
        self
    }

    /// Set the session cap.
    #[must_use]
    pub const fn with_max_concurrent_sessions(mut self, cap: usize) -> Self {
        self.max_concurrent_sessions = cap;
        self
    }

    /// Enable or disable device fingerprinting.
    #[must_use]
    pub const fn with_device_fingerprinting(mut self, enabled: bool) -> Self {
        self.device_fingerprinting = enabled;
        self
    }

    /// Enable or disable strict device binding.
    #[must_use]
    pub const fn with_strict_device_binding(mut self, enabled: bool) -> Self {
        self.strict_device_binding = enabled;
        self
    }

    /// Set the decoded refresh-token length.
    #[must_use]
    pub const fn with_refresh_token_bytes(mut self, bytes: usize) -> Self {
        self.refresh_token_bytes = bytes;
        self
    }

    /// Set the store call timeout.
    #[must_use]
    pub const fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }
}

/// Full service configuration.
#[derive(Clone)]
pub struct Config {
    // JWT settings
    /// JWT issuer claim
    pub jwt_issuer: String,
    /// JWT audience claim
    pub jwt_audience: String,
    /// Key id of the signing key
    pub jwt_key_id: String,
    /// HMAC signing key
    pub jwt_signing_key: Zeroizing<Vec<u8>>,
    /// Access token TTL
    pub access_token_ttl: Duration,

    // Refresh token settings
    /// Refresh token TTL
    pub refresh_token_ttl: Duration,
    /// Concurrent session cap per user
    pub max_concurrent_sessions: usize,
    /// Device fingerprint binding
    pub device_fingerprinting: bool,
    /// Escalate fingerprint mismatches to reuse handling
    pub strict_device_binding: bool,
    /// Decoded refresh token length
    pub refresh_token_bytes: usize,
    /// Store call timeout
    pub store_timeout: Duration,

    // Observability
    /// Log level filter
    pub log_level: String,
    /// Emit JSON logs
    pub log_json: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("jwt_audience", &self.jwt_audience)
            .field("jwt_key_id", &self.jwt_key_id)
            .field("jwt_signing_key", &"<redacted>")
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("max_concurrent_sessions", &self.max_concurrent_sessions)
            .field("device_fingerprinting", &self.device_fingerprinting)
            .field("strict_device_binding", &self.strict_device_binding)
            .field("refresh_token_bytes", &self.refresh_token_bytes)
            .field("store_timeout", &self.store_timeout)
            .field("log_level", &self.log_level)
            .field("log_json", &self.log_json)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables (and `.env`, if present).
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_issuer = lookup("JWT_ISSUER").unwrap_or_else(|| "auth-platform".to_string());
        let jwt_audience = lookup("JWT_AUDIENCE").unwrap_or_else(|| "api".to_string());
        let jwt_key_id = lookup("JWT_KEY_ID").unwrap_or_else(|| "default-key".to_string());
        let jwt_signing_key = parse_signing_key(lookup("JWT_SIGNING_KEY"))?;
        let access_token_ttl = Duration::from_secs(parse_env(&lookup, "ACCESS_TOKEN_TTL", 900)?);

        let refresh_token_ttl = Duration::from_secs(parse_env(&lookup, "REFRESH_TOKEN_TTL", 604_800)?);
        let max_concurrent_sessions = parse_env(&lookup, "MAX_CONCURRENT_SESSIONS", 5)?;
        let device_fingerprinting = parse_env(&lookup, "DEVICE_FINGERPRINTING", true)?;
        let strict_device_binding = parse_env(&lookup, "STRICT_DEVICE_BINDING", false)?;
        let refresh_token_bytes = parse_env(&lookup, "REFRESH_TOKEN_BYTES", DEFAULT_TOKEN_BYTES)?;
        let store_timeout = Duration::from_millis(parse_env(&lookup, "STORE_TIMEOUT_MS", 2_000)?);

        let log_level = lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let log_json = parse_env(&lookup, "LOG_JSON", false)?;

        let config = Self {
            jwt_issuer,
            jwt_audience,
            jwt_key_id,
            jwt_signing_key,
            access_token_ttl,
            refresh_token_ttl,
            max_concurrent_sessions,
            device_fingerprinting,
            strict_device_binding,
            refresh_token_bytes,
            store_timeout,
            log_level,
            log_json,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, ttl) in [
            ("ACCESS_TOKEN_TTL", self.access_token_ttl),
            ("REFRESH_TOKEN_TTL", self.refresh_token_ttl),
        ] {
            if ttl.is_zero() || ttl > MAX_TTL {
                return Err(ConfigError::new(format!(
                    "{} must be between 1s and {}s",
                    name,
                    MAX_TTL.as_secs()
                )));
            }
        }
        if self.access_token_ttl >= self.refresh_token_ttl {
            return Err(ConfigError::new("ACCESS_TOKEN_TTL must be shorter than REFRESH_TOKEN_TTL"));
        }
        if self.max_concurrent_sessions == 0 {
            return Err(ConfigError::new("MAX_CONCURRENT_SESSIONS must be at least 1"));
        }
        if !TOKEN_BYTES_RANGE.contains(&self.refresh_token_bytes) {
            return Err(ConfigError::new(format!(
                "REFRESH_TOKEN_BYTES must be in {}..={}",
                TOKEN_BYTES_RANGE.start(),
                TOKEN_BYTES_RANGE.end()
            )));
        }
        if self.store_timeout.is_zero() {
            return Err(ConfigError::new("STORE_TIMEOUT_MS must be positive"));
        }
        if self.strict_device_binding && !self.device_fingerprinting {
            return Err(ConfigError::new(
                "STRICT_DEVICE_BINDING requires DEVICE_FINGERPRINTING",
            ));
        }
        Ok(())
    }

    /// Engine settings derived from this configuration.
    #[must_use]
    pub fn rotation_policy(&self) -> RotationPolicy {
        RotationPolicy {
            refresh_token_ttl: chrono::Duration::from_std(self.refresh_token_ttl)
                .unwrap_or_else(|_| chrono::Duration::days(7)),
            max_concurrent_sessions: self.max_concurrent_sessions,
            device_fingerprinting: self.device_fingerprinting,
            strict_device_binding: self.strict_device_binding,
            refresh_token_bytes: self.refresh_token_bytes,
            store_timeout: self.store_timeout,
        }
    }

    /// Access-token signer using the configured key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is too short.
    pub fn access_token_signer(&self) -> Result<JwtAccessTokenSigner, ConfigError> {
        let keys = SigningKeyRing::new(self.jwt_key_id.clone(), &self.jwt_signing_key)
            .map_err(|e| ConfigError::new(format!("Invalid JWT_SIGNING_KEY: {}", e)))?;
        let ttl = chrono::Duration::from_std(self.access_token_ttl)
            .unwrap_or_else(|_| chrono::Duration::minutes(15));
        Ok(JwtAccessTokenSigner::new(
            self.jwt_issuer.clone(),
            self.jwt_audience.clone(),
            ttl,
            keys,
        ))
    }

    /// Tracing settings for `rust_common::init_tracing`.
    #[must_use]
    pub fn tracing_config(&self) -> TracingConfig {
        let config = TracingConfig::default()
            .with_service_name("token-rotation")
            .with_log_level(self.log_level.clone());
        if self.log_json {
            config.with_json_output()
        } else {
            config
        }
    }
}

/// Parse a variable with a default value.
fn parse_env<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match lookup(name) {
        Some(val) => val
            .trim()
            .parse()
            .map_err(|e| ConfigError::new(format!("Invalid {}: {}", name, e))),
        None => Ok(default),
    }
}

/// Decode the base64 signing key, or generate one for development.
fn parse_signing_key(value: Option<String>) -> Result<Zeroizing<Vec<u8>>, ConfigError> {
    match value {
        Some(key) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(key.trim())
                .map_err(|e| ConfigError::new(format!("Invalid JWT_SIGNING_KEY: {}", e)))?;

            if bytes.len() < crate::jwt::keys::MIN_SECRET_LEN {
                return Err(ConfigError::new(format!(
                    "JWT_SIGNING_KEY must be at least {} bytes, got {}",
                    crate::jwt::keys::MIN_SECRET_LEN,
                    bytes.len()
                )));
            }
            Ok(Zeroizing::new(bytes))
        }
        None => {
            use rand::RngCore;
            let mut key = Zeroizing::new(vec![0u8; 32]);
            rand::thread_rng().fill_bytes(key.as_mut_slice());
            tracing::warn!("JWT_SIGNING_KEY not set; using an ephemeral development key");
            Ok(key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.jwt_issuer, "auth-platform");
        assert_eq!(config.access_token_ttl, Duration::from_secs(900));
        assert_eq!(config.refresh_token_ttl, Duration::from_secs(604_800));
        assert_eq!(config.max_concurrent_sessions, 5);
        assert!(config.device_fingerprinting);
        assert!(!config.strict_device_binding);
        assert_eq!(config.refresh_token_bytes, 64);
        assert_eq!(config.jwt_signing_key.len(), 32);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("MAX_CONCURRENT_SESSIONS", "2"),
            ("STRICT_DEVICE_BINDING", "true"),
            ("REFRESH_TOKEN_BYTES", "48"),
            ("STORE_TIMEOUT_MS", "150"),
        ]))
        .unwrap();

        let policy = config.rotation_policy();
        assert_eq!(policy.max_concurrent_sessions, 2);
        assert!(policy.strict_device_binding);
        assert_eq!(policy.refresh_token_bytes, 48);
        assert_eq!(policy.store_timeout, Duration::from_millis(150));
        assert_eq!(policy.refresh_token_ttl, chrono::Duration::days(7));
    }

    #[test]
    fn test_invalid_number_rejected() {
        let err = Config::from_lookup(lookup(&[("MAX_CONCURRENT_SESSIONS", "many")])).unwrap_err();
        assert!(err.to_string().contains("MAX_CONCURRENT_SESSIONS"));
    }

    #[test]
    fn test_zero_cap_rejected() {
        assert!(Config::from_lookup(lookup(&[("MAX_CONCURRENT_SESSIONS", "0")])).is_err());
    }

    #[test]
    fn test_token_bytes_range() {
        assert!(Config::from_lookup(lookup(&[("REFRESH_TOKEN_BYTES", "16")])).is_err());
        assert!(Config::from_lookup(lookup(&[("REFRESH_TOKEN_BYTES", "256")])).is_err());
    }

    #[test]
    fn test_strict_binding_requires_fingerprinting() {
        let result = Config::from_lookup(lookup(&[
            ("DEVICE_FINGERPRINTING", "false"),
            ("STRICT_DEVICE_BINDING", "true"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_short_signing_key_rejected() {
        let short = base64::engine::general_purpose::STANDARD.encode(b"too-short");
        assert!(Config::from_lookup(lookup(&[("JWT_SIGNING_KEY", short.as_str())])).is_err());
    }

    #[test]
    fn test_access_ttl_must_be_shorter() {
        let result = Config::from_lookup(lookup(&[
            ("ACCESS_TOKEN_TTL", "3600"),
            ("REFRESH_TOKEN_TTL", "3600"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert!(format!("{:?}", config).contains("<redacted>"));
    }

    #[test]
    fn test_tracing_config() {
        let config = Config::from_lookup(lookup(&[("LOG_JSON", "true"), ("LOG_LEVEL", "debug")])).unwrap();
        let tracing = config.tracing_config();
        assert!(tracing.json_output);
        assert_eq!(tracing.log_level, "debug");
        assert_eq!(tracing.service_name, "token-rotation");
    }
}
