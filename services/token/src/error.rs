//! Error types for the token rotation engine.

use crate::jwt::SignerError;
use rust_common::PlatformError;
use thiserror::Error;

/// Why a refresh-token operation was rejected.
///
/// The set is closed: every outcome of the engine that is not a fresh token
/// pair is one of these. Only `TokenReuseDetected` indicates that state was
/// mutated on the way out (the family was revoked).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RotationError {
    /// Presented value is not a structurally valid refresh token.
    #[error("Refresh token malformed")]
    Malformed,

    /// No live record for the token. Purged and never-issued tokens are
    /// reported identically.
    #[error("Refresh token unknown")]
    UnknownToken,

    /// Token reached its expiry without being revoked.
    #[error("Refresh token expired")]
    Expired,

    /// A superseded or revoked token was presented; its whole family is now revoked.
    #[error("Refresh token reused - token family revoked")]
    TokenReuseDetected,

    /// Device fingerprint differs from the one bound at issuance.
    #[error("Refresh token presented from a different device")]
    DeviceMismatch,

    /// Store failed or did not answer in time. Retrying with the same token is safe.
    #[error("Token store unavailable")]
    StoreUnavailable,

    /// Access token could not be issued. Nothing was persisted.
    #[error("Access token signing failed: {0}")]
    Signing(SignerError),
}

impl RotationError {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Malformed => TOKEN_REFRESH_MALFORMED,
            Self::UnknownToken => TOKEN_REFRESH_INVALID,
            Self::Expired => TOKEN_REFRESH_EXPIRED,
            Self::TokenReuseDetected => TOKEN_REFRESH_REUSED,
            Self::DeviceMismatch => TOKEN_DEVICE_MISMATCH,
            Self::StoreUnavailable => TOKEN_STORE_UNAVAILABLE,
            Self::Signing(_) => TOKEN_SIGNING_ERROR,
        }
    }

    /// Whether the caller may retry with identical input.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable | Self::Signing(_))
    }

    /// Whether the rejection must be forwarded to audit/alerting.
    #[must_use]
    pub const fn is_security_event(&self) -> bool {
        matches!(self, Self::TokenReuseDetected)
    }

    /// Whether the client has to sign in again to obtain a new session.
    #[must_use]
    pub const fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            Self::Malformed | Self::UnknownToken | Self::Expired | Self::TokenReuseDetected
        )
    }

    /// Label used for the refresh outcome metric.
    #[must_use]
    pub const fn metric_label(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::UnknownToken => "unknown",
            Self::Expired => "expired",
            Self::TokenReuseDetected => "reuse_detected",
            Self::DeviceMismatch => "device_mismatch",
            Self::StoreUnavailable => "store_unavailable",
            Self::Signing(_) => "signing_error",
        }
    }
}

impl From<SignerError> for RotationError {
    fn from(err: SignerError) -> Self {
        Self::Signing(err)
    }
}

impl From<PlatformError> for RotationError {
    // Conflicts are interpreted by the engine before this conversion is used;
    // anything reaching here is an infrastructure failure.
    fn from(_: PlatformError) -> Self {
        Self::StoreUnavailable
    }
}

/// Configuration loading failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Configuration error: {0}")]
pub struct ConfigError(pub String);

impl ConfigError {
    /// Create a configuration error with the given message.
    #[must_use]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Error code: token failed the structural check.
pub const TOKEN_REFRESH_MALFORMED: &str = "TOKEN_REFRESH_MALFORMED";
/// Error code: token unknown or purged.
pub const TOKEN_REFRESH_INVALID: &str = "TOKEN_REFRESH_INVALID";
/// Error code: token expired.
pub const TOKEN_REFRESH_EXPIRED: &str = "TOKEN_REFRESH_EXPIRED";
/// Error code: reuse detected, family revoked.
pub const TOKEN_REFRESH_REUSED: &str = "TOKEN_REFRESH_REUSED";
/// Error code: device fingerprint mismatch.
pub const TOKEN_DEVICE_MISMATCH: &str = "TOKEN_DEVICE_MISMATCH";
/// Error code: store unavailable.
pub const TOKEN_STORE_UNAVAILABLE: &str = "TOKEN_STORE_UNAVAILABLE";
/// Error code: access-token signing failed.
pub const TOKEN_SIGNING_ERROR: &str = "TOKEN_SIGNING_ERROR";
