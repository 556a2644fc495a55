//! Refresh-token lifecycle engine.
//!
//! Issues refresh-token families at login, rotates them on every refresh,
//! revokes a whole family when a superseded token shows up again, binds
//! tokens to devices and caps concurrent sessions per user.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod jwt;
pub mod metrics;
pub mod refresh;
pub mod storage;

// Re-exports for convenience
pub use audit::{RecordingEventSink, SecurityEvent, SecurityEventKind, SecurityEventSink, TracingEventSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, RotationPolicy};
pub use error::{ConfigError, RotationError};
pub use jwt::{AccessTokenSigner, JwtAccessTokenSigner, SigningKeyRing};
pub use refresh::{ClientContext, RevokeReason, TokenPair, TokenRotationEngine};
pub use storage::{InMemoryRefreshTokenStore, RefreshTokenStore};
