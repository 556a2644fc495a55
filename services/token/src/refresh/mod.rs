//! Refresh tokens: records, generation, session limiting and rotation.

pub mod generator;
pub mod limiter;
pub mod record;
pub mod rotator;

pub use generator::RefreshTokenGenerator;
pub use limiter::SessionLimiter;
pub use record::{NewRefreshToken, RefreshTokenRecord, RevokeReason, TokenState};
pub use rotator::{ClientContext, TokenPair, TokenRotationEngine};
