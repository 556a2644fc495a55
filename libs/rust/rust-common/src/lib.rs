//! Shared library for cross-cutting concerns in auth-platform Rust services.
//!
//! This crate provides centralized implementations for:
//! - Error types with retryability classification
//! - Tracing subscriber configuration

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod tracing_config;

pub use error::PlatformError;
pub use tracing_config::{init_tracing, TracingConfig};
