//! Shared test utilities for auth-platform Rust libraries.
//!
//! This crate provides:
//! - Proptest generators for refresh-token domain values
//! - Test fixtures with sample clients, instants and key material

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

pub use fixtures::{epoch, SampleClient, ROTATED_SIGNING_KEY, SIGNING_KEY};
pub use generators::*;
