//! Refresh-token persistence.

pub mod memory;
pub mod store;

pub use memory::InMemoryRefreshTokenStore;
pub use store::{RefreshTokenStore, StoreTransaction};
