//! Access tokens: claims, key material and the signer.

pub mod claims;
pub mod keys;
pub mod signer;

pub use claims::AccessClaims;
pub use keys::SigningKeyRing;
pub use signer::{AccessTokenSigner, JwtAccessTokenSigner, SignedAccessToken, SignerError, ValidateOptions};
