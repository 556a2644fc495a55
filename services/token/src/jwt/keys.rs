//! Rotatable HMAC key material for access tokens.
//!
//! New tokens are always signed with the current key. After a rotation the
//! previous key still verifies, so tokens issued just before the switch stay
//! valid until they expire.

use crate::jwt::signer::SignerError;
use jsonwebtoken::{DecodingKey, EncodingKey};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use zeroize::Zeroizing;

/// Shortest accepted HMAC secret.
pub const MIN_SECRET_LEN: usize = 32;

struct SigningKey {
    kid: String,
    secret: Zeroizing<Vec<u8>>,
}

impl SigningKey {
    fn new(kid: impl Into<String>, secret: &[u8]) -> Result<Self, SignerError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(SignerError::Encoding(format!(
                "signing key must be at least {} bytes, got {}",
                MIN_SECRET_LEN,
                secret.len()
            )));
        }
        Ok(Self {
            kid: kid.into(),
            secret: Zeroizing::new(secret.to_vec()),
        })
    }
}

struct KeySet {
    current: SigningKey,
    previous: Option<SigningKey>,
}

/// Current and previous signing keys.
#[derive(Clone)]
pub struct SigningKeyRing {
    keys: Arc<RwLock<KeySet>>,
}

impl std::fmt::Debug for SigningKeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyRing").finish_non_exhaustive()
    }
}

impl SigningKeyRing {
    /// Key ring holding a single key.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is shorter than [`MIN_SECRET_LEN`].
    pub fn new(kid: impl Into<String>, secret: &[u8]) -> Result<Self, SignerError> {
        let current = SigningKey::new(kid, secret)?;
        Ok(Self {
            keys: Arc::new(RwLock::new(KeySet {
                current,
                previous: None,
            })),
        })
    }

    /// Make `secret` the signing key; the old current key becomes verify-only.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is shorter than [`MIN_SECRET_LEN`].
    pub async fn rotate(&self, kid: impl Into<String>, secret: &[u8]) -> Result<(), SignerError> {
        let next = SigningKey::new(kid, secret)?;
        let mut keys = self.keys.write().await;
        let old = std::mem::replace(&mut keys.current, next);
        info!(new_key_id = %keys.current.kid, old_key_id = %old.kid, "Rotated signing key");
        keys.previous = Some(old);
        Ok(())
    }

    /// Id of the key used for new tokens.
    pub async fn current_kid(&self) -> String {
        self.keys.read().await.current.kid.clone()
    }

    /// Key id and encoding key for signing.
    pub async fn encoding_key(&self) -> (String, EncodingKey) {
        let keys = self.keys.read().await;
        (
            keys.current.kid.clone(),
            EncodingKey::from_secret(&keys.current.secret),
        )
    }

    /// Verification key for `kid`, if it is current or previous.
    pub async fn decoding_key(&self, kid: &str) -> Option<DecodingKey> {
        let keys = self.keys.read().await;
        std::iter::once(&keys.current)
            .chain(keys.previous.as_ref())
            .find(|k| k.kid == kid)
            .map(|k| DecodingKey::from_secret(&k.secret))
    }
}
