use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Default decoded length of a raw refresh token.
pub const DEFAULT_TOKEN_BYTES: usize = 64;

/// Creates raw refresh tokens and the hashes that are persisted for them.
#[derive(Debug, Clone, Copy)]
pub struct RefreshTokenGenerator {
    byte_len: usize,
}

impl Default for RefreshTokenGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_BYTES)
    }
}

impl RefreshTokenGenerator {
    /// Generator for tokens of `byte_len` random bytes.
    #[must_use]
    pub const fn new(byte_len: usize) -> Self {
        Self { byte_len }
    }

    /// Decoded length every token must have.
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Fresh random token, base64url without padding.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut bytes = Zeroizing::new(vec![0u8; self.byte_len]);
        rand::thread_rng().fill_bytes(bytes.as_mut_slice());
        URL_SAFE_NO_PAD.encode(bytes.as_slice())
    }

    /// Decode `raw`, provided it is base64url of exactly `byte_len` bytes.
    #[must_use]
    pub fn decode_checked(&self, raw: &str) -> Option<Zeroizing<Vec<u8>>> {
        if raw.len() != encoded_len(self.byte_len) {
            return None;
        }
        let bytes = Zeroizing::new(URL_SAFE_NO_PAD.decode(raw).ok()?);
        (bytes.len() == self.byte_len).then_some(bytes)
    }

    /// Structural check used before any store lookup.
    #[must_use]
    pub fn is_well_formed(&self, raw: &str) -> bool {
        self.decode_checked(raw).is_some()
    }

    /// Persisted form of a raw token.
    #[must_use]
    pub fn hash(raw: &str) -> String {
        digest(raw.as_bytes())
    }

    /// Persisted form of a raw device fingerprint.
    #[must_use]
    pub fn hash_fingerprint(fingerprint: &str) -> String {
        digest(fingerprint.as_bytes())
    }

    /// New token family identifier.
    #[must_use]
    pub fn generate_family_id() -> Uuid {
        Uuid::new_v4()
    }
}

/// Constant-time comparison of two stored hashes.
#[must_use]
pub fn hashes_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Length of `byte_len` bytes in unpadded base64.
const fn encoded_len(byte_len: usize) -> usize {
    (byte_len * 4 + 2) / 3
}
