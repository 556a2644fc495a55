//! Access-token issuance and validation.

use crate::jwt::claims::AccessClaims;
use crate::jwt::keys::SigningKeyRing;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, Header, Validation};
use thiserror::Error;

/// Access-token failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    /// Token is past its `exp`.
    #[error("Access token expired")]
    Expired,

    /// Token could not be parsed.
    #[error("Access token malformed")]
    Malformed,

    /// Signature, key id, issuer or audience did not verify.
    #[error("Access token signature invalid")]
    BadSignature,

    /// Token could not be produced.
    #[error("Access token encoding failed: {0}")]
    Encoding(String),
}

/// Validation switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidateOptions {
    /// Return claims of an otherwise valid but expired token.
    ///
    /// For diagnostics only; never authorize a request with such claims.
    pub ignore_expiry: bool,
}

impl ValidateOptions {
    /// Options for recovering claims from a stale token.
    #[must_use]
    pub const fn ignoring_expiry() -> Self {
        Self {
            ignore_expiry: true,
        }
    }
}

/// A freshly signed access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedAccessToken {
    pub token: String,
    pub claims: AccessClaims,
    pub expires_at: DateTime<Utc>,
}

/// Short-lived token issuance.
#[async_trait]
pub trait AccessTokenSigner: Send + Sync {
    /// Sign an access token for the user.
    async fn issue(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SignedAccessToken, SignerError>;

    /// Verify a token and return its claims.
    async fn validate(
        &self,
        token: &str,
        now: DateTime<Utc>,
        options: ValidateOptions,
    ) -> Result<AccessClaims, SignerError>;
}

/// HS256 JWT signer backed by a rotatable key ring.
#[derive(Debug, Clone)]
pub struct JwtAccessTokenSigner {
    issuer: String,
    audience: String,
    ttl: Duration,
    keys: SigningKeyRing,
}

impl JwtAccessTokenSigner {
    /// Create a signer.
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        ttl: Duration,
        keys: SigningKeyRing,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            ttl,
            keys,
        }
    }

    /// Key ring, for rotating key material.
    pub fn keys(&self) -> &SigningKeyRing {
        &self.keys
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        // Time checks run against the injected clock below.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation
    }
}

#[async_trait]
impl AccessTokenSigner for JwtAccessTokenSigner {
    async fn issue(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SignedAccessToken, SignerError> {
        let claims = AccessClaims::new(&self.issuer, &self.audience, user_id, tenant_id, now, self.ttl);
        let (kid, key) = self.keys.encoding_key().await;

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(kid);

        let token = encode(&header, &claims, &key).map_err(|e| SignerError::Encoding(e.to_string()))?;
        let expires_at = claims.expires_at();

        Ok(SignedAccessToken {
            token,
            claims,
            expires_at,
        })
    }

    async fn validate(
        &self,
        token: &str,
        now: DateTime<Utc>,
        options: ValidateOptions,
    ) -> Result<AccessClaims, SignerError> {
        let header = decode_header(token).map_err(|_| SignerError::Malformed)?;
        if header.alg != Algorithm::HS256 {
            return Err(SignerError::BadSignature);
        }
        let kid = header.kid.ok_or(SignerError::Malformed)?;
        let key = self
            .keys
            .decoding_key(&kid)
            .await
            .ok_or(SignerError::BadSignature)?;

        let data = decode::<AccessClaims>(token, &key, &self.validation()).map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidAudience => SignerError::BadSignature,
            _ => SignerError::Malformed,
        })?;

        let claims = data.claims;
        if !options.ignore_expiry && claims.is_expired_at(now) {
            return Err(SignerError::Expired);
        }
        Ok(claims)
    }
}
