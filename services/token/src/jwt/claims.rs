use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    // Standard JWT claims
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub jti: String,

    /// Tenant the session belongs to.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tid: Option<String>,
}

impl AccessClaims {
    /// Claims for `subject` valid from `now` for `ttl`, with a fresh `jti`.
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        subject: impl Into<String>,
        tenant_id: Option<&str>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let iat = now.timestamp();
        AccessClaims {
            iss: issuer.into(),
            sub: subject.into(),
            aud: audience.into(),
            exp: (now + ttl).timestamp(),
            iat,
            nbf: iat,
            jti: uuid::Uuid::new_v4().to_string(),
            tid: tenant_id.map(str::to_string),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
