//! services/api/src/adapters/identity.rs
//!
//! HS256 JWT implementation of the `IdentityProvider` port. Access and refresh
//! tokens share the signing key and are told apart by their `kind` claim.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use snore_core::domain::TokenPair;
use snore_core::ports::{IdentityProvider, PortError, PortResult};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// Subject: the user id as a UUID string.
    sub: String,
    iat: i64,
    exp: i64,
    kind: TokenKind,
}

pub struct JwtIdentityAdapter {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtIdentityAdapter {
    pub fn new(secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl,
            refresh_ttl,
        }
    }

    fn issue(&self, user_id: Uuid, kind: TokenKind, ttl: Duration) -> PortResult<String> {
        let now = Utc::now();
        let expires = now
            .checked_add_signed(ttl)
            .ok_or_else(|| PortError::Unexpected("token lifetime out of range".to_string()))?;
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: expires.timestamp(),
            kind,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| PortError::Unexpected(format!("JWT encode: {}", e)))
    }

    fn verify(&self, token: &str, expected: TokenKind) -> PortResult<Uuid> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["sub", "exp"]);

        let claims = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!("Rejected token: {}", e);
                PortError::Unauthorized
            })?;
        if claims.kind != expected {
            return Err(PortError::Unauthorized);
        }
        Uuid::parse_str(&claims.sub).map_err(|_| PortError::Unauthorized)
    }
}

impl IdentityProvider for JwtIdentityAdapter {
    fn issue_tokens(&self, user_id: Uuid) -> PortResult<TokenPair> {
        Ok(TokenPair {
            access_token: self.issue(user_id, TokenKind::Access, self.access_ttl)?,
            refresh_token: self.issue(user_id, TokenKind::Refresh, self.refresh_ttl)?,
        })
    }

    fn verify_access(&self, token: &str) -> PortResult<Uuid> {
        self.verify(token, TokenKind::Access)
    }

    fn verify_refresh(&self, token: &str) -> PortResult<Uuid> {
        self.verify(token, TokenKind::Refresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(secret: &str) -> JwtIdentityAdapter {
        JwtIdentityAdapter::new(secret, Duration::minutes(60), Duration::days(7))
    }

    #[test]
    fn jwt_roundtrip() {
        let identity = adapter("test-secret");
        let user_id = Uuid::new_v4();
        let tokens = identity.issue_tokens(user_id).unwrap();

        assert_eq!(identity.verify_access(&tokens.access_token).unwrap(), user_id);
        assert_eq!(identity.verify_refresh(&tokens.refresh_token).unwrap(), user_id);
    }

    #[test]
    fn token_kinds_are_not_interchangeable() {
        let identity = adapter("test-secret");
        let tokens = identity.issue_tokens(Uuid::new_v4()).unwrap();

        assert!(matches!(
            identity.verify_access(&tokens.refresh_token),
            Err(PortError::Unauthorized)
        ));
        assert!(matches!(
            identity.verify_refresh(&tokens.access_token),
            Err(PortError::Unauthorized)
        ));
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let tokens = adapter("one").issue_tokens(Uuid::new_v4()).unwrap();
        assert!(adapter("two").verify_access(&tokens.access_token).is_err());
        assert!(adapter("one").verify_access("not.a.jwt").is_err());
    }

    #[test]
    fn unrepresentable_expiry_is_an_error() {
        let far = Duration::try_days(100_000_000).unwrap();
        let identity = JwtIdentityAdapter::new("s", Duration::minutes(60), far);
        assert!(matches!(
            identity.issue_tokens(Uuid::new_v4()),
            Err(PortError::Unexpected(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let identity = JwtIdentityAdapter::new("s", Duration::minutes(-10), Duration::days(7));
        let tokens = identity.issue_tokens(Uuid::new_v4()).unwrap();
        assert!(matches!(
            identity.verify_access(&tokens.access_token),
            Err(PortError::Unauthorized)
        ));
    }
}
