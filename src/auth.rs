use crate::error::SyncError;
use crate::protocol::AuthenticatedUser;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Validates a handshake bearer token and extracts an identity. No further
/// re-check happens per message; the returned identity is fixed for the
/// connection's lifetime.
pub trait AuthGate: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, SyncError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    username: String,
    email: String,
    exp: usize,
}

/// HS256-signed JWT validation. Claims carry the minimal identity shape
/// this repo needs; the signing authority and issuance flow live outside
/// this crate.
pub struct JwtAuthGate {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthGate {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }
}

impl AuthGate for JwtAuthGate {
    fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, SyncError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| SyncError::Auth(e.to_string()))?;

        Ok(AuthenticatedUser {
            id: data.claims.sub,
            username: data.claims.username,
            email: data.claims.email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token_for(secret: &str, sub: &str, exp: usize) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            exp,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn valid_token_resolves_identity() {
        let gate = JwtAuthGate::new("shared-secret");
        let token = token_for("shared-secret", "user-1", 9_999_999_999);
        let user = gate.authenticate(&token).unwrap();
        assert_eq!(user.id, "user-1");
        assert_eq!(user.username, "alice");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let gate = JwtAuthGate::new("shared-secret");
        let token = token_for("other-secret", "user-1", 9_999_999_999);
        assert!(matches!(gate.authenticate(&token), Err(SyncError::Auth(_))));
    }

    #[test]
    fn expired_token_is_rejected() {
        let gate = JwtAuthGate::new("shared-secret");
        let token = token_for("shared-secret", "user-1", 1);
        assert!(matches!(gate.authenticate(&token), Err(SyncError::Auth(_))));
    }
}
