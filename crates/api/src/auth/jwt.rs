//! JWT session token management

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// Session lifetime
const TOKEN_TTL_HOURS: i64 = 24;

/// JWT claims for a dashboard session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: Uuid,
    pub email: String,
    /// "admin" or "member"
    pub role: String,
    pub exp: i64,
    pub iat: i64,
}

/// Signs and verifies session tokens with HS256
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtManager {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn generate_token(&self, user_id: Uuid, email: &str, role: &str) -> ApiResult<String> {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            role: role.to_string(),
            iat: now.unix_timestamp(),
            exp: (now + Duration::hours(TOKEN_TTL_HOURS)).unix_timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ApiError::Internal(format!("failed to sign token: {e}")))
    }

    pub fn verify_token(&self, token: &str) -> ApiResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|_| ApiError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> JwtManager {
        JwtManager::new("a-test-secret-that-is-long-enough-to-use")
    }

    #[test]
    fn test_round_trip() {
        let m = manager();
        let user_id = Uuid::new_v4();
        let token = m.generate_token(user_id, "admin@example.com", "admin").unwrap();
        let claims = m.verify_token(&token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.role, "admin");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = manager()
            .generate_token(Uuid::new_v4(), "a@b.c", "member")
            .unwrap();
        let other = JwtManager::new("a-different-secret-also-long-enough!!");
        assert!(other.verify_token(&token).is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(manager().verify_token("not.a.jwt").is_err());
    }
}
