//! Bearer token decoding.
//!
//! Tokens are issued elsewhere; this service only turns one into a user
//! identity, rejecting bad signatures and expired tokens.

use actix_web::HttpRequest;
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::events::UserId;

/// Clock skew tolerated when checking `exp` (seconds)
const DEFAULT_LEEWAY: u64 = 30;

#[derive(Debug, Deserialize)]
struct Claims {
    /// Numeric or string user id
    sub: Value,
}

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
}

pub struct TokenDecoder {
    key: DecodingKey,
    validation: Validation,
}

impl TokenDecoder {
    pub fn new(secret: &str, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.leeway = DEFAULT_LEEWAY;

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.jwt_secret, config.algorithm)
    }

    pub fn decode(&self, token: &str) -> Result<Identity, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            }
        })?;

        let user_id = UserId::from_json(&data.claims.sub)
            .ok_or_else(|| AuthError::Invalid("unusable sub claim".into()))?;

        Ok(Identity { user_id })
    }
}

/// Token carried in `Authorization: Bearer <token>`
pub fn bearer_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-secret";

    fn token_for(sub: Value, exp_offset_secs: i64) -> String {
        let claims = json!({
            "sub": sub,
            "exp": Utc::now().timestamp() + exp_offset_secs,
        });
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn decoder() -> TokenDecoder {
        TokenDecoder::new(SECRET, Algorithm::HS256)
    }

    #[test]
    fn test_decode_numeric_sub() {
        let identity = decoder().decode(&token_for(json!(42), 3600)).unwrap();
        assert_eq!(identity.user_id, UserId::from("42"));
    }

    #[test]
    fn test_decode_string_sub() {
        let identity = decoder().decode(&token_for(json!("42"), 3600)).unwrap();
        assert_eq!(identity.user_id, UserId::from("42"));
    }

    #[test]
    fn test_expired_token() {
        let err = decoder().decode(&token_for(json!(1), -3600)).unwrap_err();
        assert_eq!(err, AuthError::Expired);
    }

    #[test]
    fn test_wrong_secret() {
        let other = TokenDecoder::new("another-secret", Algorithm::HS256);
        let err = other.decode(&token_for(json!(1), 3600)).unwrap_err();
        assert!(matches!(err, AuthError::Invalid(_)));
    }

    #[test]
    fn test_garbage_and_empty() {
        assert!(matches!(
            decoder().decode("not.a.token"),
            Err(AuthError::Invalid(_))
        ));
        assert_eq!(decoder().decode("  "), Err(AuthError::MissingToken));
    }

    #[test]
    fn test_unusable_sub() {
        let err = decoder().decode(&token_for(json!(null), 3600)).unwrap_err();
        assert!(matches!(err, AuthError::Invalid(_)));
    }

    #[test]
    fn test_bearer_token_header() {
        let req = actix_web::test::TestRequest::default()
            .insert_header(("Authorization", "Bearer abc.def.ghi"))
            .to_http_request();
        assert_eq!(bearer_token(&req).as_deref(), Some("abc.def.ghi"));

        let req = actix_web::test::TestRequest::default()
            .insert_header(("Authorization", "Basic Zm9vOmJhcg=="))
            .to_http_request();
        assert_eq!(bearer_token(&req), None);
    }
}
