//! HS256 bearer JWT verification, `spec.md` §6 "Request headers".

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;

use crate::errors::{CoreError, CoreResult};

#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub sub: Option<String>,
    pub address: Option<String>,
    #[serde(default)]
    pub scope: String,
    pub exp: u64,
}

impl Claims {
    /// The authenticated user's lowercase EVM address, preferring
    /// `address` over `sub`.
    pub fn user_address(&self) -> CoreResult<String> {
        self.address
            .clone()
            .or_else(|| self.sub.clone())
            .map(|a| a.to_lowercase())
            .ok_or_else(|| CoreError::auth("token is missing sub/address"))
    }

    pub fn has_scope(&self, required: &str) -> bool {
        self.scope.split_whitespace().any(|s| s == required)
    }
}

/// Decodes and validates an HS256 bearer token, requiring `scope` to
/// contain `mpesa`. `exp` is enforced by the `jsonwebtoken` validator.
pub fn verify_bearer_token(token: &str, secret: &str) -> CoreResult<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map_err(|e| CoreError::auth(format!("invalid bearer token: {e}")))?;
    if !data.claims.has_scope("mpesa") {
        return Err(CoreError::auth("token scope does not include mpesa"));
    }
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn sign(claims: &Claims, secret: &str) -> String {
        encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn accepts_token_with_mpesa_scope() {
        let claims = Claims {
            sub: Some("0xABC".into()),
            address: None,
            scope: "mpesa wallet".into(),
            exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as u64,
        };
        let token = sign(&claims, "secret");
        let verified = verify_bearer_token(&token, "secret").unwrap();
        assert_eq!(verified.user_address().unwrap(), "0xabc");
    }

    #[test]
    fn rejects_token_missing_mpesa_scope() {
        let claims = Claims {
            sub: Some("0xabc".into()),
            address: None,
            scope: "wallet".into(),
            exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as u64,
        };
        let token = sign(&claims, "secret");
        let err = verify_bearer_token(&token, "secret").unwrap_err();
        assert!(matches!(err, CoreError::Auth(_)));
    }

    #[test]
    fn rejects_expired_token() {
        let claims = Claims {
            sub: Some("0xabc".into()),
            address: None,
            scope: "mpesa".into(),
            exp: (chrono::Utc::now() - chrono::Duration::hours(1)).timestamp() as u64,
        };
        let token = sign(&claims, "secret");
        let err = verify_bearer_token(&token, "secret").unwrap_err();
        assert!(matches!(err, CoreError::Auth(_)));
    }
}
