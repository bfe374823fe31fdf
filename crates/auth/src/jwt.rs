//! Bearer token decoding.

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};

use crate::claims::{JwtClaims, TokenValidationError, validate_claims};

/// Turns a raw bearer token into validated claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError>;
}

/// Shared-secret HS256 validator.
///
/// Keel tokens carry their own `issued_at`/`expires_at` claims, so the
/// registered `exp`/`nbf` checks of `jsonwebtoken` are switched off and
/// `validate_claims` decides the time window instead.
pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;

        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl core::fmt::Debug for Hs256JwtValidator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hs256JwtValidator").finish_non_exhaustive()
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError> {
        let data = decode::<JwtClaims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => TokenValidationError::InvalidSignature,
                other => TokenValidationError::Malformed(format!("{other:?}")),
            }
        })?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PrincipalId, Role};
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use keel_core::TenantId;

    fn mint(secret: &str, claims: &JwtClaims) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn fresh_claims() -> JwtClaims {
        let now = Utc::now();
        JwtClaims {
            sub: PrincipalId::new(),
            tenant_id: TenantId::new(),
            roles: vec![Role::new("accountant")],
            issued_at: now - Duration::seconds(5),
            expires_at: now + Duration::minutes(10),
        }
    }

    #[test]
    fn accepts_token_signed_with_the_shared_secret() {
        let claims = fresh_claims();
        let token = mint("s3cret", &claims);

        let v = Hs256JwtValidator::new(b"s3cret");
        let decoded = v.validate(&token, Utc::now()).unwrap();
        assert_eq!(decoded, claims);
    }

    #[test]
    fn rejects_token_signed_with_another_secret() {
        let token = mint("other", &fresh_claims());
        let v = Hs256JwtValidator::new(b"s3cret");
        assert_eq!(
            v.validate(&token, Utc::now()),
            Err(TokenValidationError::InvalidSignature)
        );
    }

    #[test]
    fn rejects_garbage_and_expired_tokens() {
        let v = Hs256JwtValidator::new(b"s3cret");
        assert!(matches!(
            v.validate("not-a-jwt", Utc::now()),
            Err(TokenValidationError::Malformed(_))
        ));

        let claims = fresh_claims();
        let token = mint("s3cret", &claims);
        assert_eq!(
            v.validate(&token, claims.expires_at + Duration::seconds(1)),
            Err(TokenValidationError::Expired)
        );
    }
}
