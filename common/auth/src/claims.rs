//! Unverified claim decoding.
//!
//! The client never holds a verification key, so everything decoded here is
//! advisory: it drives role routing and slot bookkeeping, never authorization.
//! The server stays the sole authority on whether a token is valid.

use std::collections::HashSet;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use tracing::debug;

use crate::error::{AuthError, AuthResult};
use crate::roles::Role;

/// Claims read from a token payload without signature verification.
#[derive(Debug, Clone)]
pub struct UnverifiedClaims {
    pub subject: Option<String>,
    pub role: Option<Role>,
    pub raw: Value,
}

impl UnverifiedClaims {
    /// Decode the payload segment of `token`.
    pub fn decode(token: &str) -> AuthResult<Self> {
        if !has_jwt_shape(token) {
            return Err(AuthError::MalformedToken);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let data = decode::<Value>(token, &DecodingKey::from_secret(&[]), &validation)?;
        Self::try_from(data.claims)
    }
}

impl TryFrom<Value> for UnverifiedClaims {
    type Error = AuthError;

    fn try_from(value: Value) -> AuthResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| AuthError::InvalidJson("claims payload is not an object".into()))?;

        let subject = ["id", "_id", "adminId", "sub"]
            .iter()
            .find_map(|key| match object.get(*key) {
                Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
                Some(Value::Number(id)) => Some(id.to_string()),
                _ => None,
            });

        // An unrecognised role is reported as "no role" rather than an error.
        let role = object
            .get("role")
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse::<Role>().ok());

        Ok(Self {
            subject,
            role,
            raw: value,
        })
    }
}

/// True when `token` is exactly three non-empty dot-separated segments.
pub fn has_jwt_shape(token: &str) -> bool {
    let mut segments = 0;
    for segment in token.split('.') {
        if segment.is_empty() {
            return false;
        }
        segments += 1;
    }
    segments == 3
}

/// Role claim of `token`, or `None` when it cannot be decoded.
pub fn role_hint(token: &str) -> Option<Role> {
    match UnverifiedClaims::decode(token) {
        Ok(claims) => claims.role,
        Err(err) => {
            debug!(%err, "token role claim unavailable");
            None
        }
    }
}

/// Identity claim of `token`, or `None` when it cannot be decoded.
pub fn subject_hint(token: &str) -> Option<String> {
    UnverifiedClaims::decode(token).ok().and_then(|claims| claims.subject)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn mint(claims: Value) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"server-only-secret"),
        )
        .expect("sign token")
    }

    #[test]
    fn shape_requires_three_non_empty_segments() {
        assert!(has_jwt_shape("a.b.c"));
        assert!(!has_jwt_shape("a.b"));
        assert!(!has_jwt_shape("a..c"));
        assert!(!has_jwt_shape("a.b.c.d"));
        assert!(!has_jwt_shape(""));
        assert!(!has_jwt_shape("undefined"));
    }

    #[test]
    fn decodes_role_and_subject_without_key() {
        let token = mint(json!({
            "id": "64f0c2",
            "role": "village_admin",
            "exp": Utc::now().timestamp() - 3600,
        }));

        let claims = UnverifiedClaims::decode(&token).expect("decode");
        assert_eq!(claims.role, Some(Role::VillageAdmin));
        assert_eq!(claims.subject.as_deref(), Some("64f0c2"));
    }

    #[test]
    fn unknown_role_decodes_as_none() {
        let token = mint(json!({ "sub": "42", "role": "auditor" }));
        let claims = UnverifiedClaims::decode(&token).expect("decode");
        assert_eq!(claims.role, None);
        assert_eq!(claims.subject.as_deref(), Some("42"));
    }

    #[test]
    fn garbage_fails_open_to_no_role() {
        assert_eq!(role_hint("not-a-token"), None);
        assert_eq!(role_hint("aaa.bbb.ccc"), None);
        assert_eq!(subject_hint("aaa.bbb.ccc"), None);
    }
}
