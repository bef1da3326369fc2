//! Issued authorization
//!
//! Token endpoint success body (RFC 6749 §5.1) and its validation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Access token field
pub const FIELD_ACCESS_TOKEN: &str = "access_token";
/// Token type field
pub const FIELD_TOKEN_TYPE: &str = "token_type";
/// Lifetime field
pub const FIELD_EXPIRES_IN: &str = "expires_in";
/// Refresh token field
pub const FIELD_REFRESH_TOKEN: &str = "refresh_token";

/// Authorization issued by the token endpoint
///
/// Provider-specific fields are kept in `extra` so the JSON-emitting
/// flows echo the whole response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuedAuthorization {
    /// Access token
    pub access_token: String,

    /// Token type (only "Bearer" is accepted)
    pub token_type: String,

    /// Lifetime of the access token in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,

    /// Refresh token (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Granted scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Provider-specific passthrough fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IssuedAuthorization {
    /// Validate a raw token endpoint body and convert it
    ///
    /// Every failure is a protocol violation of the authorization server
    /// and maps to 500.
    pub fn from_response(body: Value) -> Result<Self> {
        let Value::Object(mut fields) = body else {
            return Err(Error::InvalidAuthorization(
                "Response from authorization server is not a JSON object".to_string(),
            ));
        };

        let access_token = match fields.remove(FIELD_ACCESS_TOKEN) {
            Some(Value::String(token)) => token,
            _ => {
                return Err(Error::InvalidAuthorization(
                    "Response from authorization server does not have required \"access_token\" field"
                        .to_string(),
                ));
            }
        };

        let token_type = match fields.remove(FIELD_TOKEN_TYPE) {
            Some(Value::String(token_type)) => token_type,
            _ => {
                return Err(Error::InvalidAuthorization(
                    "Response from authorization server does not have required \"token_type\" field"
                        .to_string(),
                ));
            }
        };

        if !token_type.eq_ignore_ascii_case("bearer") {
            return Err(Error::InvalidAuthorization(
                "Only Bearer token type is supported".to_string(),
            ));
        }

        // Some servers send the lifetime as a string
        let expires_in = fields
            .remove(FIELD_EXPIRES_IN)
            .and_then(|v| match v {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            });

        let refresh_token = match fields.remove(FIELD_REFRESH_TOKEN) {
            Some(Value::String(token)) => Some(token),
            _ => None,
        };

        let scope = match fields.remove("scope") {
            Some(Value::String(scope)) => Some(scope),
            _ => None,
        };

        Ok(Self {
            access_token,
            token_type,
            expires_in,
            refresh_token,
            scope,
            extra: fields,
        })
    }

    /// Serialize back to the JSON shape received from the server
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn accepts_any_case_of_bearer() {
        for token_type in ["bearer", "Bearer", "BEARER", "bEaReR"] {
            let auth = IssuedAuthorization::from_response(json!({
                "access_token": "AT1",
                "token_type": token_type,
            }))
            .unwrap();
            assert_eq!(auth.access_token, "AT1");
            assert_eq!(auth.token_type, token_type);
        }
    }

    #[test]
    fn rejects_other_token_types() {
        for token_type in ["mac", "bearer2", ""] {
            let err = IssuedAuthorization::from_response(json!({
                "access_token": "AT1",
                "token_type": token_type,
            }))
            .unwrap_err();
            assert_eq!(err.status().as_u16(), 500);
        }
    }

    #[test]
    fn rejects_missing_required_fields() {
        let missing_token = IssuedAuthorization::from_response(json!({"token_type": "bearer"}));
        assert_eq!(missing_token.unwrap_err().status().as_u16(), 500);

        let missing_type = IssuedAuthorization::from_response(json!({"access_token": "AT1"}));
        assert_eq!(missing_type.unwrap_err().status().as_u16(), 500);

        let wrong_kind = IssuedAuthorization::from_response(json!({
            "access_token": 42,
            "token_type": "bearer",
        }));
        assert!(wrong_kind.is_err());

        assert!(IssuedAuthorization::from_response(json!("AT1")).is_err());
    }

    #[test]
    fn keeps_optional_and_passthrough_fields() {
        let auth = IssuedAuthorization::from_response(json!({
            "access_token": "AT1",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "RT1",
            "scope": "read write",
            "user_id": 7,
        }))
        .unwrap();

        assert_eq!(auth.expires_in, Some(3600));
        assert_eq!(auth.refresh_token.as_deref(), Some("RT1"));
        assert_eq!(auth.scope.as_deref(), Some("read write"));
        assert_eq!(auth.extra["user_id"], 7);

        let echoed = auth.to_json();
        assert_eq!(echoed["access_token"], "AT1");
        assert_eq!(echoed["user_id"], 7);
    }

    #[test]
    fn string_lifetime_is_parsed() {
        let auth = IssuedAuthorization::from_response(json!({
            "access_token": "AT1",
            "token_type": "bearer",
            "expires_in": "120",
        }))
        .unwrap();
        assert_eq!(auth.expires_in, Some(120));
    }
}
