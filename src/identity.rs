use crate::types::Identity;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::{Map, Value};

const USER_ID_CLAIMS: [&str; 5] = ["id", "userId", "user_id", "_id", "sub"];
const DISPLAY_NAME_CLAIMS: [&str; 4] = ["name", "displayName", "username", "email"];

fn read_string(value: Option<&Value>) -> Option<String> {
    let s = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn first_claim(claims: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| read_string(claims.get(*name)))
}

fn read_role(claims: &Map<String, Value>) -> Option<String> {
    if let Some(role) = read_string(claims.get("role")) {
        return Some(role);
    }
    claims
        .get("roles")
        .and_then(|v| v.as_array())
        .and_then(|roles| roles.iter().find_map(|r| read_string(Some(r))))
}

fn decode_payload(token: &str) -> Option<Map<String, Value>> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    // Some issuers keep the padding even though JWT forbids it.
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    match serde_json::from_slice::<Value>(&bytes).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Reads identity claims out of a JWT-shaped token without verifying it.
///
/// The signature is the backend's business; the client only uses these claims
/// for display and never for authorization decisions. Opaque tokens yield
/// `None`.
pub fn decode_identity(token: &str) -> Option<Identity> {
    let claims = decode_payload(token)?;
    let identity = Identity {
        user_id: first_claim(&claims, &USER_ID_CLAIMS),
        role: read_role(&claims),
        display_name: first_claim(&claims, &DISPLAY_NAME_CLAIMS),
        expires_at: claims.get("exp").and_then(|v| v.as_i64()),
    };
    (!identity.is_empty()).then_some(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn jwt(payload: Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{body}.c2lnbmF0dXJl")
    }

    #[test]
    fn decodes_common_claims() {
        let token = jwt(json!({"id": 42, "role": "admin", "name": "Dr. Rivera", "exp": 1_900_000_000}));
        let identity = decode_identity(&token).unwrap();
        assert_eq!(identity.user_id.as_deref(), Some("42"));
        assert_eq!(identity.role.as_deref(), Some("admin"));
        assert_eq!(identity.display_name.as_deref(), Some("Dr. Rivera"));
        assert_eq!(identity.expires_at, Some(1_900_000_000));
    }

    #[test]
    fn falls_back_through_alternate_claim_names() {
        let token = jwt(json!({"sub": "u-1", "roles": ["staff", "admin"], "email": "vet@clinic.test"}));
        let identity = decode_identity(&token).unwrap();
        assert_eq!(identity.user_id.as_deref(), Some("u-1"));
        assert_eq!(identity.role.as_deref(), Some("staff"));
        assert_eq!(identity.display_name.as_deref(), Some("vet@clinic.test"));
        assert_eq!(identity.expires_at, None);
    }

    #[test]
    fn opaque_tokens_have_no_identity() {
        assert_eq!(decode_identity("T1"), None);
        assert_eq!(decode_identity("a.b"), None);
        assert_eq!(decode_identity("a.!!!.c"), None);
        assert_eq!(decode_identity(&jwt(json!(["not", "an", "object"]))), None);
        assert_eq!(decode_identity(&jwt(json!({"iat": 1}))), None);
    }
}
