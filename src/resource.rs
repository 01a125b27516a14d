//! Path building for the admin/staff/user namespaces and per-endpoint payload
//! extraction.
//!
//! The backend does not wrap payloads consistently: some endpoints return a
//! bare array, some `{data: [...]}`, some `{message, services: [...]}`. The
//! caller states the wrapper for each endpoint it uses; nothing here guesses.

use crate::error::ApiError;
use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Admin,
    Staff,
    User,
}

impl Namespace {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Staff => "staff",
            Self::User => "user",
        }
    }

    /// `/{namespace}/{resource}`, e.g. `/admin/users`.
    pub fn path(self, resource: &str) -> String {
        format!("/{}/{}", self.prefix(), resource.trim_matches('/'))
    }

    /// `/{namespace}/{resource}/{id}` with `id` percent-encoded.
    pub fn item_path(self, resource: &str, id: &str) -> String {
        format!("{}/{}", self.path(resource), urlencoding::encode(id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    /// The body is the payload.
    Bare,
    /// `{"data": payload}`
    Data,
    /// `{"<name>": payload, ...}`
    Field(&'static str),
}

impl Envelope {
    pub fn extract(self, body: Value) -> Result<Value, ApiError> {
        let field = match self {
            Self::Bare => return Ok(body),
            Self::Data => "data",
            Self::Field(name) => name,
        };
        match body {
            Value::Object(mut map) => map.remove(field).ok_or_else(|| {
                ApiError::malformed_response(format!("Response has no `{field}` field."))
            }),
            _ => Err(ApiError::malformed_response(format!(
                "Expected an object with a `{field}` field."
            ))),
        }
    }

    pub fn extract_as<T: DeserializeOwned>(self, body: Value) -> Result<T, ApiError> {
        let payload = self.extract(body)?;
        serde_json::from_value(payload)
            .map_err(|e| ApiError::malformed_response(format!("Unexpected payload shape: {e}")))
    }
}
