use crate::config::{ClientConfig, ConfigError};
use crate::error::{ApiError, ApiErrorKind};
use crate::redact::redact_secrets;
use crate::session::SessionManager;
use crate::types::{ApiRequest, Credentials, Session};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientBuildError {
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error("invalid user agent `{0}`")]
  UserAgent(String),
  #[error("failed to build HTTP client: {0}")]
  Http(#[from] reqwest::Error),
}

fn join_url(base: &Url, path: &str, query: &[(String, String)]) -> Result<Url, ApiError> {
  let path = path.trim();
  let joined = format!(
    "{}/{}",
    base.as_str().trim_end_matches('/'),
    path.trim_start_matches('/')
  );
  let mut url = Url::parse(&joined)
    .map_err(|e| ApiError::invalid_request(format!("Invalid request path `{path}`: {e}")))?;
  if !query.is_empty() {
    let mut pairs = url.query_pairs_mut();
    for (key, value) in query {
      pairs.append_pair(key, value);
    }
  }
  Ok(url)
}

fn read_string(value: Option<&Value>) -> Option<String> {
  let s = value?.as_str()?.trim();
  if s.is_empty() {
    None
  } else {
    Some(s.to_string())
  }
}

/// Pulls a human-readable message out of an error body: `message`, then
/// `error` (either a string or an object with its own `message`).
fn read_body_message(body: &str) -> Option<String> {
  let json: Value = serde_json::from_str(body).ok()?;
  let obj = json.as_object()?;
  let message = read_string(obj.get("message")).or_else(|| match obj.get("error") {
    Some(Value::Object(inner)) => read_string(inner.get("message")),
    other => read_string(other),
  })?;
  Some(redact_secrets(&message).into_owned())
}

fn map_http_status(status_code: u16) -> ApiErrorKind {
  match status_code {
    401 => ApiErrorKind::Unauthorized,
    404 => ApiErrorKind::NotFound,
    400..=499 => ApiErrorKind::Validation,
    _ => ApiErrorKind::Server,
  }
}

const SESSION_EXPIRED: &str = "Session expired.";
const INVALID_CREDENTIALS: &str = "Invalid credentials.";

fn error_for_status(status_code: u16, body: &str, unauthorized_fallback: &str) -> ApiError {
  let message = read_body_message(body);
  let status = Some(status_code);
  match map_http_status(status_code) {
    ApiErrorKind::Unauthorized => ApiError::Unauthorized {
      status,
      message: message.unwrap_or_else(|| unauthorized_fallback.to_string()),
    },
    ApiErrorKind::NotFound => ApiError::NotFound {
      message: message.unwrap_or_else(|| "Not found.".to_string()),
    },
    ApiErrorKind::Validation => ApiError::Validation {
      status,
      message: message.unwrap_or_else(|| format!("Request failed ({status_code}).")),
    },
    ApiErrorKind::Server | ApiErrorKind::Network => ApiError::Server {
      status,
      message: message.unwrap_or_else(|| format!("Server error ({status_code}).")),
    },
  }
}

fn network_error(err: reqwest::Error) -> ApiError {
  ApiError::Network {
    message: redact_secrets(&err.to_string()).into_owned(),
  }
}

fn parse_success_body(text: &str) -> Result<Value, ApiError> {
  if text.trim().is_empty() {
    return Ok(Value::Null);
  }
  serde_json::from_str(text)
    .map_err(|e| ApiError::malformed_response(format!("Response was not valid JSON: {e}")))
}

fn read_login_token(json: &Value) -> Option<String> {
  read_string(json.as_object()?.get("token"))
}

/// HTTP client that owns the attach-token / detect-401 / evict-session cycle.
///
/// Cloning is cheap and clones share both the connection pool and the session.
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
  login_path: String,
  user_agent: HeaderValue,
  session: SessionManager,
}

impl ApiClient {
  pub fn new(config: &ClientConfig, session: SessionManager) -> Result<Self, ClientBuildError> {
    let base_url = config.parsed_base_url()?;
    let user_agent = HeaderValue::from_str(&config.user_agent)
      .map_err(|_| ClientBuildError::UserAgent(config.user_agent.clone()))?;
    Ok(Self {
      http: reqwest::Client::builder().build()?,
      base_url,
      login_path: config.login_path.clone(),
      user_agent,
      session,
    })
  }

  /// Builds the client with the token store named by `config`.
  pub fn from_config(config: &ClientConfig) -> Result<Self, ClientBuildError> {
    Self::new(config, SessionManager::new(config.open_token_store()))
  }

  pub fn session(&self) -> &SessionManager {
    &self.session
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  fn build_headers(&self, has_body: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(USER_AGENT, self.user_agent.clone());
    if has_body {
      headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    headers
  }

  fn bearer_value(token: &str) -> Result<HeaderValue, ApiError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
      ApiError::Unauthorized {
        status: None,
        message: "Stored token cannot be sent as a header.".to_string(),
      }
    })?;
    value.set_sensitive(true);
    Ok(value)
  }

  async fn dispatch(
    &self,
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<&Value>,
    unauthorized_fallback: &str,
  ) -> Result<Value, ApiError> {
    let mut builder = self.http.request(method, url).headers(headers);
    if let Some(body) = body {
      builder = builder.json(body);
    }

    let res = builder.send().await.map_err(network_error)?;
    let status = res.status();
    let text = res.text().await;

    if !status.is_success() {
      let body = text.unwrap_or_default();
      return Err(error_for_status(status.as_u16(), &body, unauthorized_fallback));
    }

    parse_success_body(&text.map_err(network_error)?)
  }

  /// Sends one authenticated call and returns the response body as-is.
  ///
  /// Fails with `unauthorized` before touching the network when there is no
  /// session. A 401 evicts the session that issued the call.
  pub async fn request(&self, req: &ApiRequest) -> Result<Value, ApiError> {
    if req.path.trim().is_empty() {
      return Err(ApiError::invalid_request("Request path must not be empty."));
    }

    let Some(token) = self.session.token().await else {
      tracing::debug!(method = %req.method, path = %req.path, "no session, request not sent");
      return Err(ApiError::missing_token());
    };

    let url = join_url(&self.base_url, &req.path, &req.query)?;
    let bearer = match Self::bearer_value(&token) {
      Ok(v) => v,
      Err(e) => {
        self.session.expire(&token).await;
        return Err(e);
      }
    };
    let mut headers = self.build_headers(req.body.is_some());
    headers.insert(AUTHORIZATION, bearer);

    tracing::debug!(method = %req.method, path = %req.path, "sending request");
    let result = self
      .dispatch(req.method.clone(), url, headers, req.body.as_ref(), SESSION_EXPIRED)
      .await;

    if let Err(e) = &result {
      if e.kind() == ApiErrorKind::Unauthorized && self.session.expire(&token).await {
        tracing::info!(path = %req.path, "backend rejected token, session evicted");
      } else {
        tracing::debug!(path = %req.path, kind = %e.kind(), status = ?e.status(), "request failed");
      }
    }
    result
  }

  /// Same as [`request`](Self::request), then deserializes the body. A body
  /// that does not match `T` is a `server` error.
  pub async fn request_as<T: DeserializeOwned>(&self, req: &ApiRequest) -> Result<T, ApiError> {
    let value = self.request(req).await?;
    serde_json::from_value(value).map_err(|e| {
      ApiError::malformed_response(format!("Unexpected response shape for {}: {e}", req.path))
    })
  }

  pub async fn get(&self, path: &str) -> Result<Value, ApiError> {
    self.request(&ApiRequest::get(path)).await
  }

  /// Exchanges credentials for a token and makes it the current session.
  ///
  /// A failed login leaves any existing session in place.
  pub async fn login(&self, credentials: &Credentials) -> Result<Session, ApiError> {
    let url = join_url(&self.base_url, &self.login_path, &[])?;
    let body = serde_json::to_value(credentials)
      .map_err(|e| ApiError::invalid_request(format!("Credentials are not valid JSON: {e}")))?;

    let json = match self
      .dispatch(
        Method::POST,
        url,
        self.build_headers(true),
        Some(&body),
        INVALID_CREDENTIALS,
      )
      .await
    {
      Ok(json) => json,
      Err(e) => {
        tracing::warn!(kind = %e.kind(), status = ?e.status(), "login failed");
        return Err(e);
      }
    };

    let Some(token) = read_login_token(&json) else {
      return Err(ApiError::malformed_response(
        "Login response did not include a token.",
      ));
    };

    let Some(session) = self.session.establish(token).await else {
      return Err(ApiError::malformed_response(
        "Login response did not include a token.",
      ));
    };
    tracing::info!(
      user_id = session.identity().and_then(|i| i.user_id.as_deref()),
      role = session.identity().and_then(|i| i.role.as_deref()),
      "logged in"
    );
    Ok(session)
  }

  /// Always succeeds; logging out without a session is a no-op.
  pub async fn logout(&self) {
    if self.session.evict().await {
      tracing::info!("logged out");
    }
  }
}
