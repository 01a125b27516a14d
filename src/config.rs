use crate::session::{FileTokenStore, KeyringTokenStore, MemoryTokenStore, TokenStore};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

pub const APP_DIR_NAME: &str = "vetportal";
const CONFIG_FILE_NAME: &str = "config.json";
const TOKEN_FILE_NAME: &str = "storage.json";

pub const KEY_BASE_URL: &str = "baseUrl";
pub const KEY_STORAGE: &str = "storage";
pub const KEY_TOKEN_KEY: &str = "tokenKey";
pub const KEY_LOGIN_PATH: &str = "loginPath";
pub const KEY_USER_AGENT: &str = "userAgent";
pub const KEY_LOG_FILTER: &str = "logFilter";
pub const KEY_TOKEN_FILE: &str = "tokenFile";

pub const ENV_API_URL: &str = "VETPORTAL_API_URL";
pub const ENV_STORAGE: &str = "VETPORTAL_STORAGE";
pub const ENV_TOKEN_KEY: &str = "VETPORTAL_TOKEN_KEY";
pub const ENV_LOGIN_PATH: &str = "VETPORTAL_LOGIN_PATH";
pub const ENV_LOG: &str = "VETPORTAL_LOG";

fn defaults() -> Map<String, Value> {
  let mut map = Map::new();
  map.insert(KEY_BASE_URL.to_string(), json!("http://localhost:5000/api"));
  map.insert(KEY_STORAGE.to_string(), json!("keyring"));
  map.insert(KEY_TOKEN_KEY.to_string(), json!("token"));
  map.insert(KEY_LOGIN_PATH.to_string(), json!("/auth/login"));
  map.insert(
    KEY_USER_AGENT.to_string(),
    json!(concat!("vetportal-client/", env!("CARGO_PKG_VERSION"))),
  );
  map.insert(KEY_LOG_FILTER.to_string(), json!("warn"));
  map
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file {}: {}", .path.display(), .source)]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("config file {} is not a JSON object", .path.display())]
  NotAnObject { path: PathBuf },
  #[error("config file {} is invalid: {}", .path.display(), .source)]
  Json {
    path: PathBuf,
    source: serde_json::Error,
  },
  #[error("unknown storage backend `{0}` (expected keyring, file or memory)")]
  UnknownStorage(String),
  #[error("invalid base URL `{url}`: {reason}")]
  InvalidBaseUrl { url: String, reason: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
  Keyring,
  File,
  Memory,
}

impl FromStr for StorageBackend {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "keyring" => Ok(Self::Keyring),
      "file" => Ok(Self::File),
      "memory" => Ok(Self::Memory),
      other => Err(ConfigError::UnknownStorage(other.to_string())),
    }
  }
}

/// Layered settings: built-in defaults, then the JSON config file.
struct Settings {
  values: Map<String, Value>,
}

impl Settings {
  fn from_file(path: Option<&Path>) -> Result<Self, ConfigError> {
    let mut values = defaults();
    let Some(path) = path else {
      return Ok(Self { values });
    };

    let text = match std::fs::read_to_string(path) {
      Ok(t) => t,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self { values }),
      Err(source) => {
        return Err(ConfigError::Io {
          path: path.to_path_buf(),
          source,
        })
      }
    };

    let parsed: Value = serde_json::from_str(&text).map_err(|source| ConfigError::Json {
      path: path.to_path_buf(),
      source,
    })?;
    let Value::Object(file_values) = parsed else {
      return Err(ConfigError::NotAnObject {
        path: path.to_path_buf(),
      });
    };
    values.extend(file_values);
    Ok(Self { values })
  }

  fn get_string(&self, key: &str) -> Option<String> {
    let s = self.values.get(key)?.as_str()?.trim();
    if s.is_empty() {
      None
    } else {
      Some(s.to_string())
    }
  }

  fn get_string_or(&self, key: &str, fallback: &str) -> String {
    self.get_string(key).unwrap_or_else(|| fallback.to_string())
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
  pub base_url: String,
  pub storage: StorageBackend,
  pub token_key: String,
  pub login_path: String,
  pub user_agent: String,
  pub log_filter: String,
  pub token_file: PathBuf,
}

impl Default for ClientConfig {
  fn default() -> Self {
    let settings = Settings { values: defaults() };
    Self {
      base_url: settings.get_string_or(KEY_BASE_URL, ""),
      storage: StorageBackend::Keyring,
      token_key: settings.get_string_or(KEY_TOKEN_KEY, "token"),
      login_path: settings.get_string_or(KEY_LOGIN_PATH, "/auth/login"),
      user_agent: settings.get_string_or(KEY_USER_AGENT, "vetportal-client"),
      log_filter: settings.get_string_or(KEY_LOG_FILTER, "warn"),
      token_file: default_token_file(),
    }
  }
}

pub fn config_file_path() -> Option<PathBuf> {
  dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

pub fn default_token_file() -> PathBuf {
  dirs::data_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join(APP_DIR_NAME)
    .join(TOKEN_FILE_NAME)
}

impl ClientConfig {
  /// Defaults, then the user config file, then `VETPORTAL_*` variables.
  pub fn load() -> Result<Self, ConfigError> {
    let path = config_file_path();
    Self::load_with(path.as_deref(), |key| std::env::var(key).ok())
  }

  pub fn load_with(
    path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
  ) -> Result<Self, ConfigError> {
    let settings = Settings::from_file(path)?;
    let read_env = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let storage = match read_env(ENV_STORAGE).or_else(|| settings.get_string(KEY_STORAGE)) {
      Some(value) => value.parse()?,
      None => StorageBackend::Keyring,
    };

    let config = Self {
      base_url: read_env(ENV_API_URL).unwrap_or_else(|| settings.get_string_or(KEY_BASE_URL, "")),
      storage,
      token_key: read_env(ENV_TOKEN_KEY).unwrap_or_else(|| settings.get_string_or(KEY_TOKEN_KEY, "token")),
      login_path: read_env(ENV_LOGIN_PATH)
        .unwrap_or_else(|| settings.get_string_or(KEY_LOGIN_PATH, "/auth/login")),
      user_agent: settings.get_string_or(KEY_USER_AGENT, "vetportal-client"),
      log_filter: settings.get_string_or(KEY_LOG_FILTER, "warn"),
      token_file: settings
        .get_string(KEY_TOKEN_FILE)
        .map(PathBuf::from)
        .unwrap_or_else(default_token_file),
    };
    config.parsed_base_url()?;
    Ok(config)
  }

  pub fn parsed_base_url(&self) -> Result<Url, ConfigError> {
    let url = Url::parse(&self.base_url).map_err(|e| ConfigError::InvalidBaseUrl {
      url: self.base_url.clone(),
      reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
      return Err(ConfigError::InvalidBaseUrl {
        url: self.base_url.clone(),
        reason: "expected an http(s) URL".to_string(),
      });
    }
    Ok(url)
  }

  pub fn open_token_store(&self) -> Arc<dyn TokenStore> {
    match self.storage {
      StorageBackend::Keyring => Arc::new(KeyringTokenStore::new(self.token_key.clone())),
      StorageBackend::File => Arc::new(FileTokenStore::new(
        self.token_file.clone(),
        self.token_key.clone(),
      )),
      StorageBackend::Memory => Arc::new(MemoryTokenStore::new()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn no_env(_: &str) -> Option<String> {
    None
  }

  #[test]
  fn defaults_apply_without_file() {
    let config = ClientConfig::load_with(None, no_env).unwrap();
    assert_eq!(config.base_url, "http://localhost:5000/api");
    assert_eq!(config.storage, StorageBackend::Keyring);
    assert_eq!(config.token_key, "token");
    assert_eq!(config.login_path, "/auth/login");
    assert_eq!(config.log_filter, "warn");
  }

  #[test]
  fn file_values_override_defaults_and_env_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
      &path,
      r#"{"baseUrl":"https://clinic.example/api","storage":"file","tokenKey":"adminToken"}"#,
    )
    .unwrap();

    let config = ClientConfig::load_with(Some(&path), no_env).unwrap();
    assert_eq!(config.base_url, "https://clinic.example/api");
    assert_eq!(config.storage, StorageBackend::File);
    assert_eq!(config.token_key, "adminToken");

    let env: HashMap<&str, &str> = HashMap::from([
      (ENV_API_URL, "https://staging.clinic.example"),
      (ENV_STORAGE, "memory"),
    ]);
    let config =
      ClientConfig::load_with(Some(&path), |k| env.get(k).map(|v| v.to_string())).unwrap();
    assert_eq!(config.base_url, "https://staging.clinic.example");
    assert_eq!(config.storage, StorageBackend::Memory);
    assert_eq!(config.token_key, "adminToken");
  }

  #[test]
  fn rejects_unknown_storage_and_bad_url() {
    let err = ClientConfig::load_with(None, |k| (k == ENV_STORAGE).then(|| "cookie".to_string()))
      .unwrap_err();
    assert!(matches!(err, ConfigError::UnknownStorage(s) if s == "cookie"));

    let err = ClientConfig::load_with(None, |k| (k == ENV_API_URL).then(|| "ftp://x".to_string()))
      .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidBaseUrl { .. }));
  }

  #[test]
  fn rejects_non_object_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "[1,2]").unwrap();
    assert!(matches!(
      ClientConfig::load_with(Some(&path), no_env),
      Err(ConfigError::NotAnObject { .. })
    ));
  }

  #[test]
  fn memory_backend_opens_empty_store() {
    let config = ClientConfig {
      storage: StorageBackend::Memory,
      ..ClientConfig::default()
    };
    let store = config.open_token_store();
    assert_eq!(store.backend_name(), "memory");
    assert_eq!(store.load().unwrap(), None);
  }
}
