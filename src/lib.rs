mod app;
pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod redact;
pub mod resource;
pub mod session;
pub mod types;

#[cfg(test)]
mod test_support;

pub use app::run;
pub use client::{ApiClient, ClientBuildError};
pub use config::{ClientConfig, ConfigError, StorageBackend};
pub use error::{ApiError, ApiErrorKind};
pub use resource::{Envelope, Namespace};
pub use session::SessionManager;
pub use types::{ApiRequest, Credentials, Identity, Session, SessionEvent, SessionStatus};

use tracing_subscriber::EnvFilter;

/// Installs the stderr log subscriber. `VETPORTAL_LOG` wins over
/// `default_filter`. Calling it twice is harmless.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_env(config::ENV_LOG)
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
