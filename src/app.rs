use crate::client::ApiClient;
use crate::config::{self, ClientConfig, StorageBackend};
use crate::error::{ApiError, ApiErrorKind};
use crate::session::KeyringTokenStore;
use crate::types::{ApiRequest, Credentials, SessionStatus};
use clap::{ArgAction, Parser, Subcommand};
use reqwest::Method;
use serde::Serialize;
use serde_json::{json, Value};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "vetportal")]
#[command(about = "Authenticated client for the clinic booking, boarding and records API")]
#[command(version)]
#[command(
    after_help = "Environment:\n  VETPORTAL_API_URL    Backend base URL\n  VETPORTAL_STORAGE    Token storage: keyring, file or memory\n  VETPORTAL_PASSWORD   Password for `login`\n  VETPORTAL_LOG        Log filter override"
)]
struct Cli {
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
    #[arg(long, short, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[arg(long, global = true)]
    base_url: Option<String>,
    #[arg(long, global = true, value_parser = parse_storage)]
    storage: Option<StorageBackend>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Exchange credentials for a token and store it.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "VETPORTAL_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the stored token.
    Logout,
    /// Show the current session state and decoded identity.
    Whoami,
    /// GET a path and print the JSON response.
    Get {
        path: String,
        #[arg(long = "query", short = 'q', value_parser = parse_pair)]
        query: Vec<(String, String)>,
    },
    /// Send an arbitrary method with an optional JSON body.
    Send {
        method: String,
        path: String,
        #[arg(long)]
        body: Option<String>,
        #[arg(long = "query", short = 'q', value_parser = parse_pair)]
        query: Vec<(String, String)>,
    },
    /// Print the effective configuration.
    Config,
}

fn parse_storage(value: &str) -> Result<StorageBackend, String> {
    value.parse().map_err(|e: config::ConfigError| e.to_string())
}

fn parse_pair(value: &str) -> Result<(String, String), String> {
    let (key, val) = value
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{value}`"))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in `{value}`"));
    }
    Ok((key.trim().to_string(), val.to_string()))
}

#[derive(Debug, Serialize)]
struct ErrorReport {
    kind: ApiErrorKind,
    status: Option<u16>,
    message: String,
}

fn exit_status_for(kind: ApiErrorKind) -> u8 {
    match kind {
        ApiErrorKind::Unauthorized => 2,
        ApiErrorKind::Validation | ApiErrorKind::NotFound => 3,
        ApiErrorKind::Server => 4,
        ApiErrorKind::Network => 5,
    }
}

fn report_error(json_output: bool, err: &ApiError) -> ExitCode {
    if json_output {
        let report = ErrorReport {
            kind: err.kind(),
            status: err.status(),
            message: err.message().to_string(),
        };
        eprintln!("{}", json!({ "error": report }));
    } else {
        eprintln!("error ({}): {}", err.kind(), err.message());
        if err.requires_login() {
            eprintln!("run `vetportal login --email <email>` to sign in again");
        }
    }
    ExitCode::from(exit_status_for(err.kind()))
}

fn print_value(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}

fn log_filter(config: &ClientConfig, verbose: u8) -> String {
    match verbose {
        0 => config.log_filter.clone(),
        1 => "vetportal=debug".to_string(),
        _ => "debug".to_string(),
    }
}

fn build_request(
    method: &str,
    path: String,
    body: Option<String>,
    query: Vec<(String, String)>,
) -> Result<ApiRequest, ApiError> {
    let method = Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| ApiError::invalid_request(format!("Unknown HTTP method `{method}`.")))?;
    let mut req = ApiRequest::new(method, path);
    if let Some(body) = body {
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| ApiError::invalid_request(format!("--body is not valid JSON: {e}")))?;
        req = req.with_body(value);
    }
    req.query = query;
    Ok(req)
}

async fn execute(cli: Cli, config: ClientConfig) -> ExitCode {
    let client = match ApiClient::from_config(&config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(1);
        }
    };

    match cli.command {
        Commands::Login { email, password } => {
            match client.login(&Credentials::new(email.clone(), password)).await {
                Ok(session) => {
                    if cli.json {
                        println!(
                            "{}",
                            json!({ "status": SessionStatus::Authenticated, "identity": session.identity() })
                        );
                    } else {
                        let who = session
                            .identity()
                            .and_then(|i| i.display_name.clone().or_else(|| i.user_id.clone()))
                            .unwrap_or(email);
                        println!("Logged in as {who}.");
                    }
                    ExitCode::SUCCESS
                }
                Err(e) => report_error(cli.json, &e),
            }
        }
        Commands::Logout => {
            client.session().init().await;
            client.logout().await;
            if cli.json {
                println!("{}", json!({ "status": SessionStatus::Unauthenticated }));
            } else {
                println!("Logged out.");
            }
            ExitCode::SUCCESS
        }
        Commands::Whoami => {
            let status = client.session().init().await;
            let session = client.session().current().await;
            let identity = session.as_ref().and_then(|s| s.identity());
            if cli.json {
                println!("{}", json!({ "status": status, "identity": identity }));
            } else if status == SessionStatus::Authenticated {
                match identity {
                    Some(i) => println!(
                        "Authenticated: user {} ({}), {}",
                        i.user_id.as_deref().unwrap_or("?"),
                        i.role.as_deref().unwrap_or("no role"),
                        i.display_name.as_deref().unwrap_or("no name"),
                    ),
                    None => println!("Authenticated (opaque token)."),
                }
            } else {
                println!("Not logged in.");
            }
            if status == SessionStatus::Authenticated {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(exit_status_for(ApiErrorKind::Unauthorized))
            }
        }
        Commands::Get { path, query } => {
            client.session().init().await;
            let mut req = ApiRequest::get(path);
            req.query = query;
            match client.request(&req).await {
                Ok(value) => {
                    print_value(&value);
                    ExitCode::SUCCESS
                }
                Err(e) => report_error(cli.json, &e),
            }
        }
        Commands::Send {
            method,
            path,
            body,
            query,
        } => {
            client.session().init().await;
            let result = match build_request(&method, path, body, query) {
                Ok(req) => client.request(&req).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(value) => {
                    print_value(&value);
                    ExitCode::SUCCESS
                }
                Err(e) => report_error(cli.json, &e),
            }
        }
        Commands::Config => {
            let keyring_available =
                KeyringTokenStore::new(config.token_key.clone()).is_available();
            print_value(&json!({
                "configFile": config::config_file_path(),
                "keyringAvailable": keyring_available,
                "effective": config,
            }));
            ExitCode::SUCCESS
        }
    }
}

pub async fn run() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match ClientConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(1);
        }
    };
    if let Some(base_url) = cli.base_url.clone() {
        config.base_url = base_url;
    }
    if let Some(storage) = cli.storage {
        config.storage = storage;
    }

    crate::init_tracing(&log_filter(&config, cli.verbose));

    if let Err(e) = config.parsed_base_url() {
        eprintln!("error: {e}");
        return ExitCode::from(1);
    }

    tracing::debug!(base_url = %config.base_url, storage = ?config.storage, "starting");
    execute(cli, config).await
}
