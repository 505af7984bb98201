//! CLI argument parsing, logging setup, and command handlers.

use crate::api::{ApiClient, Resource};
use crate::guard::{GuardConfig, GuardDecision, RouteGuard};
use crate::routes::RouteTable;
use crate::session::{SessionConfig, SessionResolver};
use crate::store::FileBackend;
use crate::{GateConfig, open_session, run_server};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info};
use url::Url;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "crm-gate", about = "Session gate and API client for the CRM")]
pub struct Args {
    /// Base URL of the CRM REST API
    #[arg(long, env = "CRM_API_URL", default_value = "http://localhost:5000/api")]
    pub api_url: String,

    /// Bound on the identity confirmation call, in milliseconds
    #[arg(long, default_value = "5000")]
    pub identity_timeout_ms: u64,

    /// How long a page may wait on the session check before giving up, in milliseconds
    #[arg(long, default_value = "6000")]
    pub loading_timeout_ms: u64,

    /// File holding the persisted token
    #[arg(long, env = "CRM_SESSION_FILE", default_value = "crm-session.json")]
    pub session_file: PathBuf,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the page shell behind the edge gate
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Directory with the built pages
        #[arg(short, long, default_value = "dist")]
        dist: PathBuf,
    },
    /// Log in and persist the token
    Login {
        #[arg(long)]
        email: String,

        /// Prefer the CRM_PASSWORD environment variable
        #[arg(long, env = "CRM_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Confirm the stored session with the server and print the user
    Whoami,
    /// Report whether a session is active, without printing the user
    Status,
    /// Clear the stored token
    Logout,
    /// List records of a resource
    List {
        #[arg(value_enum)]
        resource: Resource,
    },
    /// Show what the route guard would do for a page path
    Check { path: String },
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt().with_writer(std::io::stderr).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Compact => tracing_subscriber::fmt()
            .compact()
            .with_writer(std::io::stderr)
            .init(),
    }
}

/// Parse and validate the API URL.
/// Returns None and logs an error if validation fails.
pub fn validate_api_url(api_url: &str) -> Option<Url> {
    let url = match Url::parse(api_url) {
        Ok(url) => url,
        Err(e) => {
            error!(url = %api_url, error = %e, "Invalid API URL");
            return None;
        }
    };

    if !matches!(url.scheme(), "http" | "https") {
        error!(url = %api_url, "API URL must use http or https");
        return None;
    }

    let is_https = url.scheme() == "https";
    let is_local = matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));
    if !is_https && !is_local {
        error!("API URL must use HTTPS for non-localhost deployments");
        return None;
    }

    Some(url)
}

/// Build the session resolver from validated arguments.
pub fn build_session(args: &Args, api_url: Url) -> Option<SessionResolver<ApiClient>> {
    let config = SessionConfig {
        identity_timeout: Duration::from_millis(args.identity_timeout_ms),
        ..SessionConfig::default()
    };
    match open_session(api_url, FileBackend::new(&args.session_file), config) {
        Ok(session) => Some(session),
        Err(e) => {
            error!(error = %e, "Failed to create API client");
            None
        }
    }
}

/// Run the edge gate server until it exits.
pub async fn handle_serve(port: u16, dist: PathBuf) -> bool {
    if !dist.join("index.html").is_file() {
        error!(dist = %dist.display(), "Page directory has no index.html");
        return false;
    }

    let addr = format!("0.0.0.0:{}", port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(address = %addr, error = %e, "Failed to bind");
            return false;
        }
    };
    if let Ok(local) = listener.local_addr() {
        info!(address = %local, "Listening");
    }

    let config = GateConfig {
        dist,
        routes: RouteTable::default(),
    };
    match run_server(config, listener).await {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, "Server error");
            false
        }
    }
}

pub async fn handle_login(
    session: &SessionResolver<ApiClient>,
    email: &str,
    password: &str,
) -> bool {
    let result = session.login(email, password).await;
    if !result.success {
        println!(
            "Login failed: {}",
            result.message.as_deref().unwrap_or("unknown error")
        );
        return false;
    }

    let snapshot = session.snapshot();
    let name = snapshot
        .user
        .as_ref()
        .and_then(|u| u.full_name.clone().or_else(|| u.email.clone()))
        .unwrap_or_default();
    println!("Logged in as {}", name);
    if result.password_change_required {
        println!(
            "A password change is required. Visit {} to set a new password.",
            RouteTable::default().password_change_path
        );
    }
    true
}

pub async fn handle_whoami(session: &SessionResolver<ApiClient>) -> bool {
    let snapshot = session.refresh().await;
    match snapshot.user {
        Some(user) => match serde_json::to_string_pretty(&user) {
            Ok(json) => {
                println!("{}", json);
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to render user");
                false
            }
        },
        None => {
            println!("Not logged in ({})", describe_state(session));
            false
        }
    }
}

pub async fn handle_status(session: &SessionResolver<ApiClient>) -> bool {
    let snapshot = session.refresh().await;
    if snapshot.is_authenticated() {
        println!("Logged in");
        true
    } else {
        println!("Not logged in ({})", describe_state(session));
        false
    }
}

pub fn handle_logout(session: &SessionResolver<ApiClient>) -> bool {
    let redirect = session.logout();
    println!("Logged out. Sign in again at {}", redirect.location);
    true
}

pub async fn handle_list(session: &SessionResolver<ApiClient>, resource: Resource) -> bool {
    let snapshot = session.refresh().await;
    let Some(user) = snapshot.user else {
        println!("Not logged in ({})", describe_state(session));
        return false;
    };

    let routes = RouteTable::default();
    if !routes.permits(resource.path(), &user) {
        println!("Your role does not have access to {}", resource.path());
        return false;
    }

    let result = session.observe(
        session
            .backend()
            .list::<serde_json::Value>(resource, &[])
            .await,
    );
    match result.and_then(|envelope| envelope.into_data()) {
        Ok(data) => {
            let rows = data.unwrap_or_default();
            info!(resource = ?resource, count = rows.len(), "Fetched records");
            match serde_json::to_string_pretty(&rows) {
                Ok(json) => {
                    println!("{}", json);
                    true
                }
                Err(e) => {
                    error!(error = %e, "Failed to render records");
                    false
                }
            }
        }
        Err(e) => {
            println!("Request failed: {}", e.user_message());
            false
        }
    }
}

/// Resolve the session and run the route guard for `path`, the way a page
/// load would: loading first, then the settled decision or a timeout.
pub async fn handle_check(
    session: &SessionResolver<ApiClient>,
    path: &str,
    loading_timeout: Duration,
) -> bool {
    let mut guard = RouteGuard::new(RouteTable::default(), GuardConfig { loading_timeout });
    let started = Instant::now();
    guard.enforce(path, session, started);

    // The check stays alive past the timeout so the guard can end it.
    let refresh = session.refresh();
    tokio::pin!(refresh);
    let decision = match tokio::time::timeout(loading_timeout, &mut refresh).await {
        Ok(_) => guard.enforce(path, session, Instant::now()),
        Err(_) => guard.enforce(path, session, started + loading_timeout),
    };

    match decision {
        GuardDecision::RenderChildren => {
            println!("{}: render", path);
            true
        }
        GuardDecision::RenderLoading | GuardDecision::RenderRedirecting => {
            println!("{}: still resolving", path);
            false
        }
        GuardDecision::Navigate {
            target,
            end_session,
        } => {
            if end_session {
                println!("{}: session check timed out, redirect to {}", path, target);
            } else {
                println!("{}: redirect to {}", path, target);
            }
            false
        }
    }
}

/// Dispatch a command that needs a session.
pub async fn handle_session_command(
    session: &SessionResolver<ApiClient>,
    command: &Command,
    loading_timeout: Duration,
) -> bool {
    match command {
        Command::Check { path } => handle_check(session, path, loading_timeout).await,
        Command::Login { email, password } => handle_login(session, email, password).await,
        Command::Whoami => handle_whoami(session).await,
        Command::Status => handle_status(session).await,
        Command::Logout => handle_logout(session),
        Command::List { resource } => handle_list(session, *resource).await,
        Command::Serve { .. } => {
            error!("serve does not run against a session");
            false
        }
    }
}

fn describe_state(session: &SessionResolver<ApiClient>) -> String {
    match session.state() {
        crate::session::SessionState::Unauthenticated(reason) => reason.to_string(),
        other => format!("{:?}", other),
    }
}
