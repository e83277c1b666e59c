//! API session client
//!
//! Command-line front end for the authenticated API client:
//! 1. Loads configuration and builds the client stack
//! 2. Logs in, or restores an existing session
//! 3. Runs the requested command and prints JSON to stdout
//!
//! Logs go to stderr as JSON.

mod config;
mod error;
mod session;

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::session::SessionManager;

const USAGE: &str = "usage: api-session [--config PATH] <login|profile|get PATH|logout|logout-all>";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Login,
    Profile,
    Get(String),
    Logout,
    LogoutAll,
}

/// Split CLI args (without the program name) into the config path and command.
fn parse_args(args: &[String]) -> Result<(Option<String>, Command)> {
    let mut config_path = None;
    let mut rest = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            let Some(path) = iter.next() else {
                bail!("--config requires a path\n{USAGE}");
            };
            config_path = Some(path.clone());
        } else {
            rest.push(arg.as_str());
        }
    }

    let command = match rest.as_slice() {
        ["login"] => Command::Login,
        ["profile"] => Command::Profile,
        ["get", path] => Command::Get((*path).to_string()),
        ["logout"] => Command::Logout,
        ["logout-all"] => Command::LogoutAll,
        _ => bail!("{USAGE}"),
    };
    Ok((config_path, command))
}

async fn run(session: &SessionManager, config: &Config, command: Command) -> Result<Value> {
    match command {
        Command::Login => {
            let email = config
                .login
                .email
                .as_deref()
                .context("login.email is not configured")?;
            let password = config
                .login
                .password
                .as_ref()
                .context("no password: set API_PASSWORD or login.password_file")?;
            let user = session.login(email, password).await?;
            Ok(json!({"authenticated": true, "user": user}))
        }
        Command::Profile => match session.restore().await? {
            Some(user) => Ok(json!({"authenticated": true, "user": user})),
            None => Ok(json!({"authenticated": false})),
        },
        Command::Get(path) => {
            session.restore().await?;
            let response = session
                .transport()
                .get(&path)
                .await
                .with_context(|| format!("GET {path} failed"))?;
            let body = response
                .json::<Value>()
                .unwrap_or_else(|_| Value::String(response.text()));
            Ok(json!({"status": response.status().as_u16(), "body": body}))
        }
        Command::Logout => {
            session.restore().await?;
            session.logout().await?;
            Ok(json!({"authenticated": false}))
        }
        Command::LogoutAll => {
            session.restore().await?;
            session.logout_all().await?;
            Ok(json!({"authenticated": false}))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (cli_config_path, command) = parse_args(&args)?;

    let config_path = Config::resolve_path(cli_config_path.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        base_url = %config.api.base_url,
        timeout_secs = config.api.timeout_secs,
        mirror = config.auth.mirror_path.is_some(),
        ?command,
        "configuration loaded"
    );

    let session = SessionManager::from_config(&config).context("failed to build API client")?;
    let output = run(&session, &config, command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
