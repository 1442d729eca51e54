//! `platform` - command line access to the platform API.
//!
//! Logs in with the OAuth2 password grant, keeps the session between runs, and
//! issues authenticated GET requests.

use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use platform_client_core::{Connector, ConnectorConfig, FileStorage, KeyringStorage};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Credential store account holding the session when `--keyring` is used
const KEYRING_ACCOUNT: &str = "default";

/// Environment overrides
const ENV_API_TOKEN: &str = "PLATFORM_API_TOKEN";
const ENV_ACCOUNTS: &str = "PLATFORM_ACCOUNTS";

const USAGE: &str = "\
Usage: platform [--debug] [--keyring] <command>

Commands:
  login [username] [--force]   Log in with a username and password
  logout                       Forget the stored session
  status                       Show who is logged in
  token                        Print a valid access token
  get <path>                   GET an API path and print the JSON response
  help                         Show this message

Environment:
  PLATFORM_API_TOKEN           Use this API token instead of a login
  PLATFORM_ACCOUNTS            Override the accounts endpoint
  RUST_LOG                     Log filter (default: warn)";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Login { username: Option<String>, force: bool },
    Logout,
    Status,
    Token,
    Get { path: String },
    Help,
}

#[derive(Debug, PartialEq, Eq)]
struct Cli {
    command: Command,
    debug: bool,
    keyring: bool,
}

fn parse_args(args: &[String]) -> Result<Cli> {
    let mut debug = false;
    let mut keyring = false;
    let mut force = false;
    let mut positional = Vec::new();

    for arg in args {
        match arg.as_str() {
            "--debug" | "-d" => debug = true,
            "--keyring" => keyring = true,
            "--force" | "-f" => force = true,
            "--help" | "-h" => positional.insert(0, "help"),
            flag if flag.starts_with('-') => bail!("Unknown option: {}", flag),
            other => positional.push(other),
        }
    }

    let command = match positional.as_slice() {
        [] | ["help", ..] => Command::Help,
        ["login"] => Command::Login { username: None, force },
        ["login", username] => Command::Login {
            username: Some(username.to_string()),
            force,
        },
        ["logout"] => Command::Logout,
        ["status"] => Command::Status,
        ["token"] => Command::Token,
        ["get", path] => Command::Get { path: path.to_string() },
        ["get"] => bail!("Missing path for get"),
        [command, ..] => bail!("Unknown command or extra arguments: {}", command),
    };

    Ok(Cli { command, debug, keyring })
}

/// Initialize the tracing subscriber for logging
fn init_tracing(debug: bool) {
    // RUST_LOG wins over --debug
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn load_config(debug: bool) -> Result<ConnectorConfig> {
    let mut config = match ConnectorConfig::default_path() {
        Some(path) => ConnectorConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ConnectorConfig::default(),
    };

    if let Ok(token) = std::env::var(ENV_API_TOKEN) {
        if !token.is_empty() {
            config.api_token = Some(token);
        }
    }
    if let Ok(accounts) = std::env::var(ENV_ACCOUNTS) {
        if !accounts.is_empty() {
            config.accounts = accounts;
        }
    }
    config.debug |= debug;
    Ok(config)
}

fn open_connector(config: ConnectorConfig, keyring: bool) -> Result<Connector> {
    if keyring {
        let storage = KeyringStorage::for_account(KEYRING_ACCOUNT)
            .context("Failed to open the credential store")?;
        return Connector::from_storage(config, storage).context("Failed to restore session");
    }

    let dir = ConnectorConfig::session_dir().context("Could not find a session directory")?;
    Connector::from_storage(config, FileStorage::in_dir(dir)).context("Failed to restore session")
}

/// Expiry of the stored token relative to now.
fn format_expiry(expires: Option<i64>) -> String {
    let Some(expires_at) = expires.and_then(|s| Utc.timestamp_opt(s, 0).single()) else {
        return "never".to_string();
    };
    let remaining = expires_at - Utc::now();
    if remaining.num_seconds() <= 0 {
        format!("expired ({})", expires_at.format("%Y-%m-%d %H:%M UTC"))
    } else if remaining.num_hours() == 0 {
        format!("in {} minutes", remaining.num_minutes())
    } else {
        format!("in {} hours", remaining.num_hours())
    }
}

fn prompt_username() -> Result<String> {
    print!("Username: ");
    io::stdout().flush()?;

    let mut username = String::new();
    io::stdin().read_line(&mut username)?;
    Ok(username.trim().to_string())
}

fn prompt_password() -> Result<String> {
    let password = rpassword::prompt_password("Password: ")?;
    Ok(password)
}

async fn run(connector: &mut Connector, command: Command) -> Result<()> {
    match command {
        Command::Login { username, force } => {
            let username = match username {
                Some(username) => username,
                None => prompt_username()?,
            };
            if username.is_empty() {
                bail!("A username is required");
            }
            let password = prompt_password()?;
            connector.log_in(&username, &password, force).await?;
            println!("Logged in as {}", username);
        }
        Command::Logout => {
            connector.log_out()?;
            println!("Logged out");
        }
        Command::Status => {
            let session = connector.session();
            let session = session.lock();
            if !session.is_logged_in() {
                println!("Not logged in");
                return Ok(());
            }
            println!("Logged in as {}", session.username().unwrap_or("(API token)"));
            println!("Accounts: {}", connector.accounts_endpoint());
            println!("Token expires: {}", format_expiry(session.expires()));
            println!(
                "Refresh token: {}",
                if session.refresh_token().is_some() { "yes" } else { "no" }
            );
        }
        Command::Token => {
            let token = connector.client()?.token_provider().valid_token().await?;
            println!("{}", token.token());
        }
        Command::Get { path } => {
            let response: Value = connector
                .client()?
                .get(&path)
                .await
                .with_context(|| format!("GET {} failed", path))?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Help => println!("{}", USAGE),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_args(&args)?;
    if cli.command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    init_tracing(cli.debug);
    info!(command = ?cli.command, "platform starting");

    let config = load_config(cli.debug)?;
    let mut connector = open_connector(config, cli.keyring)?;

    let result = run(&mut connector, cli.command).await;
    // Persist refreshed tokens even when the command failed
    let closed = connector.close().context("Failed to save session");
    result?;
    closed
}
