//! univer - command-line access to the student portal backend.
//!
//! A small companion to the web client for checking logins and endpoints
//! from a terminal. Credentials are kept in the OS keychain between runs.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use univer_core::{ApiClient, Config, CredentialKey, Credentials, SystemCredentialStore};

const USAGE: &str = "\
Usage: univer <command>

Commands:
  login <username> <org-id>   Log in (password is prompted)
  logout                      Log out and forget all stored credentials
  status                      Show stored login state
  get <path>                  Fetch an API path, e.g. /api/schedule
  version                     Show the backend version";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = Config::from_env()?;
    let store = Arc::new(SystemCredentialStore::new()?);
    let client = ApiClient::new(config, store)?;
    info!(api_url = %client.config().api_url, "univer starting");

    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["login", username, org_id] => login(&client, username, org_id).await,
        ["logout"] => {
            client.force_logout().await;
            eprintln!("Logged out.");
            Ok(())
        }
        ["status"] => status(&client),
        ["get", path] => get(&client, path).await,
        ["version"] => {
            let version = client.fetch_version().await?;
            println!("{}", version);
            Ok(())
        }
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }
}

async fn login(client: &ApiClient, username: &str, org_id: &str) -> Result<()> {
    eprint!("Password: ");
    io::stderr().flush()?;
    let password = rpassword::read_password().context("Failed to read password")?;

    let status = client
        .login(Credentials::new(username, org_id, password))
        .await;
    match status {
        200 => {
            eprintln!("Logged in as {}.", username);
            Ok(())
        }
        404 => Err(anyhow::anyhow!("Backend unreachable")),
        status => Err(anyhow::anyhow!("Login failed with status {}", status)),
    }
}

fn status(client: &ApiClient) -> Result<()> {
    let store = client.store();
    let username = store.get(CredentialKey::Username)?;
    let org_id = store.get(CredentialKey::OrgId)?;

    println!("Backend:  {}", client.config().api_url);
    println!("Language: {}", client.config().language);
    println!("Username: {}", username.as_deref().unwrap_or("-"));
    println!("Org:      {}", org_id.as_deref().unwrap_or("-"));
    println!(
        "Session:  {}",
        if client.check_auth() {
            "password stored"
        } else {
            "logged out"
        }
    );
    Ok(())
}

async fn get(client: &ApiClient, path: &str) -> Result<()> {
    let value: serde_json::Value = client
        .auth_fetch(path)
        .await
        .with_context(|| format!("Request to {} failed", path))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
