use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use serde_json::Value;
use tracing::warn;

use redock_core::api::{ApiClient, RequestOptions};
use redock_core::auth::Navigator;
use redock_core::config::{ENV_EMAIL, ENV_PASSWORD};
use redock_core::Config;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sign in and store the session
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Show where credentials live and how old they are
    Status,
    /// Sign in to this instance's tunnel server
    TunnelLogin { username: String },
    /// GET an API path and print the JSON response
    Get { path: String },
    /// POST a JSON body (defaults to `{}`)
    Post { path: String, body: Option<String> },
    /// PUT a JSON body (defaults to `{}`)
    Put { path: String, body: Option<String> },
    /// PATCH a JSON body (defaults to `{}`)
    Patch { path: String, body: Option<String> },
    /// DELETE an API path
    Delete { path: String },
}

/// Tells the user to sign in again. The redirector only calls this once
/// per lost session.
pub struct CliNavigator;

impl Navigator for CliNavigator {
    fn navigate_to_login(&self) {
        eprintln!("Session expired. Run `redock login` to sign in again.");
    }
}

/// Run one subcommand. `saved` is the on-disk config (updated after a
/// login), `effective` has the command-line overrides applied.
pub async fn run(command: Command, saved: Config, effective: &Config, client: &ApiClient) -> Result<()> {
    match command {
        Command::Login { email } => login(client, saved, email).await,
        Command::Logout => {
            client.logout().await;
            println!("Logged out.");
            Ok(())
        }
        Command::Whoami => whoami(client).await,
        Command::Status => {
            status(client, effective);
            Ok(())
        }
        Command::TunnelLogin { username } => {
            let password = password("Tunnel password: ")?;
            client.tunnel_login(&username, &password).await?;
            println!("Signed in to the tunnel server as {}.", username);
            Ok(())
        }
        Command::Get { path } => print_json(client.get(&path, RequestOptions::default()).await?),
        Command::Post { path, body } => {
            let body = parse_body(body.as_deref())?;
            print_json(client.post(&path, &body, RequestOptions::default()).await?)
        }
        Command::Put { path, body } => {
            let body = parse_body(body.as_deref())?;
            print_json(client.put(&path, &body, RequestOptions::default()).await?)
        }
        Command::Patch { path, body } => {
            let body = parse_body(body.as_deref())?;
            print_json(client.patch(&path, &body, RequestOptions::default()).await?)
        }
        Command::Delete { path } => print_json(client.delete(&path, RequestOptions::default()).await?),
    }
}

async fn login(client: &ApiClient, mut saved: Config, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| env_value(ENV_EMAIL)) {
        Some(email) => email,
        None => prompt_email(saved.last_email.as_deref())?,
    };
    let password = match env_value(ENV_PASSWORD) {
        Some(password) => password,
        None => password("Password: ")?,
    };

    client.login(&email, &password).await?;

    saved.last_email = Some(email.clone());
    if let Err(e) = saved.save() {
        warn!(error = %e, "Failed to save config");
    }
    println!("Logged in as {}.", email);
    Ok(())
}

async fn whoami(client: &ApiClient) -> Result<()> {
    if !client.is_authenticated() {
        bail!("Not logged in. Run `redock login` first.");
    }
    let user = client.me().await?;
    println!("{}", user.email);
    println!("  role:  {}", user.user_role);
    if !user.allowed_menus.is_empty() {
        println!("  menus: {}", user.allowed_menus.join(", "));
    }
    Ok(())
}

fn status(client: &ApiClient, config: &Config) {
    let snapshot = client.credentials().snapshot();
    println!("Instance:     {}", config.base_url);
    println!("Credentials:  {}", client.credentials().backend_description());
    println!(
        "Session:      {}",
        if client.is_authenticated() { "signed in" } else { "signed out" }
    );
    println!("Last saved:   {}", snapshot.age_display());
    println!(
        "Tunnel:       {}",
        if snapshot.tunnel_server_token.is_some() { "signed in" } else { "signed out" }
    );
    match client.peer() {
        Some(peer) => println!("Peer:         {}", peer.base_url),
        None => println!("Peer:         none"),
    }
}

fn parse_body(body: Option<&str>) -> Result<Value> {
    match body {
        Some(raw) => serde_json::from_str(raw).context("Request body is not valid JSON"),
        None => Ok(Value::Object(Default::default())),
    }
}

fn print_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn prompt_email(last: Option<&str>) -> Result<String> {
    match last {
        Some(last) => print!("Email [{}]: ", last),
        None => print!("Email: "),
    }
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line).context("Failed to read email")?;
    let entered = line.trim();
    match (entered.is_empty(), last) {
        (false, _) => Ok(entered.to_string()),
        (true, Some(last)) => Ok(last.to_string()),
        (true, None) => bail!("Email is required"),
    }
}

fn password(prompt: &str) -> Result<String> {
    rpassword::prompt_password(prompt).context("Failed to read password")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_body_defaults_to_empty_object() {
        assert_eq!(parse_body(None).expect("body"), serde_json::json!({}));
        assert_eq!(
            parse_body(Some(r#"{"name":"web"}"#)).expect("body")["name"],
            "web"
        );
        assert!(parse_body(Some("{not json")).is_err());
    }
}
