//! authrelay - a command-line front end for the authrelay session layer.
//!
//! Signs in against the auth API and issues authenticated requests through
//! the renewal coordinator, so expired credentials are renewed transparently.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use authrelay_core::{ApiRequest, Config, Navigator, RegisterRequest, SessionLayer};
use futures::{future::join_all, StreamExt};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

/// Longest response body preview printed by `fetch`.
const BODY_PREVIEW_CHARS: usize = 200;

const USAGE: &str = "\
Usage: authrelay <command>

Commands:
  login             Sign in and report the session expiry
  whoami            Sign in and print the returned profile
  fetch <url>...    Sign in, then GET every URL concurrently
  register          Create a new account

Environment:
  AUTHRELAY_API_URL        Auth API base URL
  AUTHRELAY_TIMEOUT_SECS   Request timeout in seconds
  RUST_LOG                 Log filter (default: warn)";

/// Tells the user where to go when the access guard turns them away.
struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn redirect(&self, target: &str) {
        eprintln!("Not signed in - continue at {}", target);
    }
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

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

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1) else {
        println!("{}", USAGE);
        return Ok(());
    };

    let mut config = Config::load()?;
    config.apply_env();
    let layer = SessionLayer::new(&config).context("Failed to set up session layer")?;
    watch_identity(&layer);

    match command.as_str() {
        "login" => {
            login(&layer, &mut config).await?;
            if let (Some(expires_at), Some(credential)) =
                (layer.store.expires_at(), layer.store.credential())
            {
                println!(
                    "Signed in. Credential expires at {} (in {} minutes).",
                    expires_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    credential.minutes_until_expiry()
                );
            }
        }
        "whoami" => {
            login(&layer, &mut config).await?;
            match layer.store.current_identity() {
                Some(identity) => println!("{}", serde_json::to_string_pretty(identity.as_map())?),
                None => println!("Signed in, but the server sent no profile."),
            }
        }
        "fetch" => {
            let targets = &args[2..];
            if targets.is_empty() {
                bail!("fetch needs at least one URL");
            }
            login(&layer, &mut config).await?;
            fetch(&layer, &config, targets).await?;
        }
        "register" => register(&layer).await?,
        "-h" | "--help" | "help" => println!("{}", USAGE),
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }

    // Best effort: the remote call may not finish before the runtime shuts down.
    if layer.auth.is_authenticated() {
        layer.auth.logout();
    }
    Ok(())
}

/// Log every login/logout the store reports.
fn watch_identity(layer: &SessionLayer) {
    let mut identities = Box::pin(layer.auth.identity_stream());
    tokio::spawn(async move {
        while let Some(identity) = identities.next().await {
            match identity.as_ref().and_then(|i| i.display_name()) {
                Some(name) => info!(user = name, "Session identity changed"),
                None => info!(signed_in = identity.is_some(), "Session identity changed"),
            }
        }
    });
}

fn prompt(label: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(value) => print!("{} [{}]: ", label, value),
        None => print!("{}: ", label),
    }
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let line = line.trim();
    if line.is_empty() {
        if let Some(value) = default {
            return Ok(value.to_string());
        }
        bail!("{} is required", label);
    }
    Ok(line.to_string())
}

async fn login(layer: &SessionLayer, config: &mut Config) -> Result<()> {
    let identifier = prompt("E-mail or CNPJ", config.last_identifier.as_deref())?;
    let secret = rpassword::prompt_password("Password: ")?;

    if let Err(e) = layer.auth.login(&identifier, &secret).await {
        warn!(error = %e, "Login failed");
        bail!("{}", e.user_message());
    }

    config.last_identifier = Some(identifier);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
    Ok(())
}

async fn fetch(layer: &SessionLayer, config: &Config, targets: &[String]) -> Result<()> {
    let guard = layer.guard(Arc::new(TerminalNavigator));
    if !guard.can_enter() {
        bail!("Session is not authenticated");
    }

    let requests = targets.iter().map(|target| {
        let url = if target.starts_with("http://") || target.starts_with("https://") {
            target.clone()
        } else {
            format!("{}/{}", config.api_base_url.trim_end_matches('/'), target.trim_start_matches('/'))
        };
        let coordinator = layer.coordinator.clone();
        async move {
            let result = coordinator.execute(ApiRequest::get(url.clone())).await;
            (url, result)
        }
    });

    let mut failures = 0;
    let mut session_lost = false;
    for (url, result) in join_all(requests).await {
        match result {
            Ok(response) => {
                let body: String = response.text().chars().take(BODY_PREVIEW_CHARS).collect();
                println!("{} {}\n   {}", response.status, url, body);
            }
            Err(e) => {
                failures += 1;
                session_lost |= e.is_auth_failure();
                println!("ERR {}\n   {}", url, e);
            }
        }
    }

    info!(
        total = targets.len(),
        failures,
        renewals = layer.coordinator.renewals_started(),
        "Fetch finished"
    );
    // Renewal failure clears the session; the guard sends the user back to sign in.
    if session_lost && !guard.can_enter() {
        bail!("Session expired and could not be renewed. Run `authrelay login` again.");
    }
    if failures > 0 {
        bail!("{} of {} requests failed", failures, targets.len());
    }
    Ok(())
}

async fn register(layer: &SessionLayer) -> Result<()> {
    let display_name = prompt("Trade name", None)?;
    let tax_id = prompt("CNPJ", None)?;
    let email = prompt("E-mail", None)?;
    let secret = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if secret != confirm {
        bail!("Passwords do not match");
    }

    let payload = RegisterRequest {
        display_name,
        tax_id,
        email,
        secret,
    };
    if let Err(e) = layer.auth.register(&payload).await {
        bail!("{}", e.user_message());
    }
    println!("Account created. Sign in with `authrelay login`.");
    Ok(())
}
