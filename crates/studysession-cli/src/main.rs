//! studysession - terminal front end for the study platform session core.
//!
//! Drives login, logout, and profile bootstrap against the study API, runs
//! the heartbeat, and prints business endpoint payloads as JSON.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use studysession_core::{
    notify::TracingNotifier, Config, HeartbeatScheduler, Notice, NoticeLevel, Notifier,
    RequestGateway, SessionManager, SessionPhase,
};

// ============================================================================
// Constants
// ============================================================================

/// Directory for a rolling log file, in addition to stderr
const ENV_LOG_DIR: &str = "STUDYSESSION_LOG_DIR";

/// Time given to the teardown beacon before the process exits
const BEACON_GRACE_MS: u64 = 500;

const USAGE: &str = "Usage: studysession <command>

Commands:
  login <email>                 Sign in (password is prompted)
  logout                        Sign out and erase stored credentials
  status                        Restore the stored session and show its state
  profile                       Show the signed-in user's profile
  register <name> <email>       Create an account (password is prompted)
  documents                     List your documents
  stats                         Show study statistics
  heartbeat                     Send heartbeats until Ctrl-C";

/// Prints notices for the person at the terminal and logs them.
struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, notice: Notice) {
        let marker = match notice.level {
            NoticeLevel::Success => "✓",
            NoticeLevel::Info => "•",
            NoticeLevel::Error => "✗",
        };
        eprintln!("{} {}", marker, notice.message);
        TracingNotifier.notify(notice);
    }
}

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(ENV_LOG_DIR) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir.trim(), "studysession.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let config = Config::load()?;
    info!(base_url = %config.base_url, store = ?config.store, "studysession starting");

    let (session, gateway) = studysession_core::connect(&config, Arc::new(TerminalNotifier))?;

    match command {
        "login" => {
            let email = arg(&args, 1, "email")?;
            let password = rpassword::prompt_password("Password: ")
                .context("Failed to read password")?;
            let user = session.login(email, &password).await?;
            println!("Signed in as {}", user.display_name());
        }
        "logout" => {
            session.logout().await;
        }
        "status" => {
            let phase = session.bootstrap().await;
            print_status(&session, phase);
        }
        "profile" => {
            require_session(&session).await?;
            let user = session.user().unwrap_or_default();
            print_json(&serde_json::to_value(user)?)?;
        }
        "register" => {
            let name = arg(&args, 1, "name")?;
            let email = arg(&args, 2, "email")?;
            let password = rpassword::prompt_password("Choose a password: ")
                .context("Failed to read password")?;
            let message = session.register(name, email, &password).await?;
            println!("{}", message);
        }
        "documents" => {
            require_session(&session).await?;
            print_json(&gateway.my_documents().await?)?;
        }
        "stats" => {
            require_session(&session).await?;
            print_json(&gateway.study_stats().await?)?;
        }
        "heartbeat" => {
            require_session(&session).await?;
            run_heartbeat(&config, &gateway).await?;
        }
        "--help" | "-h" | "help" => {
            println!("{}", USAGE);
        }
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            bail!("unknown command");
        }
    }

    Ok(())
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("missing <{}>\n\n{}", name, USAGE))
}

async fn require_session(session: &Arc<SessionManager>) -> Result<()> {
    if session.bootstrap().await != SessionPhase::Authenticated {
        bail!("Not signed in. Run `studysession login <email>` first.");
    }
    Ok(())
}

fn print_status(session: &SessionManager, phase: SessionPhase) {
    match phase {
        SessionPhase::Authenticated => {
            let name = session
                .user()
                .map(|u| u.display_name())
                .unwrap_or_else(|| "unknown user".to_string());
            println!("Signed in as {}", name);
        }
        other => println!("Not signed in ({:?})", other),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run the heartbeat until Ctrl-C or until the session ends.
async fn run_heartbeat(config: &Config, gateway: &RequestGateway) -> Result<()> {
    let session = Arc::clone(gateway.session());
    let mut phases = session.subscribe();
    let handle = HeartbeatScheduler::from_config(Arc::clone(&session), config).start();
    eprintln!(
        "Sending heartbeats every {}s, press Ctrl-C to stop",
        config.heartbeat_interval().as_secs()
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            changed = phases.changed() => {
                if changed.is_err() || *phases.borrow() == SessionPhase::Unauthenticated {
                    eprintln!("Session ended");
                    break;
                }
            }
        }
    }

    handle.teardown().await;
    tokio::time::sleep(Duration::from_millis(BEACON_GRACE_MS)).await;
    Ok(())
}
