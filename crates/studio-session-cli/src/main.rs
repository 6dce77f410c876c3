//! studio-session - inspect and recover design studio sessions from a terminal.
//!
//! The CLI is a host for the session coordinator: persisted tokens live in the
//! OS keychain (or a JSON file), cookies in a JSON jar, offline databases and
//! worker registrations under the cache directory, and "navigation" prints the
//! forced-login URL.

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration, Utc};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use studio_session::auth::IdentitySession;
use studio_session::cleanup::{CleanupOutcome, StaleCheck};
use studio_session::config::APP_NAME;
use studio_session::platform::{
    CacheDirArtifacts, FileCookieJar, FileStorage, KeyValueStorage, KeyringStorage,
    MemoryStorage, TerminalNavigator,
};
use studio_session::utils::format_countdown;
use studio_session::{SessionConfig, SessionContext, SharedClock, SystemClock};

// ============================================================================
// Constants
// ============================================================================

/// Rolling log file written by `watch`
const LOG_FILE_NAME: &str = "studio-session.log";

const LOCAL_STORAGE_FILE: &str = "local.json";
const COOKIE_FILE: &str = "cookies.json";

const USAGE: &str = "\
Usage: studio-session <command>

Commands:
  status                                      Show the current session status
  check-stale                                 Run the stale-session check once
  cleanup                                     Wipe local session state and force a fresh login
  health                                      Probe the server health endpoint
  set-session <access> <refresh> <expires-in> Store a session expiring in <expires-in> seconds
  refresh                                     Refresh the session now
  watch                                       Supervise the session until Ctrl-C";

/// Initialize the tracing subscriber. With a log directory, also write a
/// daily rolling file there; keep the returned guard alive to flush it.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
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

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let mut config = SessionConfig::load()?;
    config.apply_env();

    let data_dir = SessionConfig::data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    let _log_guard = init_tracing((command == "watch").then_some(data_dir.as_path()));
    info!(command, "studio-session starting");

    let context = build_context(config, &data_dir)?;

    match command {
        "status" => status(&context),
        "check-stale" => check_stale(&context).await,
        "cleanup" => cleanup(&context).await,
        "health" => health(&context).await,
        "set-session" => set_session(&context, &args[1..]),
        "refresh" => refresh(&context).await,
        "watch" => watch(&context).await,
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }
}

/// Wire the core to this machine's storage, cookie file and cache directory.
fn build_context(config: SessionConfig, data_dir: &Path) -> Result<SessionContext> {
    let clock: SharedClock = Arc::new(SystemClock);

    let local: Arc<dyn KeyValueStorage> = if config.secure_storage {
        Arc::new(KeyringStorage::new(APP_NAME))
    } else {
        Arc::new(FileStorage::open(data_dir.join(LOCAL_STORAGE_FILE))?)
    };
    let cookies = Arc::new(FileCookieJar::open(data_dir.join(COOKIE_FILE), clock.clone())?);
    let artifacts = Arc::new(CacheDirArtifacts::new(SessionConfig::cache_dir()?));

    let host = config
        .url("/")?
        .host_str()
        .ok_or_else(|| anyhow!("Base URL {} has no host", config.base_url))?
        .to_string();
    let navigator = Arc::new(TerminalNavigator::new(host));

    SessionContext::builder(config)
        .clock(clock)
        .local_storage(local)
        .session_storage(Arc::new(MemoryStorage::new()))
        .cookies(cookies)
        .artifacts(artifacts)
        .navigator(navigator)
        .build()
}

// ============================================================================
// Commands
// ============================================================================

fn status(context: &SessionContext) -> Result<()> {
    let status = context.tokens().get_session_status();
    let snapshot = context.token_store().snapshot();

    println!("Status:           {:?}", status.status);
    println!("Time left:        {}", format_countdown(status.time_left()));
    match snapshot.expires_at {
        Some(at) => println!("Expires at:       {}", at.to_rfc3339()),
        None => println!("Expires at:       (no session)"),
    }
    println!(
        "Refresh attempts: {}/{}",
        snapshot.refresh_attempts, snapshot.max_refresh_attempts
    );
    println!(
        "Last activity:    {} min ago",
        context.token_store().time_since_activity().num_minutes()
    );
    if context.detector().is_stale_now() {
        println!("Persisted session is stale; run `studio-session check-stale` to clean up.");
    }
    Ok(())
}

async fn check_stale(context: &SessionContext) -> Result<()> {
    match context.detector().check_for_stale_session().await {
        StaleCheck::NoAction => println!("No stale session found."),
        StaleCheck::CleanupPerformed(outcome) => print_cleanup(&outcome),
    }
    Ok(())
}

async fn cleanup(context: &SessionContext) -> Result<()> {
    let outcome = context.cleanup().run().await;
    print_cleanup(&outcome);
    Ok(())
}

fn print_cleanup(outcome: &CleanupOutcome) {
    match outcome {
        CleanupOutcome::AlreadyInProgress => println!("Cleanup already in progress."),
        CleanupOutcome::Redirected(report) => {
            println!("Storages cleared:     {}", report.storages_cleared);
            println!("Cookies expired:      {}", report.cookies_expired);
            println!("Databases deleted:    {}", report.databases_deleted);
            println!("Workers unregistered: {}", report.workers_unregistered);
            if !report.failed_steps.is_empty() {
                println!("Failed steps:         {:?}", report.failed_steps);
            }
            println!("Login:                {}", report.url);
        }
    }
}

async fn health(context: &SessionContext) -> Result<()> {
    let health = context.health().check().await;
    println!("Server:  {:?}", health.server_status);
    println!("Offline: {}", health.is_offline);
    for error in context.errors().unacknowledged_errors() {
        println!("  [{:?}] {}", error.severity, error.message);
    }
    Ok(())
}

fn set_session(context: &SessionContext, args: &[String]) -> Result<()> {
    let [access, refresh, expires_in] = args else {
        bail!("Usage: studio-session set-session <access> <refresh> <expires-in-secs>");
    };
    let secs: i64 = expires_in
        .parse()
        .with_context(|| format!("Invalid expiry seconds: {}", expires_in))?;

    let session = IdentitySession {
        expires: Utc::now() + Duration::seconds(secs),
        access_token: Some(access.clone()),
        refresh_token: Some(refresh.clone()),
        user: None,
    };
    context.tokens().sync_session(Some(&session));
    context.token_store().record_activity();
    println!("Session stored, expires at {}", session.expires.to_rfc3339());
    Ok(())
}

async fn refresh(context: &SessionContext) -> Result<()> {
    match context.tokens().refresh_token().await {
        Ok(tokens) => {
            let expires = tokens
                .expires_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string());
            println!("Session refreshed, expires at {}", expires);
        }
        Err(e) if e.is_exhausted() => {
            println!("{}", e);
            print_cleanup(&context.cleanup().run().await);
        }
        Err(e) => println!("{}", e),
    }
    Ok(())
}

async fn watch(context: &SessionContext) -> Result<()> {
    let mut view = context.widget().subscribe();
    let mut finished = context.cleanup().completion();
    context.mount().await;
    println!("Watching session (Ctrl-C to stop)...");

    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = view.borrow_and_update().clone();
                if current.visible {
                    println!("Session expires in {}", current.countdown);
                }
            }
            _ = finished.wait_for(|done| *done) => {
                println!("Session was reset, sign in again.");
                break;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    context.unmount();
    info!("Watch stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_watch_stops_once_session_is_reset() {
        let dir = tempfile::tempdir().unwrap();
        let clock: SharedClock = Arc::new(SystemClock);
        let local = Arc::new(MemoryStorage::new());
        let expired = Utc::now() - Duration::hours(3);
        local
            .set(
                "auth-token-storage",
                &format!(
                    r#"{{"state":{{"accessToken":"a","refreshToken":"r","tokenExpiresAt":{}}},"version":0}}"#,
                    expired.timestamp_millis()
                ),
            )
            .unwrap();
        let navigator = Arc::new(TerminalNavigator::new("localhost"));

        let context = SessionContext::builder(SessionConfig::default())
            .clock(clock.clone())
            .local_storage(local.clone())
            .cookies(Arc::new(
                FileCookieJar::open(dir.path().join(COOKIE_FILE), clock).unwrap(),
            ))
            .artifacts(Arc::new(CacheDirArtifacts::new(dir.path().join("cache"))))
            .navigator(navigator.clone())
            .build()
            .unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), watch(&context))
            .await
            .expect("watch should stop after the reset")
            .unwrap();

        assert!(navigator
            .last_navigation()
            .is_some_and(|url| url.contains("force_fresh=true")));
        assert!(local.keys().unwrap().is_empty());
        assert!(!context.guard().is_mounted());
    }
}
