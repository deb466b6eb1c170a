//! Interactive admin console.
//!
//! Runs a [`SessionGuard`] over an in-memory tab store for the lifetime of
//! the process and drives it from stdin. Every command counts as activity.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use backoffice_client::Backoffice;
use backoffice_core::clock::SystemClock;
use backoffice_core::route::Navigator;
use backoffice_core::{Collaborators, GuardConfig, GuardPhase, GuardSnapshot, SessionGuard};
use backoffice_storage::MemoryTabStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::info;

use crate::{BOLD, CYAN, DIM, GREEN, RED, RESET, YELLOW, header, kv_line, success, warning};

/// A parsed console line.
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Go(&'a str),
    Verify(&'a str),
    Lock,
    Status,
    Activity,
    Help,
    Quit,
    Empty,
    Unknown(&'a str),
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Self {
        let mut parts = line.split_whitespace();
        let Some(verb) = parts.next() else {
            return Self::Empty;
        };
        match (verb, parts.next()) {
            ("go" | "cd", Some(path)) => Self::Go(path),
            ("verify", Some(code)) => Self::Verify(code),
            ("lock", None) => Self::Lock,
            ("status", None) => Self::Status,
            ("activity" | "ping", None) => Self::Activity,
            ("help" | "?", None) => Self::Help,
            ("quit" | "exit", None) => Self::Quit,
            _ => Self::Unknown(verb),
        }
    }
}

/// Prints redirects instead of performing them.
struct ConsoleNavigator;

impl Navigator for ConsoleNavigator {
    fn redirect(&self, to: &str, from: &str) {
        println!();
        println!("{YELLOW}{BOLD}🔒 Session locked{RESET} {DIM}({from} → {to}){RESET}");
        println!("{DIM}Enter `verify <code>` to continue.{RESET}");
    }
}

pub async fn run(client: Backoffice, start: &str, idle_secs: u64) -> Result<()> {
    let client = Arc::new(client);
    let config = GuardConfig {
        idle_window: Duration::from_secs(idle_secs.max(1)),
        ..GuardConfig::default()
    };
    let guard = SessionGuard::new(
        config,
        Collaborators {
            store: Arc::new(MemoryTabStore::new()),
            identity: client.clone(),
            directory: client.clone(),
            verifier: client.clone(),
            navigator: Arc::new(ConsoleNavigator),
            clock: Arc::new(SystemClock),
        },
        start,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = {
        let guard = guard.clone();
        tokio::spawn(async move { guard.run(shutdown_rx).await })
    };

    print_help();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        let command = Command::parse(&line);
        if command != Command::Empty {
            guard.record_activity().await;
        }
        match command {
            Command::Go(path) => {
                guard.navigate(path).await;
                print_snapshot(&guard.snapshot().await);
            }
            Command::Verify(code) => match guard.verify_code(code).await {
                Ok(()) => {
                    success("Verified, admin session unlocked.");
                    print_snapshot(&guard.snapshot().await);
                }
                Err(e) => {
                    println!("{RED}{BOLD}✗{RESET} {e}");
                    if let Some(settings) = guard.settings().await {
                        kv_line("Failed attempts", &settings.failed_attempts.to_string());
                    }
                }
            },
            Command::Lock => {
                guard.lock().await;
                print_snapshot(&guard.snapshot().await);
            }
            Command::Status => print_snapshot(&guard.snapshot().await),
            Command::Activity | Command::Empty => {}
            Command::Help => print_help(),
            Command::Quit => break,
            Command::Unknown(verb) => warning(&format!("unknown command '{verb}', try `help`")),
        }
    }

    // The receiver may already be gone if the auth channel closed.
    let _ = shutdown_tx.send(true);
    runner.await.context("session guard task failed")?;
    client.sign_out().await;
    info!("console closed");
    Ok(())
}

fn print_help() {
    header("⌘", "Admin console");
    println!("  {CYAN}go <path>{RESET}       navigate, e.g. `go /admin/rules`");
    println!("  {CYAN}verify <code>{RESET}   submit a 2FA code");
    println!("  {CYAN}lock{RESET}            lock the admin session now");
    println!("  {CYAN}status{RESET}          show session state");
    println!("  {CYAN}activity{RESET}        keep the session alive");
    println!("  {CYAN}quit{RESET}            sign out and exit");
    println!();
}

fn print_snapshot(snapshot: &GuardSnapshot) {
    let phase = match snapshot.phase {
        GuardPhase::Inactive => format!("{DIM}inactive{RESET}"),
        GuardPhase::ActiveCounting => format!("{GREEN}active{RESET}"),
        GuardPhase::Locked => format!("{YELLOW}locked{RESET}"),
    };
    kv_line("Location", &snapshot.location);
    kv_line("Phase", &phase);
    kv_line("Unlocked", if snapshot.is_unlocked { "yes" } else { "no" });
    if let Some(secs) = snapshot.remaining_seconds {
        kv_line("Locks in", &format!("{}:{:02}", secs / 60, secs % 60));
    }
    match &snapshot.settings {
        Some(s) if s.is_blocked => kv_line("2FA", "blocked"),
        Some(s) if s.is_enabled => kv_line("2FA", "enabled"),
        Some(_) => kv_line("2FA", "disabled"),
        None if snapshot.settings_loading => kv_line("2FA", "loading"),
        None => kv_line("2FA", "not set up"),
    }
}
