//! `backoffice` CLI: dashboard numbers, rules import/export, and an
//! interactive admin console that runs the session guard.
//!
//! Talks to the hosted backend through `backoffice-client`; every command
//! signs in with the configured admin credentials first.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod console;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use backoffice_client::{Backoffice, ClientConfig};
use backoffice_core::clock::{Clock, SystemClock};
use backoffice_core::identity::Identity;
use backoffice_core::rules::{MainCategory, RulesEditor};
use backoffice_core::stats::{DashboardStats, load_dashboard};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

// ── ANSI color helpers ───────────────────────────────────────────────

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const WHITE: &str = "\x1b[37m";

// ── CLI structure ────────────────────────────────────────────────────

/// Back-office CLI.
#[derive(Parser)]
#[command(
    name = "backoffice",
    version,
    about = "Back-office CLI: dashboard stats, rules editor and admin session console",
    long_about = None,
    after_help = format!(
        "{DIM}Environment variables:{RESET}\n  \
         BACKOFFICE_URL          Project base URL\n  \
         BACKOFFICE_ANON_KEY     Public anonymous API key\n  \
         BACKOFFICE_EMAIL        Admin account email\n  \
         BACKOFFICE_PASSWORD     Admin account password\n  \
         BACKOFFICE_VERIFY_URL   2FA verification endpoint (optional)\n\n\
         {DIM}Examples:{RESET}\n  \
         backoffice stats\n  \
         backoffice rules export rules.json\n  \
         backoffice console --start /admin/rules"
    ),
)]
struct Cli {
    /// Project base URL.
    #[arg(long, env = "BACKOFFICE_URL")]
    url: Option<String>,

    /// Public anonymous API key.
    #[arg(long, env = "BACKOFFICE_ANON_KEY", hide_env_values = true)]
    anon_key: Option<String>,

    /// Admin account email.
    #[arg(long, env = "BACKOFFICE_EMAIL")]
    email: Option<String>,

    /// Admin account password.
    #[arg(long, env = "BACKOFFICE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Log level used when `RUST_LOG` is unset.
    #[arg(long, env = "BACKOFFICE_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, default_value = "false")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show dashboard statistics.
    Stats,
    /// Rules content operations.
    Rules {
        #[command(subcommand)]
        action: RulesCommands,
    },
    /// Interactive admin console guarded by 2FA and idle lock.
    Console {
        /// Path to open after sign-in.
        #[arg(long, default_value = "/admin")]
        start: String,
        /// Idle window in seconds before the console locks.
        #[arg(long, default_value_t = 600)]
        idle_secs: u64,
    },
}

#[derive(Subcommand)]
enum RulesCommands {
    /// Print the rules tree.
    Show,
    /// Write the rules tree to a JSON file.
    Export {
        /// Destination file.
        file: PathBuf,
    },
    /// Replace the rules tree with a JSON file and save it.
    Import {
        /// Source file (an array of categories).
        file: PathBuf,
    },
}

// ── Pretty output helpers ────────────────────────────────────────────

fn header(icon: &str, title: &str) {
    println!("{BOLD}{CYAN}{icon} {title}{RESET}");
    println!("{DIM}─────────────────────────────────────────{RESET}");
}

fn kv_line(key: &str, value: &str) {
    println!("  {DIM}{key:<22}{RESET} {WHITE}{value}{RESET}");
}

fn success(msg: &str) {
    println!("{GREEN}{BOLD}✓{RESET} {msg}");
}

fn warning(msg: &str) {
    println!("{YELLOW}{BOLD}⚠{RESET} {YELLOW}{msg}{RESET}");
}

// ── Entry point ──────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("  {RED}{BOLD}✗ Error:{RESET} {e:#}");
            eprintln!();
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Read local input before touching the network.
    let import = match &cli.command {
        Commands::Rules {
            action: RulesCommands::Import { file },
        } => Some(read_rules_file(file)?),
        _ => None,
    };

    let client = Backoffice::with_config(ClientConfig {
        base_url: cli.url.clone().unwrap_or_default(),
        anon_key: cli.anon_key.clone().unwrap_or_default(),
        ..Default::default()
    })
    .context("failed to configure backend client")?;

    match cli.command {
        Commands::Stats => {
            sign_in(&client, cli.email.as_deref(), cli.password.as_deref()).await?;
            cmd_stats(&client).await
        }
        Commands::Rules { action } => {
            let identity = sign_in(&client, cli.email.as_deref(), cli.password.as_deref()).await?;
            cmd_rules(&client, &identity, action, import).await
        }
        Commands::Console { start, idle_secs } => {
            sign_in(&client, cli.email.as_deref(), cli.password.as_deref()).await?;
            console::run(client, &start, idle_secs).await
        }
    }
}

async fn sign_in(
    client: &Backoffice,
    email: Option<&str>,
    password: Option<&str>,
) -> Result<Identity> {
    let email = email
        .filter(|e| !e.is_empty())
        .context("missing email: pass --email or set BACKOFFICE_EMAIL")?;
    let password = password
        .filter(|p| !p.is_empty())
        .context("missing password: pass --password or set BACKOFFICE_PASSWORD")?;

    client
        .sign_in_with_password(email, password)
        .await
        .context("sign-in failed")
}

// ── Stats ────────────────────────────────────────────────────────────

async fn cmd_stats(client: &Backoffice) -> Result<()> {
    let stats = load_dashboard(client, SystemClock.today())
        .await
        .context("failed to load dashboard statistics")?;
    print_stats(&stats);
    Ok(())
}

fn print_stats(stats: &DashboardStats) {
    header("▤", "Applications");
    kv_line("Total", &stats.total_applications.to_string());
    kv_line("Pending", &stats.pending_applications.to_string());
    kv_line("Approved", &stats.approved_applications.to_string());
    kv_line("Rejected", &stats.rejected_applications.to_string());
    kv_line(
        "Revision requested",
        &stats.status_distribution.revision_requested.to_string(),
    );
    println!();

    header("▤", "Content");
    kv_line(
        "Forms (active/total)",
        &format!("{}/{}", stats.active_forms, stats.total_forms),
    );
    kv_line(
        "Updates (pub/draft)",
        &format!("{}/{}", stats.published_updates, stats.draft_updates),
    );
    println!();

    header("▤", "Applications, last 30 days");
    let peak = stats
        .daily_applications
        .iter()
        .map(|d| d.count)
        .max()
        .unwrap_or(0)
        .max(1);
    for day in &stats.daily_applications {
        let width = day.count * 30 / peak;
        println!(
            "  {DIM}{}{RESET} {CYAN}{}{RESET} {}",
            day.date.format("%Y-%m-%d"),
            "█".repeat(width),
            day.count
        );
    }
}

// ── Rules ────────────────────────────────────────────────────────────

fn read_rules_file(path: &Path) -> Result<Vec<MainCategory>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid rules tree", path.display()))
}

async fn cmd_rules(
    client: &Backoffice,
    identity: &Identity,
    action: RulesCommands,
    import: Option<Vec<MainCategory>>,
) -> Result<()> {
    let mut editor = RulesEditor::open(client, &identity.subject, client)
        .await
        .context("failed to open rules editor")?;

    match action {
        RulesCommands::Show => {
            print_rules(&editor);
            Ok(())
        }
        RulesCommands::Export { file } => {
            let json = serde_json::to_string_pretty(editor.categories())
                .context("failed to serialize rules")?;
            std::fs::write(&file, json)
                .with_context(|| format!("failed to write {}", file.display()))?;
            success(&format!(
                "Exported {} rules to {}",
                editor.total_rules(),
                file.display()
            ));
            Ok(())
        }
        RulesCommands::Import { file } => {
            let categories = import.unwrap_or_default();
            editor.replace(categories);
            editor
                .save(client, Some(&identity.subject), chrono::Utc::now())
                .await
                .context("failed to save rules")?;
            success(&format!(
                "Imported {} rules from {}",
                editor.total_rules(),
                file.display()
            ));
            Ok(())
        }
    }
}

fn print_rules(editor: &RulesEditor) {
    header("§", "Rules");
    if editor.categories().is_empty() {
        warning("No rules published yet.");
        return;
    }
    for category in editor.categories() {
        println!("  {BOLD}{}{RESET} {}", category.id, category.title);
        for sub in &category.sub_categories {
            println!("    {BOLD}{}{RESET} {}", sub.id, sub.title);
            for rule in &sub.rules {
                let updated = rule.last_update.as_deref().unwrap_or("-");
                println!(
                    "      {DIM}{}{RESET} {} {DIM}({updated}){RESET}",
                    rule.id, rule.title
                );
            }
        }
    }
    println!();
    kv_line("Total rules", &editor.total_rules().to_string());
    if let Some(updated) = editor.last_updated() {
        kv_line("Last saved", updated);
    }
}
