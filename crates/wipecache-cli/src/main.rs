//! wipecache - command-line view of the data-erasure dashboard.
//!
//! Lists machines, audit reports and sub-accounts for a scope, prints
//! monthly erasure metrics, and manages sub-accounts. Everything goes through
//! the same cache layer a GUI would use, so repeated runs are served from the
//! persistent store while the service is refreshed.

use std::io;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wipecache_core::auth::{resolve_token, TokenStore};
use wipecache_core::utils::{format_duration_secs, truncate_string};
use wipecache_core::{
    AuditReport, Collection, Config, Dashboard, DerivedMetrics, HttpAdapter, Machine, MutationOutcome, Query,
    Subuser,
};

// ============================================================================
// Constants
// ============================================================================

/// Directory for daily-rolling log files. Unset means stderr only.
const LOG_DIR_ENV: &str = "WIPECACHE_LOG_DIR";

const LOG_FILE_PREFIX: &str = "wipecache.log";

const USAGE: &str = "\
Usage: wipecache <command> [args] [--demo]

Commands:
  machines [scope]                   List machines with erasure counts
  reports [scope]                    List audit reports
  subusers [scope]                   List sub-accounts
  metrics [scope]                    Monthly erasure metrics
  add-subuser <scope> <email> [name] Create a sub-account
  remove-subuser <scope> <email>     Delete a sub-account
  login [scope]                      Store an API token for a scope
  logout [scope]                     Forget the stored token

The scope defaults to the last one used.

Environment:
  WIPECACHE_API_URL   Service base URL
  WIPECACHE_TOKEN     API token (overrides the keychain)
  WIPECACHE_DEMO      Serve the built-in demo dataset
  WIPECACHE_LOG_DIR   Also write logs to daily files here
  RUST_LOG            Log filter (default: warn)";

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
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

// ============================================================================
// Arguments
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Machines,
    Reports,
    Subusers,
    Metrics,
    AddSubuser { email: String, name: Option<String> },
    RemoveSubuser { email: String },
    Login,
    Logout,
    Help,
}

#[derive(Debug, Clone, PartialEq)]
struct Args {
    command: Command,
    scope: Option<String>,
    demo: bool,
}

fn parse_args(raw: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut demo = false;
    let mut positional = Vec::new();
    for arg in raw {
        match arg.as_str() {
            "--demo" => demo = true,
            "-h" | "--help" => positional.insert(0, "help".to_string()),
            flag if flag.starts_with("--") => bail!("Unknown option: {}", flag),
            _ => positional.push(arg),
        }
    }

    let mut rest = positional.into_iter();
    let name = rest.next().unwrap_or_else(|| "help".to_string());
    let rest: Vec<String> = rest.collect();

    let optional_scope = |rest: &[String]| -> Result<Option<String>> {
        match rest {
            [] => Ok(None),
            [scope] => Ok(Some(scope.clone())),
            _ => bail!("Too many arguments for '{}'", name),
        }
    };

    let (command, scope) = match name.as_str() {
        "machines" => (Command::Machines, optional_scope(&rest)?),
        "reports" => (Command::Reports, optional_scope(&rest)?),
        "subusers" => (Command::Subusers, optional_scope(&rest)?),
        "metrics" => (Command::Metrics, optional_scope(&rest)?),
        "login" => (Command::Login, optional_scope(&rest)?),
        "logout" => (Command::Logout, optional_scope(&rest)?),
        "add-subuser" => match rest.as_slice() {
            [scope, email] => (
                Command::AddSubuser {
                    email: email.clone(),
                    name: None,
                },
                Some(scope.clone()),
            ),
            [scope, email, name @ ..] => (
                Command::AddSubuser {
                    email: email.clone(),
                    name: Some(name.join(" ")),
                },
                Some(scope.clone()),
            ),
            _ => bail!("Usage: add-subuser <scope> <email> [name]"),
        },
        "remove-subuser" => match rest.as_slice() {
            [scope, email] => (
                Command::RemoveSubuser {
                    email: email.clone(),
                },
                Some(scope.clone()),
            ),
            _ => bail!("Usage: remove-subuser <scope> <email>"),
        },
        "help" => (Command::Help, None),
        other => bail!("Unknown command: {}", other),
    };

    Ok(Args {
        command,
        scope,
        demo,
    })
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };
    if args.command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let saved = Config::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        Config::default()
    });
    let mut config = saved.clone();
    config.apply_env();
    if args.demo {
        config.demo_mode = true;
    }

    let scope = match args.scope.clone().or_else(|| config.last_scope.clone()) {
        Some(scope) => scope,
        None => bail!("No scope given and none used before. Pass the account email."),
    };

    info!(command = ?args.command, scope = %scope, demo = config.demo_mode, "wipecache starting");
    run(args.command, &scope, &config).await?;

    // Only the scope is remembered; env and flag overrides are not persisted
    if saved.last_scope.as_deref() != Some(scope.as_str()) {
        let mut saved = saved;
        saved.last_scope = Some(scope);
        if let Err(e) = saved.save() {
            warn!(error = %e, "Failed to save config");
        }
    }
    Ok(())
}

async fn run(command: Command, scope: &str, config: &Config) -> Result<()> {
    match command {
        Command::Login => {
            let token = rpassword::prompt_password(format!("API token for {}: ", scope))
                .context("Failed to read token")?;
            let token = token.trim();
            if token.is_empty() {
                bail!("Empty token, nothing stored");
            }
            TokenStore::store(scope, token)?;
            println!("Token stored for {}", scope);
            return Ok(());
        }
        Command::Logout => {
            if TokenStore::has_token(scope) {
                TokenStore::delete(scope)?;
            }
            // Mark the persisted copies stale for the next run
            dashboard(config, scope)?.invalidate_scope(scope);
            println!("Logged out of {}", scope);
            return Ok(());
        }
        _ => {}
    }

    let dashboard = dashboard(config, scope)?;
    match command {
        Command::Machines => {
            let machines = settle(dashboard.machines_enhanced(scope).await).await;
            print_status(&dashboard, Collection::Machines, scope, &machines).await;
            print_machines(&machines.data);
        }
        Command::Reports => {
            let reports = settle(dashboard.audit_reports(scope).await).await;
            print_status(&dashboard, Collection::AuditReports, scope, &reports).await;
            print_reports(&reports.data);
        }
        Command::Subusers => {
            let subusers = settle(dashboard.subusers(scope).await).await;
            print_status(&dashboard, Collection::Subusers, scope, &subusers).await;
            print_subusers(&subusers.data);
        }
        Command::Metrics => {
            let metrics = dashboard.metrics(scope).await;
            print_metrics(&metrics);
        }
        Command::AddSubuser { email, name } => {
            // Load the list first so the new account lands in the local copy
            dashboard.subusers(scope).await;
            let mut subuser = Subuser::new(email);
            if let Some(name) = name {
                subuser = subuser.with_name(name);
            }
            let outcome = dashboard.create_subuser(scope, subuser).await?;
            if let MutationOutcome::Created(created) = outcome {
                println!("Created {} ({})", created.display_name(), created.email);
            }
        }
        Command::RemoveSubuser { email } => {
            dashboard.subusers(scope).await;
            dashboard.delete_subuser(scope, &email).await?;
            println!("Removed {}", email);
        }
        Command::Login | Command::Logout | Command::Help => {}
    }
    Ok(())
}

fn dashboard(config: &Config, scope: &str) -> Result<Dashboard> {
    let mut adapter = HttpAdapter::new(config.api_url())?;
    if let Some(token) = resolve_token(scope) {
        adapter = adapter.with_token(token);
    } else if !config.demo_mode {
        warn!(scope, "No API token stored; run `wipecache login` first");
    }
    Dashboard::from_config(config, Arc::new(adapter))
}

/// A one-shot process exits before a background refresh could land, so wait
/// for it instead of printing data that is about to be replaced.
async fn settle<T>(query: Query<T>) -> Query<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if query.is_loading {
        query.refetch().await
    } else {
        query
    }
}

// ============================================================================
// Output
// ============================================================================

async fn print_status<T>(dashboard: &Dashboard, collection: Collection, scope: &str, query: &Query<T>) {
    if let Some(ref error) = query.error {
        if query.is_error {
            eprintln!("Error loading {}: {}", collection, error);
        } else if let Some(age) = dashboard.stored_age(collection, scope).await {
            eprintln!("Offline ({}), showing data cached {}", error, age);
        } else {
            eprintln!("Offline ({}), showing last known data", error);
        }
    }
}

fn print_machines(machines: &[Machine]) {
    if machines.is_empty() {
        println!("No machines.");
        return;
    }
    println!(
        "{:<24} {:<20} {:<16} {:>9}  {}",
        "HOSTNAME", "OS", "SERIAL", "ERASURES", "STATUS"
    );
    for m in machines {
        println!(
            "{:<24} {:<20} {:<16} {:>9}  {}",
            truncate_string(&m.hostname, 24),
            truncate_string(m.display_os(), 20),
            truncate_string(m.serial_number.as_deref().unwrap_or("-"), 16),
            m.erasure_count.unwrap_or(0),
            m.status.as_deref().unwrap_or("-"),
        );
    }
}

fn print_reports(reports: &[AuditReport]) {
    if reports.is_empty() {
        println!("No audit reports.");
        return;
    }
    println!(
        "{:<14} {:<18} {:<20} {:>7}  {}",
        "REPORT", "COMPLETED", "MACHINE", "DEVICES", "STATUS"
    );
    for r in reports {
        let completed = r
            .completed_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<14} {:<18} {:<20} {:>7}  {}",
            truncate_string(&r.report_id, 14),
            completed,
            truncate_string(r.machine_hostname.as_deref().unwrap_or("-"), 20),
            r.device_count,
            r.status,
        );
    }
}

fn print_subusers(subusers: &[Subuser]) {
    if subusers.is_empty() {
        println!("No sub-accounts.");
        return;
    }
    println!("{:<32} {:<24} {:<12} {}", "EMAIL", "NAME", "ROLE", "STATUS");
    for s in subusers {
        println!(
            "{:<32} {:<24} {:<12} {}",
            truncate_string(&s.email, 32),
            truncate_string(s.name.as_deref().unwrap_or("-"), 24),
            s.role.as_deref().unwrap_or("-"),
            s.status.as_deref().unwrap_or("-"),
        );
    }
}

fn print_metrics(metrics: &DerivedMetrics) {
    if !metrics.ready {
        println!("Metrics unavailable: reports or machines could not be loaded.");
        return;
    }
    println!(
        "{:<10} {:>7} {:>7} {:>6} {:>7} {:>12} {:>8} {:>10}",
        "MONTH", "REPORTS", "SUCCESS", "FAILED", "RATE", "AVG TIME", "MACHINES", "THROUGHPUT"
    );
    for m in &metrics.months {
        println!(
            "{:<10} {:>7} {:>7} {:>6} {:>7} {:>12} {:>8} {:>10}",
            m.label,
            m.report_count,
            m.success_count,
            m.failure_count,
            m.success_rate,
            format_duration_secs(m.average_duration_secs),
            m.active_machines,
            m.throughput,
        );
    }
    println!(
        "\nTotal: {} reports, {} succeeded, {} failed ({}), average {}",
        metrics.total_reports,
        metrics.success_count,
        metrics.failure_count,
        metrics.success_rate,
        format_duration_secs(metrics.average_duration_secs),
    );
}
