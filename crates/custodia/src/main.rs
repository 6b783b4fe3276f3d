use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use custodia::{service_from_records, CustodiaConfig, RecordSet, RootError, RootResult};
use custodia_core::Timestamp;
use custodia_policy::{load_policies, EvaluationContext};

/// Custodia: consent and sharing access control
///
/// Every command reads a JSON snapshot of consents, requests, revocations
/// and policies, and prints its result as JSON.
#[derive(Parser, Debug)]
#[command(name = "custodia", version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Evaluate as of this RFC 3339 instant instead of the current time
    #[arg(long, global = true)]
    now: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decide one access attempt
    Evaluate {
        /// Snapshot file
        #[arg(short, long)]
        snapshot: PathBuf,

        /// JSON file holding the evaluation context
        #[arg(long)]
        context: PathBuf,
    },

    /// Per-policy verdicts for an access attempt, ignoring consents
    Preview {
        #[arg(short, long)]
        snapshot: PathBuf,

        #[arg(long)]
        context: PathBuf,
    },

    /// Active consents expiring within the configured window
    Expiring {
        #[arg(short, long)]
        snapshot: PathBuf,
    },

    /// Pending requests past their SLA deadline
    Overdue {
        #[arg(short, long)]
        snapshot: PathBuf,
    },

    /// Pending requests due within the configured window
    AtRisk {
        #[arg(short, long)]
        snapshot: PathBuf,
    },

    /// Mark lapsed consents as expired
    AutoExpire {
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Write the updated records back to the snapshot file
        #[arg(long)]
        write: bool,
    },

    /// Link or rebuild consents for approved requests missing one
    Reconcile {
        #[arg(short, long)]
        snapshot: PathBuf,

        #[arg(long)]
        write: bool,
    },

    /// Check a JSON array of sharing policies
    ValidatePolicies {
        /// Policy file
        file: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("custodia=debug,custodia_consent=debug,custodia_policy=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("custodia=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> RootResult<CustodiaConfig> {
    match path {
        Some(p) => CustodiaConfig::load(p),
        None => CustodiaConfig::load(&CustodiaConfig::default_config_path()),
    }
}

fn resolve_now(now: Option<&str>) -> RootResult<Timestamp> {
    match now {
        Some(s) => Ok(Timestamp::parse_rfc3339(s)?),
        None => Ok(Timestamp::now()),
    }
}

fn load_context(path: &Path) -> RootResult<EvaluationContext> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn print_json<T: Serialize>(value: &T) -> RootResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), RootError> {
    let config = load_config(cli.config.as_ref())?;
    let now = resolve_now(cli.now.as_deref())?;

    match cli.command {
        Commands::Evaluate { snapshot, context } => {
            let service = service_from_records(RecordSet::load(&snapshot)?, config);
            let result = service.evaluate(&load_context(&context)?, now)?;
            print_json(&result)
        }
        Commands::Preview { snapshot, context } => {
            let service = service_from_records(RecordSet::load(&snapshot)?, config);
            print_json(&service.preview(&load_context(&context)?)?)
        }
        Commands::Expiring { snapshot } => {
            let service = service_from_records(RecordSet::load(&snapshot)?, config);
            print_json(&service.expiring_soon(now)?)
        }
        Commands::Overdue { snapshot } => {
            let service = service_from_records(RecordSet::load(&snapshot)?, config);
            print_json(&service.overdue_requests(now)?)
        }
        Commands::AtRisk { snapshot } => {
            let service = service_from_records(RecordSet::load(&snapshot)?, config);
            print_json(&service.requests_at_risk(now)?)
        }
        Commands::AutoExpire { snapshot, write } => {
            let service = service_from_records(RecordSet::load(&snapshot)?, config);
            let expired = service.apply_auto_expire(now)?;
            info!(count = expired.len(), "auto-expire finished");
            if write {
                service.into_store().into_records()?.save(&snapshot)?;
            }
            print_json(&expired)
        }
        Commands::Reconcile { snapshot, write } => {
            let service = service_from_records(RecordSet::load(&snapshot)?, config);
            let report = service.reconcile_approved_requests(now)?;
            if write {
                service.into_store().into_records()?.save(&snapshot)?;
            }
            print_json(&report)?;
            report.ensure_complete()
        }
        Commands::ValidatePolicies { file } => {
            let bytes = std::fs::read(&file)?;
            let policies = load_policies(&bytes)?;
            print_json(&serde_json::json!({
                "valid": true,
                "count": policies.len(),
            }))
        }
    }
}
