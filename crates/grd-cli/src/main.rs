use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "grd")]
#[command(about = "Guardrail risk engine operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute layered settings hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> overrides...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Verify a signed risk configuration record (JSON: {record, signed_hash})
    VerifyRecord {
        #[arg(long)]
        record: String,

        /// Optional layered settings, used for the threshold-ordering check
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },

    /// Dry-run one order intent through every guard layer
    CheckOrder {
        /// Signed risk configuration record
        #[arg(long)]
        record: String,

        /// Order intent JSON file
        #[arg(long)]
        intent: String,

        #[arg(long = "config")]
        config_paths: Vec<String>,

        /// Start-of-day equity (defaults to the intent's account balance)
        #[arg(long)]
        start_equity: Option<f64>,

        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        realized: f64,

        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        unrealized: f64,
    },

    /// Dry-run the asset kill scan over a snapshot (JSON: {positions, spot_prices})
    Scan {
        #[arg(long)]
        snapshot: String,

        #[arg(long = "config")]
        config_paths: Vec<String>,
    },

    /// Forensic vault utilities
    Vault {
        #[command(subcommand)]
        cmd: VaultCmd,
    },
}

#[derive(Subcommand)]
enum VaultCmd {
    /// Verify the hash chain of an incident log
    Verify {
        path: String,
    },
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::ConfigHash { paths } => commands::settings::config_hash(&paths),

        Commands::VerifyRecord {
            record,
            config_paths,
        } => commands::record::verify_record(&record, &config_paths),

        Commands::CheckOrder {
            record,
            intent,
            config_paths,
            start_equity,
            realized,
            unrealized,
        } => commands::order::check_order(commands::order::CheckOrderArgs {
            record_path: record,
            intent_path: intent,
            config_paths,
            start_equity,
            realized,
            unrealized,
        }),

        Commands::Scan {
            snapshot,
            config_paths,
        } => commands::scan::dry_run_scan(&snapshot, &config_paths),

        Commands::Vault { cmd } => match cmd {
            VaultCmd::Verify { path } => commands::vault::verify(&path),
        },
    }
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
