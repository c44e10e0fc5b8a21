//! Rewind CLI - inspect recorded cases and the integrity ledger

use anyhow::Result;
use clap::{Parser, Subcommand};

use rewind_cli::{StoreArgs, list_cases, print_ledger, show_case, verify_ledger};
use rewind_core::outcome::CaseKey;

#[derive(Parser)]
#[command(name = "rewind")]
#[command(about = "Rewind record/replay CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List recorded cases per function
    List,
    /// Show one case
    Show {
        /// Function id
        fcid: String,
        /// Case id
        tcid: String,
    },
    /// Print the metadata ledger
    Ledger,
    /// Re-hash every case in the ledger; exits non-zero on drift
    Verify,
    /// Version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut stdout = std::io::stdout().lock();

    match cli.command {
        Commands::Version => {
            println!("rewind {}", env!("CARGO_PKG_VERSION"));
            println!("rewind-core {}", rewind_core::VERSION);
        }
        Commands::List => {
            let store = cli.store.load_config()?.store();
            list_cases(&store, &mut stdout)?;
        }
        Commands::Show { fcid, tcid } => {
            let store = cli.store.load_config()?.store();
            show_case(&store, &CaseKey::new(fcid, tcid), &mut stdout)?;
        }
        Commands::Ledger => {
            let store = cli.store.load_config()?.store();
            print_ledger(&store, &mut stdout)?;
        }
        Commands::Verify => {
            let store = cli.store.load_config()?.store();
            if !verify_ledger(&store, &mut stdout)? {
                tracing::warn!(root = %store.root().display(), "ledger drift detected");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
