// crates/herbtrace-cli/src/main.rs

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use herbtrace_repository::PostgresStore;

mod commands;
use commands::provenance::handle_provenance_command;
use commands::seed::handle_seed_command;

/// Operational CLI for the herb traceability store.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Applies pending database migrations.
    Migrate,
    /// Upserts species reference data from a TOML file.
    SeedSpecies {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Prints the provenance bundle for a batch.
    Provenance { batch_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    let store = PostgresStore::connect(&database_url, 5).await?;

    match cli.command {
        Commands::Migrate => {
            store.run_migrations().await?;
            println!("migrations applied");
        }
        Commands::SeedSpecies { file } => {
            handle_seed_command(&store, &file).await?;
        }
        Commands::Provenance { batch_id } => {
            handle_provenance_command(&store, &batch_id).await?;
        }
    }

    Ok(())
}
