use std::path::PathBuf;

use anyhow::Result;
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use plate_access_detector::setup;

/// Manage permits and inspect the detection log.
#[derive(Parser, Debug)]
#[command(name = "plates_registry")]
struct Cli {
    #[arg(short, long, global = true, default_value = "plate_access.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database and its tables
    Init,
    /// Permit a plate between two dates, both included
    Grant {
        plate: String,
        /// First valid day, today when omitted
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        until: NaiveDate,
    },
    /// Deactivate every permit of a plate
    Revoke { plate: String },
    /// Show the latest detections
    Log {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    setup::init_tracing();
    let cli = Cli::parse();
    let config = setup::load_config(&cli.config)?;
    let registry = setup::open_registry(&config.registry)?;

    match cli.command {
        Commands::Init => {
            println!("Registry ready at {}", config.registry.database_path.display());
        }
        Commands::Grant { plate, from, until } => {
            let from = from.unwrap_or_else(|| Local::now().date_naive());
            let id = registry.grant_permit(&plate, from, until)?;
            println!("Permit {} for {} from {} until {}", id, plate, from, until);
        }
        Commands::Revoke { plate } => {
            let revoked = registry.revoke_permit(&plate)?;
            println!("Revoked {} permit(s) for {}", revoked, plate);
        }
        Commands::Log { limit } => {
            for record in registry.recent_detections(limit)? {
                println!(
                    "{:>6}  {}  {:<10}  {}",
                    record.id,
                    record.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                    record.plate,
                    if record.authorized { "authorized" } else { "unauthorized" }
                );
            }
        }
    }
    Ok(())
}
