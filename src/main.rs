//! # Cadence: Applet Event Scheduler
//!
//! Usage:
//!   cadence init                         # Write a default config file
//!   cadence serve                        # Start the HTTP API (default port 8000)
//!   cadence serve --port 9000            # Custom port
//!   cadence seed directory.json          # Load applets, activities, flows and roles
//!   cadence import-legacy events.json    # Migrate legacy schedule documents

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use cadence_core::config::CadenceConfig;
use cadence_scheduler::{DirectorySeed, LegacyImporter, ScheduleDb, SqliteDirectory};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cadence", version, about = "📅 Cadence — applet event scheduling service")]
struct Cli {
    /// Config file (default: ~/.cadence/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP gateway
    Serve {
        /// Override gateway port
        #[arg(short, long)]
        port: Option<u16>,
        /// Override bind address
        #[arg(long)]
        host: Option<String>,
    },
    /// Import legacy event documents from a JSON array file
    ImportLegacy { file: String },
    /// Upsert directory data (applets, activities, flows, roles) from JSON
    Seed { file: String },
    /// Write the default config file and create the database
    Init,
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn load_config(path: Option<&str>) -> Result<(CadenceConfig, PathBuf)> {
    match path {
        Some(p) => {
            let path = expand_path(p);
            let config = if path.exists() {
                CadenceConfig::load_from(&path)?
            } else {
                CadenceConfig::default()
            };
            Ok((config, path))
        }
        None => Ok((CadenceConfig::load()?, CadenceConfig::default_path())),
    }
}

fn open_db(config: &CadenceConfig) -> Result<Arc<ScheduleDb>> {
    let path = config.database.resolved_path();
    let db = ScheduleDb::open(&path)?;
    tracing::debug!("💾 Opened {}", path.display());
    Ok(Arc::new(db))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "cadence=debug,cadence_scheduler=debug,cadence_gateway=debug,tower_http=debug"
    } else {
        "cadence=info,cadence_scheduler=info,cadence_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let (mut config, config_path) = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Init => {
            if config_path.exists() {
                println!("⚠️  Config already exists: {}", config_path.display());
            } else {
                config.save_to(&config_path)?;
                println!("✅ Config written: {}", config_path.display());
            }
            open_db(&config)?;
            println!("   🗄️  Database: {}", config.database.resolved_path().display());
        }
        Command::Seed { file } => {
            let raw = std::fs::read_to_string(expand_path(&file))?;
            let seed = DirectorySeed::from_json(&raw)?;
            let directory = SqliteDirectory::new(open_db(&config)?);
            directory.seed(&seed)?;
            println!(
                "✅ Seeded {} applet(s), {} activit(ies), {} flow(s), {} role(s)",
                seed.applets.len(),
                seed.activities.len(),
                seed.flows.len(),
                seed.roles.len()
            );
        }
        Command::ImportLegacy { file } => {
            let raw = std::fs::read_to_string(expand_path(&file))?;
            let events = LegacyImporter::parse(&raw)?;
            let report = LegacyImporter::new(open_db(&config)?).run(&events)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Serve { port, host } => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(host) = host {
                config.gateway.host = host;
            }
            println!("📅 Cadence v{}", env!("CARGO_PKG_VERSION"));
            println!("   🌐 API:      http://{}:{}", config.gateway.host, config.gateway.port);
            println!("   🗄️  Database: {}", config.database.resolved_path().display());
            println!(
                "   🔔 Push:     {}",
                if config.push.enabled { "enabled" } else { "disabled" }
            );
            println!();
            cadence_gateway::start(&config).await?;
        }
    }

    Ok(())
}
