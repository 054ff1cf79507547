mod events;
mod replay;
mod scenario;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use linkguard::{
    DnsDomainResolver, DomainResolver, MemorySettingsStore, ModerationConfig, SettingsStore,
    SqliteSettingsStore, StaticResolver,
};

#[derive(Parser)]
#[command(
    name = "linkguard-sim",
    about = "Drive the link moderation core against an in-memory chat network"
)]
struct Cli {
    /// SQLite settings database. Settings stay in memory when omitted.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// TOML configuration file. LINKGUARD_* variables are applied on top.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the built-in scenario and print a JSON report.
    Scenario {
        /// Link messages sent by the offender.
        #[arg(long, default_value = "3")]
        violations: u32,
    },

    /// Feed newline-delimited JSON events from a file (`-` for stdin).
    Replay {
        file: PathBuf,
        /// Domains that resolve (comma-separated). Default: every domain.
        #[arg(long, value_delimiter = ',')]
        resolve: Vec<String>,
        /// Resolve domains through the system DNS configuration instead.
        #[arg(long, conflicts_with = "resolve")]
        dns: bool,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ModerationConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            ModerationConfig::from_toml_str(&text)?
        }
        None => ModerationConfig::default(),
    };
    Ok(config.overlay(|key| std::env::var(key).ok())?)
}

fn open_settings(db: Option<&Path>) -> anyhow::Result<Arc<dyn SettingsStore>> {
    Ok(match db {
        Some(path) => Arc::new(
            SqliteSettingsStore::open(path)
                .with_context(|| format!("opening settings database {}", path.display()))?,
        ),
        None => Arc::new(MemorySettingsStore::new()),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let settings = open_settings(cli.db.as_deref())?;

    eprintln!("linkguard-sim v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Scenario { violations } => {
            scenario::run(config, settings, violations).await?;
        }

        Command::Replay { file, resolve, dns } => {
            let resolver: Arc<dyn DomainResolver> = if dns {
                Arc::new(DnsDomainResolver::from_system_conf()?)
            } else if resolve.is_empty() {
                Arc::new(StaticResolver::any())
            } else {
                Arc::new(StaticResolver::new(resolve))
            };
            replay::run(config, settings, resolver, &file).await?;
        }
    }

    Ok(())
}
