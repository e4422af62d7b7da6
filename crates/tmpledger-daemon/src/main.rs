use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tmpledger_config::logging::{init_logging, LogLevel};
use tmpledger_config::Config;
use tmpledger_core::Ledger;
use tmpledger_daemon::inspect;
use tmpledger_ipc::client::LedgerClient;
use tmpledger_ipc::LedgerStatus;

#[derive(Parser)]
#[command(name = "tmpledgerd")]
#[command(version, about = "Temporary file ledger daemon", long_about = None)]
struct Cli {
    /// Config file to use instead of the global/project lookup
    #[arg(long, global = true, env = "TMPLEDGER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (default)
    Start,
    /// Show ledger occupancy and occupied slots
    Inspect {
        /// Read this ledger file directly instead of asking the daemon
        #[arg(long)]
        ledger: Option<PathBuf>,
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the default configuration as TOML
    DefaultConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => {
            let config = load_config(cli.config)?;
            tmpledger_daemon::run_daemon(config).await?;
        }
        Commands::Inspect { ledger, json } => {
            let (status, records) = match ledger {
                Some(path) => read_ledger(&path)?,
                None => {
                    let config = load_config(cli.config)?;
                    query_daemon(&config).await?
                }
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print!("{}", inspect::render(&status, &records));
            }
        }
        Commands::DefaultConfig => {
            print!("{}", Config::default_toml()?);
        }
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let Some(path) = path else {
        return Config::load().context("Failed to load configuration");
    };
    let mut config = Config::load_from(Some(&path), None)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    config.apply_env_overrides_from(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

fn read_ledger(path: &std::path::Path) -> Result<(LedgerStatus, Vec<tmpledger_core::Record>)> {
    let ledger = Ledger::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let status = LedgerStatus {
        ledger_path: ledger.path().to_path_buf(),
        capacity: ledger.max_slots(),
        occupied: ledger.occupancy() as u64,
    };
    Ok((status, ledger.records()))
}

async fn query_daemon(config: &Config) -> Result<(LedgerStatus, Vec<tmpledger_core::Record>)> {
    let mut client = LedgerClient::connect_to(&config.daemon.socket).await?;
    let status = client.status().await?;
    let records = client.inspect().await?;
    Ok((status, records))
}
