//! rockdoc - administration tool for rockdoc databases
//!
//! Creates and destroys databases and manages their date partitions.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use storage::{AsyncClient, Client, Config, DateRange, RangeMode};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "rockdoc")]
#[command(about = "Administration tool for rockdoc databases")]
struct Args {
    /// Configuration file path (YAML format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database directory, overrides the configuration file
    #[arg(short, long)]
    db_path: Option<PathBuf>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty database
    Create,
    /// Remove a database and all its data
    Destroy,
    /// Manage date partitions
    #[command(subcommand)]
    Partitions(PartitionCommand),
}

#[derive(Subcommand, Debug)]
enum PartitionCommand {
    /// List date partitions
    List,
    /// Add every partition of `mode` between two dates
    Add {
        /// year, halfyear, quarter, month, week or day
        #[arg(long)]
        mode: RangeMode,
        /// First day, YYYY-MM-DD
        #[arg(long)]
        from: NaiveDate,
        /// Last day, YYYY-MM-DD
        #[arg(long)]
        to: NaiveDate,
    },
    /// Delete partitions and all objects in them
    Delete {
        /// Packed range values as printed by `list`
        ranges: Vec<DateRange>,
    },
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let level = match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn describe(range: DateRange) -> String {
    format!(
        "{}  {:?} {} #{}  {} .. {}",
        range,
        range.mode(),
        range.year(),
        range.range(),
        range.begin(),
        range.end()
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(path) = &args.db_path {
        config.storage.db_path = path.clone();
    }
    if let Some(level) = &args.log_level {
        config.log.level = level.clone();
    }
    init_logging(&config.log.level)?;
    info!("Database: {}", config.storage.db_path.display());

    match args.command {
        Command::Create => {
            AsyncClient::create_db(config).await?;
        }
        Command::Destroy => {
            AsyncClient::destroy_db(config).await?;
        }
        Command::Partitions(command) => {
            // partitions are only managed on databases that already exist
            config.storage.create_if_missing = false;
            let client = AsyncClient::new(Arc::new(Client::new()));
            client.open(config).await?;
            let result = run_partition_command(&client, command).await;
            client.close().await?;
            result?;
        }
    }
    Ok(())
}

async fn run_partition_command(client: &AsyncClient, command: PartitionCommand) -> anyhow::Result<()> {
    match command {
        PartitionCommand::List => {
            let mut ranges = client.list_date_partitions().await?;
            ranges.sort();
            for range in ranges {
                println!("{}", describe(range));
            }
        }
        PartitionCommand::Add { mode, from, to } => {
            if from > to {
                bail!("--from {} is after --to {}", from, to);
            }
            let ranges = DateRange::ranges_between(from, to, mode)?;
            let count = ranges.len();
            client.add_date_partitions(ranges).await?;
            info!("Added {} {:?} partitions", count, mode);
        }
        PartitionCommand::Delete { ranges } => {
            if ranges.is_empty() {
                bail!("no partitions given");
            }
            let deleted = client.delete_date_partitions(ranges).await?;
            info!("Deleted {} partitions", deleted);
        }
    }
    Ok(())
}
