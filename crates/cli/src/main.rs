//! Relaymeter command line interface
//!
//! Local tooling over a relaymeter data directory: geolocation masks, tracked
//! usage, subscriptions, plans and payout previews.

mod settings;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relaymeter_plans::{GeoCatalog, Plan, PlanCatalog, ProportionalReward};
use relaymeter_storage::{SledStorage, SubscriptionSnapshot, SubscriptionStore, UsageLedger};
use relaymeter_treasury::{
    CatalogPlanRegistry, DualStakingRewards, InMemoryAccountLedger, PayoutKeeper,
};
use relaymeter_types::AccountAddress;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::settings::{init_logging, CliConfig};

#[derive(Parser)]
#[command(name = "relaymeter")]
#[command(about = "Relaymeter usage accounting and settlement tools", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Data directory holding the usage database and plan catalog
    #[arg(long, value_name = "PATH")]
    data_dir: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Geolocation mask tools
    Geo {
        #[command(subcommand)]
        action: GeoCommands,
    },
    /// Tracked usage
    Usage {
        #[command(subcommand)]
        action: UsageCommands,
    },
    /// Subscription snapshots
    Subscription {
        #[command(subcommand)]
        action: SubscriptionCommands,
    },
    /// Plan catalog
    Plan {
        #[command(subcommand)]
        action: PlanCommands,
    },
    /// Provider payouts
    Payout {
        #[command(subcommand)]
        action: PayoutCommands,
    },
}

#[derive(Subcommand)]
enum GeoCommands {
    /// Parse a decimal mask or comma-separated region names
    Parse {
        input: String,
    },
    /// List every known region
    List,
    /// Check whether a numeric mask is valid
    Validate {
        mask: u32,
    },
}

#[derive(Subcommand)]
enum UsageCommands {
    /// Add compute units to a tracked-usage record
    Record {
        #[arg(long)]
        sub: String,
        #[arg(long)]
        provider: String,
        #[arg(long)]
        chain: String,
        #[arg(long)]
        cu: u64,
        /// Anchor height of the subscription
        #[arg(long)]
        height: u64,
    },
    /// List tracked-usage keys, optionally for one subscription
    List {
        #[arg(long)]
        sub: Option<String>,
    },
}

#[derive(Subcommand)]
enum SubscriptionCommands {
    /// Create or replace a subscription snapshot
    Put {
        #[arg(long)]
        id: String,
        /// Anchor height
        #[arg(long)]
        height: u64,
        /// Plan index
        #[arg(long)]
        plan: String,
    },
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Add plan versions from a JSON file (one plan or an array)
    Put {
        #[arg(long, value_name = "PATH")]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum PayoutCommands {
    /// Compute a provider's payout without transferring anything
    Preview {
        #[arg(long)]
        provider: String,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PlanFile {
    One(Plan),
    Many(Vec<Plan>),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(
        cli.config.as_deref(),
        cli.data_dir.as_deref(),
        cli.log_level.as_deref(),
    )?;
    init_logging(&config)?;
    debug!(data_dir = %config.data_dir.display(), "Configuration loaded");

    match cli.command {
        Commands::Geo { action } => handle_geo_commands(action),
        Commands::Usage { action } => handle_usage_commands(action, &config),
        Commands::Subscription { action } => handle_subscription_commands(action, &config),
        Commands::Plan { action } => handle_plan_commands(action, &config),
        Commands::Payout { action } => handle_payout_commands(action, &config),
    }
}

fn handle_geo_commands(cmd: GeoCommands) -> Result<()> {
    let geo = GeoCatalog::standard();

    match cmd {
        GeoCommands::Parse { input } => {
            let mask = geo.parse(&input)?;
            let names: Vec<&str> = geo.decompose(mask).iter().map(|g| g.name()).collect();
            println!("{mask} (0x{mask:x})");
            println!("regions: {}", names.join(", "));
        }
        GeoCommands::List => {
            println!("{}", geo.format());
        }
        GeoCommands::Validate { mask } => {
            if geo.validate(mask) {
                println!("0x{mask:x} is valid");
            } else {
                println!("0x{mask:x} is invalid");
            }
        }
    }

    Ok(())
}

fn open_storage(config: &CliConfig) -> Result<SledStorage> {
    let path = config.db_path();
    SledStorage::new(&path).with_context(|| format!("failed to open database {}", path.display()))
}

fn handle_usage_commands(cmd: UsageCommands, config: &CliConfig) -> Result<()> {
    let storage = open_storage(config)?;

    match cmd {
        UsageCommands::Record {
            sub,
            provider,
            chain,
            cu,
            height,
        } => {
            let usage = storage.add_tracked_usage(&sub, &provider, &chain, cu, height)?;
            storage.flush()?;
            println!("{}", serde_json::to_string_pretty(&usage)?);
        }
        UsageCommands::List { sub } => {
            for key in storage.tracked_usage_keys(sub.as_deref())? {
                let id = key.decode()?;
                let anchor = storage.subscription(&id.subscription)?.map(|s| s.anchor_height);
                let cu = match anchor {
                    Some(height) => storage
                        .tracked_usage(&id.subscription, &id.provider, &id.chain, height)?
                        .map(|u| u.cu.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    None => "no subscription".to_string(),
                };
                println!("{key}\t{cu}");
            }
        }
    }

    Ok(())
}

fn handle_subscription_commands(cmd: SubscriptionCommands, config: &CliConfig) -> Result<()> {
    let storage = open_storage(config)?;

    match cmd {
        SubscriptionCommands::Put { id, height, plan } => {
            storage.put_subscription(SubscriptionSnapshot {
                id: id.clone(),
                anchor_height: height,
                plan_index: plan,
            })?;
            storage.flush()?;
            info!(subscription = %id, anchor_height = height, "Subscription stored");
        }
    }

    Ok(())
}

fn load_catalog(path: &Path) -> Result<PlanCatalog> {
    if !path.exists() {
        return Ok(PlanCatalog::new());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read plan catalog {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse plan catalog {}", path.display()))
}

fn save_catalog(path: &Path, catalog: &PlanCatalog) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(catalog)?)
        .with_context(|| format!("failed to write plan catalog {}", path.display()))
}

fn handle_plan_commands(cmd: PlanCommands, config: &CliConfig) -> Result<()> {
    match cmd {
        PlanCommands::Put { file } => {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("failed to read plan file {}", file.display()))?;
            let plans = match serde_json::from_str::<PlanFile>(&raw)
                .with_context(|| format!("failed to parse plan file {}", file.display()))?
            {
                PlanFile::One(plan) => vec![plan],
                PlanFile::Many(plans) => plans,
            };

            let path = config.plans_path();
            let mut catalog = load_catalog(&path)?;
            let geo = GeoCatalog::standard();
            for plan in plans {
                catalog.add_plan(plan, &geo)?;
            }
            save_catalog(&path, &catalog)?;
            println!("plans: {}", catalog.indices().join(", "));
        }
    }

    Ok(())
}

fn handle_payout_commands(cmd: PayoutCommands, config: &CliConfig) -> Result<()> {
    match cmd {
        PayoutCommands::Preview { provider } => {
            let provider: AccountAddress = provider
                .parse()
                .with_context(|| format!("invalid provider address {provider}"))?;
            let storage = open_storage(config)?;
            let catalog = load_catalog(&config.plans_path())?;
            let registry = CatalogPlanRegistry::new(&storage, &catalog);
            let keeper = PayoutKeeper::new(&storage, &storage, &registry, &ProportionalReward);
            let rewards = DualStakingRewards::new(InMemoryAccountLedger::new());

            let plan = keeper.compute_payout(&provider, &rewards)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
    }

    Ok(())
}
