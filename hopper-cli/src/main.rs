//! hopper
//!
//! Operator front-end for the hopper mixer client.
//!
//! 1. `new-secret` draws a secret for a fresh deposit
//! 2. `deposit` commits it through the relayer and waits for funding
//! 3. `withdraw` proves ownership and relays the withdrawal
//! 4. `watch` and `status` inspect the ledger

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ethers::types::Address;
use hopper_client::MixerConfig;
use tracing::info;

#[derive(Parser)]
#[command(name = "hopper", version, about = "Deposit into and withdraw from the hopper mixer")]
struct Cli {
    /// TOML config file; `HOPPER_*` environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a fresh random secret.
    NewSecret,

    /// Commit a leaf through the relayer and wait until it is funded.
    Deposit {
        #[arg(long)]
        secret: String,
        /// Address the withdrawal will pay out to.
        #[arg(long)]
        recipient: Address,
        /// Account the relayer charges for the commit.
        #[arg(long)]
        funder: Address,
        /// Overrides `start_block` from the config.
        #[arg(long)]
        from_block: Option<u64>,
    },

    /// Wait for the funding event of an existing commitment.
    Watch {
        #[arg(long)]
        secret: String,
        #[arg(long)]
        recipient: Address,
        #[arg(long)]
        from_block: Option<u64>,
    },

    /// Prove and relay a withdrawal.
    Withdraw {
        #[arg(long)]
        secret: String,
        #[arg(long)]
        recipient: Address,
        /// Tree index reported when the deposit was funded.
        #[arg(long)]
        leaf_index: u64,
    },

    /// Show chain height, tree depth and root; optionally a nullifier's status.
    Status {
        /// Also report whether this secret's nullifier is spent.
        #[arg(long)]
        secret: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hopper=info,hopper_client=info".into()),
        )
        .init();

    let cli = Cli::parse();

    if let Command::NewSecret = cli.command {
        return commands::new_secret();
    }

    let config = MixerConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    info!("Ledger RPC: {}", config.ledger_rpc_url);
    info!("Relayer: {}", config.relayer_url);

    match cli.command {
        Command::NewSecret => commands::new_secret(),
        Command::Deposit {
            secret,
            recipient,
            funder,
            from_block,
        } => commands::deposit(config, &secret, recipient, funder, from_block).await,
        Command::Watch {
            secret,
            recipient,
            from_block,
        } => commands::watch(config, &secret, recipient, from_block).await,
        Command::Withdraw {
            secret,
            recipient,
            leaf_index,
        } => commands::withdraw(config, &secret, recipient, leaf_index).await,
        Command::Status { secret } => commands::status(config, secret.as_deref()).await,
    }
}
