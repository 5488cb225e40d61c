//! CLI front end for the balance service.
//!
//! Usage: cargo run --bin balctl -- ensure dwr.eth --wait-secs 20

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::warn;

use farcaster_balances::config::settings::SettingsPatch;
use farcaster_balances::pipeline::{BalanceEngine, Event};
use farcaster_balances::resolvers::chain::JsonRpcChainReader;
use farcaster_balances::resolvers::wallet::NeynarWalletLookup;
use farcaster_balances::router::{self, Request, Status};
use farcaster_balances::store::json_file::JsonFileStore;

#[derive(Parser)]
#[command(name = "balctl", about = "Query and manage cached Farcaster token balances")]
struct Cli {
    /// Directory holding the persisted records
    #[arg(long, default_value = ".farcaster-balances")]
    store_dir: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the current settings
    SettingsGet,
    /// Update settings; only the flags you pass change
    SettingsSet {
        #[arg(long)]
        rpc_url: Option<String>,
        #[arg(long)]
        contract_address: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        token_symbol: Option<String>,
    },
    /// Drop every cached wallet, balance and decimals record
    Clear,
    /// Resolve a user's balance, waiting for the result when it gets queued
    Ensure {
        username: String,
        /// Contract override; defaults to the configured one
        #[arg(long)]
        contract: Option<String>,
        /// How long to wait for a queued resolution; 0 prints the status and exits
        #[arg(long, default_value_t = 20)]
        wait_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let engine = BalanceEngine::load(
        Arc::new(JsonFileStore::new(&cli.store_dir)),
        Arc::new(NeynarWalletLookup::new()),
        Arc::new(JsonRpcChainReader),
    )
    .await?;

    match cli.command {
        Command::SettingsGet => {
            let response = router::handle(&engine, Request::GetSettings).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::SettingsSet {
            rpc_url,
            contract_address,
            api_key,
            token_symbol,
        } => {
            let response = router::handle(
                &engine,
                Request::SetSettings {
                    settings: SettingsPatch {
                        rpc_url,
                        contract_address,
                        api_key,
                        token_symbol,
                    },
                },
            )
            .await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Clear => {
            let response = router::handle(&engine, Request::ClearAll).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Ensure {
            username,
            contract,
            wait_secs,
        } => {
            let mut events = engine.subscribe();
            let response = router::handle(
                &engine,
                Request::EnsureBalance {
                    username: username.clone(),
                    contract_address: contract,
                },
            )
            .await;
            println!("{}", serde_json::to_string_pretty(&response)?);

            let queued = matches!(
                response.status,
                Some(Status::QueuedWallet)
                    | Some(Status::QueuedBalance)
                    | Some(Status::StaleQueuedBalance)
            );
            if !queued || wait_secs == 0 {
                return Ok(());
            }

            let wanted = username.trim().to_lowercase();
            let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(wait_secs);
            loop {
                let event = match tokio::time::timeout_at(deadline, events.recv()).await {
                    Ok(Ok(event)) => event,
                    Ok(Err(e)) => {
                        warn!("broadcast channel closed: {e}");
                        break;
                    }
                    Err(_) => {
                        // no terminal-failure status exists; a lookup that
                        // keeps failing stays pending
                        println!("still pending after {wait_secs}s");
                        break;
                    }
                };
                if let Event::BalanceUpdated { ref username, .. } = event {
                    if *username == wanted {
                        println!("{}", serde_json::to_string_pretty(&event)?);
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
