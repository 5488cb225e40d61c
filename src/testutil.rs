//! Shared fakes for pipeline and router tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::time::{sleep, Duration};

use crate::codec::DECIMALS_SELECTOR;
use crate::pipeline::BalanceEngine;
use crate::resolvers::chain::ChainReader;
use crate::resolvers::wallet::WalletLookup;
use crate::store::{MemoryStore, StoreSnapshot};

/// A valid-shaped contract address used across tests.
pub const CONTRACT: &str = "0x051024b653e8ec69e72693f776c41c2a9401fb07";

/// A valid-shaped wallet address used across tests.
pub const WALLET: &str = "0x00000000000000000000000000000000000000a1";

pub async fn engine_with(
    snapshot: StoreSnapshot,
    wallets: Arc<dyn WalletLookup>,
    chain: Arc<dyn ChainReader>,
) -> (Arc<BalanceEngine>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::with_snapshot(snapshot));
    let engine = BalanceEngine::load(store.clone(), wallets, chain)
        .await
        .unwrap();
    (engine, store)
}

/// Wallet lookup backed by a fixed map, with an attempt counter.
pub struct FakeWallets {
    map: HashMap<String, String>,
    calls: AtomicU64,
    delay_ms: u64,
}

impl FakeWallets {
    pub fn empty() -> Self {
        Self {
            map: HashMap::new(),
            calls: AtomicU64::new(0),
            delay_ms: 0,
        }
    }

    pub fn known(username: &str, address: &str) -> Self {
        let mut fake = Self::empty();
        fake.map.insert(username.to_string(), address.to_string());
        fake
    }

    /// Slow the lookup down to widen dedup race windows.
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl WalletLookup for FakeWallets {
    async fn lookup(&self, username: &str, _api_key: &str) -> Option<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.delay_ms > 0 {
            sleep(Duration::from_millis(self.delay_ms)).await;
        }
        self.map.get(username).cloned()
    }
}

/// Chain reader that answers `decimals()` and `balanceOf` from fixtures.
pub struct FakeChain {
    decimals_hex: Option<String>,
    balance_hex: Option<String>,
    decimals_calls: AtomicU64,
    balance_calls: AtomicU64,
    delay_ms: u64,
}

impl FakeChain {
    pub fn healthy(decimals: u32, balance_hex: &str) -> Self {
        Self {
            decimals_hex: Some(format!("0x{decimals:x}")),
            balance_hex: Some(balance_hex.to_string()),
            decimals_calls: AtomicU64::new(0),
            balance_calls: AtomicU64::new(0),
            delay_ms: 0,
        }
    }

    /// Every call fails, as if the RPC endpoint were unreachable.
    pub fn down() -> Self {
        Self {
            decimals_hex: None,
            balance_hex: None,
            decimals_calls: AtomicU64::new(0),
            balance_calls: AtomicU64::new(0),
            delay_ms: 0,
        }
    }

    /// `decimals()` fails, `balanceOf` succeeds.
    pub fn no_decimals(balance_hex: &str) -> Self {
        Self {
            decimals_hex: None,
            balance_hex: Some(balance_hex.to_string()),
            decimals_calls: AtomicU64::new(0),
            balance_calls: AtomicU64::new(0),
            delay_ms: 0,
        }
    }

    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    pub fn decimals_calls(&self) -> u64 {
        self.decimals_calls.load(Ordering::Relaxed)
    }

    pub fn balance_calls(&self) -> u64 {
        self.balance_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn eth_call(&self, _rpc_url: &str, _to: &str, data: &str) -> Result<String> {
        if self.delay_ms > 0 {
            sleep(Duration::from_millis(self.delay_ms)).await;
        }
        let answer = if data.starts_with(&format!("0x{DECIMALS_SELECTOR}")) {
            self.decimals_calls.fetch_add(1, Ordering::Relaxed);
            &self.decimals_hex
        } else {
            self.balance_calls.fetch_add(1, Ordering::Relaxed);
            &self.balance_hex
        };
        answer.clone().ok_or_else(|| anyhow!("rpc unreachable"))
    }
}
