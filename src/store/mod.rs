//! Durable store adapter: four independently persisted records.
//!
//! The engine owns all four records and keeps in-memory mirrors; the store
//! only ever sees whole-record writes, and writing one record must never
//! clobber another.

pub mod json_file;

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::settings::Settings;

/// One cached balance read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceEntry {
    /// `0x`-prefixed hex value as returned by the chain.
    pub hex: String,
    /// Epoch milliseconds at write time.
    pub ts: i64,
    /// Human-readable value, decimals applied.
    pub formatted: String,
}

/// Normalized username -> lowercase wallet address. Append-only; cleared
/// only by an explicit reset.
pub type UsernameToAddress = HashMap<String, String>;

/// Contract address -> username -> cached entry.
pub type BalanceCache = HashMap<String, HashMap<String, BalanceEntry>>;

/// Contract address -> decimals, discovered once and never refetched.
pub type DecimalsCache = HashMap<String, u32>;

/// Everything the store holds, loaded once at startup.
#[derive(Clone, Debug, Default)]
pub struct StoreSnapshot {
    pub settings: Settings,
    pub wallets: UsernameToAddress,
    pub balances: BalanceCache,
    pub decimals: DecimalsCache,
}

#[async_trait]
pub trait StoreBackend: Send + Sync + 'static {
    async fn load(&self) -> Result<StoreSnapshot>;
    async fn save_settings(&self, settings: &Settings) -> Result<()>;
    async fn save_wallets(&self, wallets: &UsernameToAddress) -> Result<()>;
    async fn save_balances(&self, balances: &BalanceCache) -> Result<()>;
    async fn save_decimals(&self, decimals: &DecimalsCache) -> Result<()>;
}

/// In-memory backend for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoreSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            inner: Mutex::new(snapshot),
        }
    }

    /// Current contents, for assertions.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn load(&self) -> Result<StoreSnapshot> {
        Ok(self.snapshot())
    }

    async fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).settings = settings.clone();
        Ok(())
    }

    async fn save_wallets(&self, wallets: &UsernameToAddress) -> Result<()> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).wallets = wallets.clone();
        Ok(())
    }

    async fn save_balances(&self, balances: &BalanceCache) -> Result<()> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).balances = balances.clone();
        Ok(())
    }

    async fn save_decimals(&self, decimals: &DecimalsCache) -> Result<()> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).decimals = decimals.clone();
        Ok(())
    }
}
