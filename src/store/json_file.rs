//! JSON-file store: one file per record under a single directory.
//!
//! A missing or unreadable file degrades to the record's default so a fresh
//! (or damaged) install starts from a clean state instead of failing.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::settings::Settings;
use crate::store::{BalanceCache, DecimalsCache, StoreBackend, StoreSnapshot, UsernameToAddress};

const SETTINGS_FILE: &str = "settings.json";
const WALLETS_FILE: &str = "usernameToAddress.json";
const BALANCES_FILE: &str = "balances.json";
const DECIMALS_FILE: &str = "decimalsByContract.json";

pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn read_record<T: DeserializeOwned + Default>(&self, file: &str) -> T {
        let path = self.dir.join(file);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return T::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!("ignoring corrupt record {:?}: {}", path, e);
                T::default()
            }
        }
    }

    fn write_record<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating store dir {:?}", self.dir))?;
        let path = self.dir.join(file);
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&path, json).with_context(|| format!("writing record {:?}", path))?;
        Ok(())
    }
}

#[async_trait]
impl StoreBackend for JsonFileStore {
    async fn load(&self) -> Result<StoreSnapshot> {
        Ok(StoreSnapshot {
            settings: self.read_record(SETTINGS_FILE),
            wallets: self.read_record(WALLETS_FILE),
            balances: self.read_record(BALANCES_FILE),
            decimals: self.read_record(DECIMALS_FILE),
        })
    }

    async fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.write_record(SETTINGS_FILE, settings)
    }

    async fn save_wallets(&self, wallets: &UsernameToAddress) -> Result<()> {
        self.write_record(WALLETS_FILE, wallets)
    }

    async fn save_balances(&self, balances: &BalanceCache) -> Result<()> {
        self.write_record(BALANCES_FILE, balances)
    }

    async fn save_decimals(&self, decimals: &DecimalsCache) -> Result<()> {
        self.write_record(DECIMALS_FILE, decimals)
    }
}
