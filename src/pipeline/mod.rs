//! Balance-resolution pipeline.
//!
//! Two dedup queues drive all external work: one resolves usernames to
//! wallet addresses, one resolves `(contract, username)` pairs to balances.
//! In-flight sets keep each logical key at most once in the system, a
//! per-queue drain flag keeps at most one consumer running, pacing delays
//! respect external rate limits, and a resolved wallet cross-triggers a
//! balance fetch. Results are written through to the store and broadcast
//! to subscribers.

pub mod evict;

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use futures::join;
use log::{debug, info, warn};
use num_bigint::BigInt;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{sleep, Duration};

use crate::codec;
use crate::config::settings::{Settings, SettingsPatch};
use crate::resolvers::chain::ChainReader;
use crate::resolvers::wallet::WalletLookup;
use crate::store::{
    BalanceCache, BalanceEntry, DecimalsCache, StoreBackend, UsernameToAddress,
};

/// Cache entries older than this are stale.
pub const TTL_MS: i64 = 30 * 60 * 1000;

/// Pause after every wallet-resolution attempt (Neynar rate limit).
const WALLET_PACE: Duration = Duration::from_millis(60);

/// Pause after every successful balance write (RPC rate limit).
const BALANCE_PACE: Duration = Duration::from_millis(100);

/// Used when `decimals()` discovery fails; cached like a real answer.
const DEFAULT_DECIMALS: u32 = 18;

const EVENT_CAPACITY: usize = 64;

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Outbound broadcast, best-effort: nobody listening is fine.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    #[serde(rename_all = "camelCase")]
    BalanceUpdated {
        username: String,
        contract: String,
        hex: String,
        formatted: String,
    },
    #[serde(rename_all = "camelCase")]
    SettingsUpdated { token_symbol: String },
}

/// One pending balance fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
struct BalanceTask {
    username: String,
    contract: String,
}

fn balance_key(contract: &str, username: &str) -> String {
    format!("{contract}|{username}")
}

/// Everything mutable, guarded by one lock. The lock is only ever held
/// across synchronous sections, never across a network call or a pacing
/// sleep.
#[derive(Default)]
struct EngineState {
    settings: Settings,
    wallets: UsernameToAddress,
    balances: BalanceCache,
    decimals: DecimalsCache,
    wallet_queue: VecDeque<String>,
    balance_queue: VecDeque<BalanceTask>,
    in_flight_wallets: HashSet<String>,
    in_flight_balances: HashSet<String>,
    draining_wallets: bool,
    draining_balances: bool,
}

enum Step<T> {
    Empty,
    Skip,
    Item(T),
}

pub struct BalanceEngine {
    state: Mutex<EngineState>,
    store: Arc<dyn StoreBackend>,
    wallet_lookup: Arc<dyn WalletLookup>,
    chain: Arc<dyn ChainReader>,
    events: broadcast::Sender<Event>,
    wallet_failures: AtomicU64,
    balance_failures: AtomicU64,
}

impl BalanceEngine {
    /// Load the persisted records, evict what expired while the process was
    /// down, and return a ready engine.
    pub async fn load(
        store: Arc<dyn StoreBackend>,
        wallet_lookup: Arc<dyn WalletLookup>,
        chain: Arc<dyn ChainReader>,
    ) -> Result<Arc<Self>> {
        let snapshot = store.load().await?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let engine = Arc::new(Self {
            state: Mutex::new(EngineState {
                settings: snapshot.settings,
                wallets: snapshot.wallets,
                balances: snapshot.balances,
                decimals: snapshot.decimals,
                ..Default::default()
            }),
            store,
            wallet_lookup,
            chain,
            events,
            wallet_failures: AtomicU64::new(0),
            balance_failures: AtomicU64::new(0),
        });
        engine.evict_and_persist().await?;
        Ok(engine)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Lookups that degraded to nothing, `(wallet, balance)`. Observability
    /// only; failed items are never retried by the engine itself.
    pub fn failure_counts(&self) -> (u64, u64) {
        (
            self.wallet_failures.load(Ordering::Relaxed),
            self.balance_failures.load(Ordering::Relaxed),
        )
    }

    pub async fn settings(&self) -> Settings {
        self.state.lock().await.settings.clone()
    }

    /// Shallow-merge, persist, re-run eviction, notify subscribers.
    pub async fn update_settings(&self, patch: SettingsPatch) -> Result<()> {
        let settings = {
            let mut state = self.state.lock().await;
            patch.apply(&mut state.settings);
            state.settings.clone()
        };
        self.store.save_settings(&settings).await?;
        self.evict_and_persist().await?;
        let _ = self.events.send(Event::SettingsUpdated {
            token_symbol: settings.token_symbol,
        });
        Ok(())
    }

    /// Reset the wallet map, balance cache and decimals cache. Settings and
    /// any queued work are untouched.
    pub async fn clear_all(&self) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            state.wallets.clear();
            state.balances.clear();
            state.decimals.clear();
        }
        self.store.save_wallets(&UsernameToAddress::new()).await?;
        self.store.save_balances(&BalanceCache::new()).await?;
        self.store.save_decimals(&DecimalsCache::new()).await?;
        Ok(())
    }

    pub async fn wallet_for(&self, username: &str) -> Option<String> {
        self.state.lock().await.wallets.get(username).cloned()
    }

    pub async fn cached_entry(&self, contract: &str, username: &str) -> Option<BalanceEntry> {
        self.state
            .lock()
            .await
            .balances
            .get(contract)
            .and_then(|bucket| bucket.get(username))
            .cloned()
    }

    /// Run eviction over the balance cache; persist only if it changed.
    pub async fn evict_and_persist(&self) -> Result<()> {
        let changed = {
            let mut state = self.state.lock().await;
            if evict::evict_expired(&mut state.balances, now_ms()) {
                Some(state.balances.clone())
            } else {
                None
            }
        };
        if let Some(balances) = changed {
            self.store.save_balances(&balances).await?;
        }
        Ok(())
    }

    /* ---------------- queue entry points ---------------- */

    /// Queue a wallet resolution unless the username is already queued or
    /// in flight, then make sure a drain task is running.
    pub async fn enqueue_wallet(self: &Arc<Self>, username: &str) {
        if username.is_empty() {
            return;
        }
        {
            let mut state = self.state.lock().await;
            if state.in_flight_wallets.contains(username) {
                return;
            }
            if !state.wallet_queue.iter().any(|u| u == username) {
                state.wallet_queue.push_back(username.to_string());
            }
        }
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.drain_wallets().await });
    }

    /// Queue a balance fetch unless the `(contract, username)` pair is
    /// already queued or in flight, then make sure a drain task is running.
    pub async fn enqueue_balance(self: &Arc<Self>, username: &str, contract: &str) {
        if username.is_empty() || !codec::is_hex_address(contract) {
            return;
        }
        {
            let mut state = self.state.lock().await;
            if state
                .in_flight_balances
                .contains(&balance_key(contract, username))
            {
                return;
            }
            let queued = state
                .balance_queue
                .iter()
                .any(|t| t.username == username && t.contract == contract);
            if !queued {
                state.balance_queue.push_back(BalanceTask {
                    username: username.to_string(),
                    contract: contract.to_string(),
                });
            }
        }
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.drain_balances().await });
    }

    /* ---------------- wallet queue ---------------- */

    async fn drain_wallets(self: Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            if state.draining_wallets {
                return;
            }
            state.draining_wallets = true;
        }
        loop {
            let step = {
                let mut state = self.state.lock().await;
                match state.wallet_queue.pop_front() {
                    Some(username) => {
                        if state.wallets.contains_key(&username) {
                            // resolved elsewhere while queued
                            Step::Skip
                        } else {
                            state.in_flight_wallets.insert(username.clone());
                            Step::Item(username)
                        }
                    }
                    None => {
                        // flag cleared under the same lock as the final
                        // empty check, so a concurrent enqueue either sees
                        // the item picked up or a restartable drain
                        state.draining_wallets = false;
                        Step::Empty
                    }
                }
            };
            match step {
                Step::Empty => break,
                Step::Skip => continue,
                Step::Item(username) => self.resolve_wallet(&username).await,
            }
        }
    }

    async fn resolve_wallet(self: &Arc<Self>, username: &str) {
        let api_key = self.state.lock().await.settings.api_key.clone();
        match self.wallet_lookup.lookup(username, &api_key).await {
            Some(address) => {
                let (wallets, contract) = {
                    let mut state = self.state.lock().await;
                    state.wallets.insert(username.to_string(), address);
                    (
                        state.wallets.clone(),
                        state.settings.contract_address.to_lowercase(),
                    )
                };
                if let Err(e) = self.store.save_wallets(&wallets).await {
                    warn!("persisting wallet map failed: {e:#}");
                }
                info!("resolved wallet for {username}");
                // wallet known now; chain a balance fetch if a contract is set
                if codec::is_hex_address(&contract) {
                    self.enqueue_balance(username, &contract).await;
                }
            }
            None => {
                self.wallet_failures.fetch_add(1, Ordering::Relaxed);
                debug!("no wallet resolved for {username}");
            }
        }
        self.state.lock().await.in_flight_wallets.remove(username);
        sleep(WALLET_PACE).await;
    }

    /* ---------------- balance queue ---------------- */

    // Boxed return type breaks the `Send` auto-trait inference cycle in the
    // enqueue/drain/resolve recursion; behavior is unchanged.
    fn drain_balances(
        self: Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
        {
            let mut state = self.state.lock().await;
            if state.draining_balances {
                return;
            }
            state.draining_balances = true;
        }
        loop {
            let step = {
                let mut state = self.state.lock().await;
                match state.balance_queue.pop_front() {
                    Some(task) => {
                        let key = balance_key(&task.contract, &task.username);
                        if state.in_flight_balances.contains(&key) {
                            Step::Skip
                        } else {
                            state.in_flight_balances.insert(key);
                            Step::Item(task)
                        }
                    }
                    None => {
                        state.draining_balances = false;
                        Step::Empty
                    }
                }
            };
            match step {
                Step::Empty => break,
                Step::Skip => continue,
                Step::Item(task) => self.resolve_balance(task).await,
            }
        }
        })
    }

    async fn resolve_balance(self: &Arc<Self>, task: BalanceTask) {
        let key = balance_key(&task.contract, &task.username);
        let (address, rpc_url) = {
            let state = self.state.lock().await;
            (
                state.wallets.get(&task.username).cloned(),
                state.settings.rpc_url.clone(),
            )
        };

        let Some(address) = address else {
            // wallet unknown: resolve it first, abandon this attempt
            self.state.lock().await.in_flight_balances.remove(&key);
            self.enqueue_wallet(&task.username).await;
            return;
        };

        let data = codec::encode_balance_call(&address);
        let (decimals, raw) = join!(
            self.decimals_for(&task.contract, &rpc_url),
            self.chain.eth_call(&rpc_url, &task.contract, &data)
        );

        match raw.and_then(|r| codec::decode_big_integer(&r)) {
            Ok(value) => {
                let hex = format!("0x{:x}", value);
                let formatted = codec::format_fixed_point(&BigInt::from(value), decimals as i64);
                let ts = now_ms();
                let balances = {
                    let mut state = self.state.lock().await;
                    state
                        .balances
                        .entry(task.contract.clone())
                        .or_default()
                        .insert(
                            task.username.clone(),
                            BalanceEntry {
                                hex: hex.clone(),
                                ts,
                                formatted: formatted.clone(),
                            },
                        );
                    state.balances.clone()
                };
                if let Err(e) = self.store.save_balances(&balances).await {
                    warn!("persisting balance cache failed: {e:#}");
                }
                info!(
                    "balance for {} on {}: {formatted}",
                    task.username, task.contract
                );
                let _ = self.events.send(Event::BalanceUpdated {
                    username: task.username,
                    contract: task.contract,
                    hex,
                    formatted,
                });
                // pace before the key is released
                sleep(BALANCE_PACE).await;
            }
            Err(e) => {
                self.balance_failures.fetch_add(1, Ordering::Relaxed);
                debug!("balance lookup failed for {key}: {e:#}");
            }
        }
        self.state.lock().await.in_flight_balances.remove(&key);
    }

    /// Decimals for a contract: discovered once, cached forever, even when
    /// discovery fails and the default stands in.
    async fn decimals_for(&self, contract: &str, rpc_url: &str) -> u32 {
        if let Some(d) = self.state.lock().await.decimals.get(contract).copied() {
            return d;
        }
        let discovered = match self
            .chain
            .eth_call(rpc_url, contract, &codec::encode_decimals_call())
            .await
        {
            Ok(raw) => codec::decode_big_integer(&raw)
                .ok()
                .and_then(|v| u32::try_from(v).ok())
                .filter(|d| *d <= 36),
            Err(e) => {
                debug!("decimals lookup failed for {contract}: {e:#}");
                None
            }
        };
        let decimals = discovered.unwrap_or(DEFAULT_DECIMALS);
        let snapshot = {
            let mut state = self.state.lock().await;
            state.decimals.insert(contract.to_string(), decimals);
            state.decimals.clone()
        };
        if let Err(e) = self.store.save_decimals(&snapshot).await {
            warn!("persisting decimals cache failed: {e:#}");
        }
        decimals
    }
}
