//! Request dispatch over the balance engine.
//!
//! Callers get a synchronous-looking answer: either the cached data or a
//! status telling them what was queued (or what configuration is missing)
//! so they can render a hint and wait for the broadcast.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::config::settings::{Settings, SettingsPatch};
use crate::pipeline::{evict, now_ms, BalanceEngine};

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    GetSettings,
    SetSettings { settings: SettingsPatch },
    ClearAll,
    #[serde(rename_all = "camelCase")]
    EnsureBalance {
        username: String,
        #[serde(default)]
        contract_address: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    /// Wallet unknown and no API key configured; nothing was queued.
    NeedsKey,
    QueuedWallet,
    /// Wallet known but no valid contract configured.
    NoContract,
    Cached,
    StaleQueuedBalance,
    QueuedBalance,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_hex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_formatted: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    fn ack() -> Self {
        Self {
            ok: true,
            ..Default::default()
        }
    }

    fn status(status: Status) -> Self {
        Self {
            ok: true,
            status: Some(status),
            ..Default::default()
        }
    }

    fn fail(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Handle one request. Internal faults come back as `{ok:false, error}`;
/// they never panic the caller's channel.
pub async fn handle(engine: &Arc<BalanceEngine>, request: Request) -> Response {
    match dispatch(engine, request).await {
        Ok(response) => response,
        Err(e) => Response::fail(format!("{e:#}")),
    }
}

async fn dispatch(engine: &Arc<BalanceEngine>, request: Request) -> Result<Response> {
    match request {
        Request::GetSettings => Ok(Response {
            ok: true,
            settings: Some(engine.settings().await),
            ..Default::default()
        }),
        Request::SetSettings { settings } => {
            engine.update_settings(settings).await?;
            Ok(Response::ack())
        }
        Request::ClearAll => {
            engine.clear_all().await?;
            Ok(Response::ack())
        }
        Request::EnsureBalance {
            username,
            contract_address,
        } => ensure_balance(engine, &username, contract_address.as_deref()).await,
    }
}

async fn ensure_balance(
    engine: &Arc<BalanceEngine>,
    raw_username: &str,
    contract_override: Option<&str>,
) -> Result<Response> {
    let username = raw_username.trim().to_lowercase();
    if username.is_empty() {
        return Ok(Response::fail("missing username"));
    }

    let settings = engine.settings().await;
    let contract = contract_override
        .filter(|c| !c.is_empty())
        .unwrap_or(&settings.contract_address)
        .to_lowercase();

    if engine.wallet_for(&username).await.is_none() {
        // early signal when resolution cannot possibly succeed
        if settings.api_key.is_empty() {
            return Ok(Response::status(Status::NeedsKey));
        }
        engine.enqueue_wallet(&username).await;
        return Ok(Response::status(Status::QueuedWallet));
    }

    if !codec::is_hex_address(&contract) {
        return Ok(Response::status(Status::NoContract));
    }

    engine.evict_and_persist().await?;

    match engine.cached_entry(&contract, &username).await {
        Some(entry) if evict::is_fresh(entry.ts, now_ms()) => Ok(Response {
            ok: true,
            status: Some(Status::Cached),
            balance_hex: Some(entry.hex),
            balance_formatted: Some(entry.formatted),
            ts: Some(entry.ts),
            ..Default::default()
        }),
        Some(_) => {
            engine.enqueue_balance(&username, &contract).await;
            Ok(Response::status(Status::StaleQueuedBalance))
        }
        None => {
            engine.enqueue_balance(&username, &contract).await;
            Ok(Response::status(Status::QueuedBalance))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreSnapshot;
    use crate::testutil::{engine_with, FakeChain, FakeWallets, CONTRACT, WALLET};
    use tokio::time::{sleep, Duration};

    fn ensure(username: &str) -> Request {
        Request::EnsureBalance {
            username: username.to_string(),
            contract_address: None,
        }
    }

    async fn wait_for<F, Fut>(mut cond: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if cond().await {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_missing_username_is_an_error() {
        let (engine, _store) = engine_with(
            StoreSnapshot::default(),
            Arc::new(FakeWallets::empty()),
            Arc::new(FakeChain::down()),
        )
        .await;

        let response = handle(&engine, ensure("   ")).await;
        assert!(!response.ok);
        assert_eq!(response.error.as_deref(), Some("missing username"));
    }

    #[tokio::test]
    async fn test_needs_key_without_api_key() {
        let wallets = Arc::new(FakeWallets::known("alice", WALLET));
        let (engine, _store) = engine_with(
            StoreSnapshot::default(),
            wallets.clone(),
            Arc::new(FakeChain::down()),
        )
        .await;

        let response = handle(&engine, ensure("alice")).await;
        assert!(response.ok);
        assert_eq!(response.status, Some(Status::NeedsKey));
        // nothing was queued: no lookup attempt should ever happen
        sleep(Duration::from_millis(100)).await;
        assert_eq!(wallets.calls(), 0);
    }

    #[tokio::test]
    async fn test_queued_wallet_then_no_contract() {
        let mut snapshot = StoreSnapshot::default();
        snapshot.settings.api_key = "key".into();

        let (engine, _store) = engine_with(
            snapshot,
            Arc::new(FakeWallets::known("alice", WALLET)),
            Arc::new(FakeChain::down()),
        )
        .await;

        let response = handle(&engine, ensure("Alice ")).await;
        assert_eq!(response.status, Some(Status::QueuedWallet));

        wait_for(|| async { engine.wallet_for("alice").await.is_some() }).await;

        // wallet known now, but no contract configured anywhere
        let response = handle(&engine, ensure("alice")).await;
        assert_eq!(response.status, Some(Status::NoContract));
    }

    #[tokio::test]
    async fn test_queued_balance_then_cached() {
        let mut snapshot = StoreSnapshot::default();
        snapshot.settings.api_key = "key".into();
        snapshot.settings.contract_address = CONTRACT.into();
        snapshot.wallets.insert("alice".into(), WALLET.into());

        let (engine, _store) = engine_with(
            snapshot,
            Arc::new(FakeWallets::empty()),
            Arc::new(FakeChain::healthy(6, "0x12d687")),
        )
        .await;

        let response = handle(&engine, ensure("alice")).await;
        assert_eq!(response.status, Some(Status::QueuedBalance));

        wait_for(|| async { engine.cached_entry(CONTRACT, "alice").await.is_some() }).await;

        let response = handle(&engine, ensure("alice")).await;
        assert_eq!(response.status, Some(Status::Cached));
        assert_eq!(response.balance_hex.as_deref(), Some("0x12d687"));
        assert_eq!(response.balance_formatted.as_deref(), Some("1.234567"));
        assert!(response.ts.is_some());
    }

    #[tokio::test]
    async fn test_contract_override_beats_settings() {
        let mut snapshot = StoreSnapshot::default();
        snapshot.settings.api_key = "key".into();
        snapshot.wallets.insert("alice".into(), WALLET.into());

        let (engine, _store) = engine_with(
            snapshot,
            Arc::new(FakeWallets::empty()),
            Arc::new(FakeChain::healthy(0, "0x2a")),
        )
        .await;

        // settings have no contract; the per-request override supplies one
        let response = handle(
            &engine,
            Request::EnsureBalance {
                username: "alice".into(),
                contract_address: Some(CONTRACT.to_uppercase().replace("0X", "0x")),
            },
        )
        .await;
        assert_eq!(response.status, Some(Status::QueuedBalance));

        wait_for(|| async { engine.cached_entry(CONTRACT, "alice").await.is_some() }).await;
        let entry = engine.cached_entry(CONTRACT, "alice").await.unwrap();
        assert_eq!(entry.formatted, "42");
    }

    #[tokio::test]
    async fn test_repeated_ensure_calls_resolve_once() {
        let mut snapshot = StoreSnapshot::default();
        snapshot.settings.api_key = "key".into();
        let wallets = Arc::new(FakeWallets::known("alice", WALLET).with_delay(50));

        let (engine, _store) = engine_with(
            snapshot,
            wallets.clone(),
            Arc::new(FakeChain::down()),
        )
        .await;

        for _ in 0..5 {
            let response = handle(&engine, ensure("alice")).await;
            assert_eq!(response.status, Some(Status::QueuedWallet));
        }
        wait_for(|| async { engine.wallet_for("alice").await.is_some() }).await;
        assert_eq!(wallets.calls(), 1);
    }

    #[tokio::test]
    async fn test_get_and_set_settings_round_trip() {
        let (engine, store) = engine_with(
            StoreSnapshot::default(),
            Arc::new(FakeWallets::empty()),
            Arc::new(FakeChain::down()),
        )
        .await;

        let response = handle(
            &engine,
            Request::SetSettings {
                settings: SettingsPatch {
                    api_key: Some("key".into()),
                    token_symbol: Some("BETR".into()),
                    ..Default::default()
                },
            },
        )
        .await;
        assert!(response.ok);

        let response = handle(&engine, Request::GetSettings).await;
        let settings = response.settings.unwrap();
        assert_eq!(settings.api_key, "key");
        assert_eq!(settings.token_symbol, "BETR");
        assert_eq!(store.snapshot().settings.token_symbol, "BETR");
    }

    #[tokio::test]
    async fn test_clear_all_acknowledges() {
        let mut snapshot = StoreSnapshot::default();
        snapshot.wallets.insert("alice".into(), WALLET.into());

        let (engine, _store) = engine_with(
            snapshot,
            Arc::new(FakeWallets::empty()),
            Arc::new(FakeChain::down()),
        )
        .await;

        let response = handle(&engine, Request::ClearAll).await;
        assert!(response.ok);
        assert!(engine.wallet_for("alice").await.is_none());
    }

    #[tokio::test]
    async fn test_request_deserialization_shape() {
        let request: Request = serde_json::from_str(
            r#"{"type":"ensureBalance","username":"Alice","contractAddress":"0xabc"}"#,
        )
        .unwrap();
        match request {
            Request::EnsureBalance {
                username,
                contract_address,
            } => {
                assert_eq!(username, "Alice");
                assert_eq!(contract_address.as_deref(), Some("0xabc"));
            }
            other => panic!("unexpected request: {other:?}"),
        }

        let response = Response::status(Status::StaleQueuedBalance);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["status"], "stale-queued-balance");
        assert!(json.get("error").is_none());
    }
}
