//! JSON-RPC chain reads: `eth_call` against the latest block.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;

/// One read-only contract call. Errors are surfaced to the caller, which
/// decides whether to swallow them (the pipeline drops failed items).
#[async_trait]
pub trait ChainReader: Send + Sync + 'static {
    async fn eth_call(&self, rpc_url: &str, to: &str, data: &str) -> Result<String>;
}

pub struct JsonRpcChainReader;

#[async_trait]
impl ChainReader for JsonRpcChainReader {
    async fn eth_call(&self, rpc_url: &str, to: &str, data: &str) -> Result<String> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": Utc::now().timestamp_millis(),
            "method": "eth_call",
            "params": [{ "to": to, "data": data }, "latest"],
        });

        let response = super::HTTP
            .post(rpc_url)
            .header("content-type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("rpc status {}", response.status());
        }

        let body: serde_json::Value = response.json().await?;
        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("RPC error");
            bail!("rpc error: {message}");
        }

        body.get("result")
            .and_then(|r| r.as_str())
            .map(str::to_owned)
            .ok_or_else(|| anyhow!("rpc response missing result"))
    }
}
