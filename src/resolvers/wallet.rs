//! Neynar wallet lookup - username to verified primary Ethereum address.

use anyhow::{bail, Result};
use async_trait::async_trait;
use log::debug;
use url::Url;

use crate::codec;

const NEYNAR_USER_BY_USERNAME: &str = "https://api.neynar.com/v2/farcaster/user/by_username";

/// Resolve a username to its verified primary address.
///
/// Every failure mode (network, non-2xx, malformed body, no verified
/// address) collapses to `None`; retry policy belongs to the queues, not
/// to this client.
#[async_trait]
pub trait WalletLookup: Send + Sync + 'static {
    async fn lookup(&self, username: &str, api_key: &str) -> Option<String>;
}

pub struct NeynarWalletLookup {
    base_url: String,
}

impl NeynarWalletLookup {
    pub fn new() -> Self {
        Self {
            base_url: NEYNAR_USER_BY_USERNAME.to_string(),
        }
    }

    /// Point at a different endpoint, e.g. a local stub.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    async fn fetch(&self, username: &str, api_key: &str) -> Result<Option<String>> {
        let url = Url::parse_with_params(&self.base_url, &[("username", username)])?;
        let response = super::HTTP
            .get(url)
            .header("accept", "application/json")
            .header("api_key", api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("neynar status {}", response.status());
        }

        let body: serde_json::Value = response.json().await?;
        let primary = body
            .get("user")
            .and_then(|u| u.get("verified_addresses"))
            .and_then(|v| v.get("primary"))
            .and_then(|p| p.get("eth_address"))
            .and_then(|a| a.as_str())
            .unwrap_or("");

        Ok(if codec::is_hex_address(primary) {
            Some(primary.to_lowercase())
        } else {
            None
        })
    }
}

impl Default for NeynarWalletLookup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WalletLookup for NeynarWalletLookup {
    async fn lookup(&self, username: &str, api_key: &str) -> Option<String> {
        if api_key.is_empty() {
            return None;
        }
        match self.fetch(username, api_key).await {
            Ok(address) => address,
            Err(e) => {
                debug!("wallet lookup failed for {username}: {e:#}");
                None
            }
        }
    }
}
