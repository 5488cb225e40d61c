//! Runtime configuration and shallow-merge updates.

use serde::{Deserialize, Serialize};

/// Base mainnet public RPC; overridable through `setSettings`.
pub const DEFAULT_RPC_URL: &str = "https://mainnet.base.org";

/// ------------------------------------------------------------------
/// Process-wide settings, persisted as one record.
/// ------------------------------------------------------------------
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub rpc_url: String,
    /// ERC-20 contract to read balances from, e.g. BETR
    /// `0x051024B653E8ec69E72693F776c41C2A9401FB07`.
    pub contract_address: String,
    /// Neynar API key (https://dev.neynar.com/home).
    pub api_key: String,
    /// Display symbol, e.g. "BETR".
    pub token_symbol: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            contract_address: String::new(),
            api_key: String::new(),
            token_symbol: String::new(),
        }
    }
}

/// ------------------------------------------------------------------
/// Partial update: only the fields present replace their counterparts.
/// ------------------------------------------------------------------
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SettingsPatch {
    pub rpc_url: Option<String>,
    pub contract_address: Option<String>,
    pub api_key: Option<String>,
    pub token_symbol: Option<String>,
}

impl SettingsPatch {
    /// Shallow merge into `settings`.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(v) = &self.rpc_url {
            settings.rpc_url = v.clone();
        }
        if let Some(v) = &self.contract_address {
            settings.contract_address = v.clone();
        }
        if let Some(v) = &self.api_key {
            settings.api_key = v.clone();
        }
        if let Some(v) = &self.token_symbol {
            settings.token_symbol = v.clone();
        }
    }
}
