//! Configuration for the gasless transaction submitter.
//!
//! Configuration is a JSON file. Any string value may be a literal or a
//! reference to an environment variable (`"$PRIVATE_KEY"`, `"${PAYMASTER_URL}"`),
//! resolved during deserialization by [`LiteralOrEnv`]:
//!
//! ```json
//! {
//!   "paymaster": { "url": "$PAYMASTER_URL", "cache_ttl_secs": 60 },
//!   "features": { "gaslessTransactions": ["eip155:300"] },
//!   "user_settings": { "eip155:300": { "gaslessTransactions": true } },
//!   "chains": {
//!     "eip155:300": {
//!       "rpc": [{ "http": "https://sepolia.era.zksync.dev", "rate_limit": 20 }],
//!       "signer": "$PRIVATE_KEY",
//!       "confirmations": 1
//!     }
//!   }
//! }
//! ```

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::chain::ChainId;
use crate::settings::{ChainSettings, FeatureFlags};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    chains: ChainsConfig,
    #[serde(default)]
    paymaster: Option<PaymasterConfig>,
    #[serde(default)]
    features: FeatureFlags,
    #[serde(default)]
    user_settings: HashMap<ChainId, ChainSettings>,
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl Config {
    /// Chain configurations, one per configured chain.
    pub fn chains(&self) -> &ChainsConfig {
        &self.chains
    }

    /// Paymaster settings, if sponsored submission is configured at all.
    pub fn paymaster(&self) -> Option<&PaymasterConfig> {
        self.paymaster.as_ref()
    }

    pub fn features(&self) -> &FeatureFlags {
        &self.features
    }

    /// Initial user settings per chain.
    pub fn user_settings(&self) -> &HashMap<ChainId, ChainSettings> {
        &self.user_settings
    }

    /// Loads configuration from a JSON file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let path = path
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(content)?;
        Ok(config)
    }
}

/// Paymaster service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymasterConfig {
    /// Base URL of the paymaster service.
    pub url: LiteralOrEnv<Url>,
    /// How long a capability answer stays cached, in seconds. `0` keeps it until refetched.
    #[serde(default = "paymaster_config::default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Per-request timeout in milliseconds (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl PaymasterConfig {
    pub fn url(&self) -> &Url {
        self.url.inner()
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        match self.cache_ttl_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

mod paymaster_config {
    pub fn default_cache_ttl_secs() -> u64 {
        60
    }
}

/// Configuration for all chains, deserialized from a map keyed by CAIP-2 id.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "HashMap<ChainId, Eip155ChainConfigInner>")]
pub struct ChainsConfig(pub Vec<Eip155ChainConfig>);

impl Deref for ChainsConfig {
    type Target = Vec<Eip155ChainConfig>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<HashMap<ChainId, Eip155ChainConfigInner>> for ChainsConfig {
    fn from(value: HashMap<ChainId, Eip155ChainConfigInner>) -> Self {
        let mut chains = value
            .into_iter()
            .map(|(chain_id, inner)| Eip155ChainConfig { chain_id, inner })
            .collect::<Vec<_>>();
        chains.sort_by_key(|c| c.chain_id);
        ChainsConfig(chains)
    }
}

#[derive(Debug, Clone)]
pub struct Eip155ChainConfig {
    pub chain_id: ChainId,
    pub inner: Eip155ChainConfigInner,
}

impl Eip155ChainConfig {
    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }
    pub fn eip1559(&self) -> bool {
        self.inner.eip1559
    }
    pub fn confirmations(&self) -> u64 {
        self.inner.confirmations
    }
    pub fn signer(&self) -> &EvmPrivateKey {
        self.inner.signer.inner()
    }
    pub fn rpc(&self) -> &Vec<RpcConfig> {
        &self.inner.rpc
    }
}

/// Configuration specific to EVM-compatible chains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Eip155ChainConfigInner {
    /// Whether the chain supports EIP-1559 gas pricing.
    #[serde(default = "eip155_chain_config::default_eip1559")]
    pub eip1559: bool,
    /// Private key of the submitting account (hex) or env var reference.
    pub signer: LiteralOrEnv<EvmPrivateKey>,
    /// RPC provider configuration for this chain (required).
    pub rpc: Vec<RpcConfig>,
    /// Block confirmations before a transaction counts as terminal.
    #[serde(default = "eip155_chain_config::default_confirmations")]
    pub confirmations: u64,
}

mod eip155_chain_config {
    pub fn default_eip1559() -> bool {
        true
    }
    pub fn default_confirmations() -> u64 {
        1
    }
}

/// RPC provider configuration for a single provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcConfig {
    /// HTTP URL for the RPC endpoint.
    pub http: Url,
    /// Rate limit for requests per second (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
}

/// A validated EVM private key (32 bytes).
#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvmPrivateKey(B256);

impl EvmPrivateKey {
    pub fn as_b256(&self) -> &B256 {
        &self.0
    }
}

impl std::fmt::Debug for EvmPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EvmPrivateKey(..)")
    }
}

impl FromStr for EvmPrivateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        B256::from_str(s)
            .map(Self)
            .map_err(|e| format!("Invalid evm private key: {}", e))
    }
}

/// A config value given either literally or as `$VAR` / `${VAR}`, in which
/// case the variable is read from the process environment while parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn inner(&self) -> &T {
        &self.0
    }
}

/// Name of the variable referenced by `raw`, if it is a reference at all.
fn env_reference(raw: &str) -> Option<&str> {
    if let Some(name) = raw.strip_prefix("${").and_then(|r| r.strip_suffix('}')) {
        return Some(name);
    }
    raw.strip_prefix('$')
        .filter(|name| !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_'))
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        let raw = String::deserialize(deserializer)?;
        let resolved = match env_reference(&raw) {
            Some(name) => std::env::var(name)
                .map_err(|_| D::Error::custom(format!("{raw}: environment variable {name} is not set")))?,
            None => raw,
        };
        resolved
            .parse::<T>()
            .map(LiteralOrEnv)
            .map_err(|e| D::Error::custom(format!("invalid value: {e}")))
    }
}

impl<T: Serialize> Serialize for LiteralOrEnv<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0xcafe000000000000000000000000000000000000000000000000000000000001";

    #[test]
    fn test_parse_full_config() {
        let json = format!(
            r#"{{
                "paymaster": {{ "url": "https://paymaster.example/", "timeout_ms": 5000 }},
                "features": {{ "gaslessTransactions": ["eip155:300", "eip155:324"] }},
                "user_settings": {{ "eip155:300": {{ "gaslessTransactions": false }} }},
                "chains": {{
                    "eip155:324": {{ "signer": "{KEY}", "rpc": [{{ "http": "https://mainnet.era.zksync.io" }}] }},
                    "eip155:300": {{ "signer": "{KEY}", "rpc": [{{ "http": "https://sepolia.era.zksync.dev", "rate_limit": 10 }}], "confirmations": 3, "eip1559": false }}
                }}
            }}"#
        );
        let config = Config::from_json(&json).unwrap();

        let paymaster = config.paymaster().unwrap();
        assert_eq!(paymaster.url().as_str(), "https://paymaster.example/");
        assert_eq!(paymaster.cache_ttl(), Some(Duration::from_secs(60)));
        assert_eq!(paymaster.timeout(), Some(Duration::from_millis(5000)));

        assert!(config.features().gasless_transactions(ChainId::new(324)));
        assert!(!config.user_settings()[&ChainId::new(300)].gasless_transactions);

        let chains = config.chains();
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[0].chain_id(), ChainId::new(300));
        assert_eq!(chains[0].confirmations(), 3);
        assert!(!chains[0].eip1559());
        assert_eq!(chains[0].rpc()[0].rate_limit, Some(10));
        assert_eq!(chains[1].confirmations(), 1);
        assert!(chains[1].eip1559());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert!(config.chains().is_empty());
        assert!(config.paymaster().is_none());
        assert!(!config.features().gasless_transactions(ChainId::new(324)));
    }

    #[test]
    fn test_zero_cache_ttl_disables_expiry() {
        let paymaster: PaymasterConfig =
            serde_json::from_str(r#"{"url": "https://paymaster.example", "cache_ttl_secs": 0}"#)
                .unwrap();
        assert_eq!(paymaster.cache_ttl(), None);
    }

    #[test]
    fn test_rejects_non_evm_chain_key() {
        let json = format!(
            r#"{{"chains": {{"solana:devnet": {{"signer": "{KEY}", "rpc": []}}}}}}"#
        );
        assert!(Config::from_json(&json).is_err());
    }

    #[test]
    fn test_literal_or_env_resolves_env_var() {
        // SAFETY: test-local variable name, not read concurrently elsewhere.
        unsafe { std::env::set_var("GASLESS_TX_TEST_PAYMASTER_URL", "https://env.example/") };
        let value: LiteralOrEnv<Url> =
            serde_json::from_str(r#""${GASLESS_TX_TEST_PAYMASTER_URL}""#).unwrap();
        assert_eq!(value.as_str(), "https://env.example/");
        let value: LiteralOrEnv<Url> =
            serde_json::from_str(r#""$GASLESS_TX_TEST_PAYMASTER_URL""#).unwrap();
        assert_eq!(value.as_str(), "https://env.example/");
    }

    #[test]
    fn test_env_reference_syntax() {
        assert_eq!(env_reference("$PRIVATE_KEY"), Some("PRIVATE_KEY"));
        assert_eq!(env_reference("${PAYMASTER_URL}"), Some("PAYMASTER_URL"));
        assert_eq!(env_reference("$"), None);
        assert_eq!(env_reference("$not-a-var"), None);
        assert_eq!(env_reference("https://paymaster.example"), None);
    }

    #[test]
    fn test_literal_or_env_missing_env_var() {
        let result: Result<LiteralOrEnv<Url>, _> =
            serde_json::from_str(r#""$GASLESS_TX_TEST_DOES_NOT_EXIST""#);
        assert!(result.is_err());
    }

    #[test]
    fn test_private_key_is_not_printed() {
        let key: EvmPrivateKey = KEY.parse().unwrap();
        assert_eq!(format!("{key:?}"), "EvmPrivateKey(..)");
    }
}
