use eyre::{eyre, Result, WrapErr};
use relay_core::chain::rpc::{parse_rpc_urls, validate_rpc_url};
use relay_core::redact::Redacted;
use relay_core::{ChainRegistry, ChainRole, ChainSpec, EngineConfig};
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the relayer
#[derive(Clone)]
pub struct Config {
    /// Path to the contract-info JSON document
    pub contract_info_path: PathBuf,
    pub source: ChainConfig,
    pub destination: ChainConfig,
    pub private_key: String,
    pub relay: RelayConfig,
    pub cursor_path: PathBuf,
    pub api_addr: SocketAddr,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("contract_info_path", &self.contract_info_path)
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("private_key", &Redacted(&self.private_key))
            .field("relay", &self.relay)
            .field("cursor_path", &self.cursor_path)
            .field("api_addr", &self.api_addr)
            .finish()
    }
}

/// Per-role chain selection and overrides of the registry defaults
#[derive(Debug, Clone, Default)]
pub struct ChainConfig {
    /// Registry name, e.g. `avax` or `bsc`
    pub chain: String,
    /// Replaces the registry's endpoints when non-empty; primary first
    pub rpc_urls: Vec<String>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

/// Polling and relay behaviour
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub poll_interval_ms: u64,
    /// Blocks below the head that are never scanned
    pub confirmation_depth: u64,
    pub receipt_timeout_secs: u64,
    /// Overall budget for one pass; 0 disables the deadline
    pub pass_deadline_secs: u64,
    pub scan_batch_threshold: u64,
    pub max_blocks_per_pass: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            confirmation_depth: default_confirmation_depth(),
            receipt_timeout_secs: default_receipt_timeout(),
            pass_deadline_secs: default_pass_deadline(),
            scan_batch_threshold: default_scan_batch_threshold(),
            max_blocks_per_pass: default_max_blocks_per_pass(),
        }
    }
}

/// Default functions
fn default_poll_interval() -> u64 {
    5000
}

fn default_confirmation_depth() -> u64 {
    3
}

fn default_receipt_timeout() -> u64 {
    120
}

fn default_pass_deadline() -> u64 {
    600
}

fn default_scan_batch_threshold() -> u64 {
    relay_core::chain::DEFAULT_LOG_BATCH_THRESHOLD
}

fn default_max_blocks_per_pass() -> u64 {
    500
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| eyre!("{} has an invalid value: {}", name, raw)),
        Err(_) => Ok(default),
    }
}

fn env_opt<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| eyre!("{} has an invalid value: {}", name, raw)),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    fn load_from_env() -> Result<Self> {
        let config = Config {
            contract_info_path: env::var("CONTRACT_INFO_PATH")
                .unwrap_or_else(|_| "contract_info.json".to_string())
                .into(),
            source: load_chain_config(ChainRole::Source, "avax")?,
            destination: load_chain_config(ChainRole::Destination, "bsc")?,
            private_key: env::var("RELAYER_PRIVATE_KEY")
                .map_err(|_| eyre!("RELAYER_PRIVATE_KEY environment variable is required"))?,
            relay: RelayConfig {
                poll_interval_ms: env_or("POLL_INTERVAL_MS", default_poll_interval())?,
                confirmation_depth: env_or("CONFIRMATION_DEPTH", default_confirmation_depth())?,
                receipt_timeout_secs: env_or("RECEIPT_TIMEOUT_SECS", default_receipt_timeout())?,
                pass_deadline_secs: env_or("PASS_DEADLINE_SECS", default_pass_deadline())?,
                scan_batch_threshold: env_or(
                    "SCAN_BATCH_THRESHOLD",
                    default_scan_batch_threshold(),
                )?,
                max_blocks_per_pass: env_or(
                    "MAX_BLOCKS_PER_PASS",
                    default_max_blocks_per_pass(),
                )?,
            },
            cursor_path: env::var("CURSOR_PATH")
                .unwrap_or_else(|_| "relayer_cursor.json".to_string())
                .into(),
            api_addr: env_or("API_ADDR", SocketAddr::from(([0, 0, 0, 0], 9090)))?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (role, chain) in [
            (ChainRole::Source, &self.source),
            (ChainRole::Destination, &self.destination),
        ] {
            if chain.chain.is_empty() {
                return Err(eyre!("{} chain name cannot be empty", role));
            }
            for (i, url) in chain.rpc_urls.iter().enumerate() {
                validate_rpc_url(url, &format!("{} rpc url #{}", role, i))?;
            }
            if chain.max_retries == Some(0) {
                return Err(eyre!("{} max retries must be at least 1", role));
            }
        }

        if self.source.chain == self.destination.chain {
            return Err(eyre!(
                "source and destination chains must differ (both are '{}')",
                self.source.chain
            ));
        }

        let key = self.private_key.trim();
        let hex_part = key.strip_prefix("0x").unwrap_or(key);
        if hex_part.len() != 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(eyre!(
                "RELAYER_PRIVATE_KEY must be 64 hex chars (optionally 0x-prefixed)"
            ));
        }

        if self.relay.poll_interval_ms == 0 {
            return Err(eyre!("POLL_INTERVAL_MS must be greater than 0"));
        }
        if self.relay.receipt_timeout_secs == 0 {
            return Err(eyre!("RECEIPT_TIMEOUT_SECS must be greater than 0"));
        }
        if self.relay.max_blocks_per_pass == 0 {
            return Err(eyre!("MAX_BLOCKS_PER_PASS must be greater than 0"));
        }

        Ok(())
    }

    pub fn chain(&self, role: ChainRole) -> &ChainConfig {
        match role {
            ChainRole::Source => &self.source,
            ChainRole::Destination => &self.destination,
        }
    }

    /// Registry spec for a role with this configuration's overrides applied
    pub fn chain_spec(&self, role: ChainRole, registry: &ChainRegistry) -> Result<ChainSpec> {
        let chain = self.chain(role);
        let mut spec = registry.get(&chain.chain)?;

        if !chain.rpc_urls.is_empty() {
            spec.rpc_urls = chain.rpc_urls.clone();
        }
        if let Some(max_retries) = chain.max_retries {
            spec.retry.max_attempts = max_retries;
        }
        if let Some(delay_ms) = chain.retry_delay_ms {
            spec.retry.initial_delay = Duration::from_millis(delay_ms);
            spec.retry.max_delay = spec.retry.max_delay.max(spec.retry.initial_delay);
        }
        spec.log_batch_threshold = self.relay.scan_batch_threshold;

        Ok(spec)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            receipt_timeout: Duration::from_secs(self.relay.receipt_timeout_secs),
            ..EngineConfig::default()
        }
    }

    pub fn pass_deadline(&self) -> Option<Duration> {
        match self.relay.pass_deadline_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Read `<ROLE>_CHAIN`, `<ROLE>_RPC_URL`, `<ROLE>_MAX_RETRIES`, `<ROLE>_RETRY_DELAY_MS`
fn load_chain_config(role: ChainRole, default_chain: &str) -> Result<ChainConfig> {
    let prefix = role.as_str().to_uppercase();
    Ok(ChainConfig {
        chain: env::var(format!("{}_CHAIN", prefix))
            .unwrap_or_else(|_| default_chain.to_string())
            .trim()
            .to_lowercase(),
        rpc_urls: env::var(format!("{}_RPC_URL", prefix))
            .map(|raw| parse_rpc_urls(&raw))
            .unwrap_or_default(),
        max_retries: env_opt(&format!("{}_MAX_RETRIES", prefix))?,
        retry_delay_ms: env_opt(&format!("{}_RETRY_DELAY_MS", prefix))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "0x0000000000000000000000000000000000000000000000000000000000000001";

    fn test_config() -> Config {
        Config {
            contract_info_path: "contract_info.json".into(),
            source: ChainConfig {
                chain: "avax".to_string(),
                ..ChainConfig::default()
            },
            destination: ChainConfig {
                chain: "bsc".to_string(),
                ..ChainConfig::default()
            },
            private_key: TEST_KEY.to_string(),
            relay: RelayConfig::default(),
            cursor_path: "relayer_cursor.json".into(),
            api_addr: SocketAddr::from(([127, 0, 0, 1], 9090)),
        }
    }

    #[test]
    fn test_defaults() {
        assert_eq!(default_poll_interval(), 5000);
        assert_eq!(default_confirmation_depth(), 3);
        assert_eq!(default_scan_batch_threshold(), 30);
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let debug = format!("{:?}", test_config());
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(TEST_KEY));
    }

    #[test]
    fn test_private_key_validation() {
        let mut config = test_config();
        config.private_key = "0x1234".to_string();
        assert!(config.validate().is_err());

        config.private_key = TEST_KEY.trim_start_matches("0x").to_string();
        assert!(config.validate().is_ok());

        config.private_key = format!("0x{}", "zz".repeat(32));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_same_chain_rejected() {
        let mut config = test_config();
        config.destination.chain = "avax".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_rpc_url_rejected() {
        let mut config = test_config();
        config.source.rpc_urls = vec!["ftp://example.org".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_chain_spec_overrides() {
        let mut config = test_config();
        config.destination.rpc_urls = vec![
            "https://bsc-testnet.example.org".to_string(),
            "https://bsc-testnet-2.example.org".to_string(),
        ];
        config.destination.max_retries = Some(12);
        config.destination.retry_delay_ms = Some(250);
        config.relay.scan_batch_threshold = 10;

        let registry = ChainRegistry::builtin();
        let spec = config
            .chain_spec(ChainRole::Destination, &registry)
            .unwrap();
        assert_eq!(spec.chain_id, 97);
        assert_eq!(spec.rpc_urls.len(), 2);
        assert_eq!(spec.retry.max_attempts, 12);
        assert_eq!(spec.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(spec.log_batch_threshold, 10);

        let source = config.chain_spec(ChainRole::Source, &registry).unwrap();
        assert_eq!(source.rpc_urls, registry.get("avax").unwrap().rpc_urls);
    }

    #[test]
    fn test_unknown_chain() {
        let mut config = test_config();
        config.source.chain = "fantom".to_string();
        assert!(config
            .chain_spec(ChainRole::Source, &ChainRegistry::builtin())
            .is_err());
    }

    #[test]
    fn test_pass_deadline() {
        let mut config = test_config();
        assert_eq!(config.pass_deadline(), Some(Duration::from_secs(600)));
        config.relay.pass_deadline_secs = 0;
        assert_eq!(config.pass_deadline(), None);
    }
}
