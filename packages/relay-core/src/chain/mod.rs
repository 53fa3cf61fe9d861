//! Chain specifications and the connector abstraction
//!
//! A [`ChainSpec`] names a chain, its endpoints, the consensus adapter its
//! headers need, and the retry policy for calls against it. Specs are looked up
//! by name in a [`ChainRegistry`]; an unknown name is a configuration error.

pub mod adapter;
pub mod rpc;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use tracing::debug;

use crate::error::{RelayError, Result};
use crate::retry::{classify, BackoffStrategy, RetryPolicy};
use crate::types::{BlockHeader, LogQuery, RawLog, Receipt, TxSummary};

pub use adapter::ConsensusAdapter;
pub use rpc::RpcConnector;

/// Ranges wider than this are scanned one block at a time
pub const DEFAULT_LOG_BATCH_THRESHOLD: u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct ChainSpec {
    pub name: String,
    pub chain_id: u64,
    /// Primary endpoint first, fallbacks after it
    pub rpc_urls: Vec<String>,
    pub consensus: ConsensusAdapter,
    pub retry: RetryPolicy,
    pub log_batch_threshold: u64,
}

impl ChainSpec {
    pub fn with_rpc_urls(mut self, urls: Vec<String>) -> Self {
        self.rpc_urls = urls;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_log_batch_threshold(mut self, threshold: u64) -> Self {
        self.log_batch_threshold = threshold;
        self
    }
}

/// Known chains by name
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: HashMap<String, ChainSpec>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the Avalanche Fuji and BSC testnet C-chains
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        registry.insert(ChainSpec {
            name: "avax".to_string(),
            chain_id: 43113,
            rpc_urls: vec!["https://api.avax-test.network/ext/bc/C/rpc".to_string()],
            consensus: ConsensusAdapter::ProofOfAuthority,
            retry: RetryPolicy {
                max_attempts: 5,
                initial_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(8),
                backoff: BackoffStrategy::Exponential { multiplier: 2.0 },
                attempt_timeout: Duration::from_secs(15),
            },
            log_batch_threshold: DEFAULT_LOG_BATCH_THRESHOLD,
        });

        // Public BSC testnet endpoints rate-limit aggressively
        registry.insert(ChainSpec {
            name: "bsc".to_string(),
            chain_id: 97,
            rpc_urls: vec!["https://data-seed-prebsc-1-s1.binance.org:8545/".to_string()],
            consensus: ConsensusAdapter::ProofOfAuthority,
            retry: RetryPolicy {
                max_attempts: 8,
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
                backoff: BackoffStrategy::Exponential { multiplier: 2.0 },
                attempt_timeout: Duration::from_secs(20),
            },
            log_batch_threshold: DEFAULT_LOG_BATCH_THRESHOLD,
        });

        registry
    }

    pub fn insert(&mut self, spec: ChainSpec) {
        self.chains.insert(spec.name.clone(), spec);
    }

    pub fn get(&self, name: &str) -> Result<ChainSpec> {
        self.chains.get(name).cloned().ok_or_else(|| {
            let mut known: Vec<&str> = self.chains.keys().map(String::as_str).collect();
            known.sort_unstable();
            RelayError::configuration(format!(
                "unknown chain '{}' (known: {})",
                name,
                known.join(", ")
            ))
        })
    }
}

/// Connection to one chain. Each method is a single attempt; callers wrap
/// them with [`crate::retry::with_retry`] using the chain's policy.
#[async_trait]
pub trait ChainConnector: Send + Sync {
    fn spec(&self) -> &ChainSpec;

    async fn current_height(&self) -> Result<u64>;

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<RawLog>>;

    /// Header decoded through the chain's consensus adapter
    async fn get_block(&self, number: u64) -> Result<Option<BlockHeader>>;

    async fn get_transaction(&self, hash: B256) -> Result<Option<TxSummary>>;

    async fn get_receipt(&self, hash: B256) -> Result<Option<Receipt>>;

    async fn gas_price(&self) -> Result<u128>;

    /// Pending transaction count for `address`
    async fn transaction_count(&self, address: Address) -> Result<u64>;

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256>;
}

/// Poll for a receipt until `timeout` elapses.
///
/// Returns `Ok(None)` on timeout. Transient poll failures are logged and the
/// polling continues; a non-retryable failure is returned immediately.
pub async fn wait_for_receipt(
    connector: &dyn ChainConnector,
    tx_hash: B256,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Option<Receipt>> {
    let start = Instant::now();
    let per_poll = connector.spec().retry.attempt_timeout;
    let mut polls = 0u32;

    loop {
        polls += 1;
        match tokio::time::timeout(per_poll, connector.get_receipt(tx_hash)).await {
            Ok(Ok(Some(receipt))) => return Ok(Some(receipt)),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                if !classify(&e).is_retryable() {
                    return Err(e);
                }
                debug!(tx_hash = %tx_hash, polls, error = %e, "Receipt poll failed");
            }
            Err(_) => {
                debug!(tx_hash = %tx_hash, polls, "Receipt poll timed out");
            }
        }

        if start.elapsed() >= timeout {
            return Ok(None);
        }
        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_chains() {
        let registry = ChainRegistry::builtin();

        let avax = registry.get("avax").unwrap();
        assert_eq!(avax.chain_id, 43113);
        assert_eq!(avax.consensus, ConsensusAdapter::ProofOfAuthority);

        let bsc = registry.get("bsc").unwrap();
        assert_eq!(bsc.chain_id, 97);
        assert!(bsc.retry.max_attempts > avax.retry.max_attempts);
        assert!(bsc.retry.initial_delay > avax.retry.initial_delay);
    }

    #[test]
    fn test_unknown_chain_is_configuration_error() {
        let err = ChainRegistry::builtin().get("solana").unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("avax, bsc"));
    }

    #[test]
    fn test_spec_overrides() {
        let spec = ChainRegistry::builtin()
            .get("avax")
            .unwrap()
            .with_rpc_urls(vec!["http://localhost:9650/ext/bc/C/rpc".into()])
            .with_log_batch_threshold(5);
        assert_eq!(spec.rpc_urls.len(), 1);
        assert_eq!(spec.log_batch_threshold, 5);
    }
}
