//! JSON-RPC chain connector with fallback endpoints
//!
//! Calls go to the primary endpoint first. A transport failure moves on to the
//! next configured endpoint; a JSON-RPC error answered by a node is returned as
//! is, since another node would give the same answer.

use std::future::Future;

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::Filter;
use alloy::transports::http::{Client, Http};
use alloy::transports::TransportResult;
use async_trait::async_trait;
use tracing::{info, warn};

use super::adapter::RpcBlockHeader;
use super::{ChainConnector, ChainSpec};
use crate::error::{RelayError, Result};
use crate::retry::with_retry;
use crate::types::{BlockHeader, LogQuery, RawLog, Receipt, TxSummary};

type HttpProvider = RootProvider<Http<Client>>;

/// Parse a comma-separated RPC URL string into individual trimmed URLs.
pub fn parse_rpc_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Validate that an RPC URL is http(s) with a host component
pub fn validate_rpc_url(url_str: &str, name: &str) -> Result<url::Url> {
    let parsed = url::Url::parse(url_str).map_err(|e| {
        RelayError::configuration(format!("{} must be a valid URL: {}", name, e))
    })?;

    let scheme = parsed.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(RelayError::configuration(format!(
            "{} must use http:// or https:// scheme, got {}",
            name, scheme
        )));
    }

    if parsed.host_str().is_none() {
        return Err(RelayError::configuration(format!(
            "{} must have a host component",
            name
        )));
    }

    if scheme == "http" {
        warn!("{} uses unencrypted http://", name);
    }

    Ok(parsed)
}

pub struct RpcConnector {
    spec: ChainSpec,
    providers: Vec<HttpProvider>,
}

impl RpcConnector {
    /// Build providers for every configured endpoint without touching the network
    pub fn new(spec: ChainSpec) -> Result<Self> {
        if spec.rpc_urls.is_empty() {
            return Err(RelayError::configuration(format!(
                "chain '{}' has no RPC URL configured",
                spec.name
            )));
        }

        let providers = spec
            .rpc_urls
            .iter()
            .enumerate()
            .map(|(i, url)| {
                let parsed = validate_rpc_url(url, &format!("{} rpc url #{}", spec.name, i))?;
                Ok(ProviderBuilder::new().on_http(parsed))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { spec, providers })
    }

    /// Connect and verify the endpoint serves the expected chain.
    ///
    /// The latest header is decoded through the chain's consensus adapter, so a
    /// chain configured with the wrong adapter fails here with a configuration
    /// error instead of on the first scan.
    pub async fn connect(spec: ChainSpec) -> Result<Self> {
        let connector = Self::new(spec)?;
        let spec = &connector.spec;

        let chain_id = with_retry(&spec.retry, "eth_chainId", || connector.chain_id())
            .await
            .map_err(|e| match e {
                RelayError::TransientFailure { .. } | RelayError::Rpc { .. } => {
                    RelayError::Connection {
                        chain: spec.name.clone(),
                        message: e.to_string(),
                    }
                }
                other => other,
            })?;

        if chain_id != spec.chain_id {
            return Err(RelayError::configuration(format!(
                "endpoint for '{}' reports chain id {}, expected {}",
                spec.name, chain_id, spec.chain_id
            )));
        }

        let latest = with_retry(&spec.retry, "eth_getBlockByNumber", || {
            connector.fetch_header(BlockNumberOrTag::Latest)
        })
        .await?
        .ok_or_else(|| RelayError::Connection {
            chain: spec.name.clone(),
            message: "node returned no latest block".to_string(),
        })?;

        info!(
            chain = %spec.name,
            chain_id,
            height = latest.number,
            adapter = spec.consensus.as_str(),
            endpoints = connector.providers.len(),
            "Connected to chain"
        );

        Ok(connector)
    }

    async fn chain_id(&self) -> Result<u64> {
        self.call("eth_chainId", |p| async move { p.get_chain_id().await })
            .await
    }

    async fn fetch_header(&self, tag: BlockNumberOrTag) -> Result<Option<BlockHeader>> {
        let raw: Option<RpcBlockHeader> = self
            .call("eth_getBlockByNumber", |p| async move {
                p.raw_request("eth_getBlockByNumber".into(), (tag, false))
                    .await
            })
            .await?;

        raw.map(|header| self.spec.consensus.decode_header(&header))
            .transpose()
    }

    /// Run one call against each endpoint in order until one answers
    async fn call<T, F, Fut>(&self, method: &str, f: F) -> Result<T>
    where
        F: Fn(HttpProvider) -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let mut last_err = None;

        for (index, provider) in self.providers.iter().enumerate() {
            match f(provider.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let err = RelayError::from(e);
                    if err.is_rejection() {
                        return Err(err);
                    }
                    if index + 1 < self.providers.len() {
                        warn!(
                            chain = %self.spec.name,
                            method,
                            endpoint = index,
                            error = %err,
                            "RPC call failed, trying fallback endpoint"
                        );
                    }
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            RelayError::transport(format!("{}: no RPC endpoints configured", method))
        }))
    }
}

#[async_trait]
impl ChainConnector for RpcConnector {
    fn spec(&self) -> &ChainSpec {
        &self.spec
    }

    async fn current_height(&self) -> Result<u64> {
        self.call("eth_blockNumber", |p| async move { p.get_block_number().await })
            .await
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<RawLog>> {
        let filter = Filter::new()
            .address(query.address)
            .event_signature(query.event_signature)
            .from_block(query.from_block)
            .to_block(query.to_block);

        let logs = self
            .call("eth_getLogs", |p| {
                let filter = filter.clone();
                async move { p.get_logs(&filter).await }
            })
            .await?;

        Ok(logs.iter().filter_map(RawLog::from_rpc).collect())
    }

    async fn get_block(&self, number: u64) -> Result<Option<BlockHeader>> {
        self.fetch_header(BlockNumberOrTag::Number(number)).await
    }

    async fn get_transaction(&self, hash: B256) -> Result<Option<TxSummary>> {
        let tx = self
            .call("eth_getTransactionByHash", |p| async move {
                p.get_transaction_by_hash(hash).await
            })
            .await?;

        Ok(tx.map(|tx| TxSummary {
            hash,
            from: tx.from,
            block_number: tx.block_number,
        }))
    }

    async fn get_receipt(&self, hash: B256) -> Result<Option<Receipt>> {
        let receipt = self
            .call("eth_getTransactionReceipt", |p| async move {
                p.get_transaction_receipt(hash).await
            })
            .await?;

        Ok(receipt.map(|r| Receipt {
            tx_hash: r.transaction_hash,
            block_number: r.block_number,
            success: r.status(),
        }))
    }

    async fn gas_price(&self) -> Result<u128> {
        self.call("eth_gasPrice", |p| async move { p.get_gas_price().await })
            .await
    }

    async fn transaction_count(&self, address: Address) -> Result<u64> {
        self.call("eth_getTransactionCount", |p| async move {
            p.get_transaction_count(address).pending().await
        })
        .await
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256> {
        let raw = raw.to_vec();
        self.call("eth_sendRawTransaction", |p| {
            let raw = raw.clone();
            async move {
                p.send_raw_transaction(&raw)
                    .await
                    .map(|pending| *pending.tx_hash())
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainRegistry;

    #[test]
    fn test_parse_multiple_urls() {
        let urls = parse_rpc_urls(
            "https://api.avax-test.network/ext/bc/C/rpc, https://avalanche-fuji.example.org/rpc",
        );
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[1], "https://avalanche-fuji.example.org/rpc");
    }

    #[test]
    fn test_parse_ignores_empty() {
        let urls = parse_rpc_urls("https://a.com,,https://b.com,");
        assert_eq!(urls, vec!["https://a.com", "https://b.com"]);
        assert!(parse_rpc_urls("").is_empty());
    }

    #[test]
    fn test_validate_rpc_url() {
        assert!(validate_rpc_url("https://bsc.example.org", "BSC").is_ok());
        assert!(validate_rpc_url("http://localhost:8545", "local").is_ok());
        assert!(validate_rpc_url("ws://localhost:8546", "ws").is_err());
        assert!(validate_rpc_url("not a url", "bad").unwrap_err().is_fatal());
    }

    #[test]
    fn test_new_builds_provider_per_url() {
        let spec = ChainRegistry::builtin().get("bsc").unwrap().with_rpc_urls(vec![
            "http://localhost:8545".to_string(),
            "http://localhost:8546".to_string(),
        ]);
        let connector = RpcConnector::new(spec).unwrap();
        assert_eq!(connector.providers.len(), 2);
    }

    #[test]
    fn test_new_requires_url() {
        let spec = ChainRegistry::builtin()
            .get("bsc")
            .unwrap()
            .with_rpc_urls(vec![]);
        assert!(RpcConnector::new(spec).is_err());
    }
}
