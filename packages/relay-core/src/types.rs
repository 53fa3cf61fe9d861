//! Shared domain types for the relay

use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Which side of the bridge a chain plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainRole {
    Source,
    Destination,
}

impl ChainRole {
    /// The role whose contract acts on events observed on this role
    pub fn counterpart(self) -> Self {
        match self {
            ChainRole::Source => ChainRole::Destination,
            ChainRole::Destination => ChainRole::Source,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainRole::Source => "source",
            ChainRole::Destination => "destination",
        }
    }
}

impl fmt::Display for ChainRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChainRole {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "source" => Ok(ChainRole::Source),
            "destination" => Ok(ChainRole::Destination),
            other => Err(RelayError::configuration(format!(
                "invalid chain role '{}', expected 'source' or 'destination'",
                other
            ))),
        }
    }
}

/// A block bound as requested by a caller; `Latest` is resolved once per scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSpec {
    Number(u64),
    Latest,
}

impl BlockSpec {
    pub fn resolve(self, latest: u64) -> u64 {
        match self {
            BlockSpec::Number(n) => n,
            BlockSpec::Latest => latest,
        }
    }
}

impl From<u64> for BlockSpec {
    fn from(n: u64) -> Self {
        BlockSpec::Number(n)
    }
}

impl fmt::Display for BlockSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockSpec::Number(n) => write!(f, "{}", n),
            BlockSpec::Latest => write!(f, "latest"),
        }
    }
}

impl FromStr for BlockSpec {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("latest") {
            return Ok(BlockSpec::Latest);
        }
        s.parse::<u64>().map(BlockSpec::Number).map_err(|_| {
            RelayError::configuration(format!(
                "invalid block '{}', expected a block number or 'latest'",
                s
            ))
        })
    }
}

/// Inclusive block range `[from_block, to_block]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWindow {
    pub from_block: u64,
    pub to_block: u64,
}

impl ScanWindow {
    pub fn new(from_block: u64, to_block: u64) -> Result<Self> {
        if from_block > to_block {
            return Err(RelayError::InvalidWindow {
                from: from_block,
                to: to_block,
            });
        }
        Ok(Self {
            from_block,
            to_block,
        })
    }

    /// Number of blocks in the window, saturating at `u64::MAX`
    pub fn len(&self) -> u64 {
        (self.to_block - self.from_block).saturating_add(1)
    }

    /// Distance between the bounds, `to - from`
    pub fn span(&self) -> u64 {
        self.to_block - self.from_block
    }

    pub fn contains(&self, block: u64) -> bool {
        block >= self.from_block && block <= self.to_block
    }
}

impl fmt::Display for ScanWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from_block, self.to_block)
    }
}

/// Identity of an observed event for deduplication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessedEventKey {
    pub tx_hash: B256,
    pub log_index: u64,
}

impl ProcessedEventKey {
    pub fn new(tx_hash: B256, log_index: u64) -> Self {
        Self { tx_hash, log_index }
    }
}

impl fmt::Display for ProcessedEventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.log_index)
    }
}

/// Log filter for a single contract and event signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub address: Address,
    pub event_signature: B256,
    pub from_block: u64,
    pub to_block: u64,
}

/// A mined log as returned by the node, before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
}

impl RawLog {
    /// Convert an RPC log; pending logs without a block position are dropped
    pub fn from_rpc(log: &alloy::rpc::types::Log) -> Option<Self> {
        Some(Self {
            address: log.inner.address,
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
            block_number: log.block_number?,
            tx_hash: log.transaction_hash?,
            log_index: log.log_index?,
        })
    }
}

/// Block header as seen through a consensus adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    pub timestamp: u64,
    /// Vanity portion of `extraData` (at most 32 bytes)
    pub extra_data: Bytes,
    /// Proof-of-authority signer seal, when present
    pub seal: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxSummary {
    pub hash: B256,
    pub from: Address,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    pub success: bool,
}
