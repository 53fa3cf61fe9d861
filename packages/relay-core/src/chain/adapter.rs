//! Consensus-specific block header decoding
//!
//! Proof-of-authority chains (Clique/Parlia style) extend `extraData` beyond the
//! 32 bytes allowed by the yellow paper: a 32-byte vanity prefix, an optional
//! validator list, and a 65-byte signer seal. A connector must decode headers
//! through the adapter its chain requires.

use alloy::primitives::{Bytes, B256, U64};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};
use crate::types::BlockHeader;

/// Maximum `extraData` length on a standard chain
pub const MAX_STANDARD_EXTRA_DATA: usize = 32;
/// Vanity prefix length on proof-of-authority chains
pub const POA_VANITY_LENGTH: usize = 32;
/// secp256k1 signature appended by the block sealer
pub const POA_SEAL_LENGTH: usize = 65;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusAdapter {
    Standard,
    ProofOfAuthority,
}

/// Header fields read from a raw `eth_getBlockByNumber` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlockHeader {
    pub number: U64,
    pub hash: B256,
    pub parent_hash: B256,
    pub timestamp: U64,
    #[serde(default)]
    pub extra_data: Bytes,
}

impl ConsensusAdapter {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsensusAdapter::Standard => "standard",
            ConsensusAdapter::ProofOfAuthority => "proof_of_authority",
        }
    }

    pub fn decode_header(&self, raw: &RpcBlockHeader) -> Result<BlockHeader> {
        let number = raw.number.to::<u64>();
        let extra = raw.extra_data.as_ref();

        let (extra_data, seal) = match self {
            ConsensusAdapter::Standard => {
                if extra.len() > MAX_STANDARD_EXTRA_DATA {
                    return Err(RelayError::configuration(format!(
                        "block {} has {} bytes of extraData (max {}); \
                         the chain needs the proof-of-authority adapter",
                        number,
                        extra.len(),
                        MAX_STANDARD_EXTRA_DATA
                    )));
                }
                (raw.extra_data.clone(), None)
            }
            ConsensusAdapter::ProofOfAuthority => {
                if extra.len() >= POA_VANITY_LENGTH + POA_SEAL_LENGTH {
                    let seal_start = extra.len() - POA_SEAL_LENGTH;
                    (
                        Bytes::copy_from_slice(&extra[..POA_VANITY_LENGTH]),
                        Some(Bytes::copy_from_slice(&extra[seal_start..])),
                    )
                } else {
                    // Unsealed header (e.g. genesis); keep whatever vanity there is
                    let vanity_len = extra.len().min(POA_VANITY_LENGTH);
                    (Bytes::copy_from_slice(&extra[..vanity_len]), None)
                }
            }
        };

        Ok(BlockHeader {
            number,
            hash: raw.hash,
            parent_hash: raw.parent_hash,
            timestamp: raw.timestamp.to::<u64>(),
            extra_data,
            seal,
        })
    }
}
