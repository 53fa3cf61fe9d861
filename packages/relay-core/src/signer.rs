//! Transaction signing capability
//!
//! The engine never sees key material. It hands an [`UnsignedTx`] to a
//! [`RelaySigner`] and gets back the raw signed bytes and the transaction hash.

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use tracing::info;

use crate::error::{RelayError, Result};
use crate::redact::Redacted;

/// Legacy (gas price) transaction with EIP-155 replay protection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTx {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub input: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    /// EIP-2718 encoded transaction, ready for `eth_sendRawTransaction`
    pub raw: Bytes,
    pub hash: B256,
}

#[async_trait]
pub trait RelaySigner: Send + Sync {
    /// Account that pays for and sends relay transactions
    fn address(&self) -> Address;

    async fn sign(&self, tx: UnsignedTx) -> Result<SignedTx>;
}

/// Signer backed by a private key held in memory
pub struct LocalKeySigner {
    wallet: EthereumWallet,
    address: Address,
}

impl std::fmt::Debug for LocalKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeySigner")
            .field("address", &self.address)
            .field("key", &Redacted(()))
            .finish()
    }
}

impl LocalKeySigner {
    /// Create from a hex private key, with or without 0x prefix
    pub fn from_private_key(private_key: &str) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .parse()
            .map_err(|e| RelayError::configuration(format!("invalid private key: {}", e)))?;
        let address = signer.address();

        info!(address = %address, "Relay signer initialized");

        Ok(Self {
            wallet: EthereumWallet::from(signer),
            address,
        })
    }
}

#[async_trait]
impl RelaySigner for LocalKeySigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign(&self, tx: UnsignedTx) -> Result<SignedTx> {
        let request = TransactionRequest::default()
            .with_from(self.address)
            .with_to(tx.to)
            .with_chain_id(tx.chain_id)
            .with_nonce(tx.nonce)
            .with_gas_price(tx.gas_price)
            .with_gas_limit(tx.gas_limit)
            .with_value(tx.value)
            .with_input(tx.input);

        let envelope = request
            .build(&self.wallet)
            .await
            .map_err(|e| RelayError::Signing(e.to_string()))?;

        Ok(SignedTx {
            hash: *envelope.tx_hash(),
            raw: Bytes::from(envelope.encoded_2718()),
        })
    }
}
