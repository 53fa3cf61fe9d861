//! In-memory chain and signer for tests
//!
//! [`MockConnector`] behaves like a single node: it serves logs pushed into it,
//! accepts raw transactions, mines them immediately (unless told not to) and
//! can be scripted to fail in the ways public endpoints do.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;

use crate::chain::{ChainConnector, ChainSpec, ConsensusAdapter, DEFAULT_LOG_BATCH_THRESHOLD};
use crate::contracts::{DestinationBridge, SourceBridge};
use crate::error::{RelayError, Result};
use crate::retry::{BackoffStrategy, RetryPolicy};
use crate::signer::{RelaySigner, SignedTx, UnsignedTx};
use crate::types::{BlockHeader, LogQuery, RawLog, Receipt, TxSummary};

/// Chain spec with millisecond retries, for tests
pub fn test_chain_spec(name: &str) -> ChainSpec {
    let chain_id = match name {
        "avax" => 43113,
        "bsc" => 97,
        _ => 1337,
    };
    ChainSpec {
        name: name.to_string(),
        chain_id,
        rpc_urls: vec!["http://localhost:8545".to_string()],
        consensus: ConsensusAdapter::Standard,
        retry: RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff: BackoffStrategy::Fixed,
            attempt_timeout: Duration::from_secs(2),
        },
        log_batch_threshold: DEFAULT_LOG_BATCH_THRESHOLD,
    }
}

/// A transaction accepted by the mock node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTx {
    pub hash: B256,
    pub raw: Bytes,
}

#[derive(Default)]
struct MockState {
    height: u64,
    logs: Vec<RawLog>,
    log_queries: Vec<(u64, u64)>,
    failing_log_queries: u32,
    max_log_span: Option<u64>,
    gas_price: u128,
    send_calls: usize,
    sent: Vec<SentTx>,
    rejected_sends: HashMap<usize, String>,
    lost_send_responses: HashSet<usize>,
    reverted_sends: HashSet<usize>,
    unreachable_sends: bool,
    never_mine: bool,
    slow_sends: Option<Duration>,
    receipts: HashMap<B256, Receipt>,
    failing_receipt_polls: u32,
}

#[derive(Clone)]
pub struct MockConnector {
    spec: ChainSpec,
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new(name: &str) -> Self {
        Self::with_spec(test_chain_spec(name))
    }

    pub fn with_spec(spec: ChainSpec) -> Self {
        let state = MockState {
            height: 1_000,
            gas_price: 5_000_000_000,
            ..MockState::default()
        };
        Self {
            spec,
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_height(&self, height: u64) {
        self.state().height = height;
    }

    pub fn set_gas_price(&self, gas_price: u128) {
        self.state().gas_price = gas_price;
    }

    pub fn push_log(&self, log: RawLog) {
        let mut state = self.state();
        state.height = state.height.max(log.block_number);
        state.logs.push(log);
    }

    /// `(from, to)` of every log query served, refused or failed
    pub fn log_queries(&self) -> Vec<(u64, u64)> {
        self.state().log_queries.clone()
    }

    /// The next `n` log queries fail with a transport error
    pub fn fail_next_log_queries(&self, n: u32) {
        self.state().failing_log_queries = n;
    }

    /// Refuse log queries whose `to - from` exceeds `span`
    pub fn refuse_ranges_wider_than(&self, span: u64) {
        self.state().max_log_span = Some(span);
    }

    /// The `call`-th send (1-based) is rejected by the node with `message`
    pub fn reject_send(&self, call: usize, message: &str) {
        self.state().rejected_sends.insert(call, message.to_string());
    }

    /// The `call`-th send is accepted but the response never arrives
    pub fn lose_send_response(&self, call: usize) {
        self.state().lost_send_responses.insert(call);
    }

    /// The transaction accepted at the `call`-th send reverts when mined
    pub fn revert_send(&self, call: usize) {
        self.state().reverted_sends.insert(call);
    }

    /// Every send fails with a transport error
    pub fn make_sends_unreachable(&self) {
        self.state().unreachable_sends = true;
    }

    /// Delay every send by `delay`
    pub fn slow_down_sends(&self, delay: Duration) {
        self.state().slow_sends = Some(delay);
    }

    /// Accepted transactions stay pending forever
    pub fn never_mine(&self) {
        self.state().never_mine = true;
    }

    /// Mine a pending transaction now
    pub fn mine(&self, hash: B256, success: bool) {
        let mut state = self.state();
        let block = state.height + 1;
        state.height = block;
        state.receipts.insert(
            hash,
            Receipt {
                tx_hash: hash,
                block_number: Some(block),
                success,
            },
        );
    }

    /// The next `n` receipt polls fail with a transport error
    pub fn fail_next_receipt_polls(&self, n: u32) {
        self.state().failing_receipt_polls = n;
    }

    pub fn sent_transactions(&self) -> Vec<SentTx> {
        self.state().sent.clone()
    }

    pub fn send_calls(&self) -> usize {
        self.state().send_calls
    }
}

#[async_trait]
impl ChainConnector for MockConnector {
    fn spec(&self) -> &ChainSpec {
        &self.spec
    }

    async fn current_height(&self) -> Result<u64> {
        Ok(self.state().height)
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<RawLog>> {
        let mut state = self.state();
        state.log_queries.push((query.from_block, query.to_block));

        if state.failing_log_queries > 0 {
            state.failing_log_queries -= 1;
            return Err(RelayError::transport("connection reset by peer"));
        }
        if let Some(max) = state.max_log_span {
            if query.to_block - query.from_block > max {
                return Err(RelayError::rejected(format!(
                    "exceed maximum block range: {}",
                    max
                )));
            }
        }

        Ok(state
            .logs
            .iter()
            .filter(|log| {
                log.address == query.address
                    && log.topics.first() == Some(&query.event_signature)
                    && log.block_number >= query.from_block
                    && log.block_number <= query.to_block
            })
            .cloned()
            .collect())
    }

    async fn get_block(&self, number: u64) -> Result<Option<BlockHeader>> {
        let state = self.state();
        if number > state.height {
            return Ok(None);
        }
        Ok(Some(BlockHeader {
            number,
            hash: B256::from(U256::from(number)),
            parent_hash: B256::from(U256::from(number.saturating_sub(1))),
            timestamp: 1_700_000_000 + number,
            extra_data: Bytes::new(),
            seal: None,
        }))
    }

    async fn get_transaction(&self, hash: B256) -> Result<Option<TxSummary>> {
        let state = self.state();
        if !state.sent.iter().any(|tx| tx.hash == hash) {
            return Ok(None);
        }
        Ok(Some(TxSummary {
            hash,
            from: MockSigner::ADDRESS,
            block_number: state.receipts.get(&hash).and_then(|r| r.block_number),
        }))
    }

    async fn get_receipt(&self, hash: B256) -> Result<Option<Receipt>> {
        let mut state = self.state();
        if state.failing_receipt_polls > 0 {
            state.failing_receipt_polls -= 1;
            return Err(RelayError::transport("request timed out"));
        }
        Ok(state.receipts.get(&hash).cloned())
    }

    async fn gas_price(&self) -> Result<u128> {
        Ok(self.state().gas_price)
    }

    async fn transaction_count(&self, _address: Address) -> Result<u64> {
        Ok(self.state().sent.len() as u64)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256> {
        let delay = self.state().slow_sends;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.send_calls += 1;
        let call = state.send_calls;

        if state.unreachable_sends {
            return Err(RelayError::transport("error sending request: connection refused"));
        }
        if let Some(message) = state.rejected_sends.get(&call) {
            return Err(RelayError::rejected(message.clone()));
        }

        let hash = keccak256(raw);
        if state.sent.iter().any(|tx| tx.hash == hash) {
            return Err(RelayError::rejected("already known"));
        }

        state.sent.push(SentTx {
            hash,
            raw: Bytes::copy_from_slice(raw),
        });
        if !state.never_mine {
            let block = state.height + 1;
            state.height = block;
            let success = !state.reverted_sends.contains(&call);
            state.receipts.insert(
                hash,
                Receipt {
                    tx_hash: hash,
                    block_number: Some(block),
                    success,
                },
            );
        }

        if state.lost_send_responses.contains(&call) {
            return Err(RelayError::transport("connection closed before message completed"));
        }
        Ok(hash)
    }
}

/// Signer that records what it signs and produces deterministic fake raw bytes
#[derive(Clone, Default)]
pub struct MockSigner {
    signed: Arc<Mutex<Vec<UnsignedTx>>>,
    fail: Arc<Mutex<bool>>,
}

impl MockSigner {
    pub const ADDRESS: Address = Address::repeat_byte(0x5e);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed(&self) -> Vec<UnsignedTx> {
        self.signed.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn fail_signing(&self, fail: bool) {
        *self.fail.lock().unwrap_or_else(|e| e.into_inner()) = fail;
    }
}

#[async_trait]
impl RelaySigner for MockSigner {
    fn address(&self) -> Address {
        Self::ADDRESS
    }

    async fn sign(&self, tx: UnsignedTx) -> Result<SignedTx> {
        if *self.fail.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(RelayError::Signing("hardware wallet disconnected".into()));
        }

        let mut raw = Vec::new();
        raw.extend_from_slice(&tx.chain_id.to_be_bytes());
        raw.extend_from_slice(&tx.nonce.to_be_bytes());
        raw.extend_from_slice(&tx.gas_price.to_be_bytes());
        raw.extend_from_slice(&tx.gas_limit.to_be_bytes());
        raw.extend_from_slice(tx.to.as_slice());
        raw.extend_from_slice(&tx.input);

        self.signed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);

        Ok(SignedTx {
            hash: keccak256(&raw),
            raw: Bytes::from(raw),
        })
    }
}

/// Build a `Deposit` log as a node would return it
pub fn deposit_log(
    contract: Address,
    token: Address,
    recipient: Address,
    amount: U256,
    block_number: u64,
    tx_hash: B256,
    log_index: u64,
) -> RawLog {
    let data = SourceBridge::Deposit {
        token,
        recipient,
        amount,
    }
    .encode_log_data();
    RawLog {
        address: contract,
        topics: data.topics().to_vec(),
        data: data.data,
        block_number,
        tx_hash,
        log_index,
    }
}

/// Build an `Unwrap` log as a node would return it
#[allow(clippy::too_many_arguments)]
pub fn unwrap_log(
    contract: Address,
    underlying_token: Address,
    wrapped_token: Address,
    frm: Address,
    to: Address,
    amount: U256,
    block_number: u64,
    tx_hash: B256,
    log_index: u64,
) -> RawLog {
    let data = DestinationBridge::Unwrap {
        underlying_token,
        wrapped_token,
        frm,
        to,
        amount,
    }
    .encode_log_data();
    RawLog {
        address: contract,
        topics: data.topics().to_vec(),
        data: data.data,
        block_number,
        tx_hash,
        log_index,
    }
}

/// Contract-info document declaring both bridge contracts
pub fn contract_info_json(source: Address, destination: Address) -> String {
    serde_json::json!({
        "source": {
            "address": source.to_string(),
            "abi": [
                {
                    "type": "event",
                    "name": "Deposit",
                    "anonymous": false,
                    "inputs": [
                        {"name": "token", "type": "address", "indexed": true},
                        {"name": "recipient", "type": "address", "indexed": true},
                        {"name": "amount", "type": "uint256", "indexed": false}
                    ]
                },
                {
                    "type": "function",
                    "name": "withdraw",
                    "stateMutability": "nonpayable",
                    "inputs": [
                        {"name": "token", "type": "address"},
                        {"name": "recipient", "type": "address"},
                        {"name": "amount", "type": "uint256"}
                    ],
                    "outputs": []
                }
            ]
        },
        "destination": {
            "address": destination.to_string(),
            "abi": [
                {
                    "type": "event",
                    "name": "Unwrap",
                    "anonymous": false,
                    "inputs": [
                        {"name": "underlying_token", "type": "address", "indexed": true},
                        {"name": "wrapped_token", "type": "address", "indexed": true},
                        {"name": "frm", "type": "address", "indexed": false},
                        {"name": "to", "type": "address", "indexed": true},
                        {"name": "amount", "type": "uint256", "indexed": false}
                    ]
                },
                {
                    "type": "function",
                    "name": "wrap",
                    "stateMutability": "nonpayable",
                    "inputs": [
                        {"name": "underlying_token", "type": "address"},
                        {"name": "recipient", "type": "address"},
                        {"name": "amount", "type": "uint256"}
                    ],
                    "outputs": []
                }
            ]
        }
    })
    .to_string()
}
