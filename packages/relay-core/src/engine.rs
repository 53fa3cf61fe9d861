//! Relay engine
//!
//! Each observed event moves through
//! `Observed -> Built -> Signed -> Submitted -> Confirmed`, or ends in `Failed`.
//! The engine for one role scans that role's chain and acts on the
//! counterpart chain:
//!
//! | Watched role  | Event     | Action chain | Call       |
//! |---------------|-----------|--------------|------------|
//! | `source`      | `Deposit` | destination  | `wrap`     |
//! | `destination` | `Unwrap`  | source       | `withdraw` |
//!
//! ## Idempotency
//!
//! The `(tx_hash, log_index)` of an event is recorded as processed as soon as a
//! transaction for it may have reached a node. Failures before that point
//! (nonce or gas lookup, signing, a definitive rejection) leave the key
//! unrecorded so a later scan can try again. A receipt timeout is reported as
//! an unknown outcome and the key stays recorded: re-sending would risk a
//! double mint or double release.
//!
//! An engine with a [`RelayJournal`] writes the key and transaction hash to it
//! after signing and before the first send. If that write fails nothing is
//! sent, so a process that dies mid-submission always leaves a record behind.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::bounded_cache::{
    ProcessedKeyCache, DEFAULT_PROCESSED_CACHE_SIZE, DEFAULT_PROCESSED_CACHE_TTL_SECS,
};
use crate::chain::{wait_for_receipt, ChainConnector};
use crate::contract_info::ContractInfoProvider;
use crate::contracts::{DestinationBridge, SourceBridge};
use crate::error::{RelayError, Result};
use crate::retry::{classify, with_retry, ErrorClass};
use crate::scanner::{EventKind, EventScanner, WatchedEvent};
use crate::signer::{RelaySigner, UnsignedTx};
use crate::types::{BlockSpec, ChainRole, ProcessedEventKey, ScanWindow};

/// Gas limit for every relay transaction
pub const GAS_LIMIT: u64 = 200_000;

/// Mirrored contract call for an observed event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    /// Mint wrapped `token` to `recipient` on the destination chain
    Wrap {
        token: Address,
        recipient: Address,
        amount: U256,
    },
    /// Release `token` to `recipient` on the source chain
    Withdraw {
        token: Address,
        recipient: Address,
        amount: U256,
    },
}

impl RelayAction {
    pub fn for_event(event: &WatchedEvent) -> Self {
        match *event {
            WatchedEvent::Deposit {
                token,
                recipient,
                amount,
                ..
            } => RelayAction::Wrap {
                token,
                recipient,
                amount,
            },
            WatchedEvent::Unwrap {
                underlying_token,
                to,
                amount,
                ..
            } => RelayAction::Withdraw {
                token: underlying_token,
                recipient: to,
                amount,
            },
        }
    }

    /// Chain role whose contract executes the action
    pub fn role(&self) -> ChainRole {
        match self {
            RelayAction::Wrap { .. } => ChainRole::Destination,
            RelayAction::Withdraw { .. } => ChainRole::Source,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RelayAction::Wrap { .. } => "wrap",
            RelayAction::Withdraw { .. } => "withdraw",
        }
    }

    pub fn function_signature(&self) -> &'static str {
        match self {
            RelayAction::Wrap { .. } => DestinationBridge::wrapCall::SIGNATURE,
            RelayAction::Withdraw { .. } => SourceBridge::withdrawCall::SIGNATURE,
        }
    }

    pub fn calldata(&self) -> Bytes {
        match *self {
            RelayAction::Wrap {
                token,
                recipient,
                amount,
            } => DestinationBridge::wrapCall {
                underlying_token: token,
                recipient,
                amount,
            }
            .abi_encode()
            .into(),
            RelayAction::Withdraw {
                token,
                recipient,
                amount,
            } => SourceBridge::withdrawCall {
                token,
                recipient,
                amount,
            }
            .abi_encode()
            .into(),
        }
    }
}

/// Per-event state, logged on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Observed,
    Built,
    Signed,
    Submitted,
    Confirmed,
    Failed,
}

impl RelayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayState::Observed => "observed",
            RelayState::Built => "built",
            RelayState::Signed => "signed",
            RelayState::Submitted => "submitted",
            RelayState::Confirmed => "confirmed",
            RelayState::Failed => "failed",
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What happened to one observed event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventOutcome {
    Confirmed {
        tx_hash: B256,
        block_number: Option<u64>,
    },
    /// Already acted on by this engine
    Duplicate,
    /// Nothing to relay (zero amount)
    Ignored { reason: String },
    /// `retryable` failures left the event unprocessed; a later scan may retry it
    Failed {
        error: String,
        retryable: bool,
        tx_hash: Option<B256>,
    },
    /// A transaction may have been sent but its fate is unknown
    UnknownOutcome { tx_hash: B256 },
    /// The invocation deadline passed before this event was reached
    NotAttempted,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOutcome::Confirmed { .. } => "confirmed",
            EventOutcome::Duplicate => "duplicate",
            EventOutcome::Ignored { .. } => "ignored",
            EventOutcome::Failed { .. } => "failed",
            EventOutcome::UnknownOutcome { .. } => "unknown_outcome",
            EventOutcome::NotAttempted => "not_attempted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventReport {
    pub event: WatchedEvent,
    pub outcome: EventOutcome,
}

/// Result of one relay invocation over a window
#[derive(Debug, Clone, Serialize)]
pub struct RelayReport {
    pub role: ChainRole,
    pub window: ScanWindow,
    pub events: Vec<EventReport>,
}

impl RelayReport {
    fn count(&self, f: impl Fn(&EventOutcome) -> bool) -> usize {
        self.events.iter().filter(|e| f(&e.outcome)).count()
    }

    pub fn confirmed(&self) -> usize {
        self.count(|o| matches!(o, EventOutcome::Confirmed { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, EventOutcome::Failed { .. }))
    }

    pub fn duplicates(&self) -> usize {
        self.count(|o| matches!(o, EventOutcome::Duplicate))
    }

    /// Transactions whose outcome must be reconciled before anyone retries them
    pub fn unknown_outcomes(&self) -> Vec<B256> {
        self.events
            .iter()
            .filter_map(|e| match e.outcome {
                EventOutcome::UnknownOutcome { tx_hash } => Some(tx_hash),
                _ => None,
            })
            .collect()
    }

    /// Whether a later scan of the same window could still make progress
    pub fn has_retryable_failures(&self) -> bool {
        self.events.iter().any(|e| {
            matches!(
                e.outcome,
                EventOutcome::Failed {
                    retryable: true,
                    ..
                } | EventOutcome::NotAttempted
            )
        })
    }

    /// Every event was attempted before the deadline
    pub fn is_complete(&self) -> bool {
        !self
            .events
            .iter()
            .any(|e| matches!(e.outcome, EventOutcome::NotAttempted))
    }
}

/// Status of a previously submitted relay transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reconciliation {
    Confirmed { block_number: Option<u64> },
    Reverted,
    /// Known to the node, not yet mined
    Pending,
    /// Neither mined nor known to the node; dropped or never received
    Unknown,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long to wait for a receipt after submission
    pub receipt_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub gas_limit: u64,
    pub processed_cache_size: usize,
    pub processed_cache_ttl_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            receipt_timeout: Duration::from_secs(120),
            receipt_poll_interval: Duration::from_millis(500),
            gas_limit: GAS_LIMIT,
            processed_cache_size: DEFAULT_PROCESSED_CACHE_SIZE,
            processed_cache_ttl_secs: DEFAULT_PROCESSED_CACHE_TTL_SECS,
        }
    }
}

/// Durable record of submissions, written while an event is being relayed
#[async_trait]
pub trait RelayJournal: Send + Sync {
    /// Called after signing, before the transaction is sent. An error aborts
    /// the relay of this event without sending.
    async fn record_submission(&self, key: ProcessedEventKey, tx_hash: B256) -> Result<()>;

    /// The transaction was mined, successfully or not
    async fn record_resolved(&self, key: ProcessedEventKey, tx_hash: B256) -> Result<()>;

    /// The node refused the transaction; the event may be relayed again
    async fn record_abandoned(&self, key: ProcessedEventKey, tx_hash: B256) -> Result<()>;
}

/// Relays events observed on one role's chain to the counterpart chain
pub struct RelayEngine {
    role: ChainRole,
    scanner: EventScanner,
    action: Arc<dyn ChainConnector>,
    action_contract: Address,
    signer: Arc<dyn RelaySigner>,
    processed: ProcessedKeyCache,
    /// Hash of a transaction whose submission has started but not resolved
    in_flight: Option<B256>,
    journal: Option<Arc<dyn RelayJournal>>,
    /// Once true, events not yet started are left for a later scan
    stop: Option<watch::Receiver<bool>>,
    config: EngineConfig,
}

impl RelayEngine {
    /// Build an engine watching `role`.
    ///
    /// The watched contract must declare the role's event and the action
    /// contract must declare the mirrored function; otherwise this is a
    /// configuration error.
    pub fn new(
        role: ChainRole,
        contracts: &dyn ContractInfoProvider,
        watched: Arc<dyn ChainConnector>,
        action: Arc<dyn ChainConnector>,
        signer: Arc<dyn RelaySigner>,
        config: EngineConfig,
    ) -> Result<Self> {
        let kind = EventKind::for_role(role);
        let action_role = role.counterpart();

        let watched_info = contracts.contract_info(role)?;
        watched_info.require_event(role, kind.name(), kind.signature())?;

        let action_info = contracts.contract_info(action_role)?;
        let (function, signature) = match action_role {
            ChainRole::Destination => ("wrap", DestinationBridge::wrapCall::SIGNATURE),
            ChainRole::Source => ("withdraw", SourceBridge::withdrawCall::SIGNATURE),
        };
        action_info.require_function(action_role, function, signature)?;

        info!(
            role = %role,
            watched_chain = %watched.spec().name,
            watched_contract = %watched_info.address,
            action_chain = %action.spec().name,
            action_contract = %action_info.address,
            relayer = %signer.address(),
            "Relay engine initialized"
        );

        Ok(Self {
            role,
            scanner: EventScanner::new(watched, watched_info.address, kind),
            action,
            action_contract: action_info.address,
            signer,
            processed: ProcessedKeyCache::new(
                config.processed_cache_size,
                config.processed_cache_ttl_secs,
            ),
            in_flight: None,
            journal: None,
            stop: None,
            config,
        })
    }

    pub fn set_journal(&mut self, journal: Arc<dyn RelayJournal>) {
        self.journal = Some(journal);
    }

    /// Stop starting new events once `stop` turns true. The event in progress
    /// runs to completion.
    pub fn set_stop_signal(&mut self, stop: watch::Receiver<bool>) {
        self.stop = Some(stop);
    }

    fn stop_requested(&self) -> bool {
        self.stop.as_ref().is_some_and(|stop| *stop.borrow())
    }

    pub fn role(&self) -> ChainRole {
        self.role
    }

    pub fn scanner(&self) -> &EventScanner {
        &self.scanner
    }

    pub fn watched_chain(&self) -> &Arc<dyn ChainConnector> {
        self.scanner.connector()
    }

    pub fn action_chain(&self) -> &Arc<dyn ChainConnector> {
        &self.action
    }

    /// Record keys acted on by an earlier run
    pub fn seed_processed(&mut self, keys: impl IntoIterator<Item = ProcessedEventKey>) {
        for key in keys {
            self.processed.insert(key);
        }
    }

    pub fn is_processed(&self, key: &ProcessedEventKey) -> bool {
        self.processed.contains(key)
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    /// Resolve block bounds against the watched chain's current height
    pub async fn resolve_window(&self, from: BlockSpec, to: BlockSpec) -> Result<ScanWindow> {
        let (from_block, to_block) = match (from, to) {
            (BlockSpec::Number(f), BlockSpec::Number(t)) => (f, t),
            _ => {
                let connector = self.scanner.connector();
                let latest = with_retry(&connector.spec().retry, "eth_blockNumber", move || {
                    connector.current_height()
                })
                .await?;
                (from.resolve(latest), to.resolve(latest))
            }
        };
        ScanWindow::new(from_block, to_block)
    }

    /// Scan `[from, to]` on the watched chain and relay every event found
    pub async fn scan_blocks(
        &mut self,
        from: impl Into<BlockSpec>,
        to: impl Into<BlockSpec>,
    ) -> Result<RelayReport> {
        self.scan_blocks_until(from, to, None).await
    }

    /// Like [`Self::scan_blocks`], but stops at `deadline`.
    ///
    /// The event in flight when the deadline passes fails (or is reported as an
    /// unknown outcome if its transaction may have been sent); events after it
    /// are reported as not attempted.
    pub async fn scan_blocks_until(
        &mut self,
        from: impl Into<BlockSpec>,
        to: impl Into<BlockSpec>,
        deadline: Option<Instant>,
    ) -> Result<RelayReport> {
        let (from, to) = (from.into(), to.into());

        let window = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.resolve_window(from, to))
                .await
                .map_err(|_| RelayError::DeadlineExceeded("window resolution".into()))??,
            None => self.resolve_window(from, to).await?,
        };

        let events = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.scanner.scan_all(window))
                .await
                .map_err(|_| RelayError::DeadlineExceeded(format!("scan of {}", window)))??,
            None => self.scanner.scan_all(window).await?,
        };

        info!(
            role = %self.role,
            chain = %self.scanner.connector().spec().name,
            window = %window,
            events = events.len(),
            "Scanned window"
        );

        let mut reports = Vec::with_capacity(events.len());
        for event in events {
            let outcome = match deadline {
                _ if self.stop_requested() => EventOutcome::NotAttempted,
                Some(deadline) if Instant::now() >= deadline => EventOutcome::NotAttempted,
                Some(deadline) => {
                    let result = tokio::time::timeout_at(deadline, self.relay_event(&event)).await;
                    match result {
                        Ok(outcome) => outcome,
                        Err(_) => self.deadline_outcome(&event),
                    }
                }
                None => self.relay_event(&event).await,
            };
            reports.push(EventReport { event, outcome });
        }

        let report = RelayReport {
            role: self.role,
            window,
            events: reports,
        };

        info!(
            role = %self.role,
            window = %window,
            confirmed = report.confirmed(),
            failed = report.failed(),
            duplicates = report.duplicates(),
            unknown = report.unknown_outcomes().len(),
            complete = report.is_complete(),
            "Relay pass finished"
        );

        Ok(report)
    }

    fn deadline_outcome(&mut self, event: &WatchedEvent) -> EventOutcome {
        match self.in_flight.take() {
            Some(tx_hash) => {
                self.processed.insert(event.key());
                error!(
                    key = %event.key(),
                    tx_hash = %tx_hash,
                    error = %RelayError::DoubleSubmissionRisk { tx_hash },
                    "Deadline passed during submission"
                );
                EventOutcome::UnknownOutcome { tx_hash }
            }
            None => {
                warn!(key = %event.key(), state = %RelayState::Failed, "Deadline passed before submission");
                EventOutcome::Failed {
                    error: RelayError::DeadlineExceeded(format!("relay of {}", event.key()))
                        .to_string(),
                    retryable: true,
                    tx_hash: None,
                }
            }
        }
    }

    /// Drive one event through the state machine
    async fn relay_event(&mut self, event: &WatchedEvent) -> EventOutcome {
        let key = event.key();
        self.in_flight = None;

        debug!(
            role = %self.role,
            key = %key,
            block = event.block_number(),
            state = %RelayState::Observed,
            "Event observed"
        );

        if self.processed.contains(&key) {
            debug!(key = %key, "Event already processed, skipping");
            return EventOutcome::Duplicate;
        }

        if event.amount().is_zero() {
            info!(key = %key, "Ignoring event with zero amount");
            return EventOutcome::Ignored {
                reason: "zero amount".to_string(),
            };
        }

        let action = RelayAction::for_event(event);
        debug!(
            key = %key,
            action = action.name(),
            token = %event.token(),
            recipient = %event.beneficiary(),
            amount = %event.amount(),
            state = %RelayState::Built,
            "Action built"
        );

        let unsigned = match self.build_transaction(&action).await {
            Ok(tx) => tx,
            Err(e) => return self.fail_before_submission(&key, e),
        };
        let nonce = unsigned.nonce;

        let signed = match self.signer.sign(unsigned).await {
            Ok(signed) => signed,
            Err(e) => return self.fail_before_submission(&key, e),
        };
        let tx_hash = signed.hash;
        debug!(key = %key, tx_hash = %tx_hash, nonce, state = %RelayState::Signed, "Transaction signed");

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record_submission(key, tx_hash).await {
                return self.fail_before_submission(&key, e);
            }
        }
        self.in_flight = Some(tx_hash);
        let action_chain = &self.action;
        let raw = &signed.raw;
        let submission = with_retry(
            &action_chain.spec().retry,
            "eth_sendRawTransaction",
            move || action_chain.send_raw_transaction(raw),
        )
        .await;

        match submission {
            Ok(_) => {}
            Err(e) if classify(&e) == ErrorClass::AlreadyKnown => {
                debug!(key = %key, tx_hash = %tx_hash, "Node already has the transaction");
            }
            Err(e) if e.is_rejection() => {
                self.in_flight = None;
                if let Some(journal) = &self.journal {
                    if let Err(journal_err) = journal.record_abandoned(key, tx_hash).await {
                        error!(key = %key, tx_hash = %tx_hash, error = %journal_err, "Failed to record abandoned submission");
                    }
                }
                return self.fail_before_submission(&key, e);
            }
            Err(e) => {
                // The transaction may have reached the node before the connection failed
                self.in_flight = None;
                self.processed.insert(key);
                error!(
                    key = %key,
                    tx_hash = %tx_hash,
                    error = %e,
                    "Submission outcome unknown; verify before retrying"
                );
                return EventOutcome::UnknownOutcome { tx_hash };
            }
        }

        self.processed.insert(key);
        info!(
            role = %self.role,
            key = %key,
            action = action.name(),
            chain = %self.action.spec().name,
            tx_hash = %tx_hash,
            nonce,
            state = %RelayState::Submitted,
            "Transaction submitted"
        );

        let receipt = wait_for_receipt(
            self.action.as_ref(),
            tx_hash,
            self.config.receipt_timeout,
            self.config.receipt_poll_interval,
        )
        .await;
        self.in_flight = None;

        if matches!(receipt, Ok(Some(_))) {
            if let Some(journal) = &self.journal {
                if let Err(e) = journal.record_resolved(key, tx_hash).await {
                    error!(key = %key, tx_hash = %tx_hash, error = %e, "Failed to record resolved submission");
                }
            }
        }

        match receipt {
            Ok(Some(receipt)) if receipt.success => {
                info!(
                    key = %key,
                    tx_hash = %tx_hash,
                    block = ?receipt.block_number,
                    state = %RelayState::Confirmed,
                    "Transaction confirmed"
                );
                EventOutcome::Confirmed {
                    tx_hash,
                    block_number: receipt.block_number,
                }
            }
            Ok(Some(_)) => {
                let err = RelayError::Reverted { tx_hash };
                error!(key = %key, error = %err, state = %RelayState::Failed, "Transaction reverted");
                EventOutcome::Failed {
                    error: err.to_string(),
                    retryable: false,
                    tx_hash: Some(tx_hash),
                }
            }
            Ok(None) => {
                let err = RelayError::DoubleSubmissionRisk { tx_hash };
                error!(
                    key = %key,
                    timeout = ?self.config.receipt_timeout,
                    error = %err,
                    "No receipt before timeout"
                );
                EventOutcome::UnknownOutcome { tx_hash }
            }
            Err(e) => {
                error!(key = %key, tx_hash = %tx_hash, error = %e, "Receipt lookup failed");
                EventOutcome::UnknownOutcome { tx_hash }
            }
        }
    }

    /// Fetch nonce and gas price immediately before signing
    async fn build_transaction(&self, action: &RelayAction) -> Result<UnsignedTx> {
        let chain = &self.action;
        let sender = self.signer.address();

        let nonce = with_retry(&chain.spec().retry, "eth_getTransactionCount", move || {
            chain.transaction_count(sender)
        })
        .await?;
        let gas_price = with_retry(&chain.spec().retry, "eth_gasPrice", move || {
            chain.gas_price()
        })
        .await?;

        Ok(UnsignedTx {
            chain_id: chain.spec().chain_id,
            nonce,
            gas_price,
            gas_limit: self.config.gas_limit,
            to: self.action_contract,
            value: U256::ZERO,
            input: action.calldata(),
        })
    }

    fn fail_before_submission(&self, key: &ProcessedEventKey, err: RelayError) -> EventOutcome {
        let retryable = !matches!(err, RelayError::Signing(_) | RelayError::Configuration(_));
        warn!(
            key = %key,
            error = %err,
            retryable,
            state = %RelayState::Failed,
            "Relay failed before submission"
        );
        EventOutcome::Failed {
            error: err.to_string(),
            retryable,
            tx_hash: None,
        }
    }

    /// Check what became of a relay transaction whose outcome was unknown
    pub async fn reconcile(&self, tx_hash: B256) -> Result<Reconciliation> {
        let chain = &self.action;

        let receipt = with_retry(&chain.spec().retry, "eth_getTransactionReceipt", move || {
            chain.get_receipt(tx_hash)
        })
        .await?;

        let status = match receipt {
            Some(r) if r.success => Reconciliation::Confirmed {
                block_number: r.block_number,
            },
            Some(_) => Reconciliation::Reverted,
            None => {
                let tx = with_retry(&chain.spec().retry, "eth_getTransactionByHash", move || {
                    chain.get_transaction(tx_hash)
                })
                .await?;
                if tx.is_some() {
                    Reconciliation::Pending
                } else {
                    Reconciliation::Unknown
                }
            }
        };

        debug!(tx_hash = %tx_hash, status = ?status, "Reconciled transaction");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract_info::StaticContractInfo;
    use crate::testing::{contract_info_json, deposit_log, unwrap_log, MockConnector, MockSigner};

    const SOURCE_CONTRACT: Address = Address::repeat_byte(0xa1);
    const DEST_CONTRACT: Address = Address::repeat_byte(0xb2);

    struct Harness {
        source: MockConnector,
        destination: MockConnector,
        signer: MockSigner,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                source: MockConnector::new("avax"),
                destination: MockConnector::new("bsc"),
                signer: MockSigner::new(),
            }
        }

        fn engine(&self, role: ChainRole) -> RelayEngine {
            self.engine_with(role, test_config())
        }

        fn engine_with(&self, role: ChainRole, config: EngineConfig) -> RelayEngine {
            let contracts = StaticContractInfo::from_json_str(&contract_info_json(
                SOURCE_CONTRACT,
                DEST_CONTRACT,
            ))
            .unwrap();
            let (watched, action) = match role {
                ChainRole::Source => (self.source.clone(), self.destination.clone()),
                ChainRole::Destination => (self.destination.clone(), self.source.clone()),
            };
            RelayEngine::new(
                role,
                &contracts,
                Arc::new(watched),
                Arc::new(action),
                Arc::new(self.signer.clone()),
                config,
            )
            .unwrap()
        }

        fn deposit(&self, amount: u64, block: u64, tx: u8, log_index: u64) {
            self.source.push_log(deposit_log(
                SOURCE_CONTRACT,
                Address::repeat_byte(0xaa),
                Address::repeat_byte(0xbb),
                U256::from(amount),
                block,
                B256::repeat_byte(tx),
                log_index,
            ));
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            receipt_timeout: Duration::from_millis(100),
            receipt_poll_interval: Duration::from_millis(5),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_action_mapping_is_total() {
        let deposit = WatchedEvent::Deposit {
            token: Address::repeat_byte(0xaa),
            recipient: Address::repeat_byte(0xbb),
            amount: U256::from(500),
            source_tx_hash: B256::ZERO,
            block_number: 1,
            log_index: 0,
        };
        let action = RelayAction::for_event(&deposit);
        assert_eq!(
            action,
            RelayAction::Wrap {
                token: Address::repeat_byte(0xaa),
                recipient: Address::repeat_byte(0xbb),
                amount: U256::from(500),
            }
        );
        assert_eq!(action.role(), ChainRole::Destination);

        let unwrap = WatchedEvent::Unwrap {
            underlying_token: Address::repeat_byte(0xcc),
            to: Address::repeat_byte(0xdd),
            amount: U256::from(7),
            source_tx_hash: B256::ZERO,
            block_number: 1,
            log_index: 0,
        };
        let action = RelayAction::for_event(&unwrap);
        assert_eq!(
            action,
            RelayAction::Withdraw {
                token: Address::repeat_byte(0xcc),
                recipient: Address::repeat_byte(0xdd),
                amount: U256::from(7),
            }
        );
        assert_eq!(action.role(), ChainRole::Source);
    }

    #[test]
    fn test_calldata_matches_bindings() {
        let action = RelayAction::Wrap {
            token: Address::repeat_byte(0xaa),
            recipient: Address::repeat_byte(0xbb),
            amount: U256::from(500),
        };
        let calldata = action.calldata();
        assert_eq!(&calldata[..4], DestinationBridge::wrapCall::SELECTOR.as_slice());
        let decoded = DestinationBridge::wrapCall::abi_decode(&calldata, true).unwrap();
        assert_eq!(decoded.underlying_token, Address::repeat_byte(0xaa));
        assert_eq!(decoded.recipient, Address::repeat_byte(0xbb));
        assert_eq!(decoded.amount, U256::from(500));
    }

    #[test]
    fn test_missing_abi_entry_is_configuration_error() {
        let h = Harness::new();
        let json = serde_json::json!({
            "source": {"address": SOURCE_CONTRACT.to_string(), "abi": []},
            "destination": {"address": DEST_CONTRACT.to_string(), "abi": []}
        })
        .to_string();
        let contracts = StaticContractInfo::from_json_str(&json).unwrap();
        let result = RelayEngine::new(
            ChainRole::Source,
            &contracts,
            Arc::new(h.source.clone()),
            Arc::new(h.destination.clone()),
            Arc::new(h.signer.clone()),
            test_config(),
        );
        assert!(matches!(result, Err(RelayError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_deposit_scenario_and_rescan() {
        let h = Harness::new();
        h.deposit(500, 1002, 0x01, 0);
        let mut engine = h.engine(ChainRole::Source);

        let report = engine.scan_blocks(1000, 1005).await.unwrap();
        assert_eq!(report.events.len(), 1);
        assert!(matches!(
            report.events[0].outcome,
            EventOutcome::Confirmed { .. }
        ));

        let sent = h.destination.sent_transactions();
        assert_eq!(sent.len(), 1);
        let signed = h.signer.signed();
        assert_eq!(signed[0].to, DEST_CONTRACT);
        assert_eq!(signed[0].chain_id, 97);
        assert_eq!(signed[0].gas_limit, GAS_LIMIT);
        let call = DestinationBridge::wrapCall::abi_decode(&signed[0].input, true).unwrap();
        assert_eq!(call.underlying_token, Address::repeat_byte(0xaa));
        assert_eq!(call.recipient, Address::repeat_byte(0xbb));
        assert_eq!(call.amount, U256::from(500));

        let again = engine.scan_blocks(1000, 1005).await.unwrap();
        assert_eq!(again.duplicates(), 1);
        assert_eq!(h.destination.send_calls(), 1);
        assert!(!again.has_retryable_failures());
    }

    #[tokio::test]
    async fn test_unwrap_relays_withdraw_on_source() {
        let h = Harness::new();
        h.destination.push_log(unwrap_log(
            DEST_CONTRACT,
            Address::repeat_byte(0xaa),
            Address::repeat_byte(0xa2),
            Address::repeat_byte(0xf0),
            Address::repeat_byte(0xbb),
            U256::from(250),
            2000,
            B256::repeat_byte(0x09),
            1,
        ));
        let mut engine = h.engine(ChainRole::Destination);

        let report = engine.scan_blocks(1990, 2000).await.unwrap();
        assert_eq!(report.confirmed(), 1);
        assert_eq!(h.source.sent_transactions().len(), 1);

        let signed = h.signer.signed();
        assert_eq!(signed[0].to, SOURCE_CONTRACT);
        assert_eq!(signed[0].chain_id, 43113);
        let call = SourceBridge::withdrawCall::abi_decode(&signed[0].input, true).unwrap();
        assert_eq!(call.token, Address::repeat_byte(0xaa));
        assert_eq!(call.recipient, Address::repeat_byte(0xbb));
        assert_eq!(call.amount, U256::from(250));
    }

    #[tokio::test]
    async fn test_isolation_on_failure() {
        let h = Harness::new();
        h.deposit(1, 10, 0x01, 0);
        h.deposit(2, 11, 0x02, 0);
        h.deposit(3, 12, 0x03, 0);
        h.destination
            .reject_send(2, "insufficient funds for gas * price + value");
        let mut engine = h.engine(ChainRole::Source);

        let report = engine.scan_blocks(10, 12).await.unwrap();
        let outcomes: Vec<&str> = report.events.iter().map(|e| e.outcome.as_str()).collect();
        assert_eq!(outcomes, vec!["confirmed", "failed", "confirmed"]);
        assert_eq!(h.destination.sent_transactions().len(), 2);

        // the rejected event was never submitted, so it is not marked processed
        assert!(!engine.is_processed(&report.events[1].event.key()));
        assert!(engine.is_processed(&report.events[0].event.key()));
    }

    #[tokio::test]
    async fn test_nonce_and_gas_fetched_per_event() {
        let h = Harness::new();
        h.deposit(1, 10, 0x01, 0);
        h.deposit(2, 11, 0x02, 0);
        let mut engine = h.engine(ChainRole::Source);

        h.destination.set_gas_price(7);
        engine.scan_blocks(10, 10).await.unwrap();
        h.destination.set_gas_price(9);
        engine.scan_blocks(11, 11).await.unwrap();

        let signed = h.signer.signed();
        assert_eq!(signed[0].nonce, 0);
        assert_eq!(signed[0].gas_price, 7);
        assert_eq!(signed[1].nonce, 1);
        assert_eq!(signed[1].gas_price, 9);
    }

    #[tokio::test]
    async fn test_two_events_in_one_transaction() {
        let h = Harness::new();
        h.deposit(5, 20, 0x07, 0);
        h.deposit(6, 20, 0x07, 1);
        let mut engine = h.engine(ChainRole::Source);

        let report = engine.scan_blocks(20, 20).await.unwrap();
        assert_eq!(report.confirmed(), 2);
        assert_eq!(h.destination.sent_transactions().len(), 2);
    }

    #[tokio::test]
    async fn test_zero_amount_is_ignored() {
        let h = Harness::new();
        h.deposit(0, 30, 0x01, 0);
        let mut engine = h.engine(ChainRole::Source);

        let report = engine.scan_blocks(30, 30).await.unwrap();
        assert!(matches!(
            report.events[0].outcome,
            EventOutcome::Ignored { .. }
        ));
        assert_eq!(h.destination.send_calls(), 0);
    }

    #[tokio::test]
    async fn test_receipt_timeout_is_unknown_outcome() {
        let h = Harness::new();
        h.deposit(500, 40, 0x01, 0);
        h.destination.never_mine();
        let mut engine = h.engine(ChainRole::Source);

        let report = engine.scan_blocks(40, 40).await.unwrap();
        let unknown = report.unknown_outcomes();
        assert_eq!(unknown.len(), 1);

        // marked, so a rescan does not submit a second transaction
        let again = engine.scan_blocks(40, 40).await.unwrap();
        assert_eq!(again.duplicates(), 1);
        assert_eq!(h.destination.send_calls(), 1);

        assert_eq!(engine.reconcile(unknown[0]).await.unwrap(), Reconciliation::Pending);
        h.destination.mine(unknown[0], true);
        assert!(matches!(
            engine.reconcile(unknown[0]).await.unwrap(),
            Reconciliation::Confirmed { .. }
        ));
    }

    #[tokio::test]
    async fn test_reverted_transaction_is_marked() {
        let h = Harness::new();
        h.deposit(500, 50, 0x01, 0);
        h.destination.revert_send(1);
        let mut engine = h.engine(ChainRole::Source);

        let report = engine.scan_blocks(50, 50).await.unwrap();
        match &report.events[0].outcome {
            EventOutcome::Failed {
                retryable, tx_hash, ..
            } => {
                assert!(!retryable);
                assert!(tx_hash.is_some());
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(engine.is_processed(&report.events[0].event.key()));
        assert_eq!(
            engine
                .reconcile(h.destination.sent_transactions()[0].hash)
                .await
                .unwrap(),
            Reconciliation::Reverted
        );
    }

    #[tokio::test]
    async fn test_lost_response_resend_is_already_known() {
        let h = Harness::new();
        h.deposit(500, 60, 0x01, 0);
        h.destination.lose_send_response(1);
        let mut engine = h.engine(ChainRole::Source);

        let report = engine.scan_blocks(60, 60).await.unwrap();
        assert_eq!(report.confirmed(), 1);
        assert_eq!(h.destination.send_calls(), 2);
        assert_eq!(h.destination.sent_transactions().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_node_is_unknown_outcome() {
        let h = Harness::new();
        h.deposit(500, 70, 0x01, 0);
        h.destination.make_sends_unreachable();
        let mut engine = h.engine(ChainRole::Source);

        let report = engine.scan_blocks(70, 70).await.unwrap();
        assert_eq!(report.unknown_outcomes().len(), 1);
        assert!(engine.is_processed(&report.events[0].event.key()));
        assert_eq!(
            engine.reconcile(report.unknown_outcomes()[0]).await.unwrap(),
            Reconciliation::Unknown
        );
    }

    #[tokio::test]
    async fn test_signing_failure_leaves_event_unprocessed() {
        let h = Harness::new();
        h.deposit(500, 80, 0x01, 0);
        h.signer.fail_signing(true);
        let mut engine = h.engine(ChainRole::Source);

        let report = engine.scan_blocks(80, 80).await.unwrap();
        assert_eq!(report.failed(), 1);
        assert!(!engine.is_processed(&report.events[0].event.key()));

        h.signer.fail_signing(false);
        let retry = engine.scan_blocks(80, 80).await.unwrap();
        assert_eq!(retry.confirmed(), 1);
    }

    #[tokio::test]
    async fn test_latest_resolves_to_height() {
        let h = Harness::new();
        h.deposit(500, 1002, 0x01, 0);
        h.source.set_height(1005);
        let mut engine = h.engine(ChainRole::Source);

        let report = engine
            .scan_blocks(BlockSpec::Number(1000), BlockSpec::Latest)
            .await
            .unwrap();
        assert_eq!(report.window, ScanWindow::new(1000, 1005).unwrap());
        assert_eq!(report.confirmed(), 1);
    }

    #[tokio::test]
    async fn test_invalid_window() {
        let h = Harness::new();
        let mut engine = h.engine(ChainRole::Source);
        assert!(matches!(
            engine.scan_blocks(10, 5).await,
            Err(RelayError::InvalidWindow { .. })
        ));
    }

    #[tokio::test]
    async fn test_deadline_marks_remaining_not_attempted() {
        let h = Harness::new();
        h.deposit(1, 90, 0x01, 0);
        h.deposit(2, 91, 0x02, 0);
        h.deposit(3, 92, 0x03, 0);
        h.destination.slow_down_sends(Duration::from_millis(300));
        let mut engine = h.engine(ChainRole::Source);

        let deadline = Instant::now() + Duration::from_millis(100);
        let report = engine
            .scan_blocks_until(90, 92, Some(deadline))
            .await
            .unwrap();

        let outcomes: Vec<&str> = report.events.iter().map(|e| e.outcome.as_str()).collect();
        assert_eq!(outcomes, vec!["unknown_outcome", "not_attempted", "not_attempted"]);
        assert!(!report.is_complete());
        assert!(report.has_retryable_failures());
        assert_eq!(h.destination.sent_transactions().len(), 0);
    }

    #[tokio::test]
    async fn test_seeded_keys_are_skipped() {
        let h = Harness::new();
        h.deposit(500, 95, 0x01, 0);
        let mut engine = h.engine(ChainRole::Source);
        engine.seed_processed([ProcessedEventKey::new(B256::repeat_byte(0x01), 0)]);

        let report = engine.scan_blocks(95, 95).await.unwrap();
        assert_eq!(report.duplicates(), 1);
        assert_eq!(h.destination.send_calls(), 0);
    }

    /// Journal that records each call and how many sends the node had seen
    struct RecordingJournal {
        node: MockConnector,
        entries: std::sync::Mutex<Vec<(&'static str, ProcessedEventKey, usize)>>,
        fail: bool,
    }

    impl RecordingJournal {
        fn new(node: &MockConnector, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                node: node.clone(),
                entries: std::sync::Mutex::new(Vec::new()),
                fail,
            })
        }

        fn push(&self, call: &'static str, key: ProcessedEventKey) -> Result<()> {
            if self.fail {
                return Err(RelayError::Journal("disk full".into()));
            }
            let sent = self.node.sent_transactions().len();
            self.entries.lock().unwrap().push((call, key, sent));
            Ok(())
        }

        fn calls(&self) -> Vec<(&'static str, usize)> {
            self.entries
                .lock()
                .unwrap()
                .iter()
                .map(|(call, _, sent)| (*call, *sent))
                .collect()
        }
    }

    #[async_trait]
    impl RelayJournal for RecordingJournal {
        async fn record_submission(&self, key: ProcessedEventKey, _: B256) -> Result<()> {
            self.push("submission", key)
        }

        async fn record_resolved(&self, key: ProcessedEventKey, _: B256) -> Result<()> {
            self.push("resolved", key)
        }

        async fn record_abandoned(&self, key: ProcessedEventKey, _: B256) -> Result<()> {
            self.push("abandoned", key)
        }
    }

    #[tokio::test]
    async fn test_submission_journaled_before_send() {
        let h = Harness::new();
        h.deposit(500, 95, 0x01, 0);
        let journal = RecordingJournal::new(&h.destination, false);
        let mut engine = h.engine(ChainRole::Source);
        engine.set_journal(journal.clone());

        let report = engine.scan_blocks(95, 95).await.unwrap();
        assert_eq!(report.confirmed(), 1);
        assert_eq!(journal.calls(), vec![("submission", 0), ("resolved", 1)]);
    }

    #[tokio::test]
    async fn test_rejected_send_is_abandoned() {
        let h = Harness::new();
        h.deposit(500, 95, 0x01, 0);
        h.destination
            .reject_send(1, "insufficient funds for gas * price + value");
        let journal = RecordingJournal::new(&h.destination, false);
        let mut engine = h.engine(ChainRole::Source);
        engine.set_journal(journal.clone());

        let report = engine.scan_blocks(95, 95).await.unwrap();
        assert!(report.has_retryable_failures());
        assert_eq!(journal.calls(), vec![("submission", 0), ("abandoned", 0)]);
        assert!(!engine.is_processed(&ProcessedEventKey::new(B256::repeat_byte(0x01), 0)));
    }

    #[tokio::test]
    async fn test_journal_failure_prevents_send() {
        let h = Harness::new();
        h.deposit(500, 95, 0x01, 0);
        let mut engine = h.engine(ChainRole::Source);
        engine.set_journal(RecordingJournal::new(&h.destination, true));

        let report = engine.scan_blocks(95, 95).await.unwrap();
        assert!(matches!(
            report.events[0].outcome,
            EventOutcome::Failed {
                retryable: true,
                tx_hash: None,
                ..
            }
        ));
        assert_eq!(h.destination.send_calls(), 0);
        assert!(!engine.is_processed(&ProcessedEventKey::new(B256::repeat_byte(0x01), 0)));
    }

    #[tokio::test]
    async fn test_stop_signal_finishes_current_event_only() {
        let h = Harness::new();
        h.deposit(1, 90, 0x01, 0);
        h.deposit(2, 91, 0x02, 0);
        h.destination.slow_down_sends(Duration::from_millis(100));
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut engine = h.engine(ChainRole::Source);
        engine.set_stop_signal(stop_rx);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            stop_tx.send(true).unwrap();
            stop_tx
        });
        let report = engine.scan_blocks(90, 91).await.unwrap();
        let _ = stopper.await;

        let outcomes: Vec<&str> = report.events.iter().map(|e| e.outcome.as_str()).collect();
        assert_eq!(outcomes, vec!["confirmed", "not_attempted"]);
        assert_eq!(h.destination.sent_transactions().len(), 1);
    }
}
