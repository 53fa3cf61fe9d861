//! Block-range event scanning
//!
//! The scanner queries a connector for logs emitted by the watched contract and
//! decodes them into [`WatchedEvent`]s. Logs that do not decode are skipped.
//!
//! ## Range splitting
//!
//! A window whose span exceeds the chain's batch threshold is queried one block
//! at a time. Narrower windows use a single query, falling back to per-block
//! queries when the endpoint refuses the range. Either way the decoded events
//! come out in block order. Queries are produced by a [`QueryPlan`] as the
//! stream advances, so a wide window costs nothing up front.

use std::collections::VecDeque;
use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::SolEvent;
use futures::stream::{self, Stream, TryStreamExt};
use serde::Serialize;
use tracing::debug;

use crate::chain::ChainConnector;
use crate::contracts::{DestinationBridge, SourceBridge};
use crate::error::{RelayError, Result};
use crate::retry::{classify, with_retry, ErrorClass};
use crate::types::{ChainRole, LogQuery, ProcessedEventKey, RawLog, ScanWindow};

/// Event kinds the relay watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    Deposit,
    Unwrap,
}

impl EventKind {
    /// The event watched on a chain of the given role
    pub fn for_role(role: ChainRole) -> Self {
        match role {
            ChainRole::Source => EventKind::Deposit,
            ChainRole::Destination => EventKind::Unwrap,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Deposit => "Deposit",
            EventKind::Unwrap => "Unwrap",
        }
    }

    pub fn signature(&self) -> &'static str {
        match self {
            EventKind::Deposit => SourceBridge::Deposit::SIGNATURE,
            EventKind::Unwrap => DestinationBridge::Unwrap::SIGNATURE,
        }
    }

    pub fn signature_hash(&self) -> B256 {
        match self {
            EventKind::Deposit => SourceBridge::Deposit::SIGNATURE_HASH,
            EventKind::Unwrap => DestinationBridge::Unwrap::SIGNATURE_HASH,
        }
    }
}

/// A decoded bridge event together with its position on chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatchedEvent {
    Deposit {
        token: Address,
        recipient: Address,
        amount: U256,
        source_tx_hash: B256,
        block_number: u64,
        log_index: u64,
    },
    Unwrap {
        underlying_token: Address,
        to: Address,
        amount: U256,
        source_tx_hash: B256,
        block_number: u64,
        log_index: u64,
    },
}

impl WatchedEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WatchedEvent::Deposit { .. } => EventKind::Deposit,
            WatchedEvent::Unwrap { .. } => EventKind::Unwrap,
        }
    }

    pub fn key(&self) -> ProcessedEventKey {
        ProcessedEventKey::new(self.tx_hash(), self.log_index())
    }

    pub fn amount(&self) -> U256 {
        match self {
            WatchedEvent::Deposit { amount, .. } | WatchedEvent::Unwrap { amount, .. } => *amount,
        }
    }

    pub fn tx_hash(&self) -> B256 {
        match self {
            WatchedEvent::Deposit { source_tx_hash, .. }
            | WatchedEvent::Unwrap { source_tx_hash, .. } => *source_tx_hash,
        }
    }

    pub fn block_number(&self) -> u64 {
        match self {
            WatchedEvent::Deposit { block_number, .. }
            | WatchedEvent::Unwrap { block_number, .. } => *block_number,
        }
    }

    pub fn log_index(&self) -> u64 {
        match self {
            WatchedEvent::Deposit { log_index, .. } | WatchedEvent::Unwrap { log_index, .. } => {
                *log_index
            }
        }
    }

    /// Token the event refers to on its own chain
    pub fn token(&self) -> Address {
        match self {
            WatchedEvent::Deposit { token, .. } => *token,
            WatchedEvent::Unwrap {
                underlying_token, ..
            } => *underlying_token,
        }
    }

    /// Account that receives the mirrored asset
    pub fn beneficiary(&self) -> Address {
        match self {
            WatchedEvent::Deposit { recipient, .. } => *recipient,
            WatchedEvent::Unwrap { to, .. } => *to,
        }
    }
}

/// Decode a raw log as the watched event, or `None` if it is anything else
pub fn decode_log(log: &RawLog, contract: Address, kind: EventKind) -> Option<WatchedEvent> {
    if log.address != contract {
        debug!(address = %log.address, "Skipping log from foreign address");
        return None;
    }
    if log.topics.first() != Some(&kind.signature_hash()) {
        debug!(
            tx_hash = %log.tx_hash,
            log_index = log.log_index,
            "Skipping log with foreign topic"
        );
        return None;
    }

    let decoded = match kind {
        EventKind::Deposit => {
            SourceBridge::Deposit::decode_raw_log(log.topics.iter().copied(), &log.data, true)
                .map(|ev| WatchedEvent::Deposit {
                    token: ev.token,
                    recipient: ev.recipient,
                    amount: ev.amount,
                    source_tx_hash: log.tx_hash,
                    block_number: log.block_number,
                    log_index: log.log_index,
                })
        }
        EventKind::Unwrap => {
            DestinationBridge::Unwrap::decode_raw_log(log.topics.iter().copied(), &log.data, true)
                .map(|ev| WatchedEvent::Unwrap {
                    underlying_token: ev.underlying_token,
                    to: ev.to,
                    amount: ev.amount,
                    source_tx_hash: log.tx_hash,
                    block_number: log.block_number,
                    log_index: log.log_index,
                })
        }
    };

    match decoded {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(
                tx_hash = %log.tx_hash,
                log_index = log.log_index,
                event = kind.name(),
                error = %RelayError::Decode(e.to_string()),
                "Skipping undecodable log"
            );
            None
        }
    }
}

/// Scans one chain for one event kind at one contract
pub struct EventScanner {
    connector: Arc<dyn ChainConnector>,
    contract: Address,
    kind: EventKind,
    batch_threshold: u64,
}

/// The queries still to run for a window, produced one at a time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    next: Option<u64>,
    to_block: u64,
    per_block: bool,
}

impl QueryPlan {
    fn new(window: ScanWindow, per_block: bool) -> Self {
        Self {
            next: Some(window.from_block),
            to_block: window.to_block,
            per_block,
        }
    }

    /// Query the rest of the window one block at a time, starting at `from`
    fn split_from(&mut self, from: u64) {
        self.next = Some(from);
        self.per_block = true;
    }
}

impl Iterator for QueryPlan {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<(u64, u64)> {
        let from = self.next?;
        let to = if self.per_block { from } else { self.to_block };
        self.next = (to < self.to_block).then(|| to + 1);
        Some((from, to))
    }
}

struct ScanState {
    plan: QueryPlan,
    buffered: VecDeque<WatchedEvent>,
}

impl EventScanner {
    pub fn new(connector: Arc<dyn ChainConnector>, contract: Address, kind: EventKind) -> Self {
        let batch_threshold = connector.spec().log_batch_threshold;
        Self {
            connector,
            contract,
            kind,
            batch_threshold,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn connector(&self) -> &Arc<dyn ChainConnector> {
        &self.connector
    }

    /// Ranges to query for a window, generated as the scan advances
    pub fn plan(&self, window: ScanWindow) -> QueryPlan {
        QueryPlan::new(window, window.span() > self.batch_threshold)
    }

    /// Lazily scan a window. Each item is one decoded event; a query that
    /// exhausts its retries ends the stream with the error.
    pub fn scan(&self, window: ScanWindow) -> impl Stream<Item = Result<WatchedEvent>> + Send + '_ {
        let state = ScanState {
            plan: self.plan(window),
            buffered: VecDeque::new(),
        };

        stream::try_unfold(state, move |mut state| async move {
            loop {
                if let Some(event) = state.buffered.pop_front() {
                    return Ok(Some((event, state)));
                }
                let Some((from, to)) = state.plan.next() else {
                    return Ok(None);
                };

                match self.fetch_range(from, to).await {
                    Ok(events) => state.buffered.extend(events),
                    Err(e) if from < to && classify(&e) == ErrorClass::RangeTooLarge => {
                        debug!(
                            chain = %self.connector.spec().name,
                            from,
                            to,
                            error = %e,
                            "Endpoint refused range, querying block by block"
                        );
                        state.plan.split_from(from);
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }

    /// Scan a window and collect every decoded event
    pub async fn scan_all(&self, window: ScanWindow) -> Result<Vec<WatchedEvent>> {
        self.scan(window).try_collect().await
    }

    async fn fetch_range(&self, from: u64, to: u64) -> Result<Vec<WatchedEvent>> {
        let query = LogQuery {
            address: self.contract,
            event_signature: self.kind.signature_hash(),
            from_block: from,
            to_block: to,
        };
        let connector = &self.connector;
        let query_ref = &query;

        let logs = with_retry(&connector.spec().retry, "eth_getLogs", move || {
            connector.get_logs(query_ref)
        })
        .await?;

        let mut events: Vec<WatchedEvent> = logs
            .iter()
            .filter_map(|log| decode_log(log, self.contract, self.kind))
            .collect();
        // Stable: keeps the endpoint's order within a block
        events.sort_by_key(WatchedEvent::block_number);

        if !events.is_empty() {
            debug!(
                chain = %connector.spec().name,
                event = self.kind.name(),
                count = events.len(),
                from,
                to,
                "Found events"
            );
        }

        Ok(events)
    }
}
