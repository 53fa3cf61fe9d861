//! Polling passes for both relay directions
//!
//! A [`RelayPass`] owns one [`RelayEngine`] and repeatedly relays the next
//! window of confirmed blocks on its watched chain. The [`RelayManager`] runs
//! the source pass and the destination pass as independent tasks; they share
//! only the cursor file and the status snapshot served by the API.
//!
//! Each submission reaches the cursor file through a [`CursorJournal`] before
//! it is sent, so the cursor never lags behind what the node may have seen.
//! Shutdown is checked between windows and between events; a window that is
//! already relaying an event finishes that event and commits first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use eyre::{eyre, Result};
use relay_core::retry::with_retry;
use relay_core::{
    ChainRole, Reconciliation, RelayEngine, RelayError, RelayReport, RetryPolicy,
    ScanWindow,
};
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::cursor::CursorJournal;
pub use crate::cursor::SharedCursor;
use crate::metrics;

/// Snapshot of one pass, served on /status
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassStatus {
    pub chain: String,
    pub last_block: Option<u64>,
    pub head: Option<u64>,
    pub confirmed_total: u64,
    pub failed_total: u64,
    pub unknown_total: u64,
    pub unresolved: usize,
    pub consecutive_failures: u32,
    pub last_pass_unix: Option<u64>,
    pub last_error: Option<String>,
}

pub type SharedStatus = Arc<RwLock<HashMap<ChainRole, PassStatus>>>;

/// What one pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Nothing new below the confirmation depth
    Idle { head: u64 },
    Relayed {
        window: ScanWindow,
        confirmed: usize,
        advanced: bool,
    },
}

/// Circuit breaker configuration for a pass
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failed passes before pausing
    pub threshold: u32,
    pub pause_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            pause_duration: Duration::from_secs(60),
        }
    }
}

pub struct RelayPass {
    engine: RelayEngine,
    cursor: SharedCursor,
    status: SharedStatus,
    relay: RelayConfig,
    deadline: Option<Duration>,
    start_block: Option<u64>,
    backoff: RetryPolicy,
    circuit_breaker: CircuitBreakerConfig,
    consecutive_failures: u32,
}

impl RelayPass {
    /// Create a pass; keys relayed but not yet behind the cursor are restored
    /// into the engine so a restart does not submit them again, and new
    /// submissions are journaled to the cursor.
    pub async fn new(
        mut engine: RelayEngine,
        cursor: SharedCursor,
        status: SharedStatus,
        relay: RelayConfig,
        deadline: Option<Duration>,
        start_block: Option<u64>,
    ) -> Self {
        let role = engine.role();
        {
            let cursor = cursor.lock().await;
            engine.seed_processed(cursor.get(role).processed.iter().copied());
        }
        engine.set_journal(Arc::new(CursorJournal::new(role, cursor.clone())));
        status.write().await.insert(
            role,
            PassStatus {
                chain: engine.watched_chain().spec().name.clone(),
                ..PassStatus::default()
            },
        );

        Self {
            backoff: RetryPolicy {
                initial_delay: Duration::from_millis(relay.poll_interval_ms),
                max_delay: Duration::from_secs(300),
                ..RetryPolicy::default()
            },
            engine,
            cursor,
            status,
            relay,
            deadline,
            start_block,
            circuit_breaker: CircuitBreakerConfig::default(),
            consecutive_failures: 0,
        }
    }

    pub fn role(&self) -> ChainRole {
        self.engine.role()
    }

    /// Poll until shutdown
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let role = self.role();
        self.engine.set_stop_signal(shutdown.clone());
        let poll_interval = Duration::from_millis(self.relay.poll_interval_ms);
        let mut cycle_count = 0u64;

        info!(
            role = %role,
            poll_interval_ms = self.relay.poll_interval_ms,
            confirmation_depth = self.relay.confirmation_depth,
            "Relay pass starting poll loop"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            cycle_count += 1;

            if cycle_count % 12 == 1 {
                info!(
                    role = %role,
                    cycle = cycle_count,
                    failures = self.consecutive_failures,
                    processed = self.engine.processed_count(),
                    "Relay pass heartbeat"
                );
            }

            if self.consecutive_failures >= self.circuit_breaker.threshold {
                warn!(
                    role = %role,
                    failures = self.consecutive_failures,
                    pause_secs = self.circuit_breaker.pause_duration.as_secs(),
                    "Circuit breaker tripped, pausing pass"
                );
                tokio::select! {
                    _ = tokio::time::sleep(self.circuit_breaker.pause_duration) => {}
                    _ = shutdown.changed() => break,
                }
                self.consecutive_failures = 0;
            }

            let started = Instant::now();
            let result = self.run_once().await;

            let wait = match result {
                Ok(PassOutcome::Relayed { advanced: true, .. }) => {
                    self.consecutive_failures = 0;
                    // More confirmed blocks may be waiting
                    Duration::ZERO
                }
                Ok(_) => {
                    self.consecutive_failures = 0;
                    poll_interval
                }
                Err(e) => {
                    if is_fatal(&e) {
                        error!(role = %role, error = %e, "Fatal configuration error, stopping pass");
                        return Err(e);
                    }
                    self.consecutive_failures += 1;
                    let backoff = self.backoff.delay_for_attempt(self.consecutive_failures - 1);
                    error!(
                        role = %role,
                        error = %e,
                        consecutive_failures = self.consecutive_failures,
                        next_backoff_secs = backoff.as_secs(),
                        "Relay pass failed, will retry with backoff"
                    );
                    self.set_error(Some(e.to_string())).await;
                    backoff
                }
            };
            metrics::record_pass(
                role,
                started.elapsed().as_secs_f64(),
                self.consecutive_failures,
            );

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!(role = %role, "Shutdown signal received, stopping pass");
        Ok(())
    }

    /// Reconcile unresolved submissions, then relay the next window
    pub async fn run_once(&mut self) -> Result<PassOutcome> {
        let role = self.role();
        self.reconcile_unresolved().await?;

        let watched = self.engine.watched_chain().clone();
        let chain = &watched;
        let head = with_retry(&chain.spec().retry, "eth_blockNumber", move || {
            chain.current_height()
        })
        .await?;
        let safe_head = head.saturating_sub(self.relay.confirmation_depth);

        let last_block = self.cursor.lock().await.get(role).last_block;
        let from = match (last_block, self.start_block) {
            (Some(last), _) => last + 1,
            (None, Some(start)) => start,
            (None, None) => safe_head,
        };

        if from > safe_head {
            debug!(role = %role, head, from, "No confirmed blocks to relay");
            self.update_status(|s| {
                s.head = Some(head);
                s.last_error = None;
            })
            .await;
            return Ok(PassOutcome::Idle { head });
        }

        let to = safe_head.min(from + self.relay.max_blocks_per_pass - 1);
        let deadline = self.deadline.map(|d| Instant::now() + d);
        let report = self.engine.scan_blocks_until(from, to, deadline).await?;

        metrics::record_report(&report);
        let advanced = self.commit(&report).await?;

        let confirmed = report.confirmed();
        let failed = report.failed();
        let unknown = report.unknown_outcomes().len();
        self.update_status(|s| {
            s.head = Some(head);
            s.confirmed_total += confirmed as u64;
            s.failed_total += failed as u64;
            s.unknown_total += unknown as u64;
            s.last_pass_unix = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .ok()
                .map(|d| d.as_secs());
            s.last_error = None;
        })
        .await;

        Ok(PassOutcome::Relayed {
            window: report.window,
            confirmed,
            advanced,
        })
    }

    /// Advance the cursor past a window without retryable failures. Keys and
    /// unresolved hashes were journaled as the window was relayed.
    async fn commit(&mut self, report: &RelayReport) -> Result<bool> {
        let role = self.role();
        let advance = !report.has_retryable_failures();

        let mut cursor = self.cursor.lock().await;
        if advance {
            cursor.update(role, |c| {
                c.last_block = Some(report.window.to_block);
                c.processed.clear();
            })?;
        }

        let state = cursor.get(role);
        if let Some(block) = state.last_block {
            metrics::record_cursor(role, block, state.unresolved.len());
        }
        let (last_block, unresolved) = (state.last_block, state.unresolved.len());
        drop(cursor);

        self.update_status(|s| {
            s.last_block = last_block;
            s.unresolved = unresolved;
        })
        .await;

        if advance {
            info!(role = %role, window = %report.window, "Cursor advanced");
        } else {
            warn!(
                role = %role,
                window = %report.window,
                "Window had retryable failures, cursor not advanced"
            );
        }
        Ok(advance)
    }

    async fn reconcile_unresolved(&mut self) -> Result<()> {
        let role = self.role();
        let unresolved = self.cursor.lock().await.get(role).unresolved.clone();
        if unresolved.is_empty() {
            return Ok(());
        }

        let mut resolved = Vec::new();
        for tx_hash in unresolved {
            let status = self.engine.reconcile(tx_hash).await;
            if let Ok(status) = &status {
                metrics::record_reconciliation(role, status);
            }
            match status {
                Ok(Reconciliation::Confirmed { block_number }) => {
                    info!(role = %role, tx_hash = %tx_hash, block = ?block_number, "Unresolved submission confirmed");
                    resolved.push(tx_hash);
                }
                Ok(Reconciliation::Reverted) => {
                    error!(role = %role, tx_hash = %tx_hash, "Unresolved submission reverted");
                    resolved.push(tx_hash);
                }
                Ok(Reconciliation::Pending) => {
                    debug!(role = %role, tx_hash = %tx_hash, "Submission still pending");
                }
                Ok(Reconciliation::Unknown) => {
                    error!(
                        role = %role,
                        tx_hash = %tx_hash,
                        "Submission unknown to the node; verify manually before relaying again"
                    );
                }
                Err(e) => {
                    warn!(role = %role, tx_hash = %tx_hash, error = %e, "Reconciliation failed");
                }
            }
        }

        if !resolved.is_empty() {
            let mut cursor = self.cursor.lock().await;
            cursor.update(role, |c| c.unresolved.retain(|h| !resolved.contains(h)))?;
            let remaining = cursor.get(role).unresolved.len();
            drop(cursor);
            self.update_status(|s| s.unresolved = remaining).await;
        }
        Ok(())
    }

    async fn set_error(&self, error: Option<String>) {
        let failures = self.consecutive_failures;
        self.update_status(|s| {
            s.last_error = error;
            s.consecutive_failures = failures;
        })
        .await;
    }

    async fn update_status(&self, f: impl FnOnce(&mut PassStatus)) {
        let mut status = self.status.write().await;
        let entry = status.entry(self.role()).or_default();
        entry.consecutive_failures = self.consecutive_failures;
        f(entry);
    }
}

fn is_fatal(err: &eyre::Report) -> bool {
    err.downcast_ref::<RelayError>()
        .is_some_and(RelayError::is_fatal)
}

/// Runs both passes until shutdown or until one fails fatally
pub struct RelayManager {
    passes: Vec<RelayPass>,
}

impl RelayManager {
    pub fn new(passes: Vec<RelayPass>) -> Self {
        Self { passes }
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut join_set = tokio::task::JoinSet::new();

        for pass in self.passes {
            let shutdown = shutdown.clone();
            join_set.spawn(async move {
                let role = pass.role();
                (role, pass.run(shutdown).await)
            });
        }

        let mut first_error = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((role, Ok(()))) => {
                    info!(role = %role, "Relay pass stopped");
                }
                Ok((role, Err(e))) => {
                    error!(role = %role, error = ?e, "Relay pass stopped with error");
                    join_set.abort_all();
                    first_error.get_or_insert(e);
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    error!("Relay pass task panicked: {:?}", e);
                    join_set.abort_all();
                    first_error.get_or_insert(eyre!("relay pass task panicked: {}", e));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
