//! Scan cursor persisted between runs
//!
//! One JSON file holds, per role, the last block that was fully relayed, the
//! relay transactions whose outcome is still unknown, and the events already
//! acted on in blocks past the cursor:
//!
//! ```json
//! {
//!   "source":      { "last_block": 1005, "unresolved": [], "processed": [] },
//!   "destination": {
//!     "last_block": 2210,
//!     "unresolved": ["0x..."],
//!     "processed": [{ "tx_hash": "0x...", "log_index": 3 }]
//!   }
//! }
//! ```
//!
//! Writes go to a temporary file that is then renamed over the old one.
//! [`CursorJournal`] records each submission here before it is sent.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use alloy::primitives::B256;
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use relay_core::{ChainRole, ProcessedEventKey, RelayError, RelayJournal};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub type SharedCursor = Arc<Mutex<CursorStore>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCursor {
    /// Last block relayed without retryable failures
    pub last_block: Option<u64>,
    /// Submitted transactions awaiting reconciliation
    #[serde(default)]
    pub unresolved: Vec<B256>,
    /// Events relayed in blocks after `last_block`, cleared when it advances
    #[serde(default)]
    pub processed: Vec<ProcessedEventKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorState {
    #[serde(default)]
    pub source: RoleCursor,
    #[serde(default)]
    pub destination: RoleCursor,
}

impl CursorState {
    pub fn role(&self, role: ChainRole) -> &RoleCursor {
        match role {
            ChainRole::Source => &self.source,
            ChainRole::Destination => &self.destination,
        }
    }

    pub fn role_mut(&mut self, role: ChainRole) -> &mut RoleCursor {
        match role {
            ChainRole::Source => &mut self.source,
            ChainRole::Destination => &mut self.destination,
        }
    }
}

#[derive(Debug)]
pub struct CursorStore {
    path: PathBuf,
    state: CursorState,
}

impl CursorStore {
    /// Open the cursor file, starting empty if it does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .wrap_err_with(|| format!("Failed to read cursor file {}", path.display()))?;
            serde_json::from_str(&raw)
                .wrap_err_with(|| format!("Corrupt cursor file {}", path.display()))?
        } else {
            CursorState::default()
        };
        Ok(Self { path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, role: ChainRole) -> &RoleCursor {
        self.state.role(role)
    }

    pub fn state(&self) -> &CursorState {
        &self.state
    }

    /// Apply `f` to a role's cursor and persist the result. The in-memory
    /// state only changes once the file has been written.
    pub fn update(&mut self, role: ChainRole, f: impl FnOnce(&mut RoleCursor)) -> Result<()> {
        let mut next = self.state.clone();
        f(next.role_mut(role));
        if next != self.state {
            save(&self.path, &next)?;
            self.state = next;
        }
        Ok(())
    }
}

/// Keeps one role's in-flight submissions in the cursor file
pub struct CursorJournal {
    role: ChainRole,
    cursor: SharedCursor,
}

impl CursorJournal {
    pub fn new(role: ChainRole, cursor: SharedCursor) -> Self {
        Self { role, cursor }
    }

    async fn update(&self, f: impl FnOnce(&mut RoleCursor)) -> relay_core::Result<()> {
        self.cursor
            .lock()
            .await
            .update(self.role, f)
            .map_err(|e| RelayError::Journal(format!("{:#}", e)))
    }
}

#[async_trait]
impl RelayJournal for CursorJournal {
    async fn record_submission(
        &self,
        key: ProcessedEventKey,
        tx_hash: B256,
    ) -> relay_core::Result<()> {
        self.update(|c| {
            if !c.processed.contains(&key) {
                c.processed.push(key);
            }
            if !c.unresolved.contains(&tx_hash) {
                c.unresolved.push(tx_hash);
            }
        })
        .await
    }

    async fn record_resolved(
        &self,
        _key: ProcessedEventKey,
        tx_hash: B256,
    ) -> relay_core::Result<()> {
        self.update(|c| c.unresolved.retain(|h| *h != tx_hash)).await
    }

    async fn record_abandoned(
        &self,
        key: ProcessedEventKey,
        tx_hash: B256,
    ) -> relay_core::Result<()> {
        self.update(|c| {
            c.processed.retain(|k| *k != key);
            c.unresolved.retain(|h| *h != tx_hash);
        })
        .await
    }
}

fn save(path: &Path, state: &CursorState) -> Result<()> {
    let json = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).wrap_err_with(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .wrap_err_with(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
