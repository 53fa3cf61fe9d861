//! Core of the deposit/withdrawal bridge relay.
//!
//! The relay watches a `source` and a `destination` chain for bridge events and
//! mirrors each one onto the opposite chain:
//!
//! - `Deposit` on the source chain becomes a `wrap` call on the destination chain
//! - `Unwrap` on the destination chain becomes a `withdraw` call on the source chain
//!
//! ## Modules
//!
//! - [`chain`] - chain registry, RPC connector, proof-of-authority header handling
//! - [`contract_info`] - contract address/ABI resolution per chain role
//! - [`scanner`] - block-range log scanning and event decoding
//! - [`engine`] - the relay state machine with idempotent submission
//! - [`retry`] - bounded retries with per-chain backoff
//! - [`signer`] - transaction signing capability

pub mod bounded_cache;
pub mod chain;
pub mod contract_info;
pub mod contracts;
pub mod engine;
pub mod error;
pub mod redact;
pub mod retry;
pub mod scanner;
pub mod signer;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use chain::{ChainConnector, ChainRegistry, ChainSpec, ConsensusAdapter, RpcConnector};
pub use contract_info::{ContractInfo, ContractInfoProvider, StaticContractInfo};
pub use engine::{
    EngineConfig, EventOutcome, Reconciliation, RelayAction, RelayEngine, RelayJournal,
    RelayReport,
};
pub use error::{RelayError, Result, RpcErrorKind};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use scanner::{EventKind, EventScanner, QueryPlan, WatchedEvent};
pub use signer::{LocalKeySigner, RelaySigner, SignedTx, UnsignedTx};
pub use types::{BlockSpec, ChainRole, ProcessedEventKey, ScanWindow};
