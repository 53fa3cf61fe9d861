//! Bridge relayer service
//!
//! Wires the relay core to real chains: environment configuration, a cursor
//! file that survives restarts, one polling pass per direction, and the
//! health/metrics API.

pub mod api;
pub mod config;
pub mod cursor;
pub mod export;
pub mod manager;
pub mod metrics;
