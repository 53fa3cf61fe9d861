//! JSON-lines listing of bridge events, used by the `events` subcommand

use std::io::Write;

use alloy::primitives::{Address, B256};
use eyre::{Result, WrapErr};
use futures::TryStreamExt;
use relay_core::{EventScanner, ScanWindow, WatchedEvent};
use serde::Serialize;

/// One exported event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub chain: String,
    pub event: &'static str,
    pub block_number: u64,
    pub token: Address,
    pub recipient: Address,
    /// Base units as a decimal string
    pub amount: String,
    pub transaction_hash: B256,
    pub log_index: u64,
}

impl EventRecord {
    pub fn new(chain: &str, event: &WatchedEvent) -> Self {
        Self {
            chain: chain.to_string(),
            event: event.kind().name(),
            block_number: event.block_number(),
            token: event.token(),
            recipient: event.beneficiary(),
            amount: event.amount().to_string(),
            transaction_hash: event.tx_hash(),
            log_index: event.log_index(),
        }
    }
}

/// Write every event in `window` as one JSON object per line, in chain order.
/// Returns the number of lines written.
pub async fn export_events<W: Write>(
    scanner: &EventScanner,
    window: ScanWindow,
    out: &mut W,
) -> Result<usize> {
    let chain = scanner.connector().spec().name.clone();
    let events = scanner.scan(window);
    futures::pin_mut!(events);

    let mut written = 0;
    while let Some(event) = events.try_next().await? {
        let line = serde_json::to_string(&EventRecord::new(&chain, &event))?;
        writeln!(out, "{}", line).wrap_err("Failed to write event")?;
        written += 1;
    }
    out.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;

    #[test]
    fn test_record_fields() {
        let event = WatchedEvent::Unwrap {
            underlying_token: Address::repeat_byte(0x11),
            to: Address::repeat_byte(0x22),
            amount: U256::from(1_500_000_000_000_000_000u128),
            source_tx_hash: B256::repeat_byte(0x33),
            block_number: 2210,
            log_index: 4,
        };

        let json = serde_json::to_value(EventRecord::new("bsc", &event)).unwrap();
        assert_eq!(json["chain"], "bsc");
        assert_eq!(json["event"], "Unwrap");
        assert_eq!(json["block_number"], 2210);
        assert_eq!(json["amount"], "1500000000000000000");
        assert_eq!(json["recipient"], format!("{:#x}", Address::repeat_byte(0x22)));
        assert_eq!(json["log_index"], 4);
    }
}
