//! Contract address and interface resolution per chain role
//!
//! The contract-info document has one entry per role:
//!
//! ```json
//! {
//!   "source":      { "address": "0x...", "abi": [ ... ] },
//!   "destination": { "address": "0x...", "abi": [ ... ] }
//! }
//! ```
//!
//! The `abi` member may also be a JSON-encoded string, as emitted by some
//! deployment tools.

use std::path::Path;

use alloy::json_abi::JsonAbi;
use alloy::primitives::Address;
use serde::Deserialize;

use crate::error::{RelayError, Result};
use crate::types::ChainRole;

/// Deployed contract for one chain role
#[derive(Debug, Clone)]
pub struct ContractInfo {
    pub address: Address,
    pub abi: JsonAbi,
}

impl ContractInfo {
    pub fn new(address: Address, abi: JsonAbi) -> Self {
        Self { address, abi }
    }

    /// Whether the ABI declares an event with this exact signature
    pub fn has_event(&self, name: &str, signature: &str) -> bool {
        self.abi
            .events
            .get(name)
            .is_some_and(|events| events.iter().any(|e| e.signature() == signature))
    }

    /// Whether the ABI declares a function with this exact signature
    pub fn has_function(&self, name: &str, signature: &str) -> bool {
        self.abi
            .functions
            .get(name)
            .is_some_and(|functions| functions.iter().any(|f| f.signature() == signature))
    }

    pub fn require_event(&self, role: ChainRole, name: &str, signature: &str) -> Result<()> {
        if self.has_event(name, signature) {
            Ok(())
        } else {
            Err(RelayError::configuration(format!(
                "{} contract {} does not declare event {}",
                role, self.address, signature
            )))
        }
    }

    pub fn require_function(&self, role: ChainRole, name: &str, signature: &str) -> Result<()> {
        if self.has_function(name, signature) {
            Ok(())
        } else {
            Err(RelayError::configuration(format!(
                "{} contract {} does not declare function {}",
                role, self.address, signature
            )))
        }
    }
}

/// Resolves a chain role to its deployed contract
pub trait ContractInfoProvider: Send + Sync {
    fn contract_info(&self, role: ChainRole) -> Result<ContractInfo>;
}

/// Contract info loaded once from static configuration
#[derive(Debug, Clone)]
pub struct StaticContractInfo {
    source: ContractInfo,
    destination: ContractInfo,
}

#[derive(Deserialize)]
struct RawDocument {
    source: Option<RawEntry>,
    destination: Option<RawEntry>,
}

#[derive(Deserialize)]
struct RawEntry {
    address: String,
    abi: serde_json::Value,
}

impl StaticContractInfo {
    pub fn new(source: ContractInfo, destination: ContractInfo) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Parse the contract-info JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let doc: RawDocument = serde_json::from_str(json)
            .map_err(|e| RelayError::configuration(format!("invalid contract info: {}", e)))?;

        let source = doc
            .source
            .ok_or_else(|| RelayError::configuration("contract info has no 'source' entry"))?;
        let destination = doc.destination.ok_or_else(|| {
            RelayError::configuration("contract info has no 'destination' entry")
        })?;

        Ok(Self {
            source: parse_entry(ChainRole::Source, source)?,
            destination: parse_entry(ChainRole::Destination, destination)?,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            RelayError::configuration(format!(
                "failed to read contract info {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&json)
    }
}

impl ContractInfoProvider for StaticContractInfo {
    fn contract_info(&self, role: ChainRole) -> Result<ContractInfo> {
        Ok(match role {
            ChainRole::Source => self.source.clone(),
            ChainRole::Destination => self.destination.clone(),
        })
    }
}

fn parse_entry(role: ChainRole, entry: RawEntry) -> Result<ContractInfo> {
    let address: Address = entry.address.trim().parse().map_err(|e| {
        RelayError::configuration(format!(
            "invalid {} contract address '{}': {}",
            role, entry.address, e
        ))
    })?;

    let abi: JsonAbi = match entry.abi {
        serde_json::Value::String(encoded) => serde_json::from_str(&encoded),
        value => serde_json::from_value(value),
    }
    .map_err(|e| RelayError::configuration(format!("invalid {} contract abi: {}", role, e)))?;

    Ok(ContractInfo { address, abi })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::contract_info_json;

    #[test]
    fn test_parse_document() {
        let source: Address = "0x00000000000000000000000000000000000000a1"
            .parse()
            .unwrap();
        let destination: Address = "0x00000000000000000000000000000000000000b2"
            .parse()
            .unwrap();
        let info = StaticContractInfo::from_json_str(&contract_info_json(source, destination))
            .unwrap();

        let src = info.contract_info(ChainRole::Source).unwrap();
        assert_eq!(src.address, source);
        assert!(src.has_event("Deposit", "Deposit(address,address,uint256)"));
        assert!(src.has_function("withdraw", "withdraw(address,address,uint256)"));
        assert!(!src.has_function("wrap", "wrap(address,address,uint256)"));

        let dst = info.contract_info(ChainRole::Destination).unwrap();
        assert_eq!(dst.address, destination);
        assert!(dst.has_event(
            "Unwrap",
            "Unwrap(address,address,address,address,uint256)"
        ));
        assert!(dst.has_function("wrap", "wrap(address,address,uint256)"));
    }

    #[test]
    fn test_abi_as_string() {
        let json = r#"{
            "source": {
                "address": "0x00000000000000000000000000000000000000a1",
                "abi": "[{\"type\":\"event\",\"name\":\"Deposit\",\"anonymous\":false,\"inputs\":[{\"name\":\"token\",\"type\":\"address\",\"indexed\":true},{\"name\":\"recipient\",\"type\":\"address\",\"indexed\":true},{\"name\":\"amount\",\"type\":\"uint256\",\"indexed\":false}]}]"
            },
            "destination": {
                "address": "0x00000000000000000000000000000000000000b2",
                "abi": []
            }
        }"#;
        let info = StaticContractInfo::from_json_str(json).unwrap();
        let src = info.contract_info(ChainRole::Source).unwrap();
        assert!(src.has_event("Deposit", "Deposit(address,address,uint256)"));
        assert!(src
            .require_function(ChainRole::Source, "withdraw", "withdraw(address,address,uint256)")
            .is_err());
    }

    #[test]
    fn test_missing_role_is_configuration_error() {
        let json = r#"{"source": {"address": "0x00000000000000000000000000000000000000a1", "abi": []}}"#;
        let err = StaticContractInfo::from_json_str(json).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("destination"));
    }

    #[test]
    fn test_bad_address_is_configuration_error() {
        let json = r#"{
            "source": {"address": "0xnothex", "abi": []},
            "destination": {"address": "0x00000000000000000000000000000000000000b2", "abi": []}
        }"#;
        assert!(StaticContractInfo::from_json_str(json).unwrap_err().is_fatal());
    }
}
