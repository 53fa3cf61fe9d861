//! Bridge contract ABI definitions
//!
//! Uses alloy's sol! macro to generate type-safe event and call bindings for the
//! two bridge contracts. Calldata is encoded directly from these bindings; the
//! contract-info document is only used to resolve addresses and to check that
//! the deployed ABI matches what is encoded here.

use alloy::sol;

sol! {
    /// Bridge contract deployed on the source chain
    interface SourceBridge {
        /// Emitted when a user locks `amount` of `token` for `recipient` on the destination chain
        event Deposit(address indexed token, address indexed recipient, uint256 amount);

        /// Release locked `token` to `recipient`
        /// Called by the relay after observing an `Unwrap` on the destination chain
        function withdraw(address token, address recipient, uint256 amount) external;
    }

    /// Bridge contract deployed on the destination chain
    interface DestinationBridge {
        /// Emitted when a holder burns wrapped tokens to redeem the underlying asset
        event Unwrap(
            address indexed underlying_token,
            address indexed wrapped_token,
            address frm,
            address indexed to,
            uint256 amount
        );

        /// Mint the wrapped representation of `underlying_token` to `recipient`
        /// Called by the relay after observing a `Deposit` on the source chain
        function wrap(address underlying_token, address recipient, uint256 amount) external;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::keccak256;
    use alloy::sol_types::{SolCall, SolEvent};

    #[test]
    fn test_event_signatures() {
        assert_eq!(
            SourceBridge::Deposit::SIGNATURE,
            "Deposit(address,address,uint256)"
        );
        assert_eq!(
            SourceBridge::Deposit::SIGNATURE_HASH,
            keccak256("Deposit(address,address,uint256)")
        );
        assert_eq!(
            DestinationBridge::Unwrap::SIGNATURE,
            "Unwrap(address,address,address,address,uint256)"
        );
    }

    #[test]
    fn test_call_signatures() {
        assert_eq!(
            SourceBridge::withdrawCall::SIGNATURE,
            "withdraw(address,address,uint256)"
        );
        assert_eq!(
            DestinationBridge::wrapCall::SIGNATURE,
            "wrap(address,address,uint256)"
        );
    }
}
