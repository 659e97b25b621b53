//! Minimal ERC-20 interface bindings.
//!
//! Only the two functions the wallet actually calls: `balanceOf` for
//! balance queries and `transfer` for token payments. Calldata is
//! generated with [`alloy_sol_types::sol!`] and sent through plain
//! `eth_call`/raw transactions, no contract instance needed.

use alloy_sol_types::sol;

sol! {
    /// The subset of ERC-20 used for h402 payments.
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function transfer(address to, uint256 value) external returns (bool);
    }
}
