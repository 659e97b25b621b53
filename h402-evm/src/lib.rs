//! EVM wallet backend for the h402 payment protocol.
//!
//! Implements [`h402::wallet::Wallet`] for BNB Smart Chain and Base on
//! the alloy stack: balances (native + ERC-20), legacy transfer
//! construction and local signing, fee estimation and receipt polling.
//! The h402 payment path produces fully signed raw transactions the
//! server broadcasts itself.

pub mod erc20;
pub mod wallet;

pub use wallet::EvmWallet;
