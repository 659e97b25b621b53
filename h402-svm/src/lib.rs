//! Solana wallet backend for the h402 payment protocol.
//!
//! Implements [`h402::wallet::Wallet`] on the nonblocking Solana RPC
//! client: lamport and SPL token balances through associated token
//! accounts, transfers with automatic recipient-account creation, and
//! payment transactions signed as v0 messages and serialized to base64
//! for the server to submit.

pub mod ata;
pub mod wallet;

pub use wallet::SolanaWallet;
