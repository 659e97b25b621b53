//! The wallet capability interface.
//!
//! A [`Wallet`] owns one keypair on one chain and exposes the operations
//! the negotiation engine needs: balance queries, transfers, fee
//! estimation and payment-transaction construction. Chain-specific
//! implementations live in their own crates; the engine only ever sees
//! this trait.

use crate::amount::AmountError;
use crate::proto::PaymentRequirement;
use crate::registry::WalletKind;
use alloy_primitives::U256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Errors surfaced by wallet operations.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    /// An address could not be parsed for the wallet's chain.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The configured private key is malformed.
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    /// The requested token is outside the chain's allow-list.
    #[error("token {token} is not supported on {kind}")]
    UnsupportedToken {
        /// The rejected token address.
        token: String,
        /// The wallet kind that rejected it.
        kind: WalletKind,
    },

    /// The wallet balance does not cover the required amount. This is a
    /// typed variant so callers can branch on it without inspecting
    /// message text.
    #[error("insufficient funds: have {balance}, need {required}")]
    InsufficientFunds {
        /// Required amount, human-readable.
        required: String,
        /// Available balance, human-readable.
        balance: String,
    },

    /// Amount conversion failed.
    #[error(transparent)]
    Amount(#[from] AmountError),

    /// The chain RPC endpoint returned an error.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// Transaction signing failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// A submitted transaction did not confirm within the wait window.
    #[error("transaction {reference} not confirmed within {timeout:?}")]
    ConfirmationTimeout {
        /// The transaction reference being watched.
        reference: String,
        /// How long the wallet waited.
        timeout: Duration,
    },

    /// A transaction confirmed but failed on chain.
    #[error("transaction failed on chain: {0}")]
    TransactionFailed(String),
}

/// The product of [`Wallet::build_payment_transaction`]: transaction
/// material in the chain family's wire form plus a reference the chain
/// can be queried by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentProof {
    /// Signed transaction: hex for EVM, base64 for Solana.
    pub transaction: String,
    /// Chain-queryable reference: transaction hash (EVM) or first
    /// signature (Solana).
    pub reference: String,
}

/// Static configuration for constructing a wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Which backend this wallet drives.
    #[serde(rename = "type")]
    pub kind: WalletKind,
    /// The wallet address. Informational; implementations re-derive the
    /// address from the key and must reject a mismatch.
    #[serde(default)]
    pub address: String,
    /// Hex-encoded private key material.
    pub private_key: String,
}

/// One keypair on one chain.
///
/// All operations take amounts in smallest units ([`U256`]); conversion
/// from wire amounts happens in [`crate::amount`].
#[async_trait]
pub trait Wallet: Send + Sync {
    /// The wallet's address in the chain's canonical text form.
    fn address(&self) -> &str;

    /// Which backend this wallet drives.
    fn kind(&self) -> WalletKind;

    /// Native currency balance, in smallest units.
    async fn balance(&self) -> Result<U256, WalletError>;

    /// Balance of one allow-listed token, in its smallest units.
    async fn token_balance(&self, token_address: &str) -> Result<U256, WalletError>;

    /// Balances of every allow-listed token, keyed by ticker symbol.
    async fn all_token_balances(&self) -> Result<HashMap<String, U256>, WalletError>;

    /// Transfers native currency and returns the transaction reference.
    async fn send_native(&self, to: &str, amount: U256) -> Result<String, WalletError>;

    /// Transfers an allow-listed token and returns the transaction
    /// reference.
    async fn send_token(
        &self,
        token_address: &str,
        to: &str,
        amount: U256,
    ) -> Result<String, WalletError>;

    /// Estimated fee for a native transfer, in smallest units of the
    /// native currency.
    async fn estimate_fee(&self, to: &str, amount: U256) -> Result<U256, WalletError>;

    /// Estimated fee for a token transfer, in smallest units of the
    /// native currency.
    async fn estimate_token_fee(
        &self,
        token_address: &str,
        to: &str,
        amount: U256,
    ) -> Result<U256, WalletError>;

    /// Polls the chain until `reference` reaches a terminal state or
    /// `timeout` elapses.
    async fn wait_for_transaction(
        &self,
        reference: &str,
        timeout: Duration,
    ) -> Result<(), WalletError>;

    /// Builds and signs (without broadcasting) the transaction paying
    /// `requirement`. Checks the token allow-list and balance coverage
    /// before signing.
    async fn build_payment_transaction(
        &self,
        requirement: &PaymentRequirement,
    ) -> Result<PaymentProof, WalletError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_funds_is_matchable() {
        let err = WalletError::InsufficientFunds {
            required: "1.5".to_owned(),
            balance: "0.2".to_owned(),
        };
        assert!(matches!(err, WalletError::InsufficientFunds { .. }));
        assert_eq!(err.to_string(), "insufficient funds: have 0.2, need 1.5");
    }

    #[test]
    fn wallet_config_uses_type_tag() {
        let config: WalletConfig = serde_json::from_str(
            r#"{"type":"BASE","address":"0xabc","private_key":"deadbeef"}"#,
        )
        .unwrap();
        assert_eq!(config.kind, WalletKind::Base);
        assert_eq!(config.address, "0xabc");
    }
}
