//! Error types for the negotiation engine.

use h402::registry::{UnsupportedNetwork, WalletKind};
use h402::{StoreError, WalletError};

/// Hard failures of a payment negotiation.
///
/// Soft outcomes (pay-limit breach, insufficient funds, a declined
/// approval) are not errors: they come back as data on
/// [`crate::NegotiationResult`] together with the original 402
/// response.
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    /// The HTTP transport failed.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// A 402 response carried an unparsable body, or a wire document
    /// could not be serialized.
    #[error("invalid payment document: {0}")]
    InvalidDocument(#[from] serde_json::Error),

    /// A 402 response offered no payment requirements.
    #[error("no payment requirements in 402 response")]
    NoRequirements,

    /// The selected requirement named a network no wallet kind maps to.
    #[error(transparent)]
    UnsupportedNetwork(#[from] UnsupportedNetwork),

    /// No wallet is registered for the network the server asked for.
    #[error("no wallet registered for {0}")]
    MissingWallet(WalletKind),

    /// The wallet failed while building the payment.
    #[error(transparent)]
    Wallet(#[from] WalletError),

    /// The approval store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An approval named an option that was never offered.
    #[error("approved option {0} is not among the offered requirements")]
    UnknownOption(uuid::Uuid),
}
