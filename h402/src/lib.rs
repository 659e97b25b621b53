//! Core types and state machines for the h402 payment protocol.
//!
//! h402 is an HTTP-level payment negotiation: a server answers a
//! request with `402 Payment Required` and a machine-readable list of
//! acceptable payments; the client pays on-chain (or has an external
//! wallet do so) and retries the request with proof of payment in the
//! `X-PAYMENT` header.
//!
//! This crate holds everything that is independent of both HTTP
//! transport and chain SDKs:
//!
//! - [`proto`] — the wire types (402 body, payment envelope, receipt),
//! - [`amount`] — exact decimal/smallest-unit conversion,
//! - [`registry`] — supported chains, token allow-lists, explorers,
//! - [`wallet`] — the capability trait chain backends implement,
//! - [`paylimit`] — per-symbol spending ceilings,
//! - [`approval`] — the human-approval stores and wait loops.
//!
//! The HTTP negotiation engine lives in `h402-http`; chain backends in
//! `h402-evm` and `h402-svm`.

pub mod amount;
pub mod approval;
pub mod encoding;
pub mod paylimit;
pub mod proto;
pub mod registry;
pub mod timestamp;
pub mod wallet;

pub use amount::AmountError;
pub use approval::{
    AgentEvent, AgentNotifier, ApprovalStatus, ApprovalStore, HeaderWaitOutcome,
    MemoryApprovalStore, NoopNotifier, PayLimitStatus, PayLimitWaitOutcome, PaymentOption,
    PendingApprovalRequest, StoreError, WaitConfig,
};
pub use paylimit::{PayLimitBreach, PayLimitGovernor, PayLimits};
pub use proto::{
    AmountFormat, PaymentEnvelope, PaymentOutcome, PaymentPayload, PaymentReceipt,
    PaymentRequired, PaymentRequirement,
};
pub use registry::{ChainConfig, ChainFamily, ChainRegistry, Environment, WalletKind};
pub use wallet::{PaymentProof, Wallet, WalletConfig, WalletError};
