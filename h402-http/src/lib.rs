//! HTTP negotiation engine for the h402 payment protocol.
//!
//! This crate turns `402 Payment Required` responses into settled
//! payments. [`PaymentNegotiator`] implements the two negotiation
//! flows (server-wallet signing and delegation to an external wallet);
//! [`HttpClient`] wraps it in a plain HTTP-client surface so callers
//! can stay oblivious to payments entirely.
//!
//! Chain backends plug in through [`h402::wallet::Wallet`]; see
//! `h402-evm` and `h402-svm`.

pub mod error;
pub mod facade;
pub mod messages;
pub mod negotiator;

pub use error::NegotiationError;
pub use facade::{HttpClient, HttpClientOptions, payments_enabled_from_env};
pub use negotiator::{NegotiationResult, PaymentNegotiator, select_requirement};
