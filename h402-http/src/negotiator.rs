//! The payment negotiation engine.
//!
//! [`PaymentNegotiator`] drives both payment flows over one
//! `reqwest::Client`:
//!
//! - **direct** ([`PaymentNegotiator::send_with_payment_info`]): a 402
//!   is answered by a registered server wallet, which signs the payment
//!   locally; the request is retried with the `X-PAYMENT` header.
//! - **delegated** ([`PaymentNegotiator::send_with_delegated_payment`]):
//!   the offered requirements are pushed to the user as selectable
//!   options, an external wallet produces the header out of band, and
//!   the engine resubmits it verbatim.
//!
//! Soft outcomes never surface as `Err`: a pay-limit breach that is not
//! approved, an insufficient-funds wallet, or a declined delegation all
//! return the original 402 response together with the data describing
//! why no payment happened.

use std::collections::HashMap;
use std::sync::Arc;

use h402::approval::{
    self, AgentNotifier, ApprovalStore, HeaderWaitOutcome, MemoryApprovalStore, NoopNotifier,
    PayLimitWaitOutcome, PaymentOption, PendingApprovalRequest, WaitConfig,
};
use h402::paylimit::{PayLimitBreach, PayLimitGovernor, PayLimits};
use h402::proto::{
    self, PaymentEnvelope, PaymentOutcome, PaymentPayload, PaymentReceipt, PaymentRequired,
    PaymentRequirement,
};
use h402::registry::{ChainRegistry, WalletKind};
use h402::wallet::{Wallet, WalletError};
use http::{HeaderMap, Method, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::NegotiationError;
use crate::messages;

/// What a negotiation produced.
///
/// `response` is always present: the paid response after a successful
/// retry, or the original 402 when the negotiation stopped short of
/// paying. At most one of `payment`, `limit_breach` and `notice` is
/// set.
#[derive(Debug)]
pub struct NegotiationResult {
    /// The response the caller should consume.
    pub response: reqwest::Response,
    /// Settlement details when a payment went through.
    pub payment: Option<PaymentOutcome>,
    /// The breach that blocked the payment, when a pay limit did and the
    /// user did not approve it.
    pub limit_breach: Option<PayLimitBreach>,
    /// A notice the agent should relay, e.g. insufficient funds.
    pub notice: Option<String>,
}

impl NegotiationResult {
    fn passthrough(response: reqwest::Response) -> Self {
        Self {
            response,
            payment: None,
            limit_breach: None,
            notice: None,
        }
    }
}

/// Picks which of the offered requirements to pay.
///
/// Servers list offers in their order of preference, and today the
/// engine honors that by taking the head of the list. Kept as a
/// separate seam so a cost- or chain-aware policy can replace it
/// without touching the flows.
#[must_use]
pub fn select_requirement(accepts: &[PaymentRequirement]) -> Option<&PaymentRequirement> {
    accepts.first()
}

/// The negotiation engine. Construct with [`PaymentNegotiator::new`]
/// and chain `with_*` builders.
pub struct PaymentNegotiator {
    http: reqwest::Client,
    registry: ChainRegistry,
    governor: PayLimitGovernor,
    wallets: HashMap<WalletKind, Arc<dyn Wallet>>,
    store: Arc<dyn ApprovalStore>,
    notifier: Arc<dyn AgentNotifier>,
    agent_id: Uuid,
    user_id: Uuid,
    wait: WaitConfig,
    cancel: CancellationToken,
}

impl std::fmt::Debug for PaymentNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentNegotiator")
            .field("agent_id", &self.agent_id)
            .field("wallets", &self.wallets.keys().collect::<Vec<_>>())
            .field("wait", &self.wait)
            .finish_non_exhaustive()
    }
}

impl PaymentNegotiator {
    /// Creates an engine with no wallets, the built-in pay limits, an
    /// in-memory approval store and a silent notifier.
    #[must_use]
    pub fn new(registry: ChainRegistry) -> Self {
        let governor = PayLimitGovernor::new(PayLimits::defaults(), registry.clone());
        Self {
            http: reqwest::Client::new(),
            registry,
            governor,
            wallets: HashMap::new(),
            store: Arc::new(MemoryApprovalStore::new()),
            notifier: Arc::new(NoopNotifier),
            agent_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            wait: WaitConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Registers a wallet under its own kind. A later wallet of the
    /// same kind replaces the earlier one.
    #[must_use]
    pub fn register_wallet(mut self, wallet: Arc<dyn Wallet>) -> Self {
        self.wallets.insert(wallet.kind(), wallet);
        self
    }

    /// Replaces the pay-limit table.
    #[must_use]
    pub fn with_pay_limits(mut self, limits: PayLimits) -> Self {
        self.governor = PayLimitGovernor::new(limits, self.registry.clone());
        self
    }

    /// Uses `client` for all HTTP traffic.
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Replaces the approval store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ApprovalStore>) -> Self {
        self.store = store;
        self
    }

    /// Replaces the notifier approvals are announced through.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn AgentNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Sets the agent and user every approval is attributed to.
    #[must_use]
    pub fn with_identity(mut self, agent_id: Uuid, user_id: Uuid) -> Self {
        self.agent_id = agent_id;
        self.user_id = user_id;
        self
    }

    /// Overrides approval-wait timing.
    #[must_use]
    pub fn with_wait_config(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    /// Aborts in-progress waits when `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The wallet kinds this engine can pay with.
    #[must_use]
    pub fn wallet_kinds(&self) -> Vec<WalletKind> {
        self.wallets.keys().copied().collect()
    }

    /// Direct flow, response only.
    ///
    /// # Errors
    ///
    /// See [`Self::send_with_payment_info`].
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&[u8]>,
    ) -> Result<reqwest::Response, NegotiationError> {
        Ok(self.send_with_payment_info(method, url, body).await?.response)
    }

    /// Direct flow: pays a 402 from a registered server wallet and
    /// retries.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, unparsable 402 bodies, empty offer
    /// lists, unknown networks, missing wallets, and wallet failures
    /// other than insufficient funds.
    pub async fn send_with_payment_info(
        &self,
        method: Method,
        url: &str,
        body: Option<&[u8]>,
    ) -> Result<NegotiationResult, NegotiationError> {
        let response = self.initial_request(method.clone(), url, body).await?;
        if response.status() != StatusCode::PAYMENT_REQUIRED {
            return Ok(NegotiationResult::passthrough(response));
        }

        let headers = response.headers().clone();
        let raw_body = response.bytes().await?;
        let required = PaymentRequired::from_json_slice(&raw_body)?;
        let requirement =
            select_requirement(&required.accepts).ok_or(NegotiationError::NoRequirements)?;
        info!(
            network_id = %requirement.network_id,
            token = %requirement.token_address,
            amount = %requirement.amount_required,
            "received 402, negotiating payment"
        );

        let kind = WalletKind::from_network_id(&requirement.network_id)?;
        let wallet = self
            .wallets
            .get(&kind)
            .ok_or(NegotiationError::MissingWallet(kind))?;

        if let Some(breach) = self.governor.check(requirement) {
            let outcome = approval::wait_for_pay_limit_approval(
                self.store.as_ref(),
                self.notifier.as_ref(),
                self.agent_id,
                &breach,
                self.wait,
                &self.cancel,
            )
            .await?;
            if outcome != PayLimitWaitOutcome::Approved {
                info!(symbol = %breach.token_symbol, "payment blocked by pay limit");
                return Ok(NegotiationResult {
                    response: rebuild_402(headers, raw_body),
                    payment: None,
                    limit_breach: Some(breach),
                    notice: None,
                });
            }
        }

        let proof = match wallet.build_payment_transaction(requirement).await {
            Ok(proof) => proof,
            Err(WalletError::InsufficientFunds { required, balance }) => {
                warn!(%required, %balance, %kind, "wallet cannot cover payment");
                return Ok(NegotiationResult {
                    response: rebuild_402(headers, raw_body),
                    payment: None,
                    limit_breach: None,
                    notice: Some(messages::INSUFFICIENT_FUNDS_NOTICE.to_owned()),
                });
            }
            Err(err) => return Err(err.into()),
        };

        let payload = PaymentPayload::for_family(kind.family(), proof.transaction, proof.reference.clone());
        let envelope = PaymentEnvelope::for_requirement(requirement, payload);
        let header = envelope.to_header_value()?;

        let final_response = self.retry_request(method, url, body, &header).await?;
        debug!(status = %final_response.status(), "retried with payment header");

        let mut outcome = PaymentOutcome {
            amount: requirement.amount_required,
            amount_format: requirement.amount_required_format,
            wallet_kind: kind,
            transaction: proof.reference,
            namespace: requirement.namespace.clone(),
            token_address: requirement.token_address.clone(),
        };
        apply_receipt(&mut outcome, final_response.headers());
        info!(transaction = %outcome.transaction, %kind, "payment settled");

        Ok(NegotiationResult {
            response: final_response,
            payment: Some(outcome),
            limit_breach: None,
            notice: None,
        })
    }

    /// Delegated flow: asks an external wallet for the payment header
    /// instead of signing locally.
    ///
    /// Every offered requirement becomes a [`PaymentOption`] (with
    /// decimals and symbol filled from the registry when the server
    /// omitted them), a [`PendingApprovalRequest`] is persisted, and the
    /// engine waits for an approval carrying the signed header. The
    /// header is resubmitted exactly as received.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, unparsable 402 bodies, empty offer
    /// lists, store failures while persisting the request, and
    /// approvals naming an unknown option.
    pub async fn send_with_delegated_payment(
        &self,
        method: Method,
        url: &str,
        body: Option<&[u8]>,
    ) -> Result<NegotiationResult, NegotiationError> {
        let response = self.initial_request(method.clone(), url, body).await?;
        if response.status() != StatusCode::PAYMENT_REQUIRED {
            return Ok(NegotiationResult::passthrough(response));
        }

        let headers = response.headers().clone();
        let raw_body = response.bytes().await?;
        let required = PaymentRequired::from_json_slice(&raw_body)?;
        let preferred =
            select_requirement(&required.accepts).ok_or(NegotiationError::NoRequirements)?;
        // No wallet is needed here, but an offer on a network nothing
        // can pay on is a protocol defect worth failing fast on.
        WalletKind::from_network_id(&preferred.network_id)?;

        let options: Vec<PaymentOption> = required
            .accepts
            .iter()
            .map(|requirement| PaymentOption {
                id: Uuid::new_v4(),
                requirement: self.annotate(requirement),
            })
            .collect();

        let record = PendingApprovalRequest::new(self.agent_id, self.user_id);
        let request_id = record.id;
        self.store.create_request(record).await?;
        info!(%request_id, options = options.len(), "delegating payment to external wallet");

        let wait = approval::wait_for_payment_header(
            self.store.as_ref(),
            self.notifier.as_ref(),
            self.agent_id,
            request_id,
            options.clone(),
            self.wait,
            &self.cancel,
        )
        .await;

        let (selected, header) = match wait {
            HeaderWaitOutcome::Approved {
                selected_option,
                payment_header,
            } => (selected_option, payment_header),
            HeaderWaitOutcome::Cancelled => {
                info!(%request_id, "delegated payment cancelled");
                return Ok(NegotiationResult {
                    response: rebuild_402(headers, raw_body),
                    payment: None,
                    limit_breach: None,
                    notice: Some(messages::PAYMENT_HEADER_CANCELLED_NOTICE.to_owned()),
                });
            }
            HeaderWaitOutcome::TimedOut => {
                info!(%request_id, "delegated payment timed out");
                return Ok(NegotiationResult {
                    response: rebuild_402(headers, raw_body),
                    payment: None,
                    limit_breach: None,
                    notice: Some(messages::PAYMENT_HEADER_TIMEOUT_NOTICE.to_owned()),
                });
            }
        };

        let option = options
            .into_iter()
            .find(|option| option.id == selected)
            .ok_or(NegotiationError::UnknownOption(selected))?;
        let requirement = option.requirement;

        let final_response = self.retry_request(method, url, body, &header).await?;
        debug!(status = %final_response.status(), "resubmitted external payment header");

        let kind = WalletKind::from_network_id(&requirement.network_id)?;
        let mut outcome = PaymentOutcome {
            amount: requirement.amount_required,
            amount_format: requirement.amount_required_format,
            wallet_kind: kind,
            // The header value stands in until the receipt names the
            // settled transaction.
            transaction: header,
            namespace: requirement.namespace.clone(),
            token_address: requirement.token_address,
        };
        apply_receipt(&mut outcome, final_response.headers());
        info!(transaction = %outcome.transaction, %kind, "delegated payment settled");

        Ok(NegotiationResult {
            response: final_response,
            payment: Some(outcome),
            limit_breach: None,
            notice: None,
        })
    }

    async fn initial_request(
        &self,
        method: Method,
        url: &str,
        body: Option<&[u8]>,
    ) -> Result<reqwest::Response, NegotiationError> {
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(body.to_vec());
        }
        Ok(request.send().await?)
    }

    async fn retry_request(
        &self,
        method: Method,
        url: &str,
        body: Option<&[u8]>,
        payment_header: &str,
    ) -> Result<reqwest::Response, NegotiationError> {
        let mut request = self
            .http
            .request(method, url)
            .header(proto::PAYMENT_HEADER, payment_header)
            .header(proto::EXPOSE_HEADERS, proto::EXPOSED_RESPONSE_HEADER);
        if let Some(body) = body {
            request = request
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(body.to_vec());
        }
        Ok(request.send().await?)
    }

    /// Fills in decimals and symbol the server omitted, so the approver
    /// sees a complete offer.
    fn annotate(&self, requirement: &PaymentRequirement) -> PaymentRequirement {
        let mut annotated = requirement.clone();
        let Ok(kind) = WalletKind::from_network_id(&requirement.network_id) else {
            return annotated;
        };
        if annotated.explicit_decimals().is_none() {
            annotated.token_decimals = self
                .registry
                .decimals_for_token(kind, &annotated.token_address);
        }
        if annotated.explicit_symbol().is_none() {
            annotated.token_symbol = self
                .registry
                .symbol_for_token(kind, &annotated.token_address)
                .map(str::to_owned);
        }
        annotated
    }
}

/// Reconstructs the consumed 402 so callers always get a response back,
/// even when the negotiation stopped before paying.
fn rebuild_402(headers: HeaderMap, body: impl Into<reqwest::Body>) -> reqwest::Response {
    let mut response = http::Response::new(body.into());
    *response.status_mut() = StatusCode::PAYMENT_REQUIRED;
    *response.headers_mut() = headers;
    reqwest::Response::from(response)
}

/// Overrides the outcome's settlement references from the server's
/// receipt header, when one is present and readable. Unreadable
/// receipts are ignored; the response itself already succeeded.
fn apply_receipt(outcome: &mut PaymentOutcome, headers: &HeaderMap) {
    let Some(value) = headers
        .get(proto::PAYMENT_RESPONSE_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        return;
    };
    if let Some(receipt) = PaymentReceipt::from_header_value(value) {
        outcome.transaction = receipt.transaction;
        outcome.namespace = receipt.namespace;
    } else {
        debug!("ignoring unreadable payment receipt header");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use h402::proto::AmountFormat;
    use h402::registry::Environment;
    use rust_decimal::Decimal;

    fn requirement(network_id: &str) -> PaymentRequirement {
        PaymentRequirement {
            namespace: "evm".to_owned(),
            token_address: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".to_owned(),
            amount_required: Decimal::ONE,
            amount_required_format: AmountFormat::Decimal,
            pay_to_address: "0xdest".to_owned(),
            network_id: network_id.to_owned(),
            description: String::new(),
            resource: String::new(),
            scheme: "exact".to_owned(),
            mime_type: String::new(),
            estimated_processing_time: 0,
            token_decimals: None,
            token_symbol: None,
        }
    }

    #[test]
    fn selection_takes_the_first_offer() {
        let offers = vec![requirement("8453"), requirement("56")];
        assert_eq!(select_requirement(&offers), Some(&offers[0]));
        assert_eq!(select_requirement(&[]), None);
    }

    #[test]
    fn annotation_fills_registry_metadata() {
        let negotiator = PaymentNegotiator::new(ChainRegistry::with_defaults(Environment::Mainnet));
        let annotated = negotiator.annotate(&requirement("8453"));
        assert_eq!(annotated.token_decimals, Some(6));
        assert_eq!(annotated.token_symbol.as_deref(), Some("USDC"));
    }

    #[test]
    fn annotation_keeps_server_metadata() {
        let negotiator = PaymentNegotiator::new(ChainRegistry::with_defaults(Environment::Mainnet));
        let mut offered = requirement("8453");
        offered.token_decimals = Some(8);
        offered.token_symbol = Some("AXL".to_owned());
        let annotated = negotiator.annotate(&offered);
        assert_eq!(annotated.token_decimals, Some(8));
        assert_eq!(annotated.token_symbol.as_deref(), Some("AXL"));
    }

    #[test]
    fn annotation_leaves_unknown_networks_alone() {
        let negotiator = PaymentNegotiator::new(ChainRegistry::with_defaults(Environment::Mainnet));
        let annotated = negotiator.annotate(&requirement("999999"));
        assert_eq!(annotated.token_decimals, None);
        assert_eq!(annotated.token_symbol, None);
    }
}
