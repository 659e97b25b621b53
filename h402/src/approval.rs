//! Human-approval plumbing for blocked payments.
//!
//! Two situations pause a negotiation for an out-of-band decision:
//!
//! - the direct flow hits a pay-limit breach and waits for the agent's
//!   per-agent status cell to flip to approved,
//! - the delegated flow persists a [`PendingApprovalRequest`] and waits
//!   for an external wallet to attach a signed payment header to it.
//!
//! Both waits share one shape: persist the waiting state, push a single
//! notification through [`AgentNotifier`], then poll the
//! [`ApprovalStore`] on a fixed interval until a terminal status
//! appears, the ceiling elapses, or the caller cancels. On timeout the
//! record is cancelled best-effort so an approval arriving later cannot
//! resurrect a request nobody is waiting on.

use crate::paylimit::PayLimitBreach;
use crate::proto::PaymentRequirement;
use crate::timestamp::UnixTimestamp;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize, Serializer};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Lifecycle of a pending approval request. Transitions are monotonic:
/// once terminal, a record never returns to [`ApprovalStatus::Pending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApprovalStatus {
    /// Created, awaiting a decision.
    Pending,
    /// Approved with a selected option and payment header.
    Approved,
    /// Declined, or timed out.
    Cancelled,
}

impl ApprovalStatus {
    /// Whether this status admits no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Cancelled)
    }
}

/// Per-agent status cell for the direct-flow pay-limit wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PayLimitStatus {
    /// No wait in progress.
    #[default]
    Idle,
    /// A breach occurred and the engine is waiting on a decision.
    Waiting,
    /// The user approved the blocked payment.
    Approved,
    /// The user declined, or the wait timed out.
    Cancelled,
}

/// A delegated-flow approval record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApprovalRequest {
    /// Record id, also the correlation id pushed to the UI.
    pub id: Uuid,
    /// The agent whose negotiation is blocked.
    pub agent_id: Uuid,
    /// The user who must decide.
    pub user_id: Uuid,
    /// Current lifecycle status.
    pub status: ApprovalStatus,
    /// The option id the approver picked, set on approval.
    pub selected_option: Option<Uuid>,
    /// The externally produced `X-PAYMENT` header, set on approval.
    pub payment_header: Option<String>,
    /// Creation time.
    pub created_at: UnixTimestamp,
    /// Last transition time.
    pub updated_at: UnixTimestamp,
}

impl PendingApprovalRequest {
    /// Creates a fresh pending record.
    #[must_use]
    pub fn new(agent_id: Uuid, user_id: Uuid) -> Self {
        let now = UnixTimestamp::now();
        Self {
            id: Uuid::new_v4(),
            agent_id,
            user_id,
            status: ApprovalStatus::Pending,
            selected_option: None,
            payment_header: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Errors from an [`ApprovalStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record with the given id.
    #[error("approval request {0} not found")]
    NotFound(Uuid),
    /// A terminal record cannot transition again.
    #[error("approval request {id} already resolved as {status:?}")]
    AlreadyResolved {
        /// The record id.
        id: Uuid,
        /// Its terminal status.
        status: ApprovalStatus,
    },
    /// The backend itself failed.
    #[error("approval store backend: {0}")]
    Backend(String),
}

/// Durable storage for approval state. Production deployments back this
/// with a database; [`MemoryApprovalStore`] is the in-process baseline.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Persists a new pending record.
    async fn create_request(&self, request: PendingApprovalRequest) -> Result<(), StoreError>;

    /// Fetches a record by id.
    async fn request(&self, id: Uuid) -> Result<PendingApprovalRequest, StoreError>;

    /// Resolves a pending record as approved, attaching the selected
    /// option and payment header.
    async fn approve_request(
        &self,
        id: Uuid,
        selected_option: Uuid,
        payment_header: String,
    ) -> Result<(), StoreError>;

    /// Resolves a pending record as cancelled.
    async fn cancel_request(&self, id: Uuid) -> Result<(), StoreError>;

    /// Reads an agent's pay-limit status cell. Agents without a cell
    /// read as [`PayLimitStatus::Idle`].
    async fn pay_limit_status(&self, agent_id: Uuid) -> Result<PayLimitStatus, StoreError>;

    /// Writes an agent's pay-limit status cell.
    async fn set_pay_limit_status(
        &self,
        agent_id: Uuid,
        status: PayLimitStatus,
    ) -> Result<(), StoreError>;
}

/// In-memory [`ApprovalStore`] on concurrent maps.
#[derive(Debug, Default)]
pub struct MemoryApprovalStore {
    requests: DashMap<Uuid, PendingApprovalRequest>,
    statuses: DashMap<Uuid, PayLimitStatus>,
}

impl MemoryApprovalStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalStore for MemoryApprovalStore {
    async fn create_request(&self, request: PendingApprovalRequest) -> Result<(), StoreError> {
        self.requests.insert(request.id, request);
        Ok(())
    }

    async fn request(&self, id: Uuid) -> Result<PendingApprovalRequest, StoreError> {
        self.requests
            .get(&id)
            .map(|entry| entry.clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn approve_request(
        &self,
        id: Uuid,
        selected_option: Uuid,
        payment_header: String,
    ) -> Result<(), StoreError> {
        let mut entry = self.requests.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if entry.status.is_terminal() {
            return Err(StoreError::AlreadyResolved {
                id,
                status: entry.status,
            });
        }
        entry.status = ApprovalStatus::Approved;
        entry.selected_option = Some(selected_option);
        entry.payment_header = Some(payment_header);
        entry.updated_at = UnixTimestamp::now();
        Ok(())
    }

    async fn cancel_request(&self, id: Uuid) -> Result<(), StoreError> {
        let mut entry = self.requests.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if entry.status.is_terminal() {
            return Err(StoreError::AlreadyResolved {
                id,
                status: entry.status,
            });
        }
        entry.status = ApprovalStatus::Cancelled;
        entry.updated_at = UnixTimestamp::now();
        Ok(())
    }

    async fn pay_limit_status(&self, agent_id: Uuid) -> Result<PayLimitStatus, StoreError> {
        Ok(self
            .statuses
            .get(&agent_id)
            .map_or(PayLimitStatus::Idle, |entry| *entry))
    }

    async fn set_pay_limit_status(
        &self,
        agent_id: Uuid,
        status: PayLimitStatus,
    ) -> Result<(), StoreError> {
        self.statuses.insert(agent_id, status);
        Ok(())
    }
}

/// One selectable payment option pushed to the approver: the offered
/// requirement plus the option id an approval must echo back.
///
/// Serializes flat, with the option id under `selectedRequestID`
/// alongside the requirement's own fields.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentOption {
    /// The id an approval refers to this option by.
    pub id: Uuid,
    /// The annotated requirement (decimals and symbol filled in).
    pub requirement: PaymentRequirement,
}

impl Serialize for PaymentOption {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut value =
            serde_json::to_value(&self.requirement).map_err(serde::ser::Error::custom)?;
        if let serde_json::Value::Object(map) = &mut value {
            map.insert(
                "selectedRequestID".to_owned(),
                serde_json::Value::String(self.id.to_string()),
            );
        }
        value.serialize(serializer)
    }
}

/// Notifications pushed to the agent's user when a negotiation pauses.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AgentEvent {
    /// The delegated flow needs an externally signed payment header.
    #[serde(rename_all = "camelCase")]
    RequestPaymentHeader {
        /// The pending approval record id.
        request_id: Uuid,
        /// The options the approver may pick from.
        payment_requests: Vec<PaymentOption>,
    },
    /// The direct flow hit a pay limit and needs a go-ahead.
    RequestPaymentApproval {
        /// The breach description shown to the user.
        message: String,
    },
}

impl AgentEvent {
    /// The event name used on the push channel.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RequestPaymentHeader { .. } => "request_payment_header",
            Self::RequestPaymentApproval { .. } => "request_payment_approval",
        }
    }
}

/// Delivery channel for [`AgentEvent`]s. Delivery is fire-and-forget:
/// the wait proceeds whether or not anyone is listening.
#[async_trait]
pub trait AgentNotifier: Send + Sync {
    /// Pushes one event for `agent_id`.
    async fn notify(&self, agent_id: Uuid, event: AgentEvent);
}

/// A notifier that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl AgentNotifier for NoopNotifier {
    async fn notify(&self, _agent_id: Uuid, _event: AgentEvent) {}
}

/// Timing of an approval wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    /// How often the store is polled.
    pub poll_interval: Duration,
    /// Hard ceiling on the whole wait.
    pub ceiling: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            ceiling: Duration::from_secs(300),
        }
    }
}

/// Terminal result of a pay-limit approval wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayLimitWaitOutcome {
    /// The user approved the blocked payment.
    Approved,
    /// The user declined, or the caller cancelled.
    Cancelled,
    /// The ceiling elapsed with no decision.
    TimedOut,
}

/// Terminal result of a payment-header wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderWaitOutcome {
    /// An external wallet supplied a signed header for one option.
    Approved {
        /// The option the approver picked.
        selected_option: Uuid,
        /// The ready-to-send `X-PAYMENT` header value.
        payment_header: String,
    },
    /// The request was declined, or the caller cancelled.
    Cancelled,
    /// The ceiling elapsed with no decision.
    TimedOut,
}

/// Direct-flow wait: parks the agent in [`PayLimitStatus::Waiting`],
/// notifies once, then polls the status cell until it turns terminal.
///
/// # Errors
///
/// Returns a [`StoreError`] only if the initial status write fails;
/// polling errors are logged and retried on the next tick.
pub async fn wait_for_pay_limit_approval(
    store: &dyn ApprovalStore,
    notifier: &dyn AgentNotifier,
    agent_id: Uuid,
    breach: &PayLimitBreach,
    config: WaitConfig,
    cancel: &CancellationToken,
) -> Result<PayLimitWaitOutcome, StoreError> {
    store
        .set_pay_limit_status(agent_id, PayLimitStatus::Waiting)
        .await?;
    notifier
        .notify(
            agent_id,
            AgentEvent::RequestPaymentApproval {
                message: breach.message.clone(),
            },
        )
        .await;
    info!(%agent_id, "pay limit exceeded, waiting for approval");

    let deadline = tokio::time::Instant::now() + config.ceiling;
    let mut ticker = tokio::time::interval(config.poll_interval);
    loop {
        tokio::select! {
            () = tokio::time::sleep_until(deadline) => {
                mark_cancelled(store, agent_id).await;
                info!(%agent_id, "pay limit approval timed out");
                return Ok(PayLimitWaitOutcome::TimedOut);
            }
            () = cancel.cancelled() => {
                mark_cancelled(store, agent_id).await;
                info!(%agent_id, "pay limit approval cancelled by caller");
                return Ok(PayLimitWaitOutcome::Cancelled);
            }
            _ = ticker.tick() => {
                match store.pay_limit_status(agent_id).await {
                    Ok(PayLimitStatus::Approved) => {
                        info!(%agent_id, "pay limit approved");
                        return Ok(PayLimitWaitOutcome::Approved);
                    }
                    Ok(PayLimitStatus::Cancelled) => {
                        info!(%agent_id, "pay limit cancelled");
                        return Ok(PayLimitWaitOutcome::Cancelled);
                    }
                    Ok(_) => {}
                    Err(err) => warn!(%agent_id, %err, "pay limit status poll failed"),
                }
            }
        }
    }
}

/// Delegated-flow wait: notifies the approver with the selectable
/// options for the already-persisted record `request_id`, then polls
/// the record until it turns terminal.
///
/// An approved record must carry both a selected option and a payment
/// header; approved records missing either are ignored and polled
/// again.
pub async fn wait_for_payment_header(
    store: &dyn ApprovalStore,
    notifier: &dyn AgentNotifier,
    agent_id: Uuid,
    request_id: Uuid,
    options: Vec<PaymentOption>,
    config: WaitConfig,
    cancel: &CancellationToken,
) -> HeaderWaitOutcome {
    notifier
        .notify(
            agent_id,
            AgentEvent::RequestPaymentHeader {
                request_id,
                payment_requests: options,
            },
        )
        .await;
    info!(%request_id, %agent_id, "waiting for payment header");

    let deadline = tokio::time::Instant::now() + config.ceiling;
    let mut ticker = tokio::time::interval(config.poll_interval);
    loop {
        tokio::select! {
            () = tokio::time::sleep_until(deadline) => {
                cancel_request_best_effort(store, request_id).await;
                info!(%request_id, "payment header wait timed out");
                return HeaderWaitOutcome::TimedOut;
            }
            () = cancel.cancelled() => {
                cancel_request_best_effort(store, request_id).await;
                info!(%request_id, "payment header wait cancelled by caller");
                return HeaderWaitOutcome::Cancelled;
            }
            _ = ticker.tick() => {
                let record = match store.request(request_id).await {
                    Ok(record) => record,
                    Err(err) => {
                        warn!(%request_id, %err, "payment header poll failed");
                        continue;
                    }
                };
                match record.status {
                    ApprovalStatus::Approved => {
                        if let (Some(selected_option), Some(payment_header)) =
                            (record.selected_option, record.payment_header)
                        {
                            info!(%request_id, "payment header approved");
                            return HeaderWaitOutcome::Approved {
                                selected_option,
                                payment_header,
                            };
                        }
                        warn!(%request_id, "approved record missing option or header");
                    }
                    ApprovalStatus::Cancelled => {
                        info!(%request_id, "payment header request cancelled");
                        return HeaderWaitOutcome::Cancelled;
                    }
                    ApprovalStatus::Pending => {}
                }
            }
        }
    }
}

async fn mark_cancelled(store: &dyn ApprovalStore, agent_id: Uuid) {
    if let Err(err) = store
        .set_pay_limit_status(agent_id, PayLimitStatus::Cancelled)
        .await
    {
        warn!(%agent_id, %err, "failed to reset pay limit status");
    }
}

async fn cancel_request_best_effort(store: &dyn ApprovalStore, request_id: Uuid) {
    if let Err(err) = store.cancel_request(request_id).await {
        warn!(%request_id, %err, "failed to cancel approval request");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn fast_config() -> WaitConfig {
        WaitConfig {
            poll_interval: Duration::from_millis(10),
            ceiling: Duration::from_millis(100),
        }
    }

    fn breach() -> PayLimitBreach {
        PayLimitBreach {
            message: "Payment blocked".to_owned(),
            token_symbol: "ETH".to_owned(),
            requested_amount: Decimal::from(1),
            limit_amount: Decimal::new(1, 2),
        }
    }

    #[tokio::test]
    async fn store_enforces_monotonic_status() {
        let store = MemoryApprovalStore::new();
        let record = PendingApprovalRequest::new(Uuid::new_v4(), Uuid::new_v4());
        let id = record.id;
        store.create_request(record).await.unwrap();

        store
            .approve_request(id, Uuid::new_v4(), "header".to_owned())
            .await
            .unwrap();
        let err = store.cancel_request(id).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::AlreadyResolved {
                status: ApprovalStatus::Approved,
                ..
            }
        ));
        assert_eq!(
            store.request(id).await.unwrap().status,
            ApprovalStatus::Approved
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pay_limit_wait_sees_approval() {
        let store = MemoryApprovalStore::new();
        let agent_id = Uuid::new_v4();
        store
            .set_pay_limit_status(agent_id, PayLimitStatus::Approved)
            .await
            .unwrap();

        let outcome = wait_for_pay_limit_approval(
            &store,
            &NoopNotifier,
            agent_id,
            &breach(),
            WaitConfig::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, PayLimitWaitOutcome::Approved);
    }

    #[tokio::test(start_paused = true)]
    async fn pay_limit_wait_times_out_and_cancels() {
        let store = MemoryApprovalStore::new();
        let agent_id = Uuid::new_v4();

        let outcome = wait_for_pay_limit_approval(
            &store,
            &NoopNotifier,
            agent_id,
            &breach(),
            WaitConfig::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, PayLimitWaitOutcome::TimedOut);
        assert_eq!(
            store.pay_limit_status(agent_id).await.unwrap(),
            PayLimitStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn pay_limit_wait_honors_cancellation_token() {
        let store = MemoryApprovalStore::new();
        let agent_id = Uuid::new_v4();
        let token = CancellationToken::new();
        token.cancel();

        let outcome = wait_for_pay_limit_approval(
            &store,
            &NoopNotifier,
            agent_id,
            &breach(),
            fast_config(),
            &token,
        )
        .await
        .unwrap();
        assert_eq!(outcome, PayLimitWaitOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn header_wait_returns_approval_material() {
        let store = MemoryApprovalStore::new();
        let record = PendingApprovalRequest::new(Uuid::new_v4(), Uuid::new_v4());
        let request_id = record.id;
        let agent_id = record.agent_id;
        store.create_request(record).await.unwrap();

        let option = Uuid::new_v4();
        store
            .approve_request(request_id, option, "aGVhZGVy".to_owned())
            .await
            .unwrap();

        let outcome = wait_for_payment_header(
            &store,
            &NoopNotifier,
            agent_id,
            request_id,
            Vec::new(),
            WaitConfig::default(),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(
            outcome,
            HeaderWaitOutcome::Approved {
                selected_option: option,
                payment_header: "aGVhZGVy".to_owned(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn header_wait_timeout_cancels_record() {
        let store = MemoryApprovalStore::new();
        let record = PendingApprovalRequest::new(Uuid::new_v4(), Uuid::new_v4());
        let request_id = record.id;
        let agent_id = record.agent_id;
        store.create_request(record).await.unwrap();

        let outcome = wait_for_payment_header(
            &store,
            &NoopNotifier,
            agent_id,
            request_id,
            Vec::new(),
            WaitConfig::default(),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(outcome, HeaderWaitOutcome::TimedOut);
        assert_eq!(
            store.request(request_id).await.unwrap().status,
            ApprovalStatus::Cancelled
        );
    }

    #[test]
    fn payment_option_serializes_flat() {
        use crate::proto::AmountFormat;
        let option = PaymentOption {
            id: Uuid::nil(),
            requirement: PaymentRequirement {
                namespace: "evm".to_owned(),
                token_address: "0x0".to_owned(),
                amount_required: Decimal::from(1),
                amount_required_format: AmountFormat::Decimal,
                pay_to_address: "0xdest".to_owned(),
                network_id: "8453".to_owned(),
                description: String::new(),
                resource: String::new(),
                scheme: "exact".to_owned(),
                mime_type: String::new(),
                estimated_processing_time: 0,
                token_decimals: Some(18),
                token_symbol: Some("ETH".to_owned()),
            },
        };
        let value = serde_json::to_value(&option).unwrap();
        assert_eq!(
            value["selectedRequestID"],
            "00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(value["tokenAddress"], "0x0");
        assert_eq!(value["tokenSymbol"], "ETH");
    }

    #[test]
    fn event_names() {
        let approval = AgentEvent::RequestPaymentApproval {
            message: "m".to_owned(),
        };
        assert_eq!(approval.name(), "request_payment_approval");
    }
}
