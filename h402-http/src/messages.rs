//! User-facing narration for payment outcomes.
//!
//! Agents relay these strings verbatim to the user, so the wording is
//! part of the product surface: confirmations name the amount, the
//! ticker and the chain, and blocked payments explain what the user can
//! do about them.

use h402::amount::{self, format_with_precision};
use h402::paylimit::PayLimitBreach;
use h402::proto::{AmountFormat, PaymentOutcome};
use h402::registry::ChainRegistry;
use rust_decimal::Decimal;

/// Notice relayed when the wallet cannot cover a requested payment.
pub const INSUFFICIENT_FUNDS_NOTICE: &str = "Please mention this at the start of your next response: Agent doesn't have enough funds to pay for this request";

/// Notice relayed when the external wallet never produced a payment
/// header before the wait ceiling.
pub const PAYMENT_HEADER_TIMEOUT_NOTICE: &str =
    "Payment request timed out: no payment header was received from the external wallet.";

/// Notice relayed when a delegated payment was cancelled before the
/// external wallet produced a header.
pub const PAYMENT_HEADER_CANCELLED_NOTICE: &str =
    "Payment request was cancelled before the external wallet produced a payment header.";

/// Confirmation naming the amount, ticker and chain a payment went
/// through on.
#[must_use]
pub fn payment_confirmation(outcome: &PaymentOutcome, registry: &ChainRegistry) -> String {
    let (amount, currency) = display_amount(outcome, registry);
    format!(
        "Please mention this at the start of your next response: **You have paid {amount} {currency} from the {chain} server wallet to access this page.**",
        chain = outcome.wallet_kind.display_name(),
    )
}

/// Confirmation for payments made through a connected external wallet,
/// where the chain name is not the agent's to claim.
#[must_use]
pub fn external_payment_confirmation(outcome: &PaymentOutcome, registry: &ChainRegistry) -> String {
    let (amount, currency) = display_amount(outcome, registry);
    format!(
        "Please mention this at the start of your next response: **You have paid {amount} {currency} to access this page.**"
    )
}

/// Prompt shown while a blocked payment waits for a decision.
#[must_use]
pub fn pay_limit_prompt(breach: &PayLimitBreach) -> String {
    format!(
        "{} You can either approve or cancel this payment.",
        breach.message
    )
}

/// Notice relayed after a blocked payment was declined or timed out.
#[must_use]
pub fn pay_limit_declined(breach: &PayLimitBreach) -> String {
    format!(
        "Please mention this at the start of your next response: **{} You can update the pay limit in the agent server wallet settings.**",
        breach.message
    )
}

/// Renders the paid amount in human units with its ticker symbol.
///
/// Smallest-unit amounts are scaled down by the token's registry
/// decimals; tokens outside the registry fall back to 18, the EVM
/// native convention.
fn display_amount(outcome: &PaymentOutcome, registry: &ChainRegistry) -> (String, String) {
    let kind = outcome.wallet_kind;
    let decimals = registry
        .decimals_for_token(kind, &outcome.token_address)
        .unwrap_or(18);
    let currency = registry
        .symbol_for_token(kind, &outcome.token_address)
        .unwrap_or_default()
        .to_owned();

    let amount = match outcome.amount_format {
        AmountFormat::SmallestUnit => scale_down(outcome.amount, decimals),
        AmountFormat::Decimal => outcome.amount,
    };
    (format_with_precision(amount, decimals), currency)
}

fn scale_down(amount: Decimal, decimals: u8) -> Decimal {
    // An amount that came out of a Decimal always scales back down, so
    // the fallback path is never taken for wire-valid amounts.
    amount::to_smallest_unit(amount, 0)
        .and_then(|units| amount::to_human_readable(units, decimals))
        .unwrap_or(amount)
}
