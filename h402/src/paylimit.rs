//! Per-symbol payment ceilings.
//!
//! The governor compares a 402 requirement against configured
//! human-readable limits, normalizing smallest-unit wire amounts first.
//! A breach is a value, not an error: callers decide whether to block,
//! prompt for approval, or report it.

use crate::amount;
use crate::proto::{AmountFormat, PaymentRequirement};
use crate::registry::{ChainRegistry, WalletKind};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Per-symbol ceilings in human-readable units. An empty map disables
/// checking entirely.
#[derive(Debug, Clone, Default)]
pub struct PayLimits(HashMap<String, Decimal>);

impl PayLimits {
    /// Builds limits from `(symbol, ceiling)` pairs.
    pub fn new(limits: impl IntoIterator<Item = (String, Decimal)>) -> Self {
        Self(limits.into_iter().collect())
    }

    /// The built-in default ceilings.
    #[must_use]
    pub fn defaults() -> Self {
        Self(crate::registry::default_pay_limits())
    }

    /// The ceiling for a symbol, if one is configured.
    #[must_use]
    pub fn limit(&self, symbol: &str) -> Option<Decimal> {
        self.0.get(symbol).copied()
    }

    /// Whether no ceilings are configured at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Decimal)> for PayLimits {
    fn from_iter<I: IntoIterator<Item = (String, Decimal)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A requirement that exceeds its configured ceiling.
#[derive(Debug, Clone, PartialEq)]
pub struct PayLimitBreach {
    /// User-facing description of the block.
    pub message: String,
    /// The token symbol the ceiling applies to.
    pub token_symbol: String,
    /// Requested amount, human-readable.
    pub requested_amount: Decimal,
    /// The configured ceiling.
    pub limit_amount: Decimal,
}

/// Checks payment requirements against [`PayLimits`].
#[derive(Debug, Clone)]
pub struct PayLimitGovernor {
    limits: PayLimits,
    registry: ChainRegistry,
}

impl PayLimitGovernor {
    /// Builds a governor over `limits`, resolving token metadata through
    /// `registry`.
    #[must_use]
    pub fn new(limits: PayLimits, registry: ChainRegistry) -> Self {
        Self { limits, registry }
    }

    /// The limits this governor enforces.
    #[must_use]
    pub const fn limits(&self) -> &PayLimits {
        &self.limits
    }

    /// Checks one requirement. `None` means the payment may proceed:
    /// either no ceilings are configured, the token's symbol cannot be
    /// determined, no ceiling covers that symbol, or the amount is
    /// within it.
    ///
    /// Symbol and decimals come from the registry whenever it knows the
    /// token; the requirement's own `tokenSymbol`/`tokenDecimals` are
    /// written by the server being paid and are consulted only for
    /// tokens outside the allow-list.
    #[must_use]
    pub fn check(&self, requirement: &PaymentRequirement) -> Option<PayLimitBreach> {
        if self.limits.is_empty() {
            return None;
        }

        let kind = WalletKind::from_network_id(&requirement.network_id).ok();
        let symbol = kind
            .and_then(|k| {
                self.registry
                    .symbol_for_token(k, &requirement.token_address)
                    .map(str::to_owned)
            })
            .or_else(|| requirement.explicit_symbol().map(str::to_owned));
        let Some(symbol) = symbol else {
            warn!(
                token = %requirement.token_address,
                network = %requirement.network_id,
                "unable to determine token symbol for pay-limit check, allowing"
            );
            return None;
        };

        let Some(limit) = self.limits.limit(&symbol) else {
            debug!(%symbol, "no pay limit configured, allowing");
            return None;
        };

        let decimals = self.resolve_decimals(requirement, kind);
        let requested = self.human_amount(requirement, decimals);

        if requested <= limit {
            debug!(%symbol, %requested, %limit, "pay limit check passed");
            return None;
        }

        let requested_text = amount::format_with_precision(requested, decimals);
        let limit_text = amount::format_with_precision(limit, decimals);
        Some(PayLimitBreach {
            message: format!(
                "Payment blocked: The page is requesting {requested_text} {symbol}, \
                 which exceeds the configured limit of {limit_text} {symbol}."
            ),
            token_symbol: symbol,
            requested_amount: requested,
            limit_amount: limit,
        })
    }

    fn resolve_decimals(&self, requirement: &PaymentRequirement, kind: Option<WalletKind>) -> u8 {
        kind.and_then(|k| {
            self.registry
                .decimals_for_token(k, &requirement.token_address)
        })
        .or_else(|| requirement.explicit_decimals())
        .unwrap_or(18)
    }

    fn human_amount(&self, requirement: &PaymentRequirement, decimals: u8) -> Decimal {
        if requirement.amount_required_format != AmountFormat::SmallestUnit {
            return requirement.amount_required;
        }
        let converted = amount::to_smallest_unit(requirement.amount_required, 0)
            .and_then(|units| amount::to_human_readable(units, decimals));
        match converted {
            Ok(v) => v,
            Err(err) => {
                // Too large to normalize means too large to allow.
                warn!(%err, "smallest-unit amount out of range, treating as over limit");
                Decimal::MAX
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Environment, EVM_NATIVE_PLACEHOLDER};
    use std::str::FromStr;

    fn requirement(amount: &str, format: AmountFormat, token: &str, network: &str) -> PaymentRequirement {
        PaymentRequirement {
            namespace: "evm".to_owned(),
            token_address: token.to_owned(),
            amount_required: Decimal::from_str(amount).unwrap(),
            amount_required_format: format,
            pay_to_address: "0xdest".to_owned(),
            network_id: network.to_owned(),
            description: String::new(),
            resource: String::new(),
            scheme: "exact".to_owned(),
            mime_type: String::new(),
            estimated_processing_time: 0,
            token_decimals: None,
            token_symbol: None,
        }
    }

    fn governor(limits: PayLimits) -> PayLimitGovernor {
        PayLimitGovernor::new(limits, ChainRegistry::with_defaults(Environment::Mainnet))
    }

    #[test]
    fn empty_limits_allow_everything() {
        let gov = governor(PayLimits::default());
        let req = requirement("1000000", AmountFormat::Decimal, EVM_NATIVE_PLACEHOLDER, "8453");
        assert!(gov.check(&req).is_none());
    }

    #[test]
    fn within_limit_allows() {
        let gov = governor(PayLimits::defaults());
        let req = requirement("0.005", AmountFormat::Decimal, EVM_NATIVE_PLACEHOLDER, "8453");
        assert!(gov.check(&req).is_none());
    }

    #[test]
    fn over_limit_blocks_with_message() {
        let gov = governor(PayLimits::defaults());
        let req = requirement("0.5", AmountFormat::Decimal, EVM_NATIVE_PLACEHOLDER, "8453");
        let breach = gov.check(&req).unwrap();
        assert_eq!(breach.token_symbol, "ETH");
        assert_eq!(breach.requested_amount, Decimal::from_str("0.5").unwrap());
        assert_eq!(breach.limit_amount, Decimal::from_str("0.01").unwrap());
        assert!(breach.message.contains("0.5 ETH"));
        assert!(breach.message.contains("0.01 ETH"));
    }

    #[test]
    fn smallest_unit_amounts_normalize_before_comparison() {
        // 50_000_000 units of 6-decimal USDC is 50, exactly at the
        // default ceiling.
        let gov = governor(PayLimits::defaults());
        let mut req = requirement(
            "50000000",
            AmountFormat::SmallestUnit,
            "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
            "8453",
        );
        assert!(gov.check(&req).is_none());

        req.amount_required = Decimal::from_str("50000001").unwrap();
        let breach = gov.check(&req).unwrap();
        assert_eq!(breach.token_symbol, "USDC");
        assert!(breach.requested_amount > Decimal::from(50));
    }

    #[test]
    fn breach_reports_amounts_in_human_units() {
        // 50_000 units of 6-decimal USDC is 0.05, over a 0.01 ceiling.
        let gov = governor(PayLimits::new([(
            "USDC".to_owned(),
            Decimal::from_str("0.01").unwrap(),
        )]));
        let req = requirement(
            "50000",
            AmountFormat::SmallestUnit,
            "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
            "8453",
        );
        let breach = gov.check(&req).unwrap();
        assert_eq!(breach.requested_amount, Decimal::from_str("0.05").unwrap());
        assert_eq!(breach.limit_amount, Decimal::from_str("0.01").unwrap());
    }

    #[test]
    fn unknown_symbol_allows() {
        let gov = governor(PayLimits::defaults());
        let req = requirement("999", AmountFormat::Decimal, "0xunknown", "8453");
        assert!(gov.check(&req).is_none());
    }

    #[test]
    fn server_symbol_fills_in_for_unlisted_tokens() {
        let gov = governor(PayLimits::new([("DOGE".to_owned(), Decimal::from(1))]));
        let mut req = requirement("2", AmountFormat::Decimal, "0xunknown", "8453");
        req.token_symbol = Some("DOGE".to_owned());
        let breach = gov.check(&req).unwrap();
        assert_eq!(breach.token_symbol, "DOGE");
    }

    #[test]
    fn server_symbol_cannot_reclassify_an_allow_listed_token() {
        // A 402 claiming the registry's USDC is some unlimited "FOO"
        // must still be checked against the USDC ceiling.
        let gov = governor(PayLimits::defaults());
        let mut req = requirement(
            "51000000",
            AmountFormat::SmallestUnit,
            "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
            "8453",
        );
        req.token_symbol = Some("FOO".to_owned());
        let breach = gov.check(&req).unwrap();
        assert_eq!(breach.token_symbol, "USDC");
        assert_eq!(breach.requested_amount, Decimal::from(51));
    }

    #[test]
    fn server_decimals_cannot_shrink_an_allow_listed_amount() {
        // Inflated decimals would read 50_000_000 USDC units as 5e-23;
        // the registry's 6 decimals govern the comparison.
        let gov = governor(PayLimits::new([(
            "USDC".to_owned(),
            Decimal::from_str("0.01").unwrap(),
        )]));
        let mut req = requirement(
            "50000000",
            AmountFormat::SmallestUnit,
            "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
            "8453",
        );
        req.token_decimals = Some(30);
        let breach = gov.check(&req).unwrap();
        assert_eq!(breach.requested_amount, Decimal::from(50));
    }
}
