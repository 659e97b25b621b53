//! Wire types for the h402 payment protocol.
//!
//! A payment-required exchange is three documents:
//!
//! 1. the 402 response body ([`PaymentRequired`]) listing acceptable
//!    payments,
//! 2. the retry's `X-PAYMENT` header, a base64-encoded
//!    [`PaymentEnvelope`] wrapping the signed transaction,
//! 3. the server's `X-Payment-Response` header, a base64-encoded
//!    [`PaymentReceipt`].
//!
//! All JSON fields are camelCase. Monetary amounts deserialize through
//! `serde_json`'s arbitrary-precision path into [`Decimal`], so a wire
//! value like `0.1` is never routed through an `f64`.

use crate::encoding::Base64Bytes;
use crate::registry::{ChainFamily, WalletKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The h402 protocol version this engine speaks.
pub const PROTOCOL_VERSION: u8 = 1;

/// Request header carrying the base64-encoded [`PaymentEnvelope`].
pub const PAYMENT_HEADER: &str = "X-PAYMENT";

/// Response header carrying the base64-encoded [`PaymentReceipt`].
pub const PAYMENT_RESPONSE_HEADER: &str = "X-Payment-Response";

/// CORS header the retry must set so browsers can read the receipt.
pub const EXPOSE_HEADERS: &str = "Access-Control-Expose-Headers";

/// Value of [`EXPOSE_HEADERS`] on the retry request.
pub const EXPOSED_RESPONSE_HEADER: &str = "X-PAYMENT-RESPONSE";

/// How `amountRequired` is denominated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmountFormat {
    /// Human-readable units (e.g. `1.5` ETH).
    #[default]
    Decimal,
    /// Smallest units of the token (wei, lamports, base units).
    SmallestUnit,
}

impl Serialize for AmountFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let s = match self {
            Self::Decimal => "decimal",
            Self::SmallestUnit => "smallestUnit",
        };
        serializer.serialize_str(s)
    }
}

impl<'de> Deserialize<'de> for AmountFormat {
    // Anything other than the exact smallest-unit marker is treated as
    // decimal, including the empty string; servers in the wild omit the
    // field or send free-form values.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(if s == "smallestUnit" {
            Self::SmallestUnit
        } else {
            Self::Decimal
        })
    }
}

/// One acceptable payment offered in a 402 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    /// Chain namespace, e.g. `evm` or `solana`.
    #[serde(default)]
    pub namespace: String,
    /// Token contract/mint address, or a native placeholder.
    #[serde(default)]
    pub token_address: String,
    /// The amount due, denominated per [`Self::amount_required_format`].
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub amount_required: Decimal,
    /// Denomination of [`Self::amount_required`].
    #[serde(default)]
    pub amount_required_format: AmountFormat,
    /// Destination address for the payment.
    #[serde(default)]
    pub pay_to_address: String,
    /// Network id: decimal chain id for EVM, cluster name for Solana.
    #[serde(default)]
    pub network_id: String,
    /// Human-readable description of what is being purchased.
    #[serde(default)]
    pub description: String,
    /// The resource URL the payment unlocks.
    #[serde(default)]
    pub resource: String,
    /// Payment scheme identifier.
    #[serde(default)]
    pub scheme: String,
    /// MIME type of the paid resource.
    #[serde(default)]
    pub mime_type: String,
    /// Server's estimate of settlement time, in seconds.
    #[serde(default)]
    pub estimated_processing_time: u64,
    /// Token decimals, if the server provides them. Zero means unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_decimals: Option<u8>,
    /// Token ticker symbol, if the server provides it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_symbol: Option<String>,
}

impl PaymentRequirement {
    /// Token decimals if the server supplied a meaningful value. A
    /// literal zero is treated as unset, matching servers that emit the
    /// field unconditionally.
    #[must_use]
    pub fn explicit_decimals(&self) -> Option<u8> {
        self.token_decimals.filter(|d| *d > 0)
    }

    /// Token symbol if the server supplied a non-empty one.
    #[must_use]
    pub fn explicit_symbol(&self) -> Option<&str> {
        self.token_symbol.as_deref().filter(|s| !s.is_empty())
    }
}

/// Body of a 402 Payment Required response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    /// Protocol version the server speaks.
    pub h402_version: u8,
    /// Optional server-side error message.
    #[serde(default)]
    pub error: String,
    /// Acceptable payments, in the server's order of preference.
    #[serde(default)]
    pub accepts: Vec<PaymentRequirement>,
}

impl PaymentRequired {
    /// Parses a 402 response body.
    ///
    /// # Errors
    ///
    /// Returns the underlying serde error if the body is not a valid
    /// payment-required document.
    pub fn from_json_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

/// The signed-transaction material inside a payment envelope.
///
/// The variant is chosen by chain family: Solana wallets produce a
/// base64 transaction blob the server submits, EVM wallets produce a
/// fully signed raw transaction in hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PaymentPayload {
    /// Solana: base64-encoded signed transaction.
    #[serde(rename = "signTransaction")]
    SignTransaction {
        /// First signature of the transaction, base58.
        signature: String,
        /// The serialized transaction, base64.
        transaction: String,
    },
    /// EVM: raw signed transaction bytes, hex-encoded.
    #[serde(rename = "signedTransaction", rename_all = "camelCase")]
    SignedTransaction {
        /// Transaction hash, hex.
        signature: String,
        /// The RLP-encoded signed transaction, hex.
        signed_transaction: String,
    },
}

impl PaymentPayload {
    /// Builds the payload shape a chain family expects from the proof
    /// pair `(transaction material, reference)`.
    #[must_use]
    pub fn for_family(family: ChainFamily, transaction: String, reference: String) -> Self {
        match family {
            ChainFamily::Solana => Self::SignTransaction {
                signature: reference,
                transaction,
            },
            ChainFamily::Evm => Self::SignedTransaction {
                signature: reference,
                signed_transaction: transaction,
            },
        }
    }
}

/// The `X-PAYMENT` header document: a payload plus the requirement
/// coordinates it satisfies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEnvelope {
    /// Protocol version.
    pub h402_version: u8,
    /// Scheme copied from the selected requirement.
    pub scheme: String,
    /// Namespace copied from the selected requirement.
    pub namespace: String,
    /// Network id copied from the selected requirement.
    pub network_id: String,
    /// Resource copied from the selected requirement.
    pub resource: String,
    /// The signed-transaction payload.
    pub payload: PaymentPayload,
}

impl PaymentEnvelope {
    /// Wraps a payload with the coordinates of the requirement it pays.
    #[must_use]
    pub fn for_requirement(requirement: &PaymentRequirement, payload: PaymentPayload) -> Self {
        Self {
            h402_version: PROTOCOL_VERSION,
            scheme: requirement.scheme.clone(),
            namespace: requirement.namespace.clone(),
            network_id: requirement.network_id.clone(),
            resource: requirement.resource.clone(),
            payload,
        }
    }

    /// Serializes and base64-encodes the envelope for the `X-PAYMENT`
    /// header.
    ///
    /// # Errors
    ///
    /// Returns the underlying serde error if serialization fails.
    pub fn to_header_value(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(Base64Bytes::encode(json).into_string())
    }
}

/// Settlement receipt from the `X-Payment-Response` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    /// Whether the server settled the payment.
    pub success: bool,
    /// Transaction reference the server observed or submitted.
    pub transaction: String,
    /// Chain namespace the settlement happened on.
    pub namespace: String,
}

impl PaymentReceipt {
    /// Decodes a receipt from the raw header value. Returns `None` for
    /// malformed headers: an unreadable receipt is dropped, never fatal,
    /// since the response itself already succeeded.
    #[must_use]
    pub fn from_header_value(value: &str) -> Option<Self> {
        let raw = Base64Bytes::from(value).decode().ok()?;
        serde_json::from_slice(&raw).ok()
    }

    /// Encodes the receipt the way a server would put it on the wire.
    ///
    /// # Errors
    ///
    /// Returns the underlying serde error if serialization fails.
    pub fn to_header_value(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(Base64Bytes::encode(json).into_string())
    }
}

/// What the engine reports after completing a payment: the settled
/// amount in its original denomination plus settlement references.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOutcome {
    /// The amount paid, as offered by the server.
    pub amount: Decimal,
    /// Denomination of [`Self::amount`].
    pub amount_format: AmountFormat,
    /// The wallet kind that produced the payment.
    pub wallet_kind: WalletKind,
    /// Transaction reference: receipt value when present, otherwise the
    /// wallet's local reference.
    pub transaction: String,
    /// Chain namespace of the settlement.
    pub namespace: String,
    /// The token that was paid.
    pub token_address: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn parses_402_body_with_exact_amount() {
        let body = br#"{
            "h402Version": 1,
            "error": "payment required",
            "accepts": [{
                "namespace": "evm",
                "tokenAddress": "0x0000000000000000000000000000000000000000",
                "amountRequired": 0.1,
                "amountRequiredFormat": "decimal",
                "payToAddress": "0xabc",
                "networkId": "8453",
                "description": "an article",
                "resource": "https://example.com/article",
                "scheme": "exact",
                "mimeType": "text/html",
                "estimatedProcessingTime": 30,
                "tokenDecimals": 0,
                "tokenSymbol": ""
            }]
        }"#;
        let parsed = PaymentRequired::from_json_slice(body).unwrap();
        assert_eq!(parsed.h402_version, 1);
        let req = &parsed.accepts[0];
        assert_eq!(req.amount_required, Decimal::from_str("0.1").unwrap());
        assert_eq!(req.amount_required_format, AmountFormat::Decimal);
        assert_eq!(req.explicit_decimals(), None);
        assert_eq!(req.explicit_symbol(), None);
    }

    #[test]
    fn unknown_amount_format_falls_back_to_decimal() {
        let fmt: AmountFormat = serde_json::from_str("\"weird\"").unwrap();
        assert_eq!(fmt, AmountFormat::Decimal);
        let fmt: AmountFormat = serde_json::from_str("\"smallestUnit\"").unwrap();
        assert_eq!(fmt, AmountFormat::SmallestUnit);
    }

    #[test]
    fn payload_union_discriminates_on_type() {
        let sol = PaymentPayload::for_family(
            ChainFamily::Solana,
            "AQID".to_owned(),
            "5sig".to_owned(),
        );
        let json = serde_json::to_value(&sol).unwrap();
        assert_eq!(json["type"], "signTransaction");
        assert_eq!(json["transaction"], "AQID");
        assert!(json.get("signedTransaction").is_none());

        let evm = PaymentPayload::for_family(
            ChainFamily::Evm,
            "0xf86b...".to_owned(),
            "0xhash".to_owned(),
        );
        let json = serde_json::to_value(&evm).unwrap();
        assert_eq!(json["type"], "signedTransaction");
        assert_eq!(json["signedTransaction"], "0xf86b...");
        assert!(json.get("transaction").is_none());
    }

    #[test]
    fn envelope_header_round_trip() {
        let requirement = PaymentRequirement {
            namespace: "solana".to_owned(),
            token_address: "11111111111111111111111111111111".to_owned(),
            amount_required: Decimal::from(1),
            amount_required_format: AmountFormat::Decimal,
            pay_to_address: "dest".to_owned(),
            network_id: "mainnet".to_owned(),
            description: String::new(),
            resource: "https://example.com".to_owned(),
            scheme: "exact".to_owned(),
            mime_type: String::new(),
            estimated_processing_time: 0,
            token_decimals: None,
            token_symbol: None,
        };
        let payload =
            PaymentPayload::for_family(ChainFamily::Solana, "blob".to_owned(), "sig".to_owned());
        let envelope = PaymentEnvelope::for_requirement(&requirement, payload);
        let header = envelope.to_header_value().unwrap();

        let decoded = Base64Bytes::from(header.as_str()).decode().unwrap();
        let parsed: PaymentEnvelope = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(parsed, envelope);
        assert_eq!(parsed.network_id, "mainnet");
    }

    #[test]
    fn receipt_decoding_tolerates_garbage() {
        assert!(PaymentReceipt::from_header_value("%%%").is_none());
        let receipt = PaymentReceipt {
            success: true,
            transaction: "0xdeadbeef".to_owned(),
            namespace: "evm".to_owned(),
        };
        let header = receipt.to_header_value().unwrap();
        assert_eq!(PaymentReceipt::from_header_value(&header), Some(receipt));
    }
}
