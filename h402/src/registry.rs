//! Static chain configuration.
//!
//! The engine supports a fixed set of chains, keyed by [`WalletKind`].
//! Each kind resolves to a [`ChainConfig`] for the selected
//! [`Environment`]: RPC endpoint, block explorer, native currency and the
//! allow-list of transferable tokens. Tokens outside the allow-list are
//! rejected before any transaction is built.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Placeholder token address denoting the native asset on EVM chains.
pub const EVM_NATIVE_PLACEHOLDER: &str = "0x0000000000000000000000000000000000000000";

/// Placeholder token address denoting native SOL (the system program id).
pub const SOL_NATIVE_PLACEHOLDER: &str = "11111111111111111111111111111111";

/// Returns `true` if `address` is one of the native-asset placeholders.
#[must_use]
pub fn is_native_placeholder(address: &str) -> bool {
    address.eq_ignore_ascii_case(EVM_NATIVE_PLACEHOLDER) || address == SOL_NATIVE_PLACEHOLDER
}

/// The chain family a wallet kind belongs to, which determines the
/// payment payload shape it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainFamily {
    /// EVM-compatible chains: raw signed transactions, hex-encoded.
    Evm,
    /// Solana: signed transactions as base64-encoded binary blobs.
    Solana,
}

/// A supported wallet backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WalletKind {
    /// BNB Smart Chain (mainnet 56, testnet 97).
    #[serde(rename = "BNB")]
    Bnb,
    /// Base (mainnet 8453, Sepolia 84532).
    #[serde(rename = "BASE")]
    Base,
    /// Solana (mainnet-beta or devnet).
    #[serde(rename = "SOL")]
    Sol,
}

/// Returned when a 402 requirement names a network id no wallet kind
/// covers.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unsupported network id: {0}")]
pub struct UnsupportedNetwork(pub String);

impl WalletKind {
    /// All supported kinds, in display order.
    pub const ALL: [Self; 3] = [Self::Bnb, Self::Base, Self::Sol];

    /// The chain family this kind belongs to.
    #[must_use]
    pub const fn family(self) -> ChainFamily {
        match self {
            Self::Bnb | Self::Base => ChainFamily::Evm,
            Self::Sol => ChainFamily::Solana,
        }
    }

    /// Maps a 402 `networkId` to the wallet kind that can pay on it.
    ///
    /// EVM networks are identified by decimal chain id, Solana by cluster
    /// name.
    ///
    /// # Errors
    ///
    /// Returns [`UnsupportedNetwork`] for any id outside the supported
    /// set.
    pub fn from_network_id(network_id: &str) -> Result<Self, UnsupportedNetwork> {
        match network_id {
            "56" | "97" => Ok(Self::Bnb),
            "8453" | "84532" => Ok(Self::Base),
            "mainnet" | "devnet" | "testnet" => Ok(Self::Sol),
            other => Err(UnsupportedNetwork(other.to_owned())),
        }
    }

    /// Human-readable chain name for user-facing messages.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Bnb => "BNB Smart Chain",
            Self::Base => "Base",
            Self::Sol => "Solana",
        }
    }
}

impl Display for WalletKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Bnb => "BNB",
            Self::Base => "BASE",
            Self::Sol => "SOL",
        };
        write!(f, "{s}")
    }
}

impl FromStr for WalletKind {
    type Err = UnsupportedNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BNB" => Ok(Self::Bnb),
            "BASE" => Ok(Self::Base),
            "SOL" => Ok(Self::Sol),
            other => Err(UnsupportedNetwork(other.to_owned())),
        }
    }
}

/// Deployment environment, selecting mainnet or test networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Production networks.
    #[default]
    Mainnet,
    /// Test networks (BSC testnet, Base Sepolia, Solana devnet).
    Testnet,
}

impl Environment {
    /// Reads the environment from `H402_ENV`: `DEV` selects
    /// [`Environment::Testnet`], anything else mainnet.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var("H402_ENV") {
            Ok(v) if v == "DEV" => Self::Testnet,
            _ => Self::Mainnet,
        }
    }
}

/// An allow-listed token on a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Ticker symbol, e.g. `USDC`.
    pub symbol: String,
    /// Contract address (EVM) or mint address (Solana).
    pub address: String,
    /// Smallest-unit decimals of the token.
    pub decimals: u8,
}

impl TokenInfo {
    fn new(symbol: &str, address: &str, decimals: u8) -> Self {
        Self {
            symbol: symbol.to_owned(),
            address: address.to_owned(),
            decimals,
        }
    }
}

/// Per-chain configuration: endpoint, explorer, native currency and the
/// token allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// EVM chain id; zero for Solana, which has no numeric id.
    pub chain_id: u64,
    /// Default JSON-RPC endpoint.
    pub rpc_url: String,
    /// Block explorer base URL, no trailing slash.
    pub explorer_url: String,
    /// Native currency symbol.
    pub symbol: String,
    /// Native currency decimals.
    pub decimals: u8,
    /// Tokens the wallet is allowed to transfer on this chain.
    pub tokens: Vec<TokenInfo>,
}

impl ChainConfig {
    /// The built-in configuration for a wallet kind in an environment.
    #[must_use]
    pub fn defaults(kind: WalletKind, env: Environment) -> Self {
        match (kind, env) {
            (WalletKind::Bnb, Environment::Testnet) => Self {
                chain_id: 97,
                rpc_url: "https://bsc-testnet-dataseed.bnbchain.org".to_owned(),
                explorer_url: "https://testnet.bscscan.com".to_owned(),
                symbol: "BNB".to_owned(),
                decimals: 18,
                tokens: vec![
                    TokenInfo::new("USDC", "0x64544969ed7EBf5f083679233325356EbE738930", 18),
                    TokenInfo::new("USDT", "0x337610d27c682E347C9cD60BD4b3b107C9d34dDd", 18),
                ],
            },
            (WalletKind::Bnb, Environment::Mainnet) => Self {
                chain_id: 56,
                rpc_url: "https://bsc-dataseed1.binance.org".to_owned(),
                explorer_url: "https://bscscan.com".to_owned(),
                symbol: "BNB".to_owned(),
                decimals: 18,
                tokens: vec![
                    TokenInfo::new("USDC", "0x8AC76a51cc950d9822D68b83fE1Ad97B32Cd580d", 18),
                    TokenInfo::new("USDT", "0x55d398326f99059fF775485246999027B3197955", 18),
                ],
            },
            (WalletKind::Base, Environment::Testnet) => Self {
                chain_id: 84532,
                rpc_url: "https://sepolia.base.org".to_owned(),
                explorer_url: "https://sepolia.basescan.org".to_owned(),
                symbol: "ETH".to_owned(),
                decimals: 18,
                tokens: vec![
                    TokenInfo::new("USDC", "0x036CbD53842c5426634e7929541eC2318f3dCF7e", 6),
                    TokenInfo::new("USDT", "0x22c0db4cc9b339e34956a5699e5e95dc0e00c800", 6),
                ],
            },
            (WalletKind::Base, Environment::Mainnet) => Self {
                chain_id: 8453,
                rpc_url: "https://mainnet.base.org".to_owned(),
                explorer_url: "https://basescan.org".to_owned(),
                symbol: "ETH".to_owned(),
                decimals: 18,
                tokens: vec![
                    TokenInfo::new("USDC", "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913", 6),
                    TokenInfo::new("USDT", "0xfde4C96c8593536E31F229EA8f37b2ADa2699bb2", 6),
                ],
            },
            (WalletKind::Sol, Environment::Testnet) => Self {
                chain_id: 0,
                rpc_url: "https://api.devnet.solana.com".to_owned(),
                explorer_url: "https://explorer.solana.com".to_owned(),
                symbol: "SOL".to_owned(),
                decimals: 9,
                tokens: vec![
                    TokenInfo::new("USDC", "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU", 6),
                    TokenInfo::new("USDT", "EJwZgeZrdC8TXTQbQBoL6bfuAnFUUy1PVCMB4DYPzVaS", 6),
                ],
            },
            (WalletKind::Sol, Environment::Mainnet) => Self {
                chain_id: 0,
                rpc_url: "https://api.mainnet-beta.solana.com".to_owned(),
                explorer_url: "https://explorer.solana.com".to_owned(),
                symbol: "SOL".to_owned(),
                decimals: 9,
                tokens: vec![
                    TokenInfo::new("USDC", "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v", 6),
                    TokenInfo::new("USDT", "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB", 6),
                ],
            },
        }
    }
}

/// Lookup table from [`WalletKind`] to [`ChainConfig`].
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    env: Environment,
    configs: HashMap<WalletKind, ChainConfig>,
}

impl ChainRegistry {
    /// Builds a registry with the built-in defaults for `env`.
    #[must_use]
    pub fn with_defaults(env: Environment) -> Self {
        let configs = WalletKind::ALL
            .into_iter()
            .map(|kind| (kind, ChainConfig::defaults(kind, env)))
            .collect();
        Self { env, configs }
    }

    /// The environment this registry was built for.
    #[must_use]
    pub const fn environment(&self) -> Environment {
        self.env
    }

    /// The configuration for `kind`.
    ///
    /// # Panics
    ///
    /// Never panics: the registry is constructed with an entry for every
    /// kind.
    #[must_use]
    pub fn config(&self, kind: WalletKind) -> &ChainConfig {
        self.configs
            .get(&kind)
            .expect("registry holds every wallet kind")
    }

    /// Returns `true` if `token_address` is allow-listed on `kind`.
    ///
    /// Address comparison is case-insensitive, matching EVM hex
    /// conventions; Solana base58 addresses are case-sensitive in
    /// practice but the allow-list entries are stored canonically.
    #[must_use]
    pub fn is_token_allowed(&self, kind: WalletKind, token_address: &str) -> bool {
        self.token(kind, token_address).is_some()
    }

    /// Looks up an allow-listed token by address.
    #[must_use]
    pub fn token(&self, kind: WalletKind, token_address: &str) -> Option<&TokenInfo> {
        self.config(kind)
            .tokens
            .iter()
            .find(|t| t.address.eq_ignore_ascii_case(token_address))
    }

    /// Smallest-unit decimals for a token address, treating the native
    /// placeholders as the chain's native currency. `None` for addresses
    /// outside the allow-list.
    #[must_use]
    pub fn decimals_for_token(&self, kind: WalletKind, token_address: &str) -> Option<u8> {
        if is_native_placeholder(token_address) {
            return Some(self.config(kind).decimals);
        }
        self.token(kind, token_address).map(|t| t.decimals)
    }

    /// Ticker symbol for a token address, treating the native
    /// placeholders as the chain's native currency.
    #[must_use]
    pub fn symbol_for_token(&self, kind: WalletKind, token_address: &str) -> Option<&str> {
        if is_native_placeholder(token_address) {
            return Some(self.config(kind).symbol.as_str());
        }
        self.token(kind, token_address).map(|t| t.symbol.as_str())
    }

    /// Block explorer URL for a wallet address.
    #[must_use]
    pub fn address_explorer_url(&self, kind: WalletKind, address: &str) -> String {
        self.explorer_url(kind, "address", address)
    }

    /// Block explorer URL for a transaction.
    #[must_use]
    pub fn transaction_explorer_url(&self, kind: WalletKind, tx: &str) -> String {
        self.explorer_url(kind, "tx", tx)
    }

    fn explorer_url(&self, kind: WalletKind, segment: &str, id: &str) -> String {
        let base = &self.config(kind).explorer_url;
        let mut url = format!("{base}/{segment}/{id}");
        // Solana shares one explorer across clusters.
        if kind == WalletKind::Sol && self.env == Environment::Testnet {
            url.push_str("?cluster=devnet");
        }
        url
    }
}

/// The built-in per-symbol pay-limit ceilings, expressed in
/// human-readable units.
#[must_use]
pub fn default_pay_limits() -> HashMap<String, Decimal> {
    [
        ("ETH", Decimal::new(1, 2)),
        ("BNB", Decimal::new(1, 1)),
        ("SOL", Decimal::new(5, 1)),
        ("USDC", Decimal::from(50)),
        ("USDT", Decimal::from(50)),
    ]
    .into_iter()
    .map(|(symbol, limit)| (symbol.to_owned(), limit))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_id_mapping() {
        assert_eq!(WalletKind::from_network_id("56").unwrap(), WalletKind::Bnb);
        assert_eq!(WalletKind::from_network_id("97").unwrap(), WalletKind::Bnb);
        assert_eq!(
            WalletKind::from_network_id("8453").unwrap(),
            WalletKind::Base
        );
        assert_eq!(
            WalletKind::from_network_id("84532").unwrap(),
            WalletKind::Base
        );
        assert_eq!(
            WalletKind::from_network_id("mainnet").unwrap(),
            WalletKind::Sol
        );
        assert_eq!(
            WalletKind::from_network_id("devnet").unwrap(),
            WalletKind::Sol
        );
        assert!(WalletKind::from_network_id("1").is_err());
        assert!(WalletKind::from_network_id("").is_err());
    }

    #[test]
    fn family_split() {
        assert_eq!(WalletKind::Bnb.family(), ChainFamily::Evm);
        assert_eq!(WalletKind::Base.family(), ChainFamily::Evm);
        assert_eq!(WalletKind::Sol.family(), ChainFamily::Solana);
    }

    #[test]
    fn token_lookup_is_case_insensitive() {
        let registry = ChainRegistry::with_defaults(Environment::Mainnet);
        assert!(registry.is_token_allowed(
            WalletKind::Base,
            "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913"
        ));
        assert!(!registry.is_token_allowed(WalletKind::Base, "0xdeadbeef"));
        assert_eq!(
            registry.decimals_for_token(
                WalletKind::Base,
                "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"
            ),
            Some(6)
        );
    }

    #[test]
    fn native_placeholder_resolution() {
        let registry = ChainRegistry::with_defaults(Environment::Mainnet);
        assert_eq!(
            registry.symbol_for_token(WalletKind::Base, EVM_NATIVE_PLACEHOLDER),
            Some("ETH")
        );
        assert_eq!(
            registry.decimals_for_token(WalletKind::Sol, SOL_NATIVE_PLACEHOLDER),
            Some(9)
        );
        assert!(is_native_placeholder(EVM_NATIVE_PLACEHOLDER));
        assert!(!is_native_placeholder("0x1"));
    }

    #[test]
    fn explorer_urls_carry_devnet_cluster() {
        let testnet = ChainRegistry::with_defaults(Environment::Testnet);
        assert_eq!(
            testnet.transaction_explorer_url(WalletKind::Sol, "sig"),
            "https://explorer.solana.com/tx/sig?cluster=devnet"
        );
        let mainnet = ChainRegistry::with_defaults(Environment::Mainnet);
        assert_eq!(
            mainnet.address_explorer_url(WalletKind::Bnb, "0xabc"),
            "https://bscscan.com/address/0xabc"
        );
    }

    #[test]
    fn default_limits_match_table() {
        let limits = default_pay_limits();
        assert_eq!(limits["ETH"], Decimal::new(1, 2));
        assert_eq!(limits["SOL"], Decimal::new(5, 1));
        assert_eq!(limits["USDC"], Decimal::from(50));
    }

    #[test]
    fn wallet_kind_round_trips_through_serde() {
        let json = serde_json::to_string(&WalletKind::Bnb).unwrap();
        assert_eq!(json, "\"BNB\"");
        let kind: WalletKind = serde_json::from_str("\"SOL\"").unwrap();
        assert_eq!(kind, WalletKind::Sol);
    }
}
