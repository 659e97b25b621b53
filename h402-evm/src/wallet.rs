//! The EVM wallet backend.

use crate::erc20::IERC20;
use alloy_consensus::TxEnvelope;
use alloy_eips::eip2718::Encodable2718;
use alloy_network::{EthereumWallet, TransactionBuilder};
use alloy_primitives::{Address, Bytes, TxHash, U256, hex};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types_eth::TransactionRequest;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use h402::amount;
use h402::proto::{AmountFormat, PaymentRequirement};
use h402::registry::{ChainConfig, ChainFamily, ChainRegistry, WalletKind, is_native_placeholder};
use h402::wallet::{PaymentProof, Wallet, WalletConfig, WalletError};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default confirmation wait used by [`EvmWallet::wait_for_confirmation`].
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60);

/// A single-key wallet on an EVM chain (BNB Smart Chain or Base).
///
/// Transactions are legacy (pre-EIP-1559) transfers assembled from the
/// pending nonce, the node's suggested gas price and `eth_estimateGas`,
/// then signed locally. Both chains accept legacy transactions and the
/// h402 servers resubmit them verbatim, so the simplest envelope wins.
pub struct EvmWallet {
    kind: WalletKind,
    chain: ChainConfig,
    address: Address,
    address_text: String,
    private_key: String,
    signer: PrivateKeySigner,
    provider: DynProvider,
}

impl fmt::Debug for EvmWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmWallet")
            .field("kind", &self.kind)
            .field("address", &self.address_text)
            .field("chain_id", &self.chain.chain_id)
            .finish_non_exhaustive()
    }
}

/// A fully resolved payment: where the funds go, which contract is
/// called, and the exact unit amount.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PaymentIntent {
    to: Address,
    /// `None` for native transfers.
    token: Option<(Address, u8)>,
    units: U256,
}

impl EvmWallet {
    /// Constructs a wallet from configured key material, deriving the
    /// address from the key.
    ///
    /// # Errors
    ///
    /// Fails if the kind is not an EVM kind, the key does not parse, or
    /// a configured address disagrees with the derived one.
    pub fn from_config(config: &WalletConfig, registry: &ChainRegistry) -> Result<Self, WalletError> {
        if config.kind.family() != ChainFamily::Evm {
            return Err(WalletError::InvalidKey(format!(
                "{} is not an EVM wallet kind",
                config.kind
            )));
        }

        let key = config.private_key.trim_start_matches("0x");
        let signer: PrivateKeySigner = key
            .parse()
            .map_err(|_| WalletError::InvalidKey("not a 32-byte secp256k1 key".to_owned()))?;
        let address = signer.address();
        let address_text = address.to_string();
        if !config.address.is_empty() && !config.address.eq_ignore_ascii_case(&address_text) {
            return Err(WalletError::InvalidKey(format!(
                "configured address {} does not match key address {address_text}",
                config.address
            )));
        }

        let chain = registry.config(config.kind).clone();
        let url: Url = chain
            .rpc_url
            .parse()
            .map_err(|err| WalletError::Rpc(format!("invalid rpc url {}: {err}", chain.rpc_url)))?;
        let provider = ProviderBuilder::new().connect_http(url).erased();

        info!(kind = %config.kind, address = %address_text, "evm wallet ready");
        Ok(Self {
            kind: config.kind,
            chain,
            address,
            address_text,
            private_key: key.to_owned(),
            signer,
            provider,
        })
    }

    /// Generates a fresh random wallet for `kind`.
    ///
    /// # Errors
    ///
    /// Fails if `kind` is not an EVM kind.
    pub fn generate(kind: WalletKind, registry: &ChainRegistry) -> Result<Self, WalletError> {
        let signer = PrivateKeySigner::random();
        let config = WalletConfig {
            kind,
            address: String::new(),
            private_key: hex::encode(signer.to_bytes()),
        };
        Self::from_config(&config, registry)
    }

    /// The hex-encoded private key, without `0x` prefix.
    #[must_use]
    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    /// The chain configuration this wallet operates on.
    #[must_use]
    pub const fn chain(&self) -> &ChainConfig {
        &self.chain
    }

    /// The node's currently suggested gas price, in wei.
    pub async fn gas_price(&self) -> Result<u128, WalletError> {
        self.provider.get_gas_price().await.map_err(rpc_err)
    }

    /// The account's pending nonce.
    pub async fn nonce(&self) -> Result<u64, WalletError> {
        self.provider
            .get_transaction_count(self.address)
            .pending()
            .await
            .map_err(rpc_err)
    }

    /// Waits for a transaction with the default 60 second timeout.
    pub async fn wait_for_confirmation(&self, reference: &str) -> Result<(), WalletError> {
        self.wait_for_transaction(reference, DEFAULT_CONFIRMATION_TIMEOUT)
            .await
    }

    fn parse_address(text: &str) -> Result<Address, WalletError> {
        text.parse()
            .map_err(|_| WalletError::InvalidAddress(text.to_owned()))
    }

    fn allow_listed(&self, token_address: &str) -> Result<(Address, u8), WalletError> {
        let entry = self
            .chain
            .tokens
            .iter()
            .find(|t| t.address.eq_ignore_ascii_case(token_address))
            .ok_or_else(|| WalletError::UnsupportedToken {
                token: token_address.to_owned(),
                kind: self.kind,
            })?;
        Ok((Self::parse_address(&entry.address)?, entry.decimals))
    }

    /// Resolves a requirement into a concrete transfer without touching
    /// the network: validates addresses, enforces the token allow-list
    /// and converts the amount into smallest units.
    fn resolve_payment(&self, requirement: &PaymentRequirement) -> Result<PaymentIntent, WalletError> {
        let to = Self::parse_address(&requirement.pay_to_address)?;

        let (token, decimals) = if is_native_placeholder(&requirement.token_address) {
            (None, self.chain.decimals)
        } else {
            let (address, decimals) = self.allow_listed(&requirement.token_address)?;
            (Some((address, decimals)), decimals)
        };

        let units = match requirement.amount_required_format {
            AmountFormat::SmallestUnit => amount::to_smallest_unit(requirement.amount_required, 0)?,
            AmountFormat::Decimal => {
                amount::to_smallest_unit(requirement.amount_required, decimals)?
            }
        };

        Ok(PaymentIntent { to, token, units })
    }

    async fn check_coverage(&self, intent: &PaymentIntent) -> Result<(), WalletError> {
        let (balance, decimals) = match intent.token {
            None => (self.balance().await?, self.chain.decimals),
            Some((token, decimals)) => (
                self.erc20_balance(token).await?,
                decimals,
            ),
        };
        if balance < intent.units {
            return Err(WalletError::InsufficientFunds {
                required: amount::format_units(intent.units, decimals),
                balance: amount::format_units(balance, decimals),
            });
        }
        Ok(())
    }

    async fn erc20_balance(&self, token: Address) -> Result<U256, WalletError> {
        let call = IERC20::balanceOfCall {
            account: self.address,
        };
        let request = TransactionRequest::default()
            .with_to(token)
            .with_input(Bytes::from(call.abi_encode()));
        let output = self.provider.call(request).await.map_err(rpc_err)?;
        IERC20::balanceOfCall::abi_decode_returns(&output)
            .map_err(|err| WalletError::Rpc(format!("malformed balanceOf return: {err}")))
    }

    async fn unsigned_transfer(
        &self,
        to: Address,
        value: U256,
        input: Option<Bytes>,
    ) -> Result<TransactionRequest, WalletError> {
        let nonce = self.nonce().await?;
        let gas_price = self.gas_price().await?;
        let mut request = TransactionRequest::default()
            .with_from(self.address)
            .with_to(to)
            .with_value(value)
            .with_nonce(nonce)
            .with_chain_id(self.chain.chain_id)
            .with_gas_price(gas_price);
        if let Some(input) = input {
            request = request.with_input(input);
        }
        let gas_limit = self
            .provider
            .estimate_gas(request.clone())
            .await
            .map_err(rpc_err)?;
        Ok(request.with_gas_limit(gas_limit))
    }

    async fn sign_transfer(
        &self,
        to: Address,
        value: U256,
        input: Option<Bytes>,
    ) -> Result<TxEnvelope, WalletError> {
        let request = self.unsigned_transfer(to, value, input).await?;
        let wallet = EthereumWallet::from(self.signer.clone());
        request
            .build(&wallet)
            .await
            .map_err(|err| WalletError::Signing(err.to_string()))
    }

    async fn broadcast(&self, envelope: &TxEnvelope) -> Result<String, WalletError> {
        let raw = envelope.encoded_2718();
        self.provider
            .send_raw_transaction(&raw)
            .await
            .map_err(rpc_err)?;
        Ok(envelope.tx_hash().to_string())
    }
}

#[async_trait]
impl Wallet for EvmWallet {
    fn address(&self) -> &str {
        &self.address_text
    }

    fn kind(&self) -> WalletKind {
        self.kind
    }

    async fn balance(&self) -> Result<U256, WalletError> {
        self.provider
            .get_balance(self.address)
            .await
            .map_err(rpc_err)
    }

    async fn token_balance(&self, token_address: &str) -> Result<U256, WalletError> {
        let token = Self::parse_address(token_address)?;
        self.erc20_balance(token).await
    }

    async fn all_token_balances(&self) -> Result<HashMap<String, U256>, WalletError> {
        let mut balances = HashMap::new();
        for token in &self.chain.tokens {
            let balance = self.token_balance(&token.address).await?;
            balances.insert(token.symbol.clone(), balance);
        }
        Ok(balances)
    }

    async fn send_native(&self, to: &str, amount: U256) -> Result<String, WalletError> {
        let to = Self::parse_address(to)?;
        let envelope = self.sign_transfer(to, amount, None).await?;
        self.broadcast(&envelope).await
    }

    async fn send_token(
        &self,
        token_address: &str,
        to: &str,
        amount: U256,
    ) -> Result<String, WalletError> {
        let (token, _) = self.allow_listed(token_address)?;
        let to = Self::parse_address(to)?;
        let call = IERC20::transferCall { to, value: amount };
        let envelope = self
            .sign_transfer(token, U256::ZERO, Some(Bytes::from(call.abi_encode())))
            .await?;
        self.broadcast(&envelope).await
    }

    async fn estimate_fee(&self, to: &str, amount: U256) -> Result<U256, WalletError> {
        let to = Self::parse_address(to)?;
        let gas_price = self.gas_price().await?;
        let request = TransactionRequest::default()
            .with_from(self.address)
            .with_to(to)
            .with_value(amount);
        let gas_limit = self.provider.estimate_gas(request).await.map_err(rpc_err)?;
        Ok(U256::from(gas_limit) * U256::from(gas_price))
    }

    async fn estimate_token_fee(
        &self,
        token_address: &str,
        to: &str,
        amount: U256,
    ) -> Result<U256, WalletError> {
        let (token, _) = self.allow_listed(token_address)?;
        let to = Self::parse_address(to)?;
        let call = IERC20::transferCall { to, value: amount };
        let gas_price = self.gas_price().await?;
        let request = TransactionRequest::default()
            .with_from(self.address)
            .with_to(token)
            .with_input(Bytes::from(call.abi_encode()));
        let gas_limit = self.provider.estimate_gas(request).await.map_err(rpc_err)?;
        Ok(U256::from(gas_limit) * U256::from(gas_price))
    }

    async fn wait_for_transaction(
        &self,
        reference: &str,
        timeout: Duration,
    ) -> Result<(), WalletError> {
        let hash: TxHash = reference
            .parse()
            .map_err(|_| WalletError::Rpc(format!("invalid transaction hash: {reference}")))?;

        let deadline = tokio::time::Instant::now() + timeout;
        let mut ticker = tokio::time::interval(RECEIPT_POLL_INTERVAL);
        loop {
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => {
                    return Err(WalletError::ConfirmationTimeout {
                        reference: reference.to_owned(),
                        timeout,
                    });
                }
                _ = ticker.tick() => {
                    match self.provider.get_transaction_receipt(hash).await {
                        Ok(Some(receipt)) => {
                            if receipt.status() {
                                debug!(%hash, "transaction confirmed");
                                return Ok(());
                            }
                            return Err(WalletError::TransactionFailed(reference.to_owned()));
                        }
                        Ok(None) => {}
                        Err(err) => return Err(rpc_err(err)),
                    }
                }
            }
        }
    }

    async fn build_payment_transaction(
        &self,
        requirement: &PaymentRequirement,
    ) -> Result<PaymentProof, WalletError> {
        let intent = self.resolve_payment(requirement)?;
        self.check_coverage(&intent).await?;

        let envelope = match intent.token {
            None => self.sign_transfer(intent.to, intent.units, None).await?,
            Some((token, _)) => {
                let call = IERC20::transferCall {
                    to: intent.to,
                    value: intent.units,
                };
                self.sign_transfer(token, U256::ZERO, Some(Bytes::from(call.abi_encode())))
                    .await?
            }
        };

        let transaction = format!("0x{}", hex::encode(envelope.encoded_2718()));
        let reference = envelope.tx_hash().to_string();
        debug!(kind = %self.kind, %reference, "payment transaction signed");
        Ok(PaymentProof {
            transaction,
            reference,
        })
    }
}

fn rpc_err(err: impl fmt::Display) -> WalletError {
    WalletError::Rpc(err.to_string())
}
