//! The Solana wallet backend.

use crate::ata::{create_ata_idempotent, derive_ata};
use alloy_primitives::U256;
use async_trait::async_trait;
use h402::amount::{self, AmountError};
use h402::proto::{AmountFormat, PaymentRequirement};
use h402::registry::{ChainConfig, ChainRegistry, WalletKind, is_native_placeholder};
use h402::wallet::{PaymentProof, Wallet, WalletConfig, WalletError};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_commitment_config::CommitmentConfig;
use solana_keypair::Keypair;
use solana_message::v0::Message as MessageV0;
use solana_message::VersionedMessage;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_signer::Signer;
use solana_transaction::Instruction;
use solana_transaction::versioned::VersionedTransaction;
use solana_system_interface::instruction as system_instruction;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default confirmation wait used by [`SolanaWallet::wait_for_confirmation`].
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Base fee for a single-signature transaction, in lamports.
pub const BASE_FEE_LAMPORTS: u64 = 5_000;

/// Rent plus fee overhead of creating a missing associated token
/// account for the recipient, in lamports.
pub const ATA_CREATION_LAMPORTS: u64 = 2_044_280;

/// A single-keypair wallet on Solana.
///
/// Token transfers go through associated token accounts; when the
/// recipient's account is missing the wallet prepends an idempotent
/// create instruction and pays the rent. Payment transactions are
/// compiled as v0 messages, signed locally and serialized with bincode
/// for base64 transport.
pub struct SolanaWallet {
    chain: ChainConfig,
    keypair: Keypair,
    pubkey: Pubkey,
    address_text: String,
    private_key: String,
    client: RpcClient,
}

impl fmt::Debug for SolanaWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolanaWallet")
            .field("address", &self.address_text)
            .field("rpc_url", &self.chain.rpc_url)
            .finish_non_exhaustive()
    }
}

/// A fully resolved payment: destination, optional mint, exact units.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PaymentIntent {
    to: Pubkey,
    /// `None` for native SOL transfers.
    mint: Option<(Pubkey, u8)>,
    units: u64,
}

impl SolanaWallet {
    /// Constructs a wallet from a hex-encoded 64-byte ed25519 keypair,
    /// deriving the address from the key.
    ///
    /// # Errors
    ///
    /// Fails if the kind is not [`WalletKind::Sol`], the key does not
    /// decode, or a configured address disagrees with the derived one.
    pub fn from_config(config: &WalletConfig, registry: &ChainRegistry) -> Result<Self, WalletError> {
        if config.kind != WalletKind::Sol {
            return Err(WalletError::InvalidKey(format!(
                "{} is not a Solana wallet kind",
                config.kind
            )));
        }

        let bytes = hex::decode(&config.private_key)
            .map_err(|_| WalletError::InvalidKey("private key is not valid hex".to_owned()))?;
        let keypair = Keypair::try_from(bytes.as_slice())
            .map_err(|_| WalletError::InvalidKey("not a 64-byte ed25519 keypair".to_owned()))?;
        let pubkey = keypair.pubkey();
        let address_text = pubkey.to_string();
        if !config.address.is_empty() && config.address != address_text {
            return Err(WalletError::InvalidKey(format!(
                "configured address {} does not match key address {address_text}",
                config.address
            )));
        }

        let chain = registry.config(WalletKind::Sol).clone();
        let client =
            RpcClient::new_with_commitment(chain.rpc_url.clone(), CommitmentConfig::finalized());

        info!(address = %address_text, "solana wallet ready");
        Ok(Self {
            chain,
            keypair,
            pubkey,
            address_text,
            private_key: config.private_key.clone(),
            client,
        })
    }

    /// Generates a fresh random wallet.
    ///
    /// # Errors
    ///
    /// Propagates construction failures, which cannot occur for a
    /// freshly generated keypair.
    pub fn generate(registry: &ChainRegistry) -> Result<Self, WalletError> {
        let keypair = Keypair::new();
        let config = WalletConfig {
            kind: WalletKind::Sol,
            address: String::new(),
            private_key: hex::encode(keypair.to_bytes()),
        };
        Self::from_config(&config, registry)
    }

    /// The hex-encoded 64-byte keypair.
    #[must_use]
    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    /// The chain configuration this wallet operates on.
    #[must_use]
    pub const fn chain(&self) -> &ChainConfig {
        &self.chain
    }

    /// The latest finalized blockhash, in base58.
    pub async fn recent_blockhash(&self) -> Result<String, WalletError> {
        let hash = self
            .client
            .get_latest_blockhash()
            .await
            .map_err(rpc_err)?;
        Ok(hash.to_string())
    }

    /// Waits for a signature with the default 60 second timeout.
    pub async fn wait_for_confirmation(&self, reference: &str) -> Result<(), WalletError> {
        self.wait_for_transaction(reference, DEFAULT_CONFIRMATION_TIMEOUT)
            .await
    }

    fn parse_pubkey(text: &str) -> Result<Pubkey, WalletError> {
        Pubkey::from_str(text).map_err(|_| WalletError::InvalidAddress(text.to_owned()))
    }

    fn allow_listed(&self, mint_address: &str) -> Result<(Pubkey, u8), WalletError> {
        let entry = self
            .chain
            .tokens
            .iter()
            .find(|t| t.address == mint_address)
            .ok_or_else(|| WalletError::UnsupportedToken {
                token: mint_address.to_owned(),
                kind: WalletKind::Sol,
            })?;
        Ok((Self::parse_pubkey(&entry.address)?, entry.decimals))
    }

    /// Resolves a requirement into a concrete transfer without touching
    /// the network.
    fn resolve_payment(&self, requirement: &PaymentRequirement) -> Result<PaymentIntent, WalletError> {
        let to = Self::parse_pubkey(&requirement.pay_to_address)?;

        let (mint, decimals) = if is_native_placeholder(&requirement.token_address) {
            (None, self.chain.decimals)
        } else {
            let (pubkey, decimals) = self.allow_listed(&requirement.token_address)?;
            (Some((pubkey, decimals)), decimals)
        };

        let units = match requirement.amount_required_format {
            AmountFormat::SmallestUnit => amount::to_smallest_unit(requirement.amount_required, 0)?,
            AmountFormat::Decimal => {
                amount::to_smallest_unit(requirement.amount_required, decimals)?
            }
        };
        let units = u64::try_from(units)
            .map_err(|_| AmountError::OutOfRange(units.to_string(), decimals))
            .map_err(WalletError::Amount)?;

        Ok(PaymentIntent { to, mint, units })
    }

    async fn check_coverage(&self, intent: &PaymentIntent) -> Result<(), WalletError> {
        let (balance, decimals) = match intent.mint {
            None => (self.balance().await?, self.chain.decimals),
            Some((mint, decimals)) => (self.ata_balance(&mint).await?, decimals),
        };
        let units = U256::from(intent.units);
        if balance < units {
            return Err(WalletError::InsufficientFunds {
                required: amount::format_units(units, decimals),
                balance: amount::format_units(balance, decimals),
            });
        }
        Ok(())
    }

    async fn ata_balance(&self, mint: &Pubkey) -> Result<U256, WalletError> {
        let ata = derive_ata(&self.pubkey, mint);
        match self.client.get_token_account_balance(&ata).await {
            Ok(ui_amount) => ui_amount
                .amount
                .parse::<u64>()
                .map(U256::from)
                .map_err(|_| WalletError::Rpc(format!("malformed token balance for {ata}"))),
            // A missing associated token account reads as zero.
            Err(err) => {
                debug!(%ata, %err, "token account not readable, treating as empty");
                Ok(U256::ZERO)
            }
        }
    }

    async fn destination_ata_missing(&self, owner: &Pubkey, mint: &Pubkey) -> bool {
        let ata = derive_ata(owner, mint);
        self.client.get_account(&ata).await.is_err()
    }

    async fn token_transfer_instructions(
        &self,
        mint: Pubkey,
        decimals: u8,
        to: Pubkey,
        units: u64,
    ) -> Result<Vec<Instruction>, WalletError> {
        let source = derive_ata(&self.pubkey, &mint);
        let destination = derive_ata(&to, &mint);

        let mut instructions = Vec::with_capacity(2);
        if self.destination_ata_missing(&to, &mint).await {
            instructions.push(create_ata_idempotent(&self.pubkey, &to, &mint));
        }
        let transfer = spl_token::instruction::transfer_checked(
            &spl_token::ID,
            &source,
            &mint,
            &destination,
            &self.pubkey,
            &[],
            units,
            decimals,
        )
        .map_err(|err| WalletError::Signing(err.to_string()))?;
        instructions.push(transfer);
        Ok(instructions)
    }

    async fn sign_instructions(
        &self,
        instructions: &[Instruction],
    ) -> Result<VersionedTransaction, WalletError> {
        let blockhash = self
            .client
            .get_latest_blockhash()
            .await
            .map_err(rpc_err)?;
        let message = MessageV0::try_compile(&self.pubkey, instructions, &[], blockhash)
            .map_err(|err| WalletError::Signing(err.to_string()))?;
        VersionedTransaction::try_new(VersionedMessage::V0(message), &[&self.keypair])
            .map_err(|err| WalletError::Signing(err.to_string()))
    }

    async fn broadcast(&self, tx: &VersionedTransaction) -> Result<String, WalletError> {
        let signature = self.client.send_transaction(tx).await.map_err(rpc_err)?;
        Ok(signature.to_string())
    }
}

#[async_trait]
impl Wallet for SolanaWallet {
    fn address(&self) -> &str {
        &self.address_text
    }

    fn kind(&self) -> WalletKind {
        WalletKind::Sol
    }

    async fn balance(&self) -> Result<U256, WalletError> {
        let lamports = self.client.get_balance(&self.pubkey).await.map_err(rpc_err)?;
        Ok(U256::from(lamports))
    }

    async fn token_balance(&self, token_address: &str) -> Result<U256, WalletError> {
        let mint = Self::parse_pubkey(token_address)?;
        self.ata_balance(&mint).await
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
        let to = Self::parse_pubkey(to)?;
        let lamports = u64::try_from(amount)
            .map_err(|_| AmountError::OutOfRange(amount.to_string(), self.chain.decimals))
            .map_err(WalletError::Amount)?;
        let instruction = system_instruction::transfer(&self.pubkey, &to, lamports);
        let tx = self.sign_instructions(&[instruction]).await?;
        self.broadcast(&tx).await
    }

    async fn send_token(
        &self,
        token_address: &str,
        to: &str,
        amount: U256,
    ) -> Result<String, WalletError> {
        let (mint, decimals) = self.allow_listed(token_address)?;
        let to = Self::parse_pubkey(to)?;
        let units = u64::try_from(amount)
            .map_err(|_| AmountError::OutOfRange(amount.to_string(), decimals))
            .map_err(WalletError::Amount)?;
        let instructions = self
            .token_transfer_instructions(mint, decimals, to, units)
            .await?;
        let tx = self.sign_instructions(&instructions).await?;
        self.broadcast(&tx).await
    }

    async fn estimate_fee(&self, _to: &str, _amount: U256) -> Result<U256, WalletError> {
        Ok(U256::from(BASE_FEE_LAMPORTS))
    }

    async fn estimate_token_fee(
        &self,
        token_address: &str,
        to: &str,
        _amount: U256,
    ) -> Result<U256, WalletError> {
        let (mint, _) = self.allow_listed(token_address)?;
        let to = Self::parse_pubkey(to)?;
        let mut fee = BASE_FEE_LAMPORTS;
        if self.destination_ata_missing(&to, &mint).await {
            fee += ATA_CREATION_LAMPORTS;
        }
        Ok(U256::from(fee))
    }

    async fn wait_for_transaction(
        &self,
        reference: &str,
        timeout: Duration,
    ) -> Result<(), WalletError> {
        let signature = Signature::from_str(reference)
            .map_err(|_| WalletError::Rpc(format!("invalid signature: {reference}")))?;

        let deadline = tokio::time::Instant::now() + timeout;
        let mut ticker = tokio::time::interval(STATUS_POLL_INTERVAL);
        loop {
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => {
                    return Err(WalletError::ConfirmationTimeout {
                        reference: reference.to_owned(),
                        timeout,
                    });
                }
                _ = ticker.tick() => {
                    let statuses = match self.client.get_signature_statuses(&[signature]).await {
                        Ok(response) => response.value,
                        Err(err) => {
                            debug!(%signature, %err, "signature status poll failed");
                            continue;
                        }
                    };
                    if let Some(Some(status)) = statuses.first() {
                        if let Some(err) = &status.err {
                            return Err(WalletError::TransactionFailed(err.to_string()));
                        }
                        // Any confirmation level is terminal here.
                        if status.confirmation_status.is_some() {
                            debug!(%signature, "transaction confirmed");
                            return Ok(());
                        }
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

        let instructions = match intent.mint {
            None => vec![system_instruction::transfer(
                &self.pubkey,
                &intent.to,
                intent.units,
            )],
            Some((mint, decimals)) => {
                self.token_transfer_instructions(mint, decimals, intent.to, intent.units)
                    .await?
            }
        };

        let tx = self.sign_instructions(&instructions).await?;
        let bytes = bincode::serialize(&tx)
            .map_err(|err| WalletError::Signing(format!("serialization failed: {err}")))?;
        let transaction = h402::encoding::Base64Bytes::encode(bytes).into_string();
        let reference = tx
            .signatures
            .first()
            .ok_or_else(|| WalletError::Signing("transaction has no signatures".to_owned()))?
            .to_string();
        debug!(%reference, "payment transaction signed");
        Ok(PaymentProof {
            transaction,
            reference,
        })
    }
}

fn rpc_err(err: impl fmt::Display) -> WalletError {
    WalletError::Rpc(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use h402::registry::{Environment, SOL_NATIVE_PLACEHOLDER};
    use rust_decimal::Decimal;

    const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

    fn registry() -> ChainRegistry {
        ChainRegistry::with_defaults(Environment::Mainnet)
    }

    fn wallet() -> SolanaWallet {
        SolanaWallet::generate(&registry()).unwrap()
    }

    fn requirement(amount: &str, format: AmountFormat, token: &str) -> PaymentRequirement {
        PaymentRequirement {
            namespace: "solana".to_owned(),
            token_address: token.to_owned(),
            amount_required: Decimal::from_str(amount).unwrap(),
            amount_required_format: format,
            pay_to_address: Pubkey::new_unique().to_string(),
            network_id: "mainnet".to_owned(),
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
    fn keypair_round_trips_through_hex_config() {
        let generated = wallet();
        let reloaded = SolanaWallet::from_config(
            &WalletConfig {
                kind: WalletKind::Sol,
                address: generated.address().to_owned(),
                private_key: generated.private_key().to_owned(),
            },
            &registry(),
        )
        .unwrap();
        assert_eq!(reloaded.address(), generated.address());
    }

    #[test]
    fn rejects_short_keys() {
        let config = WalletConfig {
            kind: WalletKind::Sol,
            address: String::new(),
            private_key: "deadbeef".to_owned(),
        };
        assert!(matches!(
            SolanaWallet::from_config(&config, &registry()),
            Err(WalletError::InvalidKey(_))
        ));
    }

    #[test]
    fn rejects_mismatched_address() {
        let generated = wallet();
        let config = WalletConfig {
            kind: WalletKind::Sol,
            address: Pubkey::new_unique().to_string(),
            private_key: generated.private_key().to_owned(),
        };
        assert!(SolanaWallet::from_config(&config, &registry()).is_err());
    }

    #[test]
    fn native_decimal_amounts_scale_to_lamports() {
        let intent = wallet()
            .resolve_payment(&requirement("0.5", AmountFormat::Decimal, SOL_NATIVE_PLACEHOLDER))
            .unwrap();
        assert_eq!(intent.mint, None);
        assert_eq!(intent.units, 500_000_000);
    }

    #[test]
    fn token_amounts_use_allow_list_decimals() {
        let intent = wallet()
            .resolve_payment(&requirement("12.5", AmountFormat::Decimal, USDC_MINT))
            .unwrap();
        assert_eq!(intent.units, 12_500_000);
        let (_, decimals) = intent.mint.unwrap();
        assert_eq!(decimals, 6);
    }

    #[test]
    fn smallest_unit_amounts_pass_through() {
        let intent = wallet()
            .resolve_payment(&requirement("123456", AmountFormat::SmallestUnit, USDC_MINT))
            .unwrap();
        assert_eq!(intent.units, 123_456);
    }

    #[test]
    fn unlisted_mint_rejected() {
        let bogus = Pubkey::new_unique().to_string();
        assert!(matches!(
            wallet().resolve_payment(&requirement("1", AmountFormat::Decimal, &bogus)),
            Err(WalletError::UnsupportedToken { .. })
        ));
    }

    #[test]
    fn invalid_recipient_rejected() {
        let mut req = requirement("1", AmountFormat::Decimal, SOL_NATIVE_PLACEHOLDER);
        req.pay_to_address = "not-base58!".to_owned();
        assert!(matches!(
            wallet().resolve_payment(&req),
            Err(WalletError::InvalidAddress(_))
        ));
    }
}
