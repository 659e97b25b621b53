//! Associated token account derivation and creation.
//!
//! Token balances on Solana live in per-(owner, mint) associated token
//! accounts. The address is derived off-chain with
//! [`Pubkey::find_program_address`]; when a recipient's account does
//! not exist yet the sender prepends an idempotent create instruction
//! and pays the rent.

use solana_pubkey::{Pubkey, pubkey};
use solana_transaction::Instruction;
use spl_token::solana_program::instruction::AccountMeta;

/// The associated token account program.
pub const ATA_PROGRAM_PUBKEY: Pubkey = pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// The system program.
pub const SYSTEM_PROGRAM_PUBKEY: Pubkey = pubkey!("11111111111111111111111111111111");

/// Derives the associated token account for `(owner, mint)` under the
/// standard SPL Token program.
#[must_use]
pub fn derive_ata(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    let (ata, _) = Pubkey::find_program_address(
        &[owner.as_ref(), spl_token::ID.as_ref(), mint.as_ref()],
        &ATA_PROGRAM_PUBKEY,
    );
    ata
}

/// Builds the `CreateIdempotent` instruction for the associated token
/// account of `(owner, mint)`, funded by `payer`. Idempotent creation
/// is a no-op when the account already exists, so a stale existence
/// check cannot break the transaction.
#[must_use]
pub fn create_ata_idempotent(payer: &Pubkey, owner: &Pubkey, mint: &Pubkey) -> Instruction {
    let ata = derive_ata(owner, mint);
    Instruction {
        program_id: ATA_PROGRAM_PUBKEY,
        accounts: vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(ata, false),
            AccountMeta::new_readonly(*owner, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(SYSTEM_PROGRAM_PUBKEY, false),
            AccountMeta::new_readonly(spl_token::ID, false),
        ],
        // CreateIdempotent discriminator
        data: vec![1],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic_and_owner_specific() {
        let mint = pubkey!("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v");
        let alice = Pubkey::new_unique();
        let bob = Pubkey::new_unique();

        assert_eq!(derive_ata(&alice, &mint), derive_ata(&alice, &mint));
        assert_ne!(derive_ata(&alice, &mint), derive_ata(&bob, &mint));
    }

    #[test]
    fn create_instruction_shape() {
        let mint = pubkey!("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v");
        let payer = Pubkey::new_unique();
        let owner = Pubkey::new_unique();

        let ix = create_ata_idempotent(&payer, &owner, &mint);
        assert_eq!(ix.program_id, ATA_PROGRAM_PUBKEY);
        assert_eq!(ix.data, vec![1]);
        assert_eq!(ix.accounts.len(), 6);
        assert!(ix.accounts[0].is_signer);
        assert_eq!(ix.accounts[1].pubkey, derive_ata(&owner, &mint));
    }
}
