//! Handles the creation and verification of (Ethereum) Signatures and the
//! derivation of per-role accounts.

use crate::{config::Role, types::Hash};
use sha3::{Digest, Keccak256};

mod k256;
pub use self::k256::{recover_signer, Error, Signer};

#[cfg(test)]
mod tests;

/// Add the `\x19Ethereum Signed Message\n<length>` prefix to hash.
///
/// This is the format expected by the Solidity contracts.
fn hash_to_eth_signed_msg_hash(hash: Hash) -> Hash {
    // Packed encoding => We can't use the protobuf hashing
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n32");
    hasher.update(hash.0);
    Hash(hasher.finalize().into())
}

/// Deterministically derive the account of `role` from a shared seed.
///
/// Stand-in for a HD wallet: the secret key is `keccak256(seed || role)`.
/// Every node configured with the same seed derives the same two accounts,
/// which is all the two-party setup needs.
pub fn derive_account(seed: &str, role: Role) -> Result<Signer, Error> {
    let mut hasher = Keccak256::new();
    hasher.update(seed.as_bytes());
    hasher.update((role.index() as u32).to_be_bytes());
    let secret: [u8; 32] = hasher.finalize().into();
    Signer::from_secret(&secret)
}
