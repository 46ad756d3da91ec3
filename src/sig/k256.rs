//! Signer using the k256 Rust crate (implementation of ecdsa in Rust).

use crate::types::{Address, Hash, Signature};
use k256::{
    ecdsa::{
        recoverable,
        signature::{hazmat::PrehashSigner, Signature as k256Signature},
        SigningKey, VerifyingKey,
    },
    elliptic_curve::sec1::ToEncodedPoint,
};
use sha3::{Digest, Keccak256};

use super::hash_to_eth_signed_msg_hash;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid secret key")]
    InvalidSecret,
    #[error("signature has an invalid recovery id: {0}")]
    InvalidRecoveryId(u8),
    #[error("ecdsa: {0}")]
    Ecdsa(String),
}

impl From<k256::ecdsa::Error> for Error {
    fn from(e: k256::ecdsa::Error) -> Self {
        Self::Ecdsa(e.to_string())
    }
}

pub struct Signer {
    key: SigningKey,
    addr: Address,
}

impl core::fmt::Debug for Signer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Never print the secret key.
        f.debug_struct("Signer").field("addr", &self.addr).finish()
    }
}

impl From<&VerifyingKey> for Address {
    fn from(key: &VerifyingKey) -> Self {
        // Uncompressed SEC1 encoding: one tag byte followed by the 64 byte
        // public key, of which the address is the last 20 bytes of its hash.
        // See https://ethereum.stackexchange.com/questions/65233/goethereum-getting-public-key-from-private-key-hex-formatting
        let point = key.to_encoded_point(false);
        let hash: [u8; 32] = Keccak256::digest(&point.as_bytes()[1..]).into();

        let mut addr = Address([0; 20]);
        addr.0.copy_from_slice(&hash[32 - 20..]);
        addr
    }
}

impl Signer {
    /// Create a signer with a fresh random key.
    pub fn new<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> Self {
        loop {
            // A random 32 byte string is a valid scalar with overwhelming
            // probability, retry in the rare case that it is not.
            let secret: [u8; 32] = rng.gen();
            if let Ok(signer) = Self::from_secret(&secret) {
                return signer;
            }
        }
    }

    pub fn from_secret(secret: &[u8; 32]) -> Result<Self, Error> {
        let key = SigningKey::from_bytes(secret).map_err(|_| Error::InvalidSecret)?;
        let addr = Address::from(&key.verifying_key());
        Ok(Self { key, addr })
    }

    pub fn address(&self) -> Address {
        self.addr
    }

    pub fn sign_eth(&self, msg: Hash) -> Result<Signature, Error> {
        // "\x19Ethereum Signed Message:\n32" format
        let hash = hash_to_eth_signed_msg_hash(msg);

        let sig: recoverable::Signature = self.key.sign_prehash(&hash.0)?;

        // This Signature type already has the format we need: 65 bytes
        // containing r, s and v in this order. We still have to add 27 to v
        // for the signature to be valid in the EVM.
        let mut sig_bytes = [0u8; 65];
        sig_bytes.copy_from_slice(sig.as_bytes());
        sig_bytes[64] += 27;

        Ok(Signature(sig_bytes))
    }

    pub fn recover_signer(&self, msg: Hash, eth_sig: Signature) -> Result<Address, Error> {
        recover_signer(msg, eth_sig)
    }
}

/// Recover the address that produced `eth_sig` over `msg`.
///
/// Does not need a key, the ledger and the handlers use it to check who
/// signed a state.
pub fn recover_signer(msg: Hash, eth_sig: Signature) -> Result<Address, Error> {
    // "\x19Ethereum Signed Message:\n32" format
    let hash = hash_to_eth_signed_msg_hash(msg);

    // Undo adding the 27, to go back to the format expected below
    let mut sig_bytes: [u8; 65] = eth_sig.0;
    sig_bytes[64] = sig_bytes[64]
        .checked_sub(27)
        .ok_or(Error::InvalidRecoveryId(sig_bytes[64]))?;

    let sig = recoverable::Signature::from_bytes(&sig_bytes)?;

    let verifying_key = sig.recover_verifying_key_from_digest_bytes(&hash.0.into())?;
    Ok(Address::from(&verifying_key))
}
