use crate::types::Hash;

use sha3::{Digest, Keccak256};

/// Keccak-256 over the protobuf encoding of `msg`.
///
/// Protobuf encoding of the messages in [crate::perunwire] is deterministic
/// (no maps, fields written in tag order), so both participants arrive at the
/// same hash for the same value.
pub fn to_hash<T>(msg: &T) -> Hash
where
    T: prost::Message,
{
    let mut hasher = Keccak256::new();
    hasher.update(msg.encode_to_vec());
    Hash(hasher.finalize().into())
}
