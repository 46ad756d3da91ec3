mod encoding;
pub mod local;

use core::fmt::Debug;

pub use encoding::{decode_frame, ProtoBufEncodingLayer};

use crate::{
    messages::{ConversionError, ParticipantMessage},
    types::Address,
};

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("frame of {0} bytes does not fit the u16 length prefix")]
    FrameTooLarge(usize),
    #[error("truncated frame")]
    TruncatedFrame,
    #[error("encoding: {0}")]
    Encode(#[from] prost::EncodeError),
    #[error("decoding: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("no route to {0}")]
    UnknownPeer(Address),
    #[error("{0} disconnected")]
    Disconnected(Address),
}

/// Transport for already encoded frames. Ordered and exactly-once per
/// sender/recipient pair.
pub trait BytesBus: Debug + Send + Sync {
    fn send_to_participant(
        &self,
        sender: &Address,
        recipient: &Address,
        msg: &[u8],
    ) -> Result<(), BusError>;
}

/// Typed view of the network, used by the client and the sessions.
pub trait MessageBus: Debug + Send + Sync {
    fn send_to_participant(
        &self,
        sender: &Address,
        recipient: &Address,
        msg: ParticipantMessage,
    ) -> Result<(), BusError>;
}
