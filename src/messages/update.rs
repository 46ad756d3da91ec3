use super::{hash_from_bytes, ConversionError};
use crate::{
    channel::{PartIdx, State, PARTICIPANTS},
    perunwire,
    types::{Hash, Signature},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerChannelUpdate {
    pub state: State,
    pub actor_idx: PartIdx,
    pub sig: Signature,
}

fn signature_from_bytes(b: &[u8]) -> Result<Signature, ConversionError> {
    b.try_into().or(Err(ConversionError::ByteLengthMismatch))
}

impl TryFrom<perunwire::ChannelUpdateMsg> for LedgerChannelUpdate {
    type Error = ConversionError;

    fn try_from(value: perunwire::ChannelUpdateMsg) -> Result<Self, Self::Error> {
        let update = value.channel_update.ok_or(ConversionError::ExpectedSome)?;
        let actor_idx = update.actor_idx as usize;
        if actor_idx >= PARTICIPANTS {
            return Err(ConversionError::ParticipantSizeMismatch);
        }

        Ok(Self {
            state: update
                .state
                .ok_or(ConversionError::ExpectedSome)?
                .try_into()?,
            actor_idx,
            sig: signature_from_bytes(&value.sig)?,
        })
    }
}

impl From<LedgerChannelUpdate> for perunwire::ChannelUpdateMsg {
    fn from(value: LedgerChannelUpdate) -> Self {
        Self {
            channel_update: Some(perunwire::ChannelUpdate {
                state: Some(value.state.into()),
                actor_idx: value.actor_idx as u32,
            }),
            sig: value.sig.0.to_vec(),
        }
    }
}

/// Signature of the receiver on an update (or on the initial state, with
/// `version == 0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerChannelUpdateAccepted {
    pub channel: Hash,
    pub version: u64,
    pub sig: Signature,
}

impl TryFrom<perunwire::ChannelUpdateAccMsg> for LedgerChannelUpdateAccepted {
    type Error = ConversionError;

    fn try_from(value: perunwire::ChannelUpdateAccMsg) -> Result<Self, Self::Error> {
        Ok(LedgerChannelUpdateAccepted {
            channel: hash_from_bytes(&value.channel_id)?,
            version: value.version,
            sig: signature_from_bytes(&value.sig)?,
        })
    }
}

impl From<LedgerChannelUpdateAccepted> for perunwire::ChannelUpdateAccMsg {
    fn from(value: LedgerChannelUpdateAccepted) -> Self {
        Self {
            channel_id: value.channel.0.to_vec(),
            version: value.version,
            sig: value.sig.0.to_vec(),
        }
    }
}
