mod proposal;
mod update;

pub use proposal::{LedgerChannelProposal, LedgerChannelProposalAcc};
pub use update::{LedgerChannelUpdate, LedgerChannelUpdateAccepted};

use crate::{perunwire, types::Hash};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("wrong number of participants")]
    ParticipantSizeMismatch,
    #[error("wrong number of assets")]
    AssetSizeMismatch,
    #[error("field has the wrong byte length")]
    ByteLengthMismatch,
    #[error("required field is missing")]
    ExpectedSome,
    #[error("envelope carries no message")]
    EmptyEnvelope,
}

/// Messages sent between participants of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantMessage {
    ChannelProposal(LedgerChannelProposal),
    ProposalAccepted(LedgerChannelProposalAcc),
    ProposalRejected {
        id: Hash,
        reason: String,
    },
    ChannelUpdate(LedgerChannelUpdate),
    ChannelUpdateAccepted(LedgerChannelUpdateAccepted),
    ChannelUpdateRejected {
        id: Hash,
        version: u64,
        reason: String,
    },
}

impl ParticipantMessage {
    /// Channel this message belongs to, `None` for proposal messages which
    /// are matched by proposal id instead.
    pub fn channel_id(&self) -> Option<Hash> {
        match self {
            Self::ChannelProposal(_)
            | Self::ProposalAccepted(_)
            | Self::ProposalRejected { .. } => None,
            Self::ChannelUpdate(u) => Some(u.state.channel_id()),
            Self::ChannelUpdateAccepted(a) => Some(a.channel),
            Self::ChannelUpdateRejected { id, .. } => Some(*id),
        }
    }

    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChannelProposal(_) => "ChannelProposal",
            Self::ProposalAccepted(_) => "ProposalAccepted",
            Self::ProposalRejected { .. } => "ProposalRejected",
            Self::ChannelUpdate(_) => "ChannelUpdate",
            Self::ChannelUpdateAccepted(_) => "ChannelUpdateAccepted",
            Self::ChannelUpdateRejected { .. } => "ChannelUpdateRejected",
        }
    }
}

impl From<ParticipantMessage> for perunwire::envelope::Msg {
    fn from(msg: ParticipantMessage) -> Self {
        use perunwire::envelope::Msg;
        match msg {
            ParticipantMessage::ChannelProposal(msg) => Msg::LedgerChannelProposalMsg(msg.into()),
            ParticipantMessage::ProposalAccepted(msg) => {
                Msg::LedgerChannelProposalAccMsg(msg.into())
            }
            ParticipantMessage::ProposalRejected { id, reason } => {
                Msg::ChannelProposalRejMsg(perunwire::ChannelProposalRejMsg {
                    proposal_id: id.0.to_vec(),
                    reason,
                })
            }
            ParticipantMessage::ChannelUpdate(msg) => Msg::ChannelUpdateMsg(msg.into()),
            ParticipantMessage::ChannelUpdateAccepted(msg) => Msg::ChannelUpdateAccMsg(msg.into()),
            ParticipantMessage::ChannelUpdateRejected {
                id,
                version,
                reason,
            } => Msg::ChannelUpdateRejMsg(perunwire::ChannelUpdateRejMsg {
                channel_id: id.0.to_vec(),
                version,
                reason,
            }),
        }
    }
}

impl TryFrom<perunwire::envelope::Msg> for ParticipantMessage {
    type Error = ConversionError;

    fn try_from(msg: perunwire::envelope::Msg) -> Result<Self, Self::Error> {
        use perunwire::envelope::Msg;
        Ok(match msg {
            Msg::LedgerChannelProposalMsg(m) => Self::ChannelProposal(m.try_into()?),
            Msg::LedgerChannelProposalAccMsg(m) => Self::ProposalAccepted(m.try_into()?),
            Msg::ChannelProposalRejMsg(m) => Self::ProposalRejected {
                id: hash_from_bytes(&m.proposal_id)?,
                reason: m.reason,
            },
            Msg::ChannelUpdateMsg(m) => Self::ChannelUpdate(m.try_into()?),
            Msg::ChannelUpdateAccMsg(m) => Self::ChannelUpdateAccepted(m.try_into()?),
            Msg::ChannelUpdateRejMsg(m) => Self::ChannelUpdateRejected {
                id: hash_from_bytes(&m.channel_id)?,
                version: m.version,
                reason: m.reason,
            },
        })
    }
}

pub(crate) fn hash_from_bytes(b: &[u8]) -> Result<Hash, ConversionError> {
    b.try_into().or(Err(ConversionError::ByteLengthMismatch))
}
