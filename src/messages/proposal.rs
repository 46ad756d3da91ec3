use super::{hash_from_bytes, ConversionError};
use crate::{
    channel::{Allocation, Balances, NonceShare, PARTICIPANTS},
    perunwire,
    types::{Address, Bytes32, Hash},
};

/// Channel configuration (also exchanged over the network)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerChannelProposal {
    pub proposal_id: Hash,
    pub challenge_duration: u64,
    pub nonce_share: NonceShare,
    pub init_bals: Allocation,
    pub funding_agreement: Balances,
    /// Address of the proposer.
    pub participant: Address,
    /// Channel participants in order, the proposer first.
    pub peers: [Address; PARTICIPANTS],
}

/// Message sent when a participant accepts the proposed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerChannelProposalAcc {
    pub proposal_id: Hash,
    pub nonce_share: NonceShare,
    pub participant: Address,
}

fn address_from_bytes(b: &[u8]) -> Result<Address, ConversionError> {
    b.try_into().or(Err(ConversionError::ByteLengthMismatch))
}

fn nonce_share_from_bytes(b: &[u8]) -> Result<NonceShare, ConversionError> {
    Bytes32::try_from(b).or(Err(ConversionError::ByteLengthMismatch))
}

impl TryFrom<perunwire::LedgerChannelProposalMsg> for LedgerChannelProposal {
    type Error = ConversionError;

    fn try_from(value: perunwire::LedgerChannelProposalMsg) -> Result<Self, Self::Error> {
        let base = value
            .base_channel_proposal
            .ok_or(ConversionError::ExpectedSome)?;
        let init_bals = base.init_bals.ok_or(ConversionError::ExpectedSome)?;
        let funding_agreement = base
            .funding_agreement
            .ok_or(ConversionError::ExpectedSome)?;

        if value.peers.len() != PARTICIPANTS {
            return Err(ConversionError::ParticipantSizeMismatch);
        }
        let mut peers = [Address::default(); PARTICIPANTS];
        for (a, b) in peers.iter_mut().zip(&value.peers) {
            *a = address_from_bytes(b)?;
        }

        Ok(LedgerChannelProposal {
            proposal_id: hash_from_bytes(&base.proposal_id)?,
            challenge_duration: base.challenge_duration,
            nonce_share: nonce_share_from_bytes(&base.nonce_share)?,
            init_bals: init_bals.try_into()?,
            funding_agreement: funding_agreement.try_into()?,
            participant: address_from_bytes(&value.participant)?,
            peers,
        })
    }
}

impl From<LedgerChannelProposal> for perunwire::LedgerChannelProposalMsg {
    fn from(value: LedgerChannelProposal) -> Self {
        Self {
            base_channel_proposal: Some(perunwire::BaseChannelProposal {
                proposal_id: value.proposal_id.0.to_vec(),
                challenge_duration: value.challenge_duration,
                nonce_share: value.nonce_share.0.to_vec(),
                init_bals: Some(value.init_bals.into()),
                funding_agreement: Some(value.funding_agreement.into()),
            }),
            participant: value.participant.0.to_vec(),
            peers: value.peers.map(|p| p.0.to_vec()).to_vec(),
        }
    }
}

impl TryFrom<perunwire::LedgerChannelProposalAccMsg> for LedgerChannelProposalAcc {
    type Error = ConversionError;

    fn try_from(value: perunwire::LedgerChannelProposalAccMsg) -> Result<Self, Self::Error> {
        Ok(Self {
            proposal_id: hash_from_bytes(&value.proposal_id)?,
            nonce_share: nonce_share_from_bytes(&value.nonce_share)?,
            participant: address_from_bytes(&value.participant)?,
        })
    }
}

impl From<LedgerChannelProposalAcc> for perunwire::LedgerChannelProposalAccMsg {
    fn from(value: LedgerChannelProposalAcc) -> Self {
        Self {
            proposal_id: value.proposal_id.0.to_vec(),
            nonce_share: value.nonce_share.0.to_vec(),
            participant: value.participant.0.to_vec(),
        }
    }
}
