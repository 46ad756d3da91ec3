//! Low-level API for the Proposal phase.
//!
//! Can only handle channels with one asset and two participants.

use std::sync::Arc;

use super::{
    agreed_upon::AgreedUponChannel, Allocation, Balances, LedgerChannelProposal,
    LedgerChannelProposalAcc, NonceShare, Params, PartIdx, State, PARTICIPANTS,
};
use crate::{
    messages::ParticipantMessage,
    sig::Signer,
    types::{Address, Hash, U256},
};
use sha3::{Digest, Sha3_256};

/// Reasons to refuse a proposal before even asking the application.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidProposal {
    #[error("participants must be distinct")]
    DuplicateParticipant,
    #[error("proposer {0} is not the first peer")]
    ProposerNotFirst(Address),
    #[error("we ({0}) are not the second peer")]
    NotAddressedToUs(Address),
    #[error("challenge duration must be non-zero")]
    ZeroChallengeDuration,
    #[error("initial balances overflow")]
    BalanceOverflow,
    #[error("funding agreement differs from initial balances")]
    FundingAgreementMismatch,
}

impl LedgerChannelProposal {
    /// Structural checks done by the receiver `us` on an inbound proposal.
    pub fn validate(&self, us: Address) -> Result<(), InvalidProposal> {
        let [proposer, receiver] = self.peers;
        if proposer == receiver {
            Err(InvalidProposal::DuplicateParticipant)
        } else if self.participant != proposer {
            Err(InvalidProposal::ProposerNotFirst(self.participant))
        } else if receiver != us {
            Err(InvalidProposal::NotAddressedToUs(us))
        } else if self.challenge_duration == 0 {
            Err(InvalidProposal::ZeroChallengeDuration)
        } else if self.init_bals.total_assets().is_none() {
            Err(InvalidProposal::BalanceOverflow)
        } else if self.funding_agreement != self.init_bals.balances {
            Err(InvalidProposal::FundingAgreementMismatch)
        } else {
            Ok(())
        }
    }
}

/// Error returned when an accept response cannot be recorded.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProposalAccError {
    #[error("proposal was already accepted by this participant")]
    AlreadyAccepted,
    #[error("the proposer cannot accept its own proposal")]
    IsProposer,
    #[error("response for a different proposal")]
    WrongProposal,
    #[error("response from unexpected participant {0}")]
    UnexpectedParticipant(Address),
}

/// Error returned when the transition from ProposedChannel -> AgreedUponChannel failed.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("missing accept response from participant {0}")]
    MissingAccResponse(PartIdx),
}

/// Represents a channel that was proposed, but not accepted by all
/// participants.
///
/// Use `build()` or `try_into()` to get an [AgreedUponChannel], to sign the
/// initial state and exchange those signatures.
#[derive(Debug)]
pub struct ProposedChannel {
    /// Who are we in this channel (0 is the channel proposer).
    part_idx: PartIdx,
    signer: Arc<Signer>,
    /// Needed for creating the initial state, Params and for the application to
    /// decide if those are valid Parameters.
    proposal: LedgerChannelProposal,
    /// Holds all accept messages received so far.
    ///
    /// The data of Participant 0 is already stored in the proposal.
    responses: [Option<LedgerChannelProposalAcc>; PARTICIPANTS - 1],
}

impl ProposedChannel {
    /// Create a new ProposedChannel.
    ///
    /// The caller is responsible for sending the proposal message to the
    /// other participants.
    pub fn new(signer: Arc<Signer>, part_idx: PartIdx, proposal: LedgerChannelProposal) -> Self {
        debug_assert!(part_idx < PARTICIPANTS);
        ProposedChannel {
            part_idx,
            signer,
            proposal,
            responses: [None; PARTICIPANTS - 1],
        }
    }

    pub fn proposal(&self) -> &LedgerChannelProposal {
        &self.proposal
    }

    pub fn proposal_id(&self) -> Hash {
        self.proposal.proposal_id
    }

    pub fn part_idx(&self) -> PartIdx {
        self.part_idx
    }

    /// Accept a proposed channel, returns the reply for the proposer.
    ///
    /// Do not call this if you have proposed the channel yourself, it will just
    /// return an Error.
    pub fn accept(
        &mut self,
        nonce_share: NonceShare,
    ) -> Result<ParticipantMessage, ProposalAccError> {
        if self.part_idx == 0 {
            return Err(ProposalAccError::IsProposer);
        }
        if self.responses[self.part_idx - 1].is_some() {
            return Err(ProposalAccError::AlreadyAccepted);
        }

        let acc = LedgerChannelProposalAcc {
            proposal_id: self.proposal.proposal_id,
            nonce_share,
            participant: self.signer.address(),
        };
        self.responses[self.part_idx - 1] = Some(acc);
        Ok(ParticipantMessage::ProposalAccepted(acc))
    }

    /// Reject a proposed channel, returns the reply for the proposer.
    ///
    /// Consumes the ProposedChannel because using it no longer makes sense.
    pub fn reject(self, reason: &str) -> ParticipantMessage {
        ParticipantMessage::ProposalRejected {
            id: self.proposal.proposal_id,
            reason: reason.to_string(),
        }
    }

    /// Call this when receiving an Accept response form a participant.
    ///
    /// When receiving a reject message, the [ProposedChannel] object can be
    /// dropped.
    pub fn participant_accepted(
        &mut self,
        part_idx: PartIdx,
        msg: LedgerChannelProposalAcc,
    ) -> Result<(), ProposalAccError> {
        if part_idx == 0 {
            return Err(ProposalAccError::IsProposer);
        }
        if msg.proposal_id != self.proposal.proposal_id {
            return Err(ProposalAccError::WrongProposal);
        }
        if msg.participant != self.proposal.peers[part_idx] {
            return Err(ProposalAccError::UnexpectedParticipant(msg.participant));
        }
        match self.responses[part_idx - 1] {
            Some(_) => Err(ProposalAccError::AlreadyAccepted),
            None => {
                self.responses[part_idx - 1] = Some(msg);
                Ok(())
            }
        }
    }

    /// Progress to the next phase: Signing the initial state.
    pub fn build(self) -> Result<AgreedUponChannel, BuildError> {
        let mut accs = [self.proposal.participant; PARTICIPANTS];
        // Go-Perun does NOT use keccak256 here, probably to be less dependent
        // on Ethereum. We do the same here.
        let mut hasher = Sha3_256::new();
        hasher.update(self.proposal.nonce_share.0);
        for (index, res) in self.responses.iter().enumerate() {
            let res = res.ok_or(BuildError::MissingAccResponse(index + 1))?;
            hasher.update(res.nonce_share.0);
            accs[index + 1] = res.participant;
        }
        let nonce = U256::from_big_endian(hasher.finalize().as_slice());

        let params = Params {
            challenge_duration: self.proposal.challenge_duration,
            nonce,
            participants: accs,
            ledger_channel: true,
        };
        let init_state = State::new(&params, self.proposal.init_bals);

        Ok(AgreedUponChannel::new(
            self.signer,
            self.part_idx,
            self.proposal.funding_agreement,
            init_state,
            params,
        ))
    }
}

impl TryFrom<ProposedChannel> for AgreedUponChannel {
    type Error = BuildError;

    fn try_from(value: ProposedChannel) -> Result<Self, Self::Error> {
        value.build()
    }
}

/// Assemble the proposal a proposer sends.
pub fn make_proposal(
    proposal_id: Hash,
    challenge_duration: u64,
    nonce_share: NonceShare,
    init_bals: Allocation,
    peers: [Address; PARTICIPANTS],
) -> LedgerChannelProposal {
    let funding_agreement: Balances = init_bals.balances;
    LedgerChannelProposal {
        proposal_id,
        challenge_duration,
        nonce_share,
        init_bals,
        funding_agreement,
        participant: peers[0],
        peers,
    }
}
