use std::sync::Arc;

use super::{
    agreed_upon::SignError, channel_update::ChannelUpdate, Params, PartIdx, State, PARTICIPANTS,
};
use crate::{
    ledger::{AdjudicatorReq, Transaction},
    messages::{LedgerChannelUpdate, ParticipantMessage},
    sig::{self, Signer},
    types::{Address, Hash, Signature},
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidUpdate {
    #[error("update is for a different channel")]
    InvalidChannelID,
    #[error("version must be {expected}, got {got}")]
    InvalidVersionNumber { expected: u64, got: u64 },
    #[error("current state is final")]
    CurrentStateIsFinal,
    #[error("assets differ from current state")]
    AssetsMismatch,
    #[error("per-asset totals are not conserved")]
    TotalAllocationAmountMismatch,
    #[error("balances overflow")]
    BalanceOverflow,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProposeUpdateError {
    #[error(transparent)]
    InvalidUpdate(#[from] InvalidUpdate),
    #[error(transparent)]
    Sign(#[from] SignError),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HandleUpdateError {
    #[error("signature recovery failed: {0}")]
    RecoveryFailed(#[from] sig::Error),
    #[error("update signed by {0}, not by the actor")]
    InvalidSignature(Address),
    #[error("actor index {0} is ours")]
    OwnActorIdx(PartIdx),
    #[error(transparent)]
    InvalidUpdate(#[from] InvalidUpdate),
}

/// Error returned when a state from the ledger cannot be adopted.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AdoptError {
    #[error("transaction is for a different channel")]
    InvalidChannelID,
    #[error("signature recovery failed: {0}")]
    RecoveryFailed(#[from] sig::Error),
    #[error("signature {idx} is by {signer}")]
    InvalidSignature { idx: PartIdx, signer: Address },
}

/// Funded channel holding the latest fully signed state.
#[derive(Debug)]
pub struct ActiveChannel {
    part_idx: PartIdx,
    signer: Arc<Signer>,
    state: State,
    params: Params,
    signatures: [Signature; PARTICIPANTS],
}

impl ActiveChannel {
    pub(super) fn new(
        signer: Arc<Signer>,
        part_idx: PartIdx,
        init_state: State,
        params: Params,
        signatures: [Signature; PARTICIPANTS],
    ) -> Self {
        debug_assert!(part_idx < params.participants.len());

        ActiveChannel {
            part_idx,
            signer,
            state: init_state,
            params,
            signatures,
        }
    }

    pub fn channel_id(&self) -> Hash {
        self.state.channel_id()
    }

    pub fn version(&self) -> u64 {
        self.state.version()
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn signatures(&self) -> [Signature; PARTICIPANTS] {
        self.signatures
    }

    pub fn part_idx(&self) -> PartIdx {
        self.part_idx
    }

    pub fn params(&self) -> Params {
        self.params
    }

    pub(super) fn signer(&self) -> &Arc<Signer> {
        &self.signer
    }

    pub fn check_valid_transition(&self, new_state: State) -> Result<(), InvalidUpdate> {
        let new_totals = new_state
            .outcome
            .total_assets()
            .ok_or(InvalidUpdate::BalanceOverflow)?;

        if new_state.channel_id() != self.state.channel_id() {
            Err(InvalidUpdate::InvalidChannelID)
        } else if self.state.is_final {
            Err(InvalidUpdate::CurrentStateIsFinal)
        } else if new_state.version() != self.state.version() + 1 {
            Err(InvalidUpdate::InvalidVersionNumber {
                expected: self.state.version() + 1,
                got: new_state.version(),
            })
        } else if new_state.outcome.assets != self.state.outcome.assets {
            Err(InvalidUpdate::AssetsMismatch)
        } else if Some(new_totals) != self.state.outcome.total_assets() {
            Err(InvalidUpdate::TotalAllocationAmountMismatch)
        } else {
            Ok(())
        }
    }

    /// Propose `new_state`, returns the pending update and the message for
    /// the peer.
    pub fn update(
        &self,
        new_state: State,
    ) -> Result<(ChannelUpdate, ParticipantMessage), ProposeUpdateError> {
        self.check_valid_transition(new_state)?;

        // Sign immediately, we need the signature to send the proposal.
        let sig = self
            .signer
            .sign_eth(new_state.hash())
            .map_err(SignError::from)?;
        let msg = ParticipantMessage::ChannelUpdate(LedgerChannelUpdate {
            state: new_state,
            actor_idx: self.part_idx,
            sig,
        });

        Ok((ChannelUpdate::new(self, new_state, self.part_idx, sig), msg))
    }

    pub fn handle_update(&self, msg: LedgerChannelUpdate) -> Result<ChannelUpdate, HandleUpdateError> {
        if msg.actor_idx == self.part_idx {
            return Err(HandleUpdateError::OwnActorIdx(msg.actor_idx));
        }
        self.check_valid_transition(msg.state)?;

        let signer = sig::recover_signer(msg.state.hash(), msg.sig)?;
        if self.params.participants[msg.actor_idx] != signer {
            return Err(HandleUpdateError::InvalidSignature(signer));
        }

        Ok(ChannelUpdate::new(self, msg.state, msg.actor_idx, msg.sig))
    }

    pub(super) fn force_update(&mut self, new_state: State, signatures: [Signature; PARTICIPANTS]) {
        self.state = new_state;
        self.signatures = signatures;
    }

    /// Check that `tx` is a fully signed state of this channel.
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<(), AdoptError> {
        if tx.state.channel_id() != self.channel_id() {
            return Err(AdoptError::InvalidChannelID);
        }
        let hash = tx.state.hash();
        for (idx, (sig, part)) in tx.sigs.iter().zip(self.params.participants).enumerate() {
            let signer = sig::recover_signer(hash, *sig)?;
            if signer != part {
                return Err(AdoptError::InvalidSignature { idx, signer });
            }
        }
        Ok(())
    }

    /// Replace the local state with one observed on the ledger.
    ///
    /// Unlike an off-chain update this does not require the version to be
    /// the successor of ours, the ledger is authoritative.
    pub fn adopt(&mut self, tx: Transaction) -> Result<(), AdoptError> {
        self.verify_transaction(&tx)?;
        self.force_update(tx.state, tx.sigs);
        Ok(())
    }

    pub fn transaction(&self) -> Transaction {
        Transaction {
            state: self.state,
            sigs: self.signatures,
        }
    }

    /// Request for registering or settling the current state.
    ///
    /// `secondary` is set when the peer is expected to do the on-chain work,
    /// in which case the adjudicator only waits for the outcome.
    pub fn adjudicator_req(&self, secondary: bool) -> AdjudicatorReq {
        AdjudicatorReq {
            params: self.params,
            acc: self.signer.address(),
            tx: self.transaction(),
            idx: self.part_idx,
            secondary,
        }
    }
}
