use std::sync::Arc;

use super::{
    active::{ActiveChannel, InvalidUpdate},
    agreed_upon::{AddSignatureError, MissingSignature, SignError},
    Params, PartIdx, State, PARTICIPANTS,
};
use crate::{
    messages::{LedgerChannelUpdateAccepted, ParticipantMessage},
    sig::{self, Signer},
    types::{Hash, Signature},
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error(transparent)]
    MissingSignature(#[from] MissingSignature),
    #[error("channel moved on since the update was created: {0}")]
    Stale(#[from] InvalidUpdate),
}

/// A proposed successor state collecting signatures.
///
/// Does not borrow the channel, so it can be kept around while waiting for
/// the peer's answer. [ChannelUpdate::apply] re-checks that the channel is
/// still at the predecessor state.
#[derive(Debug)]
pub struct ChannelUpdate {
    part_idx: PartIdx,
    signer: Arc<Signer>,
    params: Params,
    new_state: State,
    signatures: [Option<Signature>; PARTICIPANTS],
}

impl ChannelUpdate {
    pub(super) fn new(
        channel: &ActiveChannel,
        new_state: State,
        sig_part_idx: PartIdx,
        sig: Signature,
    ) -> Self {
        let mut signatures = [None; PARTICIPANTS];
        signatures[sig_part_idx] = Some(sig);
        ChannelUpdate {
            part_idx: channel.part_idx(),
            signer: channel.signer().clone(),
            params: channel.params(),
            new_state,
            signatures,
        }
    }

    pub fn channel_id(&self) -> Hash {
        self.new_state.channel_id()
    }

    pub fn version(&self) -> u64 {
        self.new_state.version()
    }

    pub fn new_state(&self) -> State {
        self.new_state
    }

    /// Sign the update, returns the acceptance for the proposer.
    pub fn accept(&mut self) -> Result<ParticipantMessage, SignError> {
        match self.signatures[self.part_idx] {
            Some(_) => Err(SignError::AlreadySigned),
            None => {
                let sig = self.signer.sign_eth(self.new_state.hash())?;
                self.signatures[self.part_idx] = Some(sig);
                Ok(ParticipantMessage::ChannelUpdateAccepted(
                    LedgerChannelUpdateAccepted {
                        channel: self.channel_id(),
                        version: self.new_state.version(),
                        sig,
                    },
                ))
            }
        }
    }

    pub fn reject(self, reason: &str) -> ParticipantMessage {
        ParticipantMessage::ChannelUpdateRejected {
            id: self.channel_id(),
            version: self.new_state.version(),
            reason: reason.to_string(),
        }
    }

    pub fn participant_accepted(
        &mut self,
        part_idx: PartIdx,
        msg: LedgerChannelUpdateAccepted,
    ) -> Result<(), AddSignatureError> {
        if msg.channel != self.channel_id() {
            return Err(AddSignatureError::InvalidChannelID);
        }
        if msg.version != self.new_state.version() {
            return Err(AddSignatureError::InvalidVersionNumber);
        }

        let signer = sig::recover_signer(self.new_state.hash(), msg.sig)?;
        if self.params.participants[part_idx] != signer {
            return Err(AddSignatureError::InvalidSignature(signer));
        }

        match self.signatures[part_idx] {
            Some(_) => Err(AddSignatureError::AlreadySigned),
            None => {
                self.signatures[part_idx] = Some(msg.sig);
                Ok(())
            }
        }
    }

    fn signatures(&self) -> Result<[Signature; PARTICIPANTS], MissingSignature> {
        let mut signatures = [Signature::default(); PARTICIPANTS];
        for (part_idx, s) in self.signatures.iter().enumerate() {
            signatures[part_idx] = s.ok_or(MissingSignature(part_idx))?;
        }
        Ok(signatures)
    }

    /// Commit the fully signed state to `channel`.
    ///
    /// State and signatures are replaced together or not at all; on error the
    /// update is handed back so the caller can keep collecting signatures.
    pub fn apply(self, channel: &mut ActiveChannel) -> Result<(), (Self, ApplyError)> {
        let signatures = match self.signatures() {
            Ok(v) => v,
            Err(e) => return Err((self, e.into())),
        };
        if let Err(e) = channel.check_valid_transition(self.new_state) {
            return Err((self, e.into()));
        }
        channel.force_update(self.new_state, signatures);
        Ok(())
    }
}
