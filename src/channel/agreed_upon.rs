use std::sync::Arc;

use super::{signed::SignedChannel, Balances, Params, PartIdx, State, PARTICIPANTS};
use crate::{
    messages::{LedgerChannelUpdateAccepted, ParticipantMessage},
    sig::{self, Signer},
    types::{Address, Hash, Signature},
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignError {
    #[error("state was already signed by us")]
    AlreadySigned,
    #[error(transparent)]
    Signer(#[from] sig::Error),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AddSignatureError {
    #[error("signature recovery failed: {0}")]
    RecoveryFailed(#[from] sig::Error),
    #[error("participant already signed")]
    AlreadySigned,
    #[error("signature by {0}, who is not the expected participant")]
    InvalidSignature(Address),
    #[error("signature for a different channel")]
    InvalidChannelID,
    #[error("signature for a different version")]
    InvalidVersionNumber,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("missing signature of participant {0}")]
pub struct MissingSignature(pub PartIdx);

/// Initial state both participants agreed on, waiting for all signatures on
/// version 0.
#[derive(Debug)]
pub struct AgreedUponChannel {
    part_idx: PartIdx,
    signer: Arc<Signer>,
    funding_agreement: Balances,
    init_state: State,
    params: Params,
    signatures: [Option<Signature>; PARTICIPANTS],
}

impl AgreedUponChannel {
    pub(super) fn new(
        signer: Arc<Signer>,
        part_idx: PartIdx,
        funding_agreement: Balances,
        init_state: State,
        params: Params,
    ) -> Self {
        AgreedUponChannel {
            part_idx,
            signer,
            funding_agreement,
            init_state,
            params,
            signatures: [None; PARTICIPANTS],
        }
    }

    pub fn channel_id(&self) -> Hash {
        self.init_state.channel_id()
    }

    pub fn params(&self) -> Params {
        self.params
    }

    pub fn init_state(&self) -> State {
        self.init_state
    }

    /// Sign the initial state, returns the message carrying our signature.
    pub fn sign(&mut self) -> Result<ParticipantMessage, SignError> {
        match self.signatures[self.part_idx] {
            Some(_) => Err(SignError::AlreadySigned),
            None => {
                let sig = self.signer.sign_eth(self.init_state.hash())?;
                self.signatures[self.part_idx] = Some(sig);
                Ok(ParticipantMessage::ChannelUpdateAccepted(
                    LedgerChannelUpdateAccepted {
                        channel: self.init_state.channel_id(),
                        version: self.init_state.version(),
                        sig,
                    },
                ))
            }
        }
    }

    pub fn add_signature(
        &mut self,
        msg: LedgerChannelUpdateAccepted,
    ) -> Result<(), AddSignatureError> {
        if msg.channel != self.init_state.channel_id() {
            return Err(AddSignatureError::InvalidChannelID);
        }
        if msg.version != 0 {
            return Err(AddSignatureError::InvalidVersionNumber);
        }

        let signer = sig::recover_signer(self.init_state.hash(), msg.sig)?;

        // Verify signature is coming from a valid participant.
        let part_idx = self
            .params
            .participants
            .iter()
            .position(|&addr| addr == signer)
            .ok_or(AddSignatureError::InvalidSignature(signer))?;

        match self.signatures[part_idx] {
            Some(_) => Err(AddSignatureError::AlreadySigned),
            None => {
                self.signatures[part_idx] = Some(msg.sig);
                Ok(())
            }
        }
    }

    pub fn has_all_signatures(&self) -> bool {
        self.signatures.iter().all(Option::is_some)
    }

    pub fn build(self) -> Result<SignedChannel, MissingSignature> {
        // Make sure we have the signature from all participants. They have
        // already been verified in `add_signature()` or we created it ourselves
        // with `sign()`.
        let mut signatures = [Signature::default(); PARTICIPANTS];
        for (part_idx, s) in self.signatures.iter().enumerate() {
            signatures[part_idx] = s.ok_or(MissingSignature(part_idx))?;
        }

        Ok(SignedChannel::new(
            self.signer,
            self.part_idx,
            self.funding_agreement,
            self.init_state,
            self.params,
            signatures,
        ))
    }
}

impl TryFrom<AgreedUponChannel> for SignedChannel {
    type Error = MissingSignature;

    fn try_from(value: AgreedUponChannel) -> Result<Self, Self::Error> {
        value.build()
    }
}
