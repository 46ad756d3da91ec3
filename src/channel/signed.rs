use std::sync::Arc;

use super::{active::ActiveChannel, Balances, Params, PartIdx, State, PARTICIPANTS};
use crate::{
    ledger::FundingRequest,
    sig::Signer,
    types::{Hash, Signature},
};

/// Channel with a fully signed initial state that still has to be funded.
#[derive(Debug)]
pub struct SignedChannel {
    channel: ActiveChannel,
    funding_agreement: Balances,
}

impl SignedChannel {
    pub(super) fn new(
        signer: Arc<Signer>,
        part_idx: PartIdx,
        funding_agreement: Balances,
        init_state: State,
        params: Params,
        signatures: [Signature; PARTICIPANTS],
    ) -> Self {
        SignedChannel {
            channel: ActiveChannel::new(signer, part_idx, init_state, params, signatures),
            funding_agreement,
        }
    }

    /// Deposit request for our share of the funding agreement.
    pub fn funding_request(&self) -> FundingRequest {
        FundingRequest {
            params: self.channel.params(),
            state: self.channel.state(),
            funding_agreement: self.funding_agreement,
            idx: self.channel.part_idx(),
        }
    }

    pub fn mark_funded(self) -> ActiveChannel {
        self.channel
    }

    pub fn channel_id(&self) -> Hash {
        self.channel.channel_id()
    }
}
