//! Application decisions on inbound proposals and updates.

use async_trait::async_trait;

use crate::{channel::State, messages::LedgerChannelProposal};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject(String),
}

/// Decides on structurally valid channel proposals.
#[async_trait]
pub trait ProposalPolicy: Send + Sync {
    async fn decide(&self, proposal: &LedgerChannelProposal) -> Decision;
}

/// Decides on valid, correctly signed updates from the peer.
#[async_trait]
pub trait UpdatePolicy: Send + Sync {
    async fn decide(&self, current: &State, proposed: &State) -> Decision;
}

/// Accepts every ledger channel proposal.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptLedgerChannels;

#[async_trait]
impl ProposalPolicy for AcceptLedgerChannels {
    async fn decide(&self, _: &LedgerChannelProposal) -> Decision {
        Decision::Accept
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

#[async_trait]
impl UpdatePolicy for AcceptAll {
    async fn decide(&self, _: &State, _: &State) -> Decision {
        Decision::Accept
    }
}

/// Rejects everything with a fixed reason.
#[derive(Debug, Clone)]
pub struct RejectAll(pub String);

#[async_trait]
impl ProposalPolicy for RejectAll {
    async fn decide(&self, _: &LedgerChannelProposal) -> Decision {
        Decision::Reject(self.0.clone())
    }
}

#[async_trait]
impl UpdatePolicy for RejectAll {
    async fn decide(&self, _: &State, _: &State) -> Decision {
        Decision::Reject(self.0.clone())
    }
}
