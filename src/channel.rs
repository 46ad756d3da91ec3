//! Low-level channel API.
//!
//! Each lifecycle step is its own type (proposal, signature exchange of the
//! initial state, funding, active channel), so a channel cannot skip a step.
//! None of these types do any I/O: operations that need to talk to the peer
//! return the [ParticipantMessage](crate::messages::ParticipantMessage) to
//! send and leave the sending to the caller (the session actor).

mod active;
mod agreed_upon;
mod channel_update;
pub mod fixed_size_payment;
mod phase;
mod proposal;
mod signed;

use crate::types::{Address, Bytes32, U256};

pub use active::*;
pub use agreed_upon::*;
pub use channel_update::*;
pub use fixed_size_payment::InsufficientFunds;
pub use phase::{IllegalTransition, Phase};
pub use proposal::*;
pub use signed::*;

// Re-exported because it is part of the low-level channel API
pub use crate::messages::{LedgerChannelProposal, LedgerChannelProposalAcc};

pub const ASSETS: usize = 1;
pub const PARTICIPANTS: usize = 2;

pub type State = fixed_size_payment::State<ASSETS, PARTICIPANTS>;
pub type Params = fixed_size_payment::Params<PARTICIPANTS>;
pub type Allocation = fixed_size_payment::Allocation<ASSETS, PARTICIPANTS>;
pub type Balances = fixed_size_payment::Balances<ASSETS, PARTICIPANTS>;

/// Index of a participant in the channel.
///
/// `0` is the proposer of the channel.
pub type PartIdx = usize;

/// The nonce added by each participant.
///
/// They are combined into a single [U256] using SHA3-256.
pub type NonceShare = Bytes32;

/// Uniquely identifies an Asset by blockchain + AssetHolder.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Asset {
    pub chain_id: U256,
    pub holder: Address,
}
