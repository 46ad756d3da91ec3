use crate::{
    channel::{
        InsufficientFunds, InvalidProposal, InvalidUpdate, Phase,
        ProposeUpdateError, SignError,
    },
    ledger::LedgerError,
    sig,
    types::Hash,
    wire::BusError,
};

/// Errors returned by the node and session APIs.
///
/// `ProposalRejected`, `UpdateRejected` and `Timeout` leave every session
/// untouched and can be retried. A timed out update is the exception, it is
/// still committed if the peer accepts it late.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("proposal rejected: {reason}")]
    ProposalRejected { reason: String },
    #[error("update to version {version} rejected: {reason}")]
    UpdateRejected { version: u64, reason: String },
    /// `channel` is set for operations on an existing session.
    #[error("{op} timed out{}", .channel.as_ref().map(|c| format!(" on channel {c}")).unwrap_or_default())]
    Timeout {
        op: &'static str,
        channel: Option<Hash>,
    },
    #[error("funding channel {channel} failed: {source}")]
    FundingFailed { channel: Hash, source: LedgerError },
    #[error("registering channel {channel} failed: {source}")]
    RegistrationFailed { channel: Hash, source: LedgerError },
    #[error("settling channel {channel} failed: {source}")]
    SettlementFailed { channel: Hash, source: LedgerError },
    #[error("invalid proposal: {0}")]
    InvalidProposal(#[from] InvalidProposal),
    #[error("invalid update: {0}")]
    InvalidUpdate(#[from] InvalidUpdate),
    #[error(transparent)]
    InsufficientFunds(#[from] InsufficientFunds),
    #[error("channel {channel} is {phase}, cannot {op}")]
    InvalidPhase {
        channel: Hash,
        phase: Phase,
        op: &'static str,
    },
    #[error("peer sent an invalid message: {0}")]
    Protocol(String),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("signing: {0}")]
    Sign(#[from] sig::Error),
    #[error("update mutator panicked")]
    MutatorPanicked,
    #[error("session {0} terminated")]
    SessionTerminated(Hash),
    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

impl From<SignError> for Error {
    fn from(e: SignError) -> Self {
        match e {
            SignError::Signer(e) => Error::Sign(e),
            SignError::AlreadySigned => Error::Other(e.to_string()),
        }
    }
}

impl From<ProposeUpdateError> for Error {
    fn from(e: ProposeUpdateError) -> Self {
        match e {
            ProposeUpdateError::InvalidUpdate(e) => e.into(),
            ProposeUpdateError::Sign(e) => e.into(),
        }
    }
}
