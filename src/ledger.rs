//! Interface to the shared ledger: funding, dispute registration, settlement
//! and the on-chain event stream of a channel.
//!
//! The orchestrator only talks to the traits in this module.
//! [simulated::SimulatedLedger] implements all of them in memory.

pub mod simulated;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    channel::{Balances, Params, PartIdx, State, PARTICIPANTS},
    config::{Config, ContractAddresses, Role},
    types::{Address, Hash, Signature},
};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("invalid signature on state version {version}")]
    InvalidSignature { version: u64 },
    #[error("unknown channel {0}")]
    UnknownChannel(Hash),
    #[error("a state with version {registered} is already registered")]
    StaleVersion { registered: u64 },
    #[error("channel is not concluded yet")]
    NotConcluded,
    #[error("deposit failed: {0}")]
    Deposit(String),
    #[error("transaction failed: {0}")]
    Transaction(String),
    #[error("contract at {0} is not valid")]
    InvalidContract(Address),
    #[error("event subscription closed")]
    SubscriptionClosed,
}

/// A state together with the signatures of all participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub state: State,
    pub sigs: [Signature; PARTICIPANTS],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingRequest {
    pub params: Params,
    pub state: State,
    pub funding_agreement: Balances,
    /// Who is depositing.
    pub idx: PartIdx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjudicatorReq {
    pub params: Params,
    /// Receiver of the withdrawn funds.
    pub acc: Address,
    pub tx: Transaction,
    pub idx: PartIdx,
    /// The peer does the on-chain work, only wait for the outcome.
    pub secondary: bool,
}

/// On-chain events of a single channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjudicatorEvent {
    /// A state was registered, it concludes after `timeout` unless refuted
    /// by a higher version.
    Registered {
        channel: Hash,
        tx: Transaction,
        timeout: Duration,
    },
    /// The channel outcome is fixed, funds can be withdrawn.
    Concluded { channel: Hash, tx: Transaction },
}

impl AdjudicatorEvent {
    pub fn channel(&self) -> Hash {
        match self {
            Self::Registered { channel, .. } | Self::Concluded { channel, .. } => *channel,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            Self::Registered { tx, .. } | Self::Concluded { tx, .. } => tx.state.version(),
        }
    }
}

/// Stream of [AdjudicatorEvent]s for one channel.
///
/// `None` means the ledger closed the subscription, an `Err` that it broke.
#[derive(Debug)]
pub struct AdjudicatorSubscription {
    rx: mpsc::UnboundedReceiver<Result<AdjudicatorEvent, LedgerError>>,
}

impl AdjudicatorSubscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Result<AdjudicatorEvent, LedgerError>>) -> Self {
        Self { rx }
    }

    pub async fn next(&mut self) -> Option<Result<AdjudicatorEvent, LedgerError>> {
        self.rx.recv().await
    }
}

#[async_trait]
pub trait Funder: Send + Sync {
    /// Deposit our share and wait until the channel is fully funded.
    async fn fund(&self, req: FundingRequest) -> Result<(), LedgerError>;
}

#[async_trait]
pub trait Adjudicator: Send + Sync {
    /// Register the state in `req` for dispute.
    async fn register(&self, req: &AdjudicatorReq) -> Result<(), LedgerError>;

    /// Conclude the channel (waiting for the challenge duration if needed)
    /// and withdraw our funds.
    async fn settle(&self, req: &AdjudicatorReq) -> Result<(), LedgerError>;

    async fn subscribe(&self, channel: Hash) -> Result<AdjudicatorSubscription, LedgerError>;
}

/// Deploys and checks the adjudicator and asset holder contracts.
#[async_trait]
pub trait ContractBackend: Send + Sync {
    async fn deploy_adjudicator(&self) -> Result<Address, LedgerError>;

    async fn deploy_asset_holder(&self, adjudicator: Address) -> Result<Address, LedgerError>;

    /// Checks the asset holder and the adjudicator it points to.
    async fn validate_asset_holder(
        &self,
        adjudicator: Address,
        asset_holder: Address,
    ) -> Result<(), LedgerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("{op} timed out")]
    Timeout { op: &'static str },
    #[error("no contract addresses configured to validate")]
    MissingContracts,
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Make sure the contracts exist before any channel is opened.
///
/// Alice deploys, Bob validates the configured addresses.
pub async fn setup_contracts(
    role: Role,
    backend: &dyn ContractBackend,
    cfg: &Config,
) -> Result<ContractAddresses, SetupError> {
    let addrs = match role {
        Role::Alice => {
            let deploy = async {
                let adjudicator = backend.deploy_adjudicator().await?;
                let asset_holder = backend.deploy_asset_holder(adjudicator).await?;
                Ok::<_, LedgerError>(ContractAddresses {
                    adjudicator,
                    asset_holder,
                })
            };
            let addrs = tokio::time::timeout(cfg.timeouts.deploy(), deploy)
                .await
                .map_err(|_| SetupError::Timeout { op: "deploy" })??;
            tracing::info!(%role, adjudicator = %addrs.adjudicator, asset_holder = %addrs.asset_holder, "deployed contracts");
            addrs
        }
        Role::Bob => {
            let addrs = cfg.contracts.ok_or(SetupError::MissingContracts)?;
            tokio::time::timeout(
                cfg.timeouts.validate(),
                backend.validate_asset_holder(addrs.adjudicator, addrs.asset_holder),
            )
            .await
            .map_err(|_| SetupError::Timeout { op: "validate" })??;
            tracing::info!(%role, adjudicator = %addrs.adjudicator, asset_holder = %addrs.asset_holder, "validated contracts");
            addrs
        }
    };
    Ok(addrs)
}
