use std::{collections::HashMap, sync::Arc, time::Duration};

use rand::Rng;
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::{
    channel::{
        fixed_size_payment::{Balances, ParticipantBalances},
        make_proposal, Allocation, Asset, ProposedChannel, PARTICIPANTS,
    },
    config::{Config, ContractAddresses, Role},
    error::{Error, Result},
    handler::{AcceptAll, AcceptLedgerChannels, Decision, ProposalPolicy, UpdatePolicy},
    ledger::{Adjudicator, Funder},
    messages::{LedgerChannelProposal, LedgerChannelProposalAcc, ParticipantMessage},
    session::{self, Context, SessionHandle},
    sig::Signer,
    types::{Address, Hash, U256},
    wire::{decode_frame, local::Inbox, MessageBus},
};

enum ProposalOutcome {
    Accepted {
        handle: SessionHandle,
        opened: oneshot::Receiver<Result<()>>,
    },
    Rejected(String),
    Failed(Error),
}

struct PendingProposal {
    channel: ProposedChannel,
    respond: oneshot::Sender<ProposalOutcome>,
}

/// Collects the collaborators of a [PerunClient].
pub struct ClientBuilder {
    cfg: Arc<Config>,
    role: Role,
    signer: Arc<Signer>,
    bus: Arc<dyn MessageBus>,
    funder: Arc<dyn Funder>,
    adjudicator: Arc<dyn Adjudicator>,
    contracts: ContractAddresses,
    proposal_policy: Arc<dyn ProposalPolicy>,
    update_policy: Arc<dyn UpdatePolicy>,
}

impl ClientBuilder {
    /// Use `contracts` instead of the configured addresses, usually the
    /// result of [setup_contracts](crate::ledger::setup_contracts).
    pub fn contracts(mut self, contracts: ContractAddresses) -> Self {
        self.contracts = contracts;
        self
    }

    pub fn proposal_policy(mut self, policy: impl ProposalPolicy + 'static) -> Self {
        self.proposal_policy = Arc::new(policy);
        self
    }

    pub fn update_policy(mut self, policy: impl UpdatePolicy + 'static) -> Self {
        self.update_policy = Arc::new(policy);
        self
    }

    pub fn build(self) -> PerunClient {
        let (new_channels_tx, new_channels_rx) = mpsc::unbounded_channel();
        let (registered, _) = watch::channel(0);
        let ctx = Context {
            address: self.signer.address(),
            cfg: self.cfg,
            role: self.role,
            bus: self.bus,
            funder: self.funder,
            adjudicator: self.adjudicator,
            update_policy: self.update_policy,
        };
        PerunClient {
            inner: Arc::new(Inner {
                ctx: Arc::new(ctx),
                signer: self.signer,
                contracts: self.contracts,
                proposal_policy: self.proposal_policy,
                proposals: std::sync::Mutex::new(HashMap::new()),
                sessions: std::sync::Mutex::new(HashMap::new()),
                registered,
                new_channels_tx,
                new_channels_rx: AsyncMutex::new(new_channels_rx),
            }),
        }
    }
}

struct Inner {
    ctx: Arc<Context>,
    signer: Arc<Signer>,
    contracts: ContractAddresses,
    proposal_policy: Arc<dyn ProposalPolicy>,
    proposals: std::sync::Mutex<HashMap<Hash, PendingProposal>>,
    sessions: std::sync::Mutex<HashMap<Hash, SessionHandle>>,
    /// Number of sessions ever registered.
    registered: watch::Sender<usize>,
    new_channels_tx: mpsc::UnboundedSender<SessionHandle>,
    new_channels_rx: AsyncMutex<mpsc::UnboundedReceiver<SessionHandle>>,
}

/// The main Perun object used to open channels with a peer.
///
/// Holds the signing key, the connection to the peer and the ledger, and the
/// registry of all sessions. Cheap to clone; run [PerunClient::handle] on one
/// clone to process inbound messages.
#[derive(Clone)]
pub struct PerunClient {
    inner: Arc<Inner>,
}

impl core::fmt::Debug for PerunClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PerunClient")
            .field("role", &self.inner.ctx.role)
            .field("address", &self.inner.ctx.address)
            .finish_non_exhaustive()
    }
}

impl PerunClient {
    pub fn builder(
        cfg: Arc<Config>,
        role: Role,
        signer: Signer,
        bus: impl MessageBus + 'static,
        funder: Arc<dyn Funder>,
        adjudicator: Arc<dyn Adjudicator>,
    ) -> ClientBuilder {
        ClientBuilder {
            contracts: cfg.contracts.unwrap_or_default(),
            cfg,
            role,
            signer: Arc::new(signer),
            bus: Arc::new(bus),
            funder,
            adjudicator,
            proposal_policy: Arc::new(AcceptLedgerChannels),
            update_policy: Arc::new(AcceptAll),
        }
    }

    pub fn address(&self) -> Address {
        self.inner.ctx.address
    }

    pub fn role(&self) -> Role {
        self.inner.ctx.role
    }

    fn send(&self, recipient: &Address, msg: ParticipantMessage) -> Result<()> {
        self.inner
            .ctx
            .bus
            .send_to_participant(&self.inner.ctx.address, recipient, msg)?;
        Ok(())
    }

    /// Propose a channel to `peer` with the configured propose timeout.
    pub async fn propose_channel(
        &self,
        peer: Address,
        balances: [U256; PARTICIPANTS],
    ) -> Result<SessionHandle> {
        let timeout = self.inner.ctx.cfg.timeouts.propose();
        self.propose_channel_by(timeout, peer, balances).await
    }

    /// Propose a channel where we put in `balances[0]` and `peer` puts in
    /// `balances[1]`.
    ///
    /// `timeout` bounds the wait for the peer's answer. Once accepted, the
    /// call returns when the channel is funded and open.
    pub async fn propose_channel_by(
        &self,
        timeout: Duration,
        peer: Address,
        balances: [U256; PARTICIPANTS],
    ) -> Result<SessionHandle> {
        let cfg = &self.inner.ctx.cfg;
        let asset = Asset {
            chain_id: cfg.chain_id.into(),
            holder: self.inner.contracts.asset_holder,
        };
        let init_bals = Allocation::new([asset], Balances([ParticipantBalances(balances)]));
        let (proposal_id, nonce_share) = {
            let mut rng = rand::thread_rng();
            (rng.gen(), rng.gen())
        };
        let proposal = make_proposal(
            proposal_id,
            cfg.challenge_duration,
            nonce_share,
            init_bals,
            [self.address(), peer],
        );

        let (respond, outcome) = oneshot::channel();
        self.lock_proposals().insert(
            proposal_id,
            PendingProposal {
                channel: ProposedChannel::new(self.inner.signer.clone(), 0, proposal),
                respond,
            },
        );
        if let Err(e) = self.send(&peer, ParticipantMessage::ChannelProposal(proposal)) {
            self.lock_proposals().remove(&proposal_id);
            return Err(e);
        }
        info!(role = %self.role(), proposal = %proposal_id, %peer, "proposed channel");

        let outcome = match tokio::time::timeout(timeout, outcome).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => return Err(Error::Other("proposal dropped".to_string())),
            Err(_) => {
                self.lock_proposals().remove(&proposal_id);
                warn!(role = %self.role(), proposal = %proposal_id, "proposal timed out");
                return Err(Error::Timeout {
                    op: "propose",
                    channel: None,
                });
            }
        };

        match outcome {
            ProposalOutcome::Accepted { handle, opened } => {
                self.await_open(&handle, opened).await?;
                Ok(handle)
            }
            ProposalOutcome::Rejected(reason) => Err(Error::ProposalRejected { reason }),
            ProposalOutcome::Failed(e) => Err(e),
        }
    }

    async fn await_open(
        &self,
        handle: &SessionHandle,
        opened: oneshot::Receiver<Result<()>>,
    ) -> Result<()> {
        let res = opened
            .await
            .unwrap_or(Err(Error::SessionTerminated(handle.channel_id())));
        if res.is_err() {
            self.lock_sessions().remove(&handle.channel_id());
        }
        res
    }

    /// Process inbound frames until the inbox closes.
    pub async fn handle(&self, mut inbox: Inbox) {
        while let Some(frame) = inbox.recv().await {
            let (sender, recipient, msg) = match decode_frame(&frame) {
                Ok(v) => v,
                Err(e) => {
                    warn!(role = %self.role(), error = %e, "dropping undecodable frame");
                    continue;
                }
            };
            if recipient != self.address() {
                warn!(role = %self.role(), %recipient, "dropping frame for someone else");
                continue;
            }
            debug!(role = %self.role(), %sender, kind = msg.kind(), "received message");
            self.dispatch(sender, msg);
        }
        debug!(role = %self.role(), "inbox closed");
    }

    fn dispatch(&self, sender: Address, msg: ParticipantMessage) {
        match msg {
            ParticipantMessage::ChannelProposal(prop) => {
                let client = self.clone();
                tokio::spawn(async move { client.handle_proposal(sender, prop).await });
            }
            ParticipantMessage::ProposalAccepted(acc) => self.handle_proposal_acc(acc),
            ParticipantMessage::ProposalRejected { id, reason } => {
                match self.lock_proposals().remove(&id) {
                    Some(pending) => {
                        let _ = pending.respond.send(ProposalOutcome::Rejected(reason));
                    }
                    None => warn!(role = %self.role(), proposal = %id, "rejection for unknown proposal"),
                }
            }
            msg => {
                let Some(id) = msg.channel_id() else {
                    return;
                };
                let handle = self.lock_sessions().get(&id).cloned();
                match handle {
                    Some(handle) => {
                        if let Err(e) = handle.deliver(msg) {
                            debug!(role = %self.role(), channel = %id, error = %e, "session gone");
                        }
                    }
                    None => warn!(role = %self.role(), channel = %id, kind = msg.kind(), "message for unknown channel"),
                }
            }
        }
    }

    fn handle_proposal_acc(&self, acc: LedgerChannelProposalAcc) {
        let Some(PendingProposal {
            mut channel,
            respond,
        }) = self.lock_proposals().remove(&acc.proposal_id)
        else {
            warn!(role = %self.role(), proposal = %acc.proposal_id, "acceptance for unknown proposal");
            return;
        };

        let agreed = channel
            .participant_accepted(1, acc)
            .map_err(|e| Error::Protocol(e.to_string()))
            .and_then(|()| channel.build().map_err(|e| Error::Protocol(e.to_string())));
        let outcome = match agreed {
            Ok(agreed) => {
                let (handle, starter) = session::create(self.inner.ctx.clone(), agreed, 0);
                self.register(handle.clone());
                ProposalOutcome::Accepted {
                    handle,
                    opened: starter.spawn(),
                }
            }
            Err(e) => ProposalOutcome::Failed(e),
        };
        let _ = respond.send(outcome);
    }

    async fn handle_proposal(&self, sender: Address, prop: LedgerChannelProposal) {
        let role = self.role();
        let id = prop.proposal_id;
        let decided = tokio::time::timeout(
            self.inner.ctx.cfg.timeouts.accept_proposal(),
            self.respond_to_proposal(sender, prop),
        )
        .await;
        let (handle, opened) = match decided {
            Ok(Ok(Some(started))) => started,
            Ok(Ok(None)) => return,
            Ok(Err(e)) => {
                warn!(%role, proposal = %id, error = %e, "handling proposal failed");
                return;
            }
            Err(_) => {
                warn!(%role, proposal = %id, "proposal decision timed out");
                return;
            }
        };

        match self.await_open(&handle, opened).await {
            Ok(()) => {
                info!(%role, channel = %handle.channel_id(), "accepted channel is open");
                let _ = self.inner.new_channels_tx.send(handle);
            }
            Err(e) => warn!(%role, channel = %handle.channel_id(), error = %e, "accepted channel failed to open"),
        }
    }

    /// Validate and decide, then answer. Returns the started session if we
    /// accepted.
    async fn respond_to_proposal(
        &self,
        sender: Address,
        prop: LedgerChannelProposal,
    ) -> Result<Option<(SessionHandle, oneshot::Receiver<Result<()>>)>> {
        let role = self.role();
        let id = prop.proposal_id;
        let reject = |reason: &str| {
            let msg = ParticipantMessage::ProposalRejected {
                id,
                reason: reason.to_string(),
            };
            self.send(&sender, msg)
        };

        if let Err(e) = prop.validate(self.address()) {
            info!(%role, proposal = %id, error = %e, "rejecting invalid proposal");
            reject(&e.to_string())?;
            return Ok(None);
        }
        if sender != prop.participant {
            info!(%role, proposal = %id, %sender, "rejecting proposal not sent by its proposer");
            reject("sender is not the proposer")?;
            return Ok(None);
        }
        if let Decision::Reject(reason) = self.inner.proposal_policy.decide(&prop).await {
            info!(%role, proposal = %id, %reason, "rejecting proposal");
            reject(&reason)?;
            return Ok(None);
        }

        let mut channel = ProposedChannel::new(self.inner.signer.clone(), 1, prop);
        let nonce_share = rand::thread_rng().gen();
        let acc = channel
            .accept(nonce_share)
            .map_err(|e| Error::Protocol(e.to_string()))?;
        let agreed = channel
            .build()
            .map_err(|e| Error::Protocol(e.to_string()))?;

        // Register before answering, the proposer's signature on the initial
        // state may arrive right after our acceptance.
        let (handle, starter) = session::create(self.inner.ctx.clone(), agreed, 1);
        self.register(handle.clone());
        if let Err(e) = self.send(&sender, acc) {
            self.lock_sessions().remove(&handle.channel_id());
            return Err(e);
        }
        info!(%role, proposal = %id, channel = %handle.channel_id(), "accepted proposal");
        Ok(Some((handle, starter.spawn())))
    }

    fn register(&self, handle: SessionHandle) {
        self.lock_sessions().insert(handle.channel_id(), handle);
        self.inner.registered.send_modify(|n| *n += 1);
    }

    fn lock_proposals(&self) -> std::sync::MutexGuard<'_, HashMap<Hash, PendingProposal>> {
        // A panic while holding the lock leaves the map consistent.
        self.inner
            .proposals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<Hash, SessionHandle>> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Next channel opened by the peer and accepted by us.
    pub async fn next_channel(&self) -> Option<SessionHandle> {
        self.inner.new_channels_rx.lock().await.recv().await
    }

    pub fn session(&self, channel: &Hash) -> Option<SessionHandle> {
        self.lock_sessions().get(channel).cloned()
    }

    pub fn sessions(&self) -> Vec<SessionHandle> {
        self.lock_sessions().values().cloned().collect()
    }

    /// Resolves once at least one session was registered and every
    /// registered session is done.
    ///
    /// Sessions that failed to open are removed from the registry and do
    /// not hold this back.
    pub async fn wait_done(&self) {
        let mut registered = self.inner.registered.subscribe();
        loop {
            let count = *registered.borrow_and_update();
            if count == 0 {
                if registered.changed().await.is_err() {
                    return;
                }
                continue;
            }
            for handle in self.sessions() {
                handle.done().wait().await;
            }
            // Sessions registered while we were waiting need to finish, too.
            if *registered.borrow() == count {
                return;
            }
        }
    }
}
