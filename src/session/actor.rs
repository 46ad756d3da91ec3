use std::{
    collections::VecDeque,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{sleep_until, timeout, timeout_at, Instant},
};
use tracing::{debug, info, warn, Instrument};

use super::{Command, Context, Input, Mutator, SessionHandle, Snapshot, WatchAction};
use crate::{
    channel::{ActiveChannel, AgreedUponChannel, ChannelUpdate, PartIdx, Phase},
    done::Completion,
    error::{Error, Result},
    handler::Decision,
    ledger::{AdjudicatorEvent, Transaction},
    messages::{LedgerChannelUpdate, LedgerChannelUpdateAccepted, ParticipantMessage},
    types::{Address, Hash},
    watcher,
};

/// Parts of the actor that exist from creation to exit.
struct Core {
    ctx: Arc<Context>,
    id: Hash,
    part_idx: PartIdx,
    peer: Address,
    rx: mpsc::UnboundedReceiver<Input>,
    snapshot: watch::Sender<Snapshot>,
    /// Given to the watcher once the channel is open.
    handle: Option<SessionHandle>,
    completion: Completion,
    driver_reported: bool,
}

impl Core {
    fn send(&self, msg: ParticipantMessage) -> Result<()> {
        self.ctx
            .bus
            .send_to_participant(&self.ctx.address, &self.peer, msg)?;
        Ok(())
    }

    fn finish_driver(&mut self) {
        if !self.driver_reported {
            self.driver_reported = true;
            self.completion.driver_finished();
        }
    }
}

pub(super) struct SessionActor {
    core: Core,
    agreed: AgreedUponChannel,
}

impl SessionActor {
    pub(super) fn new(
        ctx: Arc<Context>,
        agreed: AgreedUponChannel,
        handle: SessionHandle,
        rx: mpsc::UnboundedReceiver<Input>,
        snapshot: watch::Sender<Snapshot>,
    ) -> Self {
        let part_idx = handle.part_idx();
        let core = Core {
            peer: agreed.params().participants[1 - part_idx],
            id: agreed.channel_id(),
            part_idx,
            completion: handle.done().clone(),
            handle: Some(handle),
            ctx,
            rx,
            snapshot,
            driver_reported: false,
        };
        Self { core, agreed }
    }

    pub(super) async fn run(self, opened: oneshot::Sender<Result<()>>) {
        let span = tracing::info_span!(
            "session",
            channel = %self.core.id,
            role = %self.core.ctx.role
        );
        self.run_inner(opened).instrument(span).await
    }

    async fn run_inner(self, opened: oneshot::Sender<Result<()>>) {
        let SessionActor { mut core, agreed } = self;
        let mut early = Vec::new();
        let mut deferred = VecDeque::new();

        match open(&mut core, agreed, &mut early, &mut deferred).await {
            Ok(channel) => {
                let session = OpenSession {
                    core,
                    channel,
                    phase: Phase::Proposed,
                    pending: None,
                    expired: None,
                    deferred,
                    concluded: false,
                };
                session.run(opened, early).await;
            }
            Err(e) => {
                warn!(error = %e, "opening channel failed");
                let _ = opened.send(Err(e));
                core.finish_driver();
                // No watcher was started for this session.
                core.completion.watcher_exited();
            }
        }
    }
}

/// Exchange signatures on the initial state and fund the channel.
///
/// Peer messages and commands arriving meanwhile are kept for later.
async fn open(
    core: &mut Core,
    mut agreed: AgreedUponChannel,
    early: &mut Vec<ParticipantMessage>,
    deferred: &mut VecDeque<Command>,
) -> Result<ActiveChannel> {
    core.send(agreed.sign()?)?;

    let deadline = Instant::now() + core.ctx.cfg.timeouts.response();
    while !agreed.has_all_signatures() {
        let input = timeout_at(deadline, core.rx.recv())
            .await
            .map_err(|_| Error::Timeout {
                op: "initial signatures",
                channel: Some(core.id),
            })?;
        match input {
            None => return Err(Error::SessionTerminated(core.id)),
            Some(Input::Peer(ParticipantMessage::ChannelUpdateAccepted(acc))) if acc.version == 0 => {
                agreed
                    .add_signature(acc)
                    .map_err(|e| Error::Protocol(e.to_string()))?;
            }
            Some(Input::Peer(msg)) => early.push(msg),
            Some(Input::Command(cmd)) => deferred.push_back(cmd),
            Some(Input::Ledger { respond, .. }) => {
                let _ = respond.send(WatchAction::Continue);
            }
            Some(Input::ReleaseDegraded) => {}
        }
    }
    let signed = agreed
        .build()
        .map_err(|e| Error::Protocol(e.to_string()))?;
    debug!("initial state signed, funding");

    match timeout(
        core.ctx.cfg.timeouts.funding(),
        core.ctx.funder.fund(signed.funding_request()),
    )
    .await
    {
        Err(_) => Err(Error::Timeout {
            op: "funding",
            channel: Some(core.id),
        }),
        Ok(Err(source)) => Err(Error::FundingFailed {
            channel: core.id,
            source,
        }),
        Ok(Ok(())) => Ok(signed.mark_funded()),
    }
}

struct PendingUpdate {
    update: ChannelUpdate,
    deadline: Instant,
    respond: oneshot::Sender<Result<()>>,
}

enum Next {
    Input(Option<Input>),
    Expired,
}

struct OpenSession {
    core: Core,
    channel: ActiveChannel,
    phase: Phase,
    /// Our own update waiting for the peer, at most one at a time.
    pending: Option<PendingUpdate>,
    /// Our last update that timed out. The peer may still accept it.
    expired: Option<ChannelUpdate>,
    /// Commands waiting for `pending` to resolve.
    deferred: VecDeque<Command>,
    /// The ledger reported the channel as concluded.
    concluded: bool,
}

impl OpenSession {
    async fn run(mut self, opened: oneshot::Sender<Result<()>>, early: Vec<ParticipantMessage>) {
        if let Err(e) = self.transition(Phase::Open) {
            let _ = opened.send(Err(e));
            self.core.finish_driver();
            self.core.completion.watcher_exited();
            return;
        }
        info!(version = self.channel.version(), "channel open");
        let _ = opened.send(Ok(()));

        if let Some(handle) = self.core.handle.take() {
            let watcher = watcher::watch(
                handle,
                self.core.ctx.adjudicator.clone(),
                self.core.ctx.cfg.timeouts.close(),
            );
            tokio::spawn(watcher.instrument(tracing::Span::current()));
        }

        for msg in early {
            self.on_peer(msg).await;
        }
        self.drain_deferred().await;

        while self.phase != Phase::Closed {
            let next = match self.pending.as_ref().map(|p| p.deadline) {
                Some(deadline) => tokio::select! {
                    input = self.core.rx.recv() => Next::Input(input),
                    _ = sleep_until(deadline) => Next::Expired,
                },
                None => Next::Input(self.core.rx.recv().await),
            };
            match next {
                Next::Expired => self.expire_pending(),
                Next::Input(None) => break,
                Next::Input(Some(input)) => self.on_input(input).await,
            }
            self.drain_deferred().await;
        }

        if let Some(p) = self.pending.take() {
            let _ = p.respond.send(Err(Error::SessionTerminated(self.core.id)));
        }
        self.core.finish_driver();
        debug!(phase = %self.phase, "session actor exiting");
    }

    async fn on_input(&mut self, input: Input) {
        match input {
            Input::Command(cmd) => self.on_command(cmd).await,
            Input::Peer(msg) => self.on_peer(msg).await,
            Input::Ledger { event, respond } => {
                let action = self.on_event(event).await;
                let _ = respond.send(action);
            }
            Input::ReleaseDegraded => {
                warn!(phase = %self.phase, "watcher gone, releasing session");
                self.core.finish_driver();
            }
        }
    }

    async fn drain_deferred(&mut self) {
        while self.pending.is_none() && self.phase != Phase::Closed {
            match self.deferred.pop_front() {
                Some(cmd) => self.on_command(cmd).await,
                None => break,
            }
        }
    }

    fn publish(&self) {
        self.core.snapshot.send_replace(Snapshot {
            phase: self.phase,
            state: self.channel.state(),
            signatures: Some(self.channel.signatures()),
        });
    }

    fn transition(&mut self, to: Phase) -> Result<()> {
        if let Err(e) = self.phase.transition(to) {
            warn!(error = %e, "illegal phase change");
            return Err(self.invalid_phase("change phase"));
        }
        debug!(phase = %to, "phase changed");
        self.publish();
        Ok(())
    }

    fn invalid_phase(&self, op: &'static str) -> Error {
        Error::InvalidPhase {
            channel: self.core.id,
            phase: self.phase,
            op,
        }
    }

    fn timeout(&self, op: &'static str) -> Error {
        Error::Timeout {
            op,
            channel: Some(self.core.id),
        }
    }

    fn peer_idx(&self) -> PartIdx {
        1 - self.core.part_idx
    }

    async fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Update {
                mutator,
                deadline,
                respond,
            } => {
                if respond.is_closed() {
                    return;
                }
                if self.pending.is_some() {
                    self.deferred.push_back(Command::Update {
                        mutator,
                        deadline,
                        respond,
                    });
                    return;
                }
                if Instant::now() >= deadline {
                    let _ = respond.send(Err(self.timeout("update")));
                    return;
                }
                match self.propose(mutator) {
                    Ok(update) => {
                        self.pending = Some(PendingUpdate {
                            update,
                            deadline,
                            respond,
                        })
                    }
                    Err(e) => {
                        let _ = respond.send(Err(e));
                    }
                }
            }
            Command::Close { deadline, respond } => {
                if respond.is_closed() {
                    return;
                }
                if self.pending.is_some() {
                    self.deferred
                        .push_back(Command::Close { deadline, respond });
                    return;
                }
                let res = self.close(deadline).await;
                if let Err(e) = &res {
                    warn!(error = %e, phase = %self.phase, "close failed");
                }
                let _ = respond.send(res);
            }
        }
    }

    fn propose(&mut self, mutator: Mutator) -> Result<ChannelUpdate> {
        if !self.phase.accepts_updates() {
            return Err(self.invalid_phase("update"));
        }
        let base = self.channel.state().make_next_state();
        let next = catch_unwind(AssertUnwindSafe(|| mutator(base)))
            .map_err(|_| Error::MutatorPanicked)??;
        let (update, msg) = self.channel.update(next)?;
        self.core.send(msg)?;
        debug!(version = update.version(), "update proposed");
        Ok(update)
    }

    fn expire_pending(&mut self) {
        if let Some(p) = self.pending.take() {
            warn!(version = p.update.version(), "update timed out");
            let _ = p.respond.send(Err(self.timeout("update")));
            self.expired = Some(p.update);
        }
    }

    async fn on_peer(&mut self, msg: ParticipantMessage) {
        match msg {
            ParticipantMessage::ChannelUpdate(upd) => self.on_remote_update(upd).await,
            ParticipantMessage::ChannelUpdateAccepted(acc) => self.on_accepted(acc),
            ParticipantMessage::ChannelUpdateRejected {
                version, reason, ..
            } => self.on_rejected(version, reason),
            other => warn!(kind = other.kind(), "unexpected message for open channel"),
        }
    }

    fn on_accepted(&mut self, acc: LedgerChannelUpdateAccepted) {
        if self.accept_expired(acc) {
            return;
        }
        let PendingUpdate {
            mut update,
            respond,
            ..
        } = match self.pending.take() {
            Some(p) if p.update.version() == acc.version => p,
            other => {
                self.pending = other;
                warn!(version = acc.version, "ignoring acceptance without matching update");
                return;
            }
        };

        let version = acc.version;
        let res = match update.participant_accepted(self.peer_idx(), acc) {
            Err(e) => Err(Error::Protocol(e.to_string())),
            Ok(()) => update
                .apply(&mut self.channel)
                .map_err(|(_, e)| Error::Protocol(e.to_string())),
        };
        match &res {
            Ok(()) => {
                self.expired = None;
                self.publish();
                info!(version, "update committed");
            }
            Err(e) => warn!(version, error = %e, "peer acceptance invalid"),
        }
        let _ = respond.send(res);
    }

    /// Commit our timed out update if `acc` is the peer's signature on it.
    ///
    /// The peer committed it when it sent `acc`, so do we. A retry pending
    /// for the same version can no longer succeed and is failed.
    fn accept_expired(&mut self, acc: LedgerChannelUpdateAccepted) -> bool {
        let peer = self.peer_idx();
        let mut update = match self.expired.take() {
            Some(u) if u.version() == acc.version => u,
            other => {
                self.expired = other;
                return false;
            }
        };
        // Not signed over our expired state, so it answers the retry.
        if update.participant_accepted(peer, acc).is_err() {
            self.expired = Some(update);
            return false;
        }

        let version = acc.version;
        if let Err((_, e)) = update.apply(&mut self.channel) {
            warn!(version, error = %e, "late acceptance no longer applies");
            return true;
        }
        self.publish();
        info!(version, "late acceptance, update committed");

        match self.pending.take() {
            Some(p) if p.update.version() == version => {
                let _ = p.respond.send(Err(Error::UpdateRejected {
                    version,
                    reason: "peer accepted an earlier update".to_string(),
                }));
            }
            other => self.pending = other,
        }
        true
    }

    fn on_rejected(&mut self, version: u64, reason: String) {
        match self.pending.take() {
            Some(p) if p.update.version() == version => {
                info!(version, %reason, "update rejected by peer");
                let _ = p.respond.send(Err(Error::UpdateRejected { version, reason }));
            }
            other => {
                self.pending = other;
                debug!(version, "ignoring rejection without matching update");
            }
        }
    }

    fn reply_reject(&self, version: u64, reason: &str) {
        let msg = ParticipantMessage::ChannelUpdateRejected {
            id: self.core.id,
            version,
            reason: reason.to_string(),
        };
        if let Err(e) = self.core.send(msg) {
            warn!(version, error = %e, "sending rejection failed");
        }
    }

    async fn on_remote_update(&mut self, msg: LedgerChannelUpdate) {
        let version = msg.state.version();
        if !self.phase.accepts_updates() {
            self.reply_reject(version, "channel is not open");
            return;
        }

        // Both sides proposed the same version. The proposer of the channel
        // keeps its own update, the other side yields.
        if self
            .pending
            .as_ref()
            .map_or(false, |p| p.update.version() == version)
        {
            if self.core.part_idx == 0 {
                debug!(version, "version conflict, rejecting peer update");
                self.reply_reject(version, "version conflict");
                return;
            }
            if let Some(p) = self.pending.take() {
                debug!(version, "version conflict, yielding to peer update");
                let _ = p.respond.send(Err(Error::UpdateRejected {
                    version,
                    reason: "version conflict".to_string(),
                }));
            }
        }

        let mut update = match self.channel.handle_update(msg) {
            Ok(u) => u,
            Err(e) => {
                warn!(version, error = %e, "rejecting invalid update");
                self.reply_reject(version, &e.to_string());
                return;
            }
        };

        let current = self.channel.state();
        let proposed = update.new_state();
        let decision = timeout(
            self.core.ctx.cfg.timeouts.accept_update(),
            self.core.ctx.update_policy.decide(&current, &proposed),
        )
        .await
        .unwrap_or_else(|_| Decision::Reject("decision timed out".to_string()));

        match decision {
            Decision::Accept => {
                let msg = match update.accept() {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(version, error = %e, "signing update failed");
                        self.reply_reject(version, "signing failed");
                        return;
                    }
                };
                if let Err(e) = self.core.send(msg) {
                    warn!(version, error = %e, "sending acceptance failed");
                    return;
                }
                match update.apply(&mut self.channel) {
                    Ok(()) => {
                        self.expired = None;
                        self.publish();
                        info!(version, "update accepted");
                    }
                    Err((_, e)) => warn!(version, error = %e, "applying accepted update failed"),
                }
            }
            Decision::Reject(reason) => {
                info!(version, %reason, "rejecting update");
                if let Err(e) = self.core.send(update.reject(&reason)) {
                    warn!(version, error = %e, "sending rejection failed");
                }
            }
        }
    }

    async fn on_event(&mut self, event: AdjudicatorEvent) -> WatchAction {
        match event {
            AdjudicatorEvent::Registered {
                tx,
                timeout: challenge,
                ..
            } => {
                if matches!(self.phase, Phase::Settled | Phase::Closed) {
                    return WatchAction::Continue;
                }
                let registered = tx.state.version();
                info!(version = registered, ?challenge, "state registered on ledger");
                if self.phase != Phase::Registered {
                    self.enter_dispute();
                }

                let local = self.channel.version();
                if registered < local {
                    warn!(registered, local, "outdated state registered, refuting");
                    self.refute().await;
                } else if tx != self.channel.transaction() {
                    self.adopt(tx);
                }
                WatchAction::Continue
            }
            AdjudicatorEvent::Concluded { tx, .. } => {
                self.concluded = true;
                if self.phase == Phase::Closed {
                    return WatchAction::Done;
                }
                info!(version = tx.state.version(), "channel concluded on ledger");
                if tx != self.channel.transaction() {
                    self.adopt(tx);
                }
                if matches!(self.phase, Phase::Open | Phase::Finalizing) {
                    self.enter_dispute();
                }
                WatchAction::CloseNeeded
            }
        }
    }

    /// The channel moved on-chain, no more off-chain updates.
    fn enter_dispute(&mut self) {
        if let Err(e) = self.transition(Phase::Registered) {
            warn!(error = %e, "cannot enter dispute");
            return;
        }
        self.expired = None;
        if let Some(p) = self.pending.take() {
            let _ = p.respond.send(Err(self.invalid_phase("update")));
        }
    }

    async fn refute(&mut self) {
        let req = self.channel.adjudicator_req(false);
        let res = timeout(
            self.core.ctx.cfg.timeouts.close(),
            self.core.ctx.adjudicator.register(&req),
        )
        .await;
        match res {
            Ok(Ok(())) => info!(version = req.tx.state.version(), "refuted with newer state"),
            Ok(Err(e)) => warn!(error = %e, "refutation failed"),
            Err(_) => warn!("refutation timed out"),
        }
    }

    fn adopt(&mut self, tx: Transaction) {
        let version = tx.state.version();
        match self.channel.adopt(tx) {
            Ok(()) => {
                self.publish();
                info!(version, "adopted state from ledger");
            }
            Err(e) => warn!(version, error = %e, "ignoring invalid state from ledger"),
        }
    }

    /// Register (unless final), settle and withdraw.
    ///
    /// A failed registration returns the channel to `Open`, a failed
    /// settlement leaves it `Registered`. Both can be retried.
    async fn close(&mut self, deadline: Instant) -> Result<()> {
        let id = self.core.id;

        if self.phase == Phase::Open && !self.channel.state().is_final {
            self.transition(Phase::Finalizing)?;
            let req = self.channel.adjudicator_req(false);
            let res = timeout_at(deadline, self.core.ctx.adjudicator.register(&req)).await;
            match res {
                Ok(Ok(())) => self.transition(Phase::Registered)?,
                Ok(Err(source)) => {
                    self.transition(Phase::Open)?;
                    return Err(Error::RegistrationFailed {
                        channel: id,
                        source,
                    });
                }
                Err(_) => {
                    self.transition(Phase::Open)?;
                    return Err(self.timeout("close"));
                }
            }
        }

        match self.phase {
            Phase::Open | Phase::Registered => {
                let req = self.channel.adjudicator_req(self.concluded);
                let res = timeout_at(deadline, self.core.ctx.adjudicator.settle(&req)).await;
                match res {
                    Ok(Ok(())) => self.transition(Phase::Settled)?,
                    Ok(Err(source)) => {
                        return Err(Error::SettlementFailed {
                            channel: id,
                            source,
                        })
                    }
                    Err(_) => return Err(self.timeout("close")),
                }
            }
            Phase::Settled => {}
            Phase::Closed => return Ok(()),
            _ => return Err(self.invalid_phase("close")),
        }

        self.transition(Phase::Closed)?;
        info!(version = self.channel.version(), "channel closed");
        Ok(())
    }
}
