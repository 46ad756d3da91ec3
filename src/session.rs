//! Channel sessions: one actor task per channel owns the channel state.
//!
//! Local commands, peer messages and ledger events all enter the actor
//! through a single queue, so they are applied one after another and no
//! version is skipped or applied twice. [SessionHandle] is the cheap,
//! clonable way to talk to a session.

mod actor;

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, oneshot, watch},
    time::Instant,
};

use crate::{
    channel::{AgreedUponChannel, Params, PartIdx, Phase, State, PARTICIPANTS},
    config::{Config, Role},
    done::Completion,
    error::{Error, Result},
    handler::UpdatePolicy,
    ledger::{Adjudicator, AdjudicatorEvent, Funder, Transaction},
    messages::ParticipantMessage,
    types::{Address, Hash, Signature, U256},
    wire::MessageBus,
};

/// Collaborators shared by all sessions of a node.
pub(crate) struct Context {
    pub cfg: Arc<Config>,
    pub role: Role,
    pub address: Address,
    pub bus: Arc<dyn MessageBus>,
    pub funder: Arc<dyn Funder>,
    pub adjudicator: Arc<dyn Adjudicator>,
    pub update_policy: Arc<dyn UpdatePolicy>,
}

/// Pure state transition requested by the application.
///
/// Receives a copy of the current state with the version already
/// incremented.
pub type Mutator = Box<dyn FnOnce(State) -> Result<State> + Send>;

/// Mutator moving `amount` of the channel's asset from `from` to `to`.
pub fn transfer(from: PartIdx, to: PartIdx, amount: U256) -> impl FnOnce(State) -> Result<State> + Send {
    move |mut state: State| {
        state.outcome.transfer(0, from, to, amount)?;
        Ok(state)
    }
}

pub(crate) enum Command {
    Update {
        mutator: Mutator,
        deadline: Instant,
        respond: oneshot::Sender<Result<()>>,
    },
    Close {
        deadline: Instant,
        respond: oneshot::Sender<Result<()>>,
    },
}

/// What the watcher should do after an event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchAction {
    Continue,
    /// The channel concluded on-chain but is not closed locally.
    CloseNeeded,
    Done,
}

pub(crate) enum Input {
    Command(Command),
    Peer(ParticipantMessage),
    Ledger {
        event: AdjudicatorEvent,
        respond: oneshot::Sender<WatchAction>,
    },
    /// The watcher gave up, stop holding back the termination signal.
    ReleaseDegraded,
}

/// Point-in-time view of a session, published after every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub phase: Phase,
    pub state: State,
    /// `None` until the initial state is signed by everyone.
    pub signatures: Option<[Signature; PARTICIPANTS]>,
}

impl Snapshot {
    pub fn transaction(&self) -> Option<Transaction> {
        self.signatures.map(|sigs| Transaction {
            state: self.state,
            sigs,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Hash,
    params: Params,
    part_idx: PartIdx,
    tx: mpsc::UnboundedSender<Input>,
    snapshot: watch::Receiver<Snapshot>,
    completion: Completion,
    update_timeout: Duration,
    close_timeout: Duration,
}

impl SessionHandle {
    pub fn channel_id(&self) -> Hash {
        self.id
    }

    pub fn params(&self) -> Params {
        self.params
    }

    /// Our index in the channel, 0 for the proposer.
    pub fn part_idx(&self) -> PartIdx {
        self.part_idx
    }

    pub fn snapshot(&self) -> Snapshot {
        *self.snapshot.borrow()
    }

    pub fn phase(&self) -> Phase {
        self.snapshot.borrow().phase
    }

    /// Latest fully signed state.
    pub fn state(&self) -> State {
        self.snapshot.borrow().state
    }

    pub fn done(&self) -> &Completion {
        &self.completion
    }

    /// Update the channel with the default timeout.
    pub async fn update<F>(&self, mutator: F) -> Result<()>
    where
        F: FnOnce(State) -> Result<State> + Send + 'static,
    {
        self.update_by(self.update_timeout, mutator).await
    }

    /// Propose the state produced by `mutator` and wait until the peer
    /// accepted or rejected it, at most `timeout`.
    ///
    /// On any error the channel state is unchanged, with one exception: after
    /// a [Error::Timeout] the update is still committed if the peer accepts
    /// it late. Check [SessionHandle::state] before retrying.
    ///
    /// The mutator runs on the session task. If it panics the update fails
    /// with [Error::MutatorPanicked] and the session carries on.
    pub async fn update_by<F>(&self, timeout: Duration, mutator: F) -> Result<()>
    where
        F: FnOnce(State) -> Result<State> + Send + 'static,
    {
        let phase = self.phase();
        if !phase.accepts_updates() && phase != Phase::Proposed {
            return Err(Error::InvalidPhase {
                channel: self.id,
                phase,
                op: "update",
            });
        }
        let deadline = Instant::now() + timeout;
        let (respond, rx) = oneshot::channel();
        self.send(Input::Command(Command::Update {
            mutator: Box::new(mutator),
            deadline,
            respond,
        }))?;
        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(res)) => res,
            Ok(Err(_)) => Err(Error::SessionTerminated(self.id)),
            Err(_) => Err(Error::Timeout {
                op: "update",
                channel: Some(self.id),
            }),
        }
    }

    pub async fn close(&self) -> Result<()> {
        self.close_by(self.close_timeout).await
    }

    /// Close the channel on the ledger and withdraw. Closing a closed
    /// channel is a no-op.
    pub async fn close_by(&self, timeout: Duration) -> Result<()> {
        if self.phase() == Phase::Closed {
            return Ok(());
        }
        let deadline = Instant::now() + timeout;
        let (respond, rx) = oneshot::channel();
        if self
            .send(Input::Command(Command::Close { deadline, respond }))
            .is_err()
        {
            return self.closed_or_terminated();
        }
        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(res)) => res,
            Ok(Err(_)) => self.closed_or_terminated(),
            Err(_) => Err(Error::Timeout {
                op: "close",
                channel: Some(self.id),
            }),
        }
    }

    fn closed_or_terminated(&self) -> Result<()> {
        match self.phase() {
            Phase::Closed => Ok(()),
            _ => Err(Error::SessionTerminated(self.id)),
        }
    }

    fn send(&self, input: Input) -> Result<()> {
        self.tx
            .send(input)
            .map_err(|_| Error::SessionTerminated(self.id))
    }

    pub(crate) fn deliver(&self, msg: ParticipantMessage) -> Result<()> {
        self.send(Input::Peer(msg))
    }

    /// Hand a ledger event to the actor, `None` if the session is gone.
    pub(crate) async fn forward_event(&self, event: AdjudicatorEvent) -> Option<WatchAction> {
        let (respond, rx) = oneshot::channel();
        self.send(Input::Ledger { event, respond }).ok()?;
        rx.await.ok()
    }

    pub(crate) fn release_degraded(&self) {
        // A gone actor already reported itself.
        let _ = self.send(Input::ReleaseDegraded);
    }

    /// Resolves once the session is closed or gone.
    pub(crate) async fn closed(&self) {
        let mut rx = self.snapshot.clone();
        loop {
            if rx.borrow_and_update().phase == Phase::Closed {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// A created session whose actor has not been started yet.
///
/// Splitting creation from start lets the client register the handle before
/// the first message of the session goes out.
pub(crate) struct Starter {
    actor: actor::SessionActor,
}

impl Starter {
    /// Spawn the actor. The returned receiver resolves once the channel is
    /// open or opening failed.
    pub fn spawn(self) -> oneshot::Receiver<Result<()>> {
        let (opened, rx) = oneshot::channel();
        tokio::spawn(self.actor.run(opened));
        rx
    }
}

pub(crate) fn create(ctx: Arc<Context>, agreed: AgreedUponChannel, part_idx: PartIdx) -> (SessionHandle, Starter) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot) = watch::channel(Snapshot {
        phase: Phase::Proposed,
        state: agreed.init_state(),
        signatures: None,
    });
    let handle = SessionHandle {
        id: agreed.channel_id(),
        params: agreed.params(),
        part_idx,
        tx,
        snapshot,
        completion: Completion::new(),
        update_timeout: ctx.cfg.timeouts.update(),
        close_timeout: ctx.cfg.timeouts.close(),
    };
    let actor = actor::SessionActor::new(ctx, agreed, handle.clone(), rx, snapshot_tx);
    (handle, Starter { actor })
}
