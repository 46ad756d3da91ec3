//! In-memory ledger shared by both nodes of a test or demo.
//!
//! Enforces what the adjudicator contract enforces: fully signed states only,
//! registrations can only be replaced by higher versions, a non-final state
//! concludes once its challenge duration elapsed, and every participant
//! withdraws its share of the concluded outcome exactly once.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    sync::{mpsc, Notify},
    time::Instant,
};

use super::{
    Adjudicator, AdjudicatorEvent, AdjudicatorReq, AdjudicatorSubscription, ContractBackend,
    Funder, FundingRequest, LedgerError, Transaction,
};
use crate::{
    channel::{Params, PARTICIPANTS},
    config::ContractAddresses,
    sig,
    types::{Address, Hash, U256},
};

type EventSender = mpsc::UnboundedSender<Result<AdjudicatorEvent, LedgerError>>;

#[derive(Debug, Default)]
struct Faults {
    fail_next_register: bool,
    fail_next_settle: bool,
    /// Participants whose next `settle` fails.
    fail_settle_of: HashSet<Address>,
    fail_funding: bool,
    broken_subscriptions: bool,
}

#[derive(Debug)]
struct Registration {
    tx: Transaction,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct ChannelRecord {
    deposits: [U256; PARTICIPANTS],
    funded: [bool; PARTICIPANTS],
    registered: Option<Registration>,
    concluded: Option<Transaction>,
    withdrawn: [Option<U256>; PARTICIPANTS],
}

#[derive(Debug, Default)]
struct Inner {
    adjudicators: HashSet<Address>,
    /// Asset holder -> adjudicator it was deployed for.
    asset_holders: HashMap<Address, Address>,
    channels: HashMap<Hash, ChannelRecord>,
    subscribers: HashMap<Hash, Vec<EventSender>>,
    faults: Faults,
}

impl Inner {
    fn emit(&mut self, ev: AdjudicatorEvent) {
        if let Some(subs) = self.subscribers.get_mut(&ev.channel()) {
            subs.retain(|s| s.send(Ok(ev)).is_ok());
        }
    }

    /// Latest event of `channel`, replayed to new subscribers.
    fn current_event(&self, channel: Hash, now: Instant) -> Option<AdjudicatorEvent> {
        let rec = self.channels.get(&channel)?;
        if let Some(tx) = rec.concluded {
            return Some(AdjudicatorEvent::Concluded { channel, tx });
        }
        rec.registered
            .as_ref()
            .map(|r| AdjudicatorEvent::Registered {
                channel,
                tx: r.tx,
                timeout: r.deadline.saturating_duration_since(now),
            })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedLedger {
    inner: Arc<Mutex<Inner>>,
    /// Woken on every deposit and conclusion.
    progress: Arc<Notify>,
}

fn verify(params: &Params, tx: &Transaction) -> Result<(), LedgerError> {
    if tx.state.channel_id() != params.channel_id() {
        return Err(LedgerError::UnknownChannel(tx.state.channel_id()));
    }
    let hash = tx.state.hash();
    for (sig, part) in tx.sigs.iter().zip(params.participants) {
        match sig::recover_signer(hash, *sig) {
            Ok(signer) if signer == part => {}
            _ => {
                return Err(LedgerError::InvalidSignature {
                    version: tx.state.version(),
                })
            }
        }
    }
    Ok(())
}

impl SimulatedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        // No invariant spans a panic, a poisoned lock is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `register` call fails once.
    pub fn fail_next_register(&self) {
        self.inner().faults.fail_next_register = true;
    }

    /// The next `settle` call fails once.
    pub fn fail_next_settle(&self) {
        self.inner().faults.fail_next_settle = true;
    }

    /// The next `settle` call by `acc` fails once.
    pub fn fail_next_settle_of(&self, acc: Address) {
        self.inner().faults.fail_settle_of.insert(acc);
    }

    /// Every deposit fails from now on.
    pub fn fail_funding(&self) {
        self.inner().faults.fail_funding = true;
    }

    /// Break all current and future event subscriptions.
    pub fn break_subscriptions(&self) {
        let mut inner = self.inner();
        inner.faults.broken_subscriptions = true;
        for (_, subs) in inner.subscribers.drain() {
            for s in subs {
                let _ = s.send(Err(LedgerError::SubscriptionClosed));
            }
        }
    }

    /// Amount `idx` withdrew from `channel`, `None` if it did not withdraw.
    pub fn payout(&self, channel: Hash, idx: usize) -> Option<U256> {
        self.inner()
            .channels
            .get(&channel)
            .and_then(|rec| rec.withdrawn[idx])
    }

    /// Concluded outcome of `channel`.
    pub fn outcome(&self, channel: Hash) -> Option<Transaction> {
        self.inner()
            .channels
            .get(&channel)
            .and_then(|rec| rec.concluded)
    }

    /// Version of the currently registered state.
    pub fn registered_version(&self, channel: Hash) -> Option<u64> {
        self.inner()
            .channels
            .get(&channel)
            .and_then(|rec| rec.registered.as_ref())
            .map(|r| r.tx.state.version())
    }

    pub fn total_deposits(&self, channel: Hash) -> U256 {
        self.inner()
            .channels
            .get(&channel)
            .map(|rec| rec.deposits.iter().fold(U256::zero(), |acc, d| acc + *d))
            .unwrap_or_default()
    }

    fn conclude(inner: &mut Inner, channel: Hash, tx: Transaction) {
        let rec = inner.channels.entry(channel).or_default();
        if rec.concluded.is_some() {
            return;
        }
        rec.concluded = Some(tx);
        tracing::debug!(%channel, version = tx.state.version(), "channel concluded");
        inner.emit(AdjudicatorEvent::Concluded { channel, tx });
    }

    /// Withdraw the share of `idx`, once.
    fn withdraw(inner: &mut Inner, channel: Hash, idx: usize) {
        let rec = inner.channels.entry(channel).or_default();
        if let (Some(tx), None) = (rec.concluded, rec.withdrawn[idx]) {
            let amount = tx.state.outcome.balance(0, idx);
            rec.withdrawn[idx] = Some(amount);
            tracing::debug!(%channel, idx, %amount, "withdrawn");
        }
    }
}

#[async_trait]
impl Funder for SimulatedLedger {
    async fn fund(&self, req: FundingRequest) -> Result<(), LedgerError> {
        let channel = req.params.channel_id();
        {
            let mut inner = self.inner();
            if inner.faults.fail_funding {
                return Err(LedgerError::Deposit("insufficient gas".into()));
            }
            let rec = inner.channels.entry(channel).or_default();
            if !rec.funded[req.idx] {
                rec.deposits[req.idx] = req.funding_agreement.0[0].0[req.idx];
                rec.funded[req.idx] = true;
            }
        }
        self.progress.notify_waiters();

        loop {
            // Registered before checking, so no deposit can slip in between.
            let notified = self.progress.notified();
            let done = self
                .inner()
                .channels
                .get(&channel)
                .map_or(false, |rec| rec.funded.iter().all(|f| *f));
            if done {
                return Ok(());
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Adjudicator for SimulatedLedger {
    async fn register(&self, req: &AdjudicatorReq) -> Result<(), LedgerError> {
        let channel = req.params.channel_id();
        let mut inner = self.inner();
        if std::mem::take(&mut inner.faults.fail_next_register) {
            return Err(LedgerError::Transaction("register reverted".into()));
        }
        verify(&req.params, &req.tx)?;

        let rec = inner.channels.entry(channel).or_default();
        if rec.concluded.is_some() {
            return Err(LedgerError::Transaction("channel already concluded".into()));
        }
        let version = req.tx.state.version();
        if let Some(r) = &rec.registered {
            let registered = r.tx.state.version();
            if registered == version {
                return Ok(());
            }
            if registered > version {
                return Err(LedgerError::StaleVersion { registered });
            }
        }

        let timeout = if req.tx.state.is_final {
            Duration::ZERO
        } else {
            Duration::from_secs(req.params.challenge_duration)
        };
        rec.registered = Some(Registration {
            tx: req.tx,
            deadline: Instant::now() + timeout,
        });
        tracing::debug!(%channel, version, "state registered");
        inner.emit(AdjudicatorEvent::Registered {
            channel,
            tx: req.tx,
            timeout,
        });
        Ok(())
    }

    async fn settle(&self, req: &AdjudicatorReq) -> Result<(), LedgerError> {
        let channel = req.params.channel_id();
        {
            let mut inner = self.inner();
            if std::mem::take(&mut inner.faults.fail_next_settle)
                || inner.faults.fail_settle_of.remove(&req.acc)
            {
                return Err(LedgerError::Transaction("conclude reverted".into()));
            }
            verify(&req.params, &req.tx)?;
        }

        loop {
            let notified = self.progress.notified();
            let deadline = {
                let mut inner = self.inner();
                let rec = inner.channels.entry(channel).or_default();
                let concluded = rec.concluded.is_some();
                let registered = rec.registered.as_ref().map(|r| (r.tx, r.deadline));
                if concluded {
                    Self::withdraw(&mut inner, channel, req.idx);
                    return Ok(());
                }
                match registered {
                    // A final state needs no dispute.
                    None if req.tx.state.is_final => {
                        Self::conclude(&mut inner, channel, req.tx);
                        None
                    }
                    None if req.secondary => Some(None),
                    None => return Err(LedgerError::NotConcluded),
                    Some((tx, deadline)) if deadline <= Instant::now() => {
                        Self::conclude(&mut inner, channel, tx);
                        None
                    }
                    Some((_, deadline)) => Some(Some(deadline)),
                }
            };
            match deadline {
                // Concluded just now, wake everyone waiting for it.
                None => self.progress.notify_waiters(),
                Some(Some(deadline)) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = notified => {}
                    }
                }
                Some(None) => notified.await,
            }
        }
    }

    async fn subscribe(&self, channel: Hash) -> Result<AdjudicatorSubscription, LedgerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner();
        if inner.faults.broken_subscriptions {
            let _ = tx.send(Err(LedgerError::SubscriptionClosed));
            return Ok(AdjudicatorSubscription::new(rx));
        }
        if let Some(ev) = inner.current_event(channel, Instant::now()) {
            let _ = tx.send(Ok(ev));
        }
        inner.subscribers.entry(channel).or_default().push(tx);
        Ok(AdjudicatorSubscription::new(rx))
    }
}

#[async_trait]
impl ContractBackend for SimulatedLedger {
    async fn deploy_adjudicator(&self) -> Result<Address, LedgerError> {
        let addr = ContractAddresses::default().adjudicator;
        self.inner().adjudicators.insert(addr);
        Ok(addr)
    }

    async fn deploy_asset_holder(&self, adjudicator: Address) -> Result<Address, LedgerError> {
        let mut inner = self.inner();
        if !inner.adjudicators.contains(&adjudicator) {
            return Err(LedgerError::InvalidContract(adjudicator));
        }
        let addr = ContractAddresses::default().asset_holder;
        inner.asset_holders.insert(addr, adjudicator);
        Ok(addr)
    }

    async fn validate_asset_holder(
        &self,
        adjudicator: Address,
        asset_holder: Address,
    ) -> Result<(), LedgerError> {
        let inner = self.inner();
        match inner.asset_holders.get(&asset_holder) {
            Some(adj) if *adj == adjudicator && inner.adjudicators.contains(adj) => Ok(()),
            Some(_) => Err(LedgerError::InvalidContract(adjudicator)),
            None => Err(LedgerError::InvalidContract(asset_holder)),
        }
    }
}
