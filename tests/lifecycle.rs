mod common;

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use common::{balances, eventually, open, World};
use perun_node::{
    channel::{Phase, State},
    config::{Config, Role},
    handler::{Decision, ProposalPolicy, RejectAll, UpdatePolicy},
    ledger::{Adjudicator, AdjudicatorReq},
    messages::LedgerChannelProposal,
    session::transfer,
    types::U256,
    Error,
};

fn u(v: u64) -> U256 {
    U256::from(v)
}

#[tokio::test(start_paused = true)]
async fn both_sides_agree_on_the_opened_channel() {
    let world = World::new();
    let alice = world.node(Role::Alice);
    let bob = world.node(Role::Bob);

    let (bob_ch, alice_ch) = open(&bob, &alice).await;

    assert_eq!(bob_ch.part_idx(), 0);
    assert_eq!(alice_ch.part_idx(), 1);
    assert_eq!(bob_ch.params(), alice_ch.params());
    assert_eq!(
        bob_ch.params().participants,
        [bob.address(), alice.address()]
    );
    assert_eq!(bob_ch.state(), alice_ch.state());
    assert_eq!(bob_ch.state().version(), 0);
    assert_eq!(bob_ch.phase(), Phase::Open);
    assert_eq!(alice_ch.phase(), Phase::Open);
    assert_eq!(bob_ch.snapshot().signatures, alice_ch.snapshot().signatures);
    assert_eq!(world.ledger.total_deposits(bob_ch.channel_id()), u(20));
    assert_eq!(bob.sessions().len(), 1);
    assert!(alice.session(&bob_ch.channel_id()).is_some());
}

#[tokio::test(start_paused = true)]
async fn updates_conserve_totals_without_version_gaps() {
    let world = World::new();
    let alice = world.node(Role::Alice);
    let bob = world.node(Role::Bob);
    let (bob_ch, alice_ch) = open(&bob, &alice).await;

    let moves = [(0, 1, 3), (1, 0, 7), (0, 1, 12), (1, 0, 1)];
    for (i, (from, to, amount)) in moves.into_iter().enumerate() {
        let ch = if from == bob_ch.part_idx() {
            &bob_ch
        } else {
            &alice_ch
        };
        ch.update(transfer(from, to, u(amount))).await.unwrap();

        let expected_version = i as u64 + 1;
        assert_eq!(bob_ch.state().version(), expected_version);
        eventually("peer commit", || alice_ch.state().version() == expected_version).await;
        assert_eq!(bob_ch.state(), alice_ch.state());
        let [b, a] = balances(&bob_ch);
        assert_eq!(a + b, u(20));
    }
    assert_eq!(balances(&alice_ch), [u(3), u(17)]);
}

#[tokio::test(start_paused = true)]
async fn overspending_mutator_fails_locally() {
    let world = World::new();
    let alice = world.node(Role::Alice);
    let bob = world.node(Role::Bob);
    let (bob_ch, alice_ch) = open(&bob, &alice).await;

    let res = bob_ch.update(transfer(0, 1, u(11))).await;
    assert!(matches!(res, Err(Error::InsufficientFunds(_))), "{res:?}");
    assert_eq!(bob_ch.state().version(), 0);

    // A mutator cannot skip versions either.
    let res = bob_ch
        .update(|s: State| Ok(s.make_next_state()))
        .await;
    assert!(matches!(res, Err(Error::InvalidUpdate(_))), "{res:?}");
    assert_eq!(alice_ch.state().version(), 0);
}

#[tokio::test(start_paused = true)]
async fn final_update_and_cooperative_close() {
    let world = World::new();
    let alice = world.node(Role::Alice);
    let bob = world.node(Role::Bob);
    let (bob_ch, alice_ch) = open(&bob, &alice).await;
    let id = bob_ch.channel_id();

    bob_ch
        .update(|mut s: State| {
            s.outcome.transfer(0, 0, 1, 5.into())?;
            s.is_final = true;
            Ok(s)
        })
        .await
        .unwrap();
    assert_eq!(balances(&bob_ch), [u(5), u(15)]);

    // Nothing follows a final state.
    let res = alice_ch.update(transfer(1, 0, u(1))).await;
    assert!(matches!(res, Err(Error::InvalidUpdate(_))), "{res:?}");

    bob_ch.close().await.unwrap();
    assert_eq!(bob_ch.phase(), Phase::Closed);

    // Alice never closes herself, her watcher does it.
    alice.wait_done().await;
    bob.wait_done().await;
    assert_eq!(alice_ch.phase(), Phase::Closed);
    assert_eq!(world.ledger.payout(id, 0), Some(u(5)));
    assert_eq!(world.ledger.payout(id, 1), Some(u(15)));
    assert_eq!(world.ledger.registered_version(id), None);

    // Closing again is a no-op.
    bob_ch.close().await.unwrap();
    alice_ch.close().await.unwrap();
    let res = bob_ch.update(transfer(0, 1, u(1))).await;
    assert!(matches!(res, Err(Error::InvalidPhase { .. })), "{res:?}");
}

#[tokio::test(start_paused = true)]
async fn concurrent_updates_on_the_same_version() {
    let world = World::new();
    let alice = world.node(Role::Alice);
    let bob = world.node(Role::Bob);
    let (bob_ch, alice_ch) = open(&bob, &alice).await;

    let (by_bob, by_alice) = tokio::join!(
        bob_ch.update(transfer(0, 1, u(1))),
        alice_ch.update(transfer(1, 0, u(2))),
    );
    // The proposer of the channel wins the tie.
    by_bob.unwrap();
    assert!(
        matches!(&by_alice, Err(Error::UpdateRejected { version: 1, .. })),
        "{by_alice:?}"
    );
    eventually("alice commits bob's update", || alice_ch.state().version() == 1).await;

    alice_ch.update(transfer(1, 0, u(2))).await.unwrap();
    eventually("bob commits the retry", || bob_ch.state().version() == 2).await;
    assert_eq!(bob_ch.state(), alice_ch.state());
    assert_eq!(balances(&bob_ch), [u(11), u(9)]);
}

#[tokio::test(start_paused = true)]
async fn unilateral_registration_closes_the_peer() {
    let world = World::new();
    let alice = world.node(Role::Alice);
    let bob = world.node(Role::Bob);
    let (bob_ch, alice_ch) = open(&bob, &alice).await;
    let id = bob_ch.channel_id();

    bob_ch.update(transfer(0, 1, u(3))).await.unwrap();
    // Not final, so Bob has to go through a dispute.
    bob_ch.close().await.unwrap();
    assert_eq!(world.ledger.registered_version(id), Some(1));

    alice.wait_done().await;
    assert_eq!(alice_ch.phase(), Phase::Closed);
    assert_eq!(alice_ch.state(), bob_ch.state());
    assert_eq!(world.ledger.payout(id, 0), Some(u(7)));
    assert_eq!(world.ledger.payout(id, 1), Some(u(13)));
    bob.wait_done().await;
}

#[tokio::test(start_paused = true)]
async fn stale_registration_is_refuted() {
    let world = World::new();
    let alice = world.node(Role::Alice);
    let bob = world.node(Role::Bob);
    let (bob_ch, alice_ch) = open(&bob, &alice).await;
    let id = bob_ch.channel_id();

    let stale = bob_ch.snapshot().transaction().unwrap();
    bob_ch.update(transfer(1, 0, u(4))).await.unwrap();
    eventually("alice commits", || alice_ch.state().version() == 1).await;

    // Someone registers the outdated initial state.
    let req = AdjudicatorReq {
        params: bob_ch.params(),
        acc: bob.address(),
        tx: stale,
        idx: 0,
        secondary: false,
    };
    world.ledger.register(&req).await.unwrap();

    eventually("refutation", || world.ledger.registered_version(id) == Some(1)).await;
    eventually("alice in dispute", || alice_ch.phase() == Phase::Registered).await;

    bob_ch.close().await.unwrap();
    alice.wait_done().await;
    bob.wait_done().await;

    let outcome = world.ledger.outcome(id).unwrap();
    assert_eq!(outcome.state.version(), 1);
    assert_eq!(world.ledger.payout(id, 0), Some(u(14)));
    assert_eq!(world.ledger.payout(id, 1), Some(u(6)));
}

#[tokio::test(start_paused = true)]
async fn propose_without_listener_times_out() {
    let world = World::new();
    // Connected, but nobody handles Alice's inbox.
    let (alice, _inbox) = world.builder(Role::Alice);
    let alice = alice.build();
    let bob = world.node(Role::Bob);

    let start = tokio::time::Instant::now();
    let res = bob
        .propose_channel(alice.address(), [10.into(), 10.into()])
        .await;
    assert!(matches!(res, Err(Error::Timeout { op: "propose", channel: None })), "{res:?}");
    assert!(start.elapsed() >= world.cfg.timeouts.propose());
    assert!(bob.sessions().is_empty());
    assert!(alice.sessions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rejected_proposal() {
    let world = World::new();
    let (builder, inbox) = world.builder(Role::Alice);
    let alice = world.start(
        builder.proposal_policy(RejectAll("not today".to_string())),
        inbox,
    );
    let bob = world.node(Role::Bob);

    let res = bob
        .propose_channel(alice.address(), [10.into(), 10.into()])
        .await;
    match res {
        Err(Error::ProposalRejected { reason }) => assert_eq!(reason, "not today"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(bob.sessions().is_empty());
    assert!(alice.sessions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn invalid_proposal_is_rejected() {
    let world = World::new();
    let alice = world.node(Role::Alice);
    let bob = world.node(Role::Bob);

    // Proposing to ourselves lists Bob twice.
    let res = bob.propose_channel(bob.address(), [10.into(), 10.into()]).await;
    assert!(matches!(res, Err(Error::ProposalRejected { .. })), "{res:?}");
    assert!(alice.sessions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rejected_update_leaves_state_unchanged() {
    let world = World::new();
    let (builder, inbox) = world.builder(Role::Alice);
    let alice = world.start(builder.update_policy(RejectAll("no".to_string())), inbox);
    let bob = world.node(Role::Bob);
    let (bob_ch, alice_ch) = open(&bob, &alice).await;

    let res = bob_ch.update(transfer(0, 1, u(1))).await;
    assert!(
        matches!(&res, Err(Error::UpdateRejected { version: 1, reason }) if reason == "no"),
        "{res:?}"
    );
    assert_eq!(bob_ch.state().version(), 0);
    assert_eq!(alice_ch.state().version(), 0);
    assert_eq!(balances(&bob_ch), [u(10), u(10)]);
}

/// Takes `delay` to accept the first update, accepts later ones at once.
struct SlowOnce {
    delay: Duration,
    slowed: AtomicBool,
}

impl SlowOnce {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            slowed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl UpdatePolicy for SlowOnce {
    async fn decide(&self, _: &State, _: &State) -> Decision {
        if !self.slowed.swap(true, Ordering::SeqCst) {
            tokio::time::sleep(self.delay).await;
        }
        Decision::Accept
    }
}

#[tokio::test(start_paused = true)]
async fn late_acceptance_keeps_both_sides_in_sync() {
    let mut cfg = Config::default();
    cfg.timeouts.update_ms = 1_000;
    let world = World::with_config(cfg);
    let (builder, inbox) = world.builder(Role::Alice);
    let alice = world.start(builder.update_policy(SlowOnce::new(Duration::from_secs(5))), inbox);
    let bob = world.node(Role::Bob);
    let (bob_ch, alice_ch) = open(&bob, &alice).await;

    let res = bob_ch.update(transfer(0, 1, u(1))).await;
    assert!(matches!(res, Err(Error::Timeout { op: "update", .. })), "{res:?}");
    assert_eq!(bob_ch.state().version(), 0);

    // Alice accepts after all, Bob commits the same state.
    eventually("alice commits", || alice_ch.state().version() == 1).await;
    eventually("bob commits late", || bob_ch.state().version() == 1).await;
    assert_eq!(bob_ch.state(), alice_ch.state());
    assert_eq!(bob_ch.snapshot().signatures, alice_ch.snapshot().signatures);

    // Retrying after the timeout works.
    bob_ch.update(transfer(0, 1, u(1))).await.unwrap();
    eventually("alice commits the retry", || alice_ch.state().version() == 2).await;
    assert_eq!(balances(&alice_ch), [u(8), u(12)]);
}

#[tokio::test(start_paused = true)]
async fn retry_racing_a_late_acceptance_is_rejected() {
    let mut cfg = Config::default();
    cfg.timeouts.update_ms = 1_000;
    let world = World::with_config(cfg);
    let (builder, inbox) = world.builder(Role::Alice);
    let alice = world.start(builder.update_policy(SlowOnce::new(Duration::from_secs(5))), inbox);
    let bob = world.node(Role::Bob);
    let (bob_ch, alice_ch) = open(&bob, &alice).await;

    let res = bob_ch.update(transfer(0, 1, u(1))).await;
    assert!(matches!(res, Err(Error::Timeout { .. })), "{res:?}");

    // Sent while Alice still decides on the first update.
    let res = bob_ch
        .update_by(Duration::from_secs(10), transfer(0, 1, u(4)))
        .await;
    assert!(matches!(res, Err(Error::UpdateRejected { version: 1, .. })), "{res:?}");
    assert_eq!(bob_ch.state().version(), 1);
    assert_eq!(balances(&bob_ch), [u(9), u(11)]);
    eventually("alice agrees", || alice_ch.state() == bob_ch.state()).await;

    bob_ch.update(transfer(0, 1, u(4))).await.unwrap();
    eventually("alice commits the retry", || alice_ch.state().version() == 2).await;
    assert_eq!(balances(&alice_ch), [u(5), u(15)]);
}

#[tokio::test(start_paused = true)]
async fn panicking_mutator_fails_only_its_update() {
    let world = World::new();
    let alice = world.node(Role::Alice);
    let bob = world.node(Role::Bob);
    let (bob_ch, alice_ch) = open(&bob, &alice).await;

    let res = bob_ch
        .update(|_: State| -> perun_node::Result<State> { panic!("broken mutator") })
        .await;
    assert!(matches!(res, Err(Error::MutatorPanicked)), "{res:?}");
    assert_eq!(bob_ch.phase(), Phase::Open);

    bob_ch.update(transfer(0, 1, u(2))).await.unwrap();
    eventually("alice commits", || alice_ch.state().version() == 1).await;
}

struct SlowProposals(Duration);

#[async_trait]
impl ProposalPolicy for SlowProposals {
    async fn decide(&self, _: &LedgerChannelProposal) -> Decision {
        tokio::time::sleep(self.0).await;
        Decision::Accept
    }
}

#[tokio::test(start_paused = true)]
async fn slow_proposal_decision_is_dropped() {
    let mut cfg = Config::default();
    cfg.timeouts.accept_proposal_ms = 1_000;
    let world = World::with_config(cfg);
    let (builder, inbox) = world.builder(Role::Alice);
    let alice = world.start(
        builder.proposal_policy(SlowProposals(Duration::from_secs(5))),
        inbox,
    );
    let bob = world.node(Role::Bob);

    let res = bob
        .propose_channel_by(Duration::from_secs(3), alice.address(), [u(10), u(10)])
        .await;
    assert!(matches!(res, Err(Error::Timeout { op: "propose", .. })), "{res:?}");

    // The policy would have accepted by now, the answer was never sent.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(bob.sessions().is_empty());
    assert!(alice.sessions().is_empty());
}

/// Takes `delay` to reject every update.
struct SlowReject(Duration);

#[async_trait]
impl UpdatePolicy for SlowReject {
    async fn decide(&self, _: &State, _: &State) -> Decision {
        tokio::time::sleep(self.0).await;
        Decision::Reject("too late".to_string())
    }
}

#[tokio::test(start_paused = true)]
async fn dispute_fails_the_pending_update() {
    let world = World::new();
    let (builder, inbox) = world.builder(Role::Alice);
    let alice = world.start(builder.update_policy(SlowReject(Duration::from_secs(5))), inbox);
    let bob = world.node(Role::Bob);
    let (bob_ch, alice_ch) = open(&bob, &alice).await;
    let id = bob_ch.channel_id();
    let initial = bob_ch.snapshot().transaction().unwrap();

    let pending = tokio::spawn({
        let bob_ch = bob_ch.clone();
        async move { bob_ch.update(transfer(0, 1, u(3))).await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!pending.is_finished());

    let req = AdjudicatorReq {
        params: bob_ch.params(),
        acc: alice.address(),
        tx: initial,
        idx: 1,
        secondary: false,
    };
    world.ledger.register(&req).await.unwrap();

    let res = pending.await.unwrap();
    assert!(matches!(res, Err(Error::InvalidPhase { .. })), "{res:?}");
    assert_eq!(bob_ch.phase(), Phase::Registered);
    assert_eq!(bob_ch.state().version(), 0);

    bob_ch.close().await.unwrap();
    alice.wait_done().await;
    bob.wait_done().await;
    assert_eq!(alice_ch.phase(), Phase::Closed);
    assert_eq!(world.ledger.payout(id, 0), Some(u(10)));
    assert_eq!(world.ledger.payout(id, 1), Some(u(10)));
}

#[tokio::test(start_paused = true)]
async fn watcher_retries_a_failed_settlement() {
    let world = World::new();
    let alice = world.node(Role::Alice);
    let bob = world.node(Role::Bob);
    let (bob_ch, alice_ch) = open(&bob, &alice).await;
    let id = bob_ch.channel_id();

    bob_ch
        .update(|mut s: State| {
            s.outcome.transfer(0, 0, 1, 5.into())?;
            s.is_final = true;
            Ok(s)
        })
        .await
        .unwrap();

    world.ledger.fail_next_settle_of(alice.address());
    bob_ch.close().await.unwrap();

    alice.wait_done().await;
    bob.wait_done().await;
    assert_eq!(alice_ch.phase(), Phase::Closed);
    assert_eq!(world.ledger.payout(id, 0), Some(u(5)));
    assert_eq!(world.ledger.payout(id, 1), Some(u(15)));
}

#[tokio::test(start_paused = true)]
async fn funding_failure_aborts_both_sessions() {
    let world = World::new();
    world.ledger.fail_funding();
    let alice = world.node(Role::Alice);
    let bob = world.node(Role::Bob);

    let res = bob
        .propose_channel(alice.address(), [10.into(), 10.into()])
        .await;
    assert!(matches!(res, Err(Error::FundingFailed { .. })), "{res:?}");
    assert!(bob.sessions().is_empty());
    eventually("alice drops the session", || alice.sessions().is_empty()).await;
}

#[tokio::test(start_paused = true)]
async fn failed_registration_can_be_retried() {
    let world = World::new();
    let alice = world.node(Role::Alice);
    let bob = world.node(Role::Bob);
    let (bob_ch, _alice_ch) = open(&bob, &alice).await;
    let id = bob_ch.channel_id();
    bob_ch.update(transfer(0, 1, u(2))).await.unwrap();

    world.ledger.fail_next_register();
    let res = bob_ch.close().await;
    assert!(matches!(res, Err(Error::RegistrationFailed { .. })), "{res:?}");
    assert_eq!(bob_ch.phase(), Phase::Open);
    assert_eq!(world.ledger.registered_version(id), None);

    bob_ch.close().await.unwrap();
    alice.wait_done().await;
    bob.wait_done().await;
    assert_eq!(world.ledger.payout(id, 0), Some(u(8)));
    assert_eq!(world.ledger.payout(id, 1), Some(u(12)));
}

#[tokio::test(start_paused = true)]
async fn failed_settlement_can_be_retried() {
    let world = World::new();
    let alice = world.node(Role::Alice);
    let bob = world.node(Role::Bob);
    let (bob_ch, _alice_ch) = open(&bob, &alice).await;
    let id = bob_ch.channel_id();
    bob_ch
        .update(|mut s: State| {
            s.is_final = true;
            Ok(s)
        })
        .await
        .unwrap();

    world.ledger.fail_next_settle();
    let res = bob_ch.close().await;
    assert!(matches!(res, Err(Error::SettlementFailed { .. })), "{res:?}");
    assert_eq!(bob_ch.phase(), Phase::Open);
    assert_eq!(world.ledger.payout(id, 0), None);

    bob_ch.close().await.unwrap();
    alice.wait_done().await;
    bob.wait_done().await;
    assert_eq!(world.ledger.payout(id, 0), Some(u(10)));
    assert_eq!(world.ledger.payout(id, 1), Some(u(10)));
}

#[tokio::test(start_paused = true)]
async fn broken_subscription_still_releases_wait_done() {
    let world = World::new();
    world.ledger.break_subscriptions();
    let alice = world.node(Role::Alice);
    let bob = world.node(Role::Bob);
    let (bob_ch, alice_ch) = open(&bob, &alice).await;

    alice.wait_done().await;
    bob.wait_done().await;
    assert!(bob_ch.done().is_done());
    assert!(alice_ch.done().is_done());
    // Released, not closed.
    assert_eq!(bob_ch.phase(), Phase::Open);
}
