#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use perun_node::{
    config::{Config, Role},
    ledger::simulated::SimulatedLedger,
    session::SessionHandle,
    sig,
    types::U256,
    wire::{
        local::{Inbox, LocalNetwork},
        ProtoBufEncodingLayer,
    },
    ClientBuilder, PerunClient,
};

/// Alice and Bob sharing one network and one ledger.
pub struct World {
    pub cfg: Arc<Config>,
    pub net: LocalNetwork,
    pub ledger: SimulatedLedger,
}

impl World {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(cfg: Config) -> Self {
        Self {
            cfg: Arc::new(cfg),
            net: LocalNetwork::new(),
            ledger: SimulatedLedger::new(),
        }
    }

    /// A client for `role` that is connected but not yet handling messages.
    pub fn builder(&self, role: Role) -> (ClientBuilder, Inbox) {
        let signer = sig::derive_account(&self.cfg.seed, role).unwrap();
        let (bus, inbox) = self.net.connect(signer.address());
        let builder = PerunClient::builder(
            self.cfg.clone(),
            role,
            signer,
            ProtoBufEncodingLayer::new(bus),
            Arc::new(self.ledger.clone()),
            Arc::new(self.ledger.clone()),
        );
        (builder, inbox)
    }

    pub fn start(&self, builder: ClientBuilder, inbox: Inbox) -> PerunClient {
        let client = builder.build();
        tokio::spawn({
            let client = client.clone();
            async move { client.handle(inbox).await }
        });
        client
    }

    pub fn node(&self, role: Role) -> PerunClient {
        let (builder, inbox) = self.builder(role);
        self.start(builder, inbox)
    }
}

/// Bob proposes [10, 10] to Alice and both wait until the channel is open.
///
/// Returns (Bob's session, Alice's session).
pub async fn open(bob: &PerunClient, alice: &PerunClient) -> (SessionHandle, SessionHandle) {
    let bob_ch = bob
        .propose_channel(alice.address(), [10.into(), 10.into()])
        .await
        .unwrap();
    let alice_ch = alice.next_channel().await.unwrap();
    assert_eq!(bob_ch.channel_id(), alice_ch.channel_id());
    (bob_ch, alice_ch)
}

pub fn balances(ch: &SessionHandle) -> [U256; 2] {
    let state = ch.state();
    [state.outcome.balance(0, 0), state.outcome.balance(0, 1)]
}

/// Poll `cond` on virtual time until it holds.
pub async fn eventually(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
