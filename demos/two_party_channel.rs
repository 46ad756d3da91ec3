//! Walkthrough: Alice and Bob open a channel, Bob pays Alice and closes.
//!
//! Both nodes run in this process, connected by an in-memory network and a
//! simulated ledger. Run with `RUST_LOG=debug` to see the message traffic.

use std::{error::Error, path::Path, sync::Arc};

use perun_node::{
    channel::State,
    config::{Config, Role},
    ledger::{setup_contracts, simulated::SimulatedLedger},
    sig,
    types::{eth_to_wei, format_eth},
    wire::{local::LocalNetwork, ProtoBufEncodingLayer},
    PerunClient,
};
use tracing_subscriber::EnvFilter;

fn node(
    cfg: &Arc<Config>,
    role: Role,
    net: &LocalNetwork,
    ledger: &SimulatedLedger,
) -> Result<PerunClient, Box<dyn Error>> {
    let signer = sig::derive_account(&cfg.seed, role)?;
    let (bus, inbox) = net.connect(signer.address());
    let client = PerunClient::builder(
        cfg.clone(),
        role,
        signer,
        ProtoBufEncodingLayer::new(bus),
        Arc::new(ledger.clone()),
        Arc::new(ledger.clone()),
    )
    .build();
    tokio::spawn({
        let client = client.clone();
        async move { client.handle(inbox).await }
    });
    Ok(client)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut cfg = match std::env::args().nth(1) {
        Some(path) => Config::load(Path::new(&path))?,
        None => Config::default(),
    };
    let net = LocalNetwork::new();
    let ledger = SimulatedLedger::new();

    // Alice deploys, Bob checks what Alice deployed.
    let contracts = setup_contracts(Role::Alice, &ledger, &cfg).await?;
    cfg.contracts = Some(contracts);
    setup_contracts(Role::Bob, &ledger, &cfg).await?;
    let cfg = Arc::new(cfg);

    let alice = node(&cfg, Role::Alice, &net, &ledger)?;
    let bob = node(&cfg, Role::Bob, &net, &ledger)?;

    let ch = bob
        .propose_channel(alice.address(), [eth_to_wei(10), eth_to_wei(10)])
        .await?;
    println!("channel {} open", ch.channel_id());

    ch.update(|mut s: State| {
        s.outcome.transfer(0, 0, 1, eth_to_wei(5))?;
        s.is_final = true;
        Ok(s)
    })
    .await?;
    println!(
        "Bob: {}, Alice: {}",
        format_eth(ch.state().outcome.balance(0, 0)),
        format_eth(ch.state().outcome.balance(0, 1)),
    );

    ch.close().await?;
    // Alice's watcher closes her side once the channel concluded.
    tokio::join!(alice.wait_done(), bob.wait_done());

    let id = ch.channel_id();
    let payout = |idx| ledger.payout(id, idx).map(format_eth);
    println!(
        "payouts: Bob {:?}, Alice {:?}",
        payout(0),
        payout(1)
    );
    Ok(())
}
