//! In-memory network connecting nodes of the same process.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::mpsc;

use super::{BusError, BytesBus};
use crate::types::Address;

/// Frames addressed to one node, in arrival order.
pub type Inbox = mpsc::UnboundedReceiver<Vec<u8>>;

/// Routes frames by recipient address.
#[derive(Debug, Clone, Default)]
pub struct LocalNetwork {
    routes: Arc<Mutex<HashMap<Address, mpsc::UnboundedSender<Vec<u8>>>>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `addr`, replacing an earlier registration.
    pub fn connect(&self, addr: Address) -> (LocalBus, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(addr, tx);
        (
            LocalBus {
                network: self.clone(),
            },
            rx,
        )
    }
}

#[derive(Debug, Clone)]
pub struct LocalBus {
    network: LocalNetwork,
}

impl BytesBus for LocalBus {
    fn send_to_participant(
        &self,
        _sender: &Address,
        recipient: &Address,
        msg: &[u8],
    ) -> Result<(), BusError> {
        let routes = self
            .network
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let route = routes
            .get(recipient)
            .ok_or(BusError::UnknownPeer(*recipient))?;
        route
            .send(msg.to_vec())
            .map_err(|_| BusError::Disconnected(*recipient))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_by_recipient_in_order() {
        let net = LocalNetwork::new();
        let (a, b) = (Address([1; 20]), Address([2; 20]));
        let (bus_a, _inbox_a) = net.connect(a);
        let (_bus_b, mut inbox_b) = net.connect(b);

        bus_a.send_to_participant(&a, &b, &[1]).unwrap();
        bus_a.send_to_participant(&a, &b, &[2]).unwrap();
        assert_eq!(inbox_b.try_recv().unwrap(), vec![1]);
        assert_eq!(inbox_b.try_recv().unwrap(), vec![2]);
    }

    #[test]
    fn unknown_and_dropped_peers() {
        let net = LocalNetwork::new();
        let (a, b) = (Address([1; 20]), Address([2; 20]));
        let (bus_a, _inbox_a) = net.connect(a);
        assert!(matches!(
            bus_a.send_to_participant(&a, &b, &[1]),
            Err(BusError::UnknownPeer(_))
        ));

        let (_, inbox_b) = net.connect(b);
        drop(inbox_b);
        assert!(matches!(
            bus_a.send_to_participant(&a, &b, &[1]),
            Err(BusError::Disconnected(_))
        ));
    }
}
