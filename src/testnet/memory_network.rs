//! Queued in-memory transport
//!
//! Sends only enqueue; nothing is delivered until the test calls `pump`,
//! so every exchange is deterministic and single threaded.

use crate::error::Result;
use crate::network::{Message, Messaging, Transport};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};

/// Rounds after which `pump` assumes a message storm and stops
const MAX_DELIVERIES: usize = 100_000;

struct Datagram {
    from: SocketAddr,
    to: SocketAddr,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct NetState {
    next_port: u16,
    queue: VecDeque<Datagram>,
    endpoints: HashMap<SocketAddr, Weak<Messaging>>,
    delivered: Vec<(SocketAddr, SocketAddr, Message)>,
}

#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetState>>,
}

pub struct MemoryEndpoint {
    addr: SocketAddr,
    network: MemoryNetwork,
}

impl Transport for MemoryEndpoint {
    fn send_to(&self, addr: SocketAddr, bytes: &[u8]) -> Result<()> {
        let mut state = self.network.state.lock().unwrap();
        state.queue.push_back(Datagram {
            from: self.addr,
            to: addr,
            bytes: bytes.to_vec(),
        });
        Ok(())
    }

    fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl MemoryNetwork {
    pub fn new() -> MemoryNetwork {
        MemoryNetwork::default()
    }

    /// A fresh endpoint with its own loopback address; not yet reachable
    pub fn endpoint(&self) -> Arc<MemoryEndpoint> {
        let mut state = self.state.lock().unwrap();
        state.next_port += 1;
        let addr = SocketAddr::from(([127, 0, 0, 1], 40_000 + state.next_port));
        Arc::new(MemoryEndpoint {
            addr,
            network: self.clone(),
        })
    }

    /// Messaging over a fresh endpoint, registered for delivery
    pub fn connect(&self) -> Arc<Messaging> {
        let messaging = Messaging::new(self.endpoint());
        self.attach(&messaging);
        messaging
    }

    pub fn attach(&self, messaging: &Arc<Messaging>) {
        let mut state = self.state.lock().unwrap();
        state
            .endpoints
            .insert(messaging.local_addr(), Arc::downgrade(messaging));
    }

    /// Deliver queued datagrams until the queue is empty; returns how many were delivered
    pub fn pump(&self) -> usize {
        let mut delivered = 0;
        while delivered < MAX_DELIVERIES {
            let (datagram, target) = {
                let mut state = self.state.lock().unwrap();
                let Some(datagram) = state.queue.pop_front() else {
                    break;
                };
                let target = state.endpoints.get(&datagram.to).and_then(Weak::upgrade);
                if target.is_some() {
                    if let Ok(message) = Message::from_bytes(&datagram.bytes) {
                        state.delivered.push((datagram.from, datagram.to, message));
                    }
                }
                (datagram, target)
            };
            if let Some(messaging) = target {
                messaging.dispatch(&datagram.bytes, datagram.from);
                delivered += 1;
            }
        }
        delivered
    }

    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    /// Drop everything still queued
    pub fn clear(&self) {
        self.state.lock().unwrap().queue.clear();
    }

    pub fn clear_log(&self) {
        self.state.lock().unwrap().delivered.clear();
    }

    /// (from, to, data) of every delivered datagram of `kind`
    pub fn delivered(&self, kind: &str) -> Vec<(SocketAddr, SocketAddr, Value)> {
        self.state
            .lock()
            .unwrap()
            .delivered
            .iter()
            .filter(|(_, _, m)| m.kind == kind)
            .map(|(from, to, m)| (*from, *to, m.data.clone()))
            .collect()
    }
}
