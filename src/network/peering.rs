//! Bounded-degree overlay
//!
//! A node keeps at most `peer_limit` neighbours. New neighbours arrive
//! through `p2p:announce`; silent ones are dropped by the liveness loop.

use crate::config::PeeringSettings;
use crate::error::Result;
use crate::network::{Message, Messaging};
use crate::utils::{random_hex, spawn_periodic, ShutdownToken};
use log::{debug, info, warn};
use rand::seq::IteratorRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Instant;

pub const ANNOUNCE: &str = "p2p:announce";
pub const ASK_FOR_PEERS: &str = "p2p:ask_for_peers";
pub const PEERS: &str = "p2p:peers";
pub const PING: &str = "p2p:ping";
pub const PONG: &str = "p2p:pong";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub id: String,
    pub address: SocketAddr,
}

impl NodeIdentity {
    /// Fresh process identity: `p2p:` followed by 16 random hex digits
    pub fn generate(address: SocketAddr) -> Result<NodeIdentity> {
        Ok(NodeIdentity {
            id: format!("p2p:{}", random_hex(8)?),
            address,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Peer {
    pub identity: NodeIdentity,
    pub last_seen: Instant,
}

pub struct PeerNetwork {
    identity: NodeIdentity,
    messaging: Arc<Messaging>,
    settings: PeeringSettings,
    peers: RwLock<HashMap<String, Peer>>,
}

impl PeerNetwork {
    pub fn new(
        messaging: Arc<Messaging>,
        identity: NodeIdentity,
        settings: PeeringSettings,
    ) -> Arc<PeerNetwork> {
        let network = Arc::new(PeerNetwork {
            identity,
            messaging,
            settings,
            peers: RwLock::new(HashMap::new()),
        });

        network.on(ANNOUNCE, PeerNetwork::handle_announce);
        network.on(ASK_FOR_PEERS, PeerNetwork::handle_ask_for_peers);
        network.on(PEERS, PeerNetwork::handle_peers);
        network.on(PING, PeerNetwork::handle_ping);
        network.on(PONG, PeerNetwork::handle_pong);

        let weak = Arc::downgrade(&network);
        network.messaging.observe(move |sender| {
            if let Some(network) = weak.upgrade() {
                network.touch_address(sender);
            }
        });
        network
    }

    fn on(self: &Arc<Self>, kind: &str, handler: fn(&PeerNetwork, Value, SocketAddr)) {
        let weak = Arc::downgrade(self);
        self.messaging.register(kind, move |data, sender| {
            if let Some(network) = weak.upgrade() {
                handler(&network, data, sender);
            }
        });
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn messaging(&self) -> &Arc<Messaging> {
        &self.messaging
    }

    /// Introduce ourselves to `addr` and ask who it knows
    pub fn announce_to(&self, addr: SocketAddr) {
        debug!("Announcing to {addr}");
        self.send_to(addr, &Message::new(ANNOUNCE, Value::from(self.identity.id.clone())));
        self.send_to(addr, &Message::new(ASK_FOR_PEERS, Value::Null));
    }

    /// Returns true when `identity` was not a peer before
    pub fn add_peer(&self, identity: NodeIdentity) -> bool {
        if identity.id == self.identity.id {
            return false;
        }

        let now = Instant::now();
        let evicted = match self.peers.write() {
            Ok(mut peers) => {
                if let Some(peer) = peers.get_mut(&identity.id) {
                    peer.last_seen = now;
                    peer.identity.address = identity.address;
                    return false;
                }
                peers.insert(
                    identity.id.clone(),
                    Peer {
                        identity: identity.clone(),
                        last_seen: now,
                    },
                );
                if peers.len() > self.settings.peer_limit {
                    let victim = peers
                        .keys()
                        .filter(|id| **id != identity.id)
                        .choose(&mut rand::thread_rng())
                        .cloned();
                    victim.and_then(|id| peers.remove(&id))
                } else {
                    None
                }
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on peer set");
                return false;
            }
        };

        info!("New peer {} at {}", identity.id, identity.address);
        if let Some(peer) = evicted {
            info!(
                "Peer limit reached, evicted {} at {}",
                peer.identity.id, peer.identity.address
            );
        }
        self.announce_to(identity.address);
        true
    }

    pub fn remove_peer(&self, id: &str) -> Option<Peer> {
        match self.peers.write() {
            Ok(mut peers) => peers.remove(id),
            Err(_) => {
                log::error!("Failed to acquire write lock on peer set");
                None
            }
        }
    }

    /// Snapshot of the current peers
    pub fn peers(&self) -> Vec<Peer> {
        match self.peers.read() {
            Ok(peers) => peers.values().cloned().collect(),
            Err(_) => {
                log::error!("Failed to acquire read lock on peer set");
                vec![]
            }
        }
    }

    pub fn peer_count(&self) -> usize {
        match self.peers.read() {
            Ok(peers) => peers.len(),
            Err(_) => 0,
        }
    }

    pub fn is_peer(&self, id: &str) -> bool {
        match self.peers.read() {
            Ok(peers) => peers.contains_key(id),
            Err(_) => false,
        }
    }

    fn touch_address(&self, addr: SocketAddr) {
        if let Ok(mut peers) = self.peers.write() {
            let now = Instant::now();
            for peer in peers.values_mut().filter(|p| p.identity.address == addr) {
                peer.last_seen = now;
            }
        }
    }

    fn touch_id(&self, id: &str) {
        if let Ok(mut peers) = self.peers.write() {
            if let Some(peer) = peers.get_mut(id) {
                peer.last_seen = Instant::now();
            }
        }
    }

    fn send_to(&self, addr: SocketAddr, message: &Message) {
        if let Err(e) = self.messaging.send(addr, message) {
            warn!("Failed to send {} to {addr}: {e}", message.kind);
        }
    }

    pub fn send(&self, peer: &Peer, message: &Message) {
        self.send_to(peer.identity.address, message);
    }

    pub fn broadcast(&self, message: &Message) {
        let targets = self.peers();
        debug!("Broadcasting {} to {} peers", message.kind, targets.len());
        for peer in &targets {
            self.send(peer, message);
        }
    }

    pub fn broadcast_except(&self, message: &Message, except: SocketAddr) {
        for peer in self
            .peers()
            .iter()
            .filter(|p| p.identity.address != except)
        {
            self.send(peer, message);
        }
    }

    pub fn ping_all(&self) {
        let ping = Message::new(PING, Value::from(self.identity.id.clone()));
        self.broadcast(&ping);
    }

    /// Drop every peer unseen for longer than the activity timeout, as of `now`
    pub fn remove_inactive_at(&self, now: Instant) -> Vec<NodeIdentity> {
        let timeout = self.settings.activity_timeout;
        let removed: Vec<Peer> = match self.peers.write() {
            Ok(mut peers) => {
                let stale: Vec<String> = peers
                    .iter()
                    .filter(|(_, p)| now.saturating_duration_since(p.last_seen) > timeout)
                    .map(|(id, _)| id.clone())
                    .collect();
                stale.iter().filter_map(|id| peers.remove(id)).collect()
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on peer set");
                vec![]
            }
        };
        for peer in &removed {
            info!("Peer {} timed out", peer.identity.id);
        }
        removed.into_iter().map(|p| p.identity).collect()
    }

    /// One liveness round: ping everyone, then drop the silent ones
    pub fn maintain(&self) {
        self.ping_all();
        self.remove_inactive_at(Instant::now());
    }

    pub fn start(self: &Arc<Self>, token: ShutdownToken) -> Result<JoinHandle<()>> {
        let weak = Arc::downgrade(self);
        spawn_periodic("p2p-liveness", self.settings.ping_interval, token, move || {
            if let Some(network) = weak.upgrade() {
                network.maintain();
            }
        })
    }

    fn handle_announce(&self, data: Value, sender: SocketAddr) {
        match data.as_str() {
            Some(id) => {
                self.add_peer(NodeIdentity {
                    id: id.to_string(),
                    address: sender,
                });
            }
            None => debug!("Malformed announce from {sender}"),
        }
    }

    fn handle_ask_for_peers(&self, _: Value, sender: SocketAddr) {
        let known: Vec<NodeIdentity> = self
            .peers()
            .into_iter()
            .map(|p| p.identity)
            .filter(|identity| identity.address != sender)
            .collect();
        match serde_json::to_value(&known) {
            Ok(list) => self.send_to(sender, &Message::new(PEERS, list)),
            Err(e) => warn!("Failed to encode peer list: {e}"),
        }
    }

    fn handle_peers(&self, data: Value, sender: SocketAddr) {
        let listed: Vec<NodeIdentity> = match serde_json::from_value(data) {
            Ok(listed) => listed,
            Err(e) => {
                debug!("Malformed peer list from {sender}: {e}");
                return;
            }
        };
        for identity in listed {
            if identity.id == self.identity.id || self.is_peer(&identity.id) {
                continue;
            }
            self.announce_to(identity.address);
        }
    }

    fn handle_ping(&self, _: Value, sender: SocketAddr) {
        self.send_to(sender, &Message::new(PONG, Value::from(self.identity.id.clone())));
    }

    fn handle_pong(&self, data: Value, _: SocketAddr) {
        if let Some(id) = data.as_str() {
            self.touch_id(id);
        }
    }
}
