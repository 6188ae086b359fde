//! Flood dissemination with deduplication
//!
//! A gossip message is identified by the hash of its kind and payload, so
//! the same content published twice is only flooded once per timeout window.

use crate::config::GossipSettings;
use crate::error::{BlockchainError, Result};
use crate::network::{Message, PeerNetwork};
use crate::utils::{sha256_digest, spawn_periodic, ShutdownToken};
use data_encoding::HEXLOWER;
use log::{debug, error};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub const GOSSIP_SEND: &str = "gossip:send";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GossipMessage {
    pub id: String,
    pub kind: String,
    pub payload: Value,
}

impl GossipMessage {
    pub fn new<K: Into<String>>(kind: K, payload: Value) -> Result<GossipMessage> {
        let kind = kind.into();
        let id = Self::compute_id(&kind, &payload)?;
        Ok(GossipMessage { id, kind, payload })
    }

    /// hex(sha256(kind || 0x00 || compact JSON of payload)); object keys serialise sorted
    pub fn compute_id(kind: &str, payload: &Value) -> Result<String> {
        let mut bytes = kind.as_bytes().to_vec();
        bytes.push(0x00);
        bytes.extend(serde_json::to_vec(payload)?);
        Ok(HEXLOWER.encode(&sha256_digest(&bytes)))
    }

    pub fn is_authentic(&self) -> bool {
        matches!(Self::compute_id(&self.kind, &self.payload), Ok(id) if id == self.id)
    }

    fn to_message(&self) -> Result<Message> {
        Ok(Message::new(GOSSIP_SEND, serde_json::to_value(self)?))
    }
}

/// Message ids with the instant they were first seen
pub struct SeenSet {
    entries: HashMap<String, Instant>,
    timeout: Duration,
}

impl SeenSet {
    pub fn new(timeout: Duration) -> SeenSet {
        SeenSet {
            entries: HashMap::new(),
            timeout,
        }
    }

    fn is_fresh(&self, seen_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(seen_at) <= self.timeout
    }

    pub fn contains_at(&self, id: &str, now: Instant) -> bool {
        matches!(self.entries.get(id), Some(seen_at) if self.is_fresh(*seen_at, now))
    }

    /// Records `id` and returns true unless it was already present and fresh
    pub fn insert_at(&mut self, id: &str, now: Instant) -> bool {
        if self.contains_at(id, now) {
            return false;
        }
        self.entries.insert(id.to_string(), now);
        true
    }

    /// Forget entries past the timeout; returns how many went
    pub fn purge_at(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let before = self.entries.len();
        self.entries
            .retain(|_, seen_at| now.saturating_duration_since(*seen_at) <= timeout);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type GossipHandler = Arc<dyn Fn(&GossipMessage) + Send + Sync>;

pub struct Gossip {
    peering: Arc<PeerNetwork>,
    settings: GossipSettings,
    seen: Mutex<SeenSet>,
    subscribers: RwLock<HashMap<String, Vec<GossipHandler>>>,
}

impl Gossip {
    pub fn new(peering: Arc<PeerNetwork>, settings: GossipSettings) -> Arc<Gossip> {
        let gossip = Arc::new(Gossip {
            peering,
            settings,
            seen: Mutex::new(SeenSet::new(settings.message_timeout)),
            subscribers: RwLock::new(HashMap::new()),
        });

        let weak = Arc::downgrade(&gossip);
        gossip
            .peering
            .messaging()
            .register(GOSSIP_SEND, move |data, sender| {
                if let Some(gossip) = weak.upgrade() {
                    gossip.handle_send(data, sender);
                }
            });
        gossip
    }

    pub fn peering(&self) -> &Arc<PeerNetwork> {
        &self.peering
    }

    pub fn settings(&self) -> &GossipSettings {
        &self.settings
    }

    /// Add a local handler for `kind`; every subscriber of a kind sees each message once
    pub fn subscribe<F>(&self, kind: &str, handler: F)
    where
        F: Fn(&GossipMessage) + Send + Sync + 'static,
    {
        match self.subscribers.write() {
            Ok(mut subscribers) => subscribers
                .entry(kind.to_string())
                .or_default()
                .push(Arc::new(handler)),
            Err(_) => error!("Failed to acquire write lock on gossip subscribers"),
        }
    }

    fn mark_seen(&self, id: &str) -> bool {
        match self.seen.lock() {
            Ok(mut seen) => seen.insert_at(id, Instant::now()),
            Err(_) => {
                error!("Failed to acquire lock on seen messages");
                false
            }
        }
    }

    pub fn has_seen(&self, id: &str) -> bool {
        match self.seen.lock() {
            Ok(seen) => seen.contains_at(id, Instant::now()),
            Err(_) => false,
        }
    }

    /// Flood `message` to every peer. Returns false if it was already seen.
    pub fn broadcast(&self, message: &GossipMessage) -> Result<bool> {
        if !message.is_authentic() {
            return Err(BlockchainError::Network(format!(
                "Gossip id {} does not match its content",
                message.id
            )));
        }
        if !self.mark_seen(&message.id) {
            return Ok(false);
        }
        debug!("Gossiping {} #{}", message.kind, &message.id[..8]);
        self.peering.broadcast(&message.to_message()?);
        Ok(true)
    }

    pub fn publish(&self, kind: &str, payload: Value) -> Result<bool> {
        self.broadcast(&GossipMessage::new(kind, payload)?)
    }

    fn handle_send(&self, data: Value, sender: SocketAddr) {
        let message: GossipMessage = match serde_json::from_value(data) {
            Ok(message) => message,
            Err(e) => {
                debug!("Malformed gossip from {sender}: {e}");
                return;
            }
        };
        if !message.is_authentic() {
            debug!("Gossip from {sender} carries a wrong id, dropping");
            return;
        }
        if !self.mark_seen(&message.id) {
            return;
        }

        let handlers = match self.subscribers.read() {
            Ok(subscribers) => subscribers.get(&message.kind).cloned().unwrap_or_default(),
            Err(_) => {
                error!("Failed to acquire read lock on gossip subscribers");
                vec![]
            }
        };
        if handlers.is_empty() {
            debug!("No subscriber for gossip kind {}", message.kind);
        }
        for handler in handlers {
            handler(&message);
        }

        match message.to_message() {
            Ok(forward) => self.peering.broadcast_except(&forward, sender),
            Err(e) => debug!("Cannot forward gossip #{}: {e}", message.id),
        }
    }

    pub fn purge_expired_at(&self, now: Instant) -> usize {
        match self.seen.lock() {
            Ok(mut seen) => seen.purge_at(now),
            Err(_) => 0,
        }
    }

    pub fn start(self: &Arc<Self>, token: ShutdownToken) -> Result<JoinHandle<()>> {
        let weak = Arc::downgrade(self);
        spawn_periodic("gossip-expiry", self.settings.sweep_interval, token, move || {
            if let Some(gossip) = weak.upgrade() {
                let purged = gossip.purge_expired_at(Instant::now());
                if purged > 0 {
                    debug!("Expired {purged} gossip ids");
                }
            }
        })
    }
}
