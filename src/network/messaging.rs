//! Typed datagrams and per-kind dispatch
//!
//! Every datagram is the JSON array `[kind, data]`.

use crate::error::{BlockchainError, Result};
use crate::network::Transport;
use log::{debug, error};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: String,
    pub data: Value,
}

impl Message {
    pub fn new<K: Into<String>>(kind: K, data: Value) -> Message {
        Message {
            kind: kind.into(),
            data,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&(&self.kind, &self.data))?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Message> {
        let (kind, data): (String, Value) = serde_json::from_slice(bytes)
            .map_err(|e| BlockchainError::Serialization(format!("Malformed datagram: {e}")))?;
        Ok(Message { kind, data })
    }
}

pub type MessageHandler = Arc<dyn Fn(Value, SocketAddr) + Send + Sync>;
pub type InboundObserver = Arc<dyn Fn(SocketAddr) + Send + Sync>;

pub struct Messaging {
    transport: Arc<dyn Transport>,
    handlers: RwLock<HashMap<String, MessageHandler>>,
    observers: RwLock<Vec<InboundObserver>>,
}

impl Messaging {
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Messaging> {
        Arc::new(Messaging {
            transport,
            handlers: RwLock::new(HashMap::new()),
            observers: RwLock::new(vec![]),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Install the handler for `kind`, replacing any earlier one
    pub fn register<F>(&self, kind: &str, handler: F)
    where
        F: Fn(Value, SocketAddr) + Send + Sync + 'static,
    {
        match self.handlers.write() {
            Ok(mut handlers) => {
                handlers.insert(kind.to_string(), Arc::new(handler));
            }
            Err(_) => error!("Failed to acquire write lock on message handlers"),
        }
    }

    /// Called with the sender of every well-formed inbound datagram, before its handler
    pub fn observe<F>(&self, observer: F)
    where
        F: Fn(SocketAddr) + Send + Sync + 'static,
    {
        match self.observers.write() {
            Ok(mut observers) => observers.push(Arc::new(observer)),
            Err(_) => error!("Failed to acquire write lock on message observers"),
        }
    }

    pub fn send(&self, addr: SocketAddr, message: &Message) -> Result<()> {
        debug!("Sending {} to {addr}", message.kind);
        let bytes = message.to_bytes()?;
        self.transport.send_to(addr, &bytes)
    }

    pub fn dispatch(&self, bytes: &[u8], sender: SocketAddr) {
        let message = match Message::from_bytes(bytes) {
            Ok(message) => message,
            Err(e) => {
                debug!("Dropping datagram from {sender}: {e}");
                return;
            }
        };

        let observers: Vec<InboundObserver> = match self.observers.read() {
            Ok(observers) => observers.clone(),
            Err(_) => {
                error!("Failed to acquire read lock on message observers");
                vec![]
            }
        };
        for observer in observers {
            observer(sender);
        }

        let handler = match self.handlers.read() {
            Ok(handlers) => handlers.get(&message.kind).cloned(),
            Err(_) => {
                error!("Failed to acquire read lock on message handlers");
                None
            }
        };
        match handler {
            Some(handler) => {
                debug!("Received {} from {sender}", message.kind);
                handler(message.data, sender)
            }
            None => debug!("No handler for {} from {sender}", message.kind),
        }
    }
}
