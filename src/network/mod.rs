//! Peer-to-peer networking
//!
//! Layered bottom-up: a datagram transport, kinded JSON messages on top of it,
//! a bounded random peer set, flooding gossip with duplicate suppression, and
//! request/response search carried over gossip. `server` ties them to the chain.

pub mod gossip;
pub mod messaging;
pub mod peering;
pub mod search;
pub mod server;
pub mod transport;

pub use gossip::{Gossip, GossipHandler, GossipMessage, SeenSet, GOSSIP_SEND};
pub use messaging::{InboundObserver, Message, MessageHandler, Messaging};
pub use peering::{NodeIdentity, Peer, PeerNetwork, ANNOUNCE, ASK_FOR_PEERS, PEERS, PING, PONG};
pub use search::{QueryHandler, ResponseHandler, Search, SEARCH_QUERY, SEARCH_RESPONSE};
pub use server::{NodeHandle, Server, BLOCK_SEARCH, NEW_BLOCK, NEW_TX};
pub use transport::{Transport, UdpTransport, MAX_DATAGRAM_SIZE};
