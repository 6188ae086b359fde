// This is the node runtime - it wires peering, gossip and search to my chain store and mempool
// Blocks and transactions travel as gossip; missing parents are fetched with a "block" search
// The miner thread keeps building on the current tip and restarts whenever the tip moves

use crate::config::NodeSettings;
use crate::core::{build_block_cancellable, Address, Block, BlockRef, ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result, ValidationError};
use crate::network::{
    Gossip, GossipMessage, Messaging, NodeIdentity, Peer, PeerNetwork, Search, UdpTransport,
};
use crate::storage::{ChainStore, MemoryPool, Submission};
use crate::utils::{from_hex, spawn_periodic, to_hex, ShutdownToken};
use crate::wallet::Wallet;
use data_encoding::HEXLOWER;
use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const NEW_TX: &str = "bc:new_tx";
pub const NEW_BLOCK: &str = "bc:new_block";
pub const BLOCK_SEARCH: &str = "block";

// I never sweep the mempool less often than this
const MEMPOOL_SWEEP_SECS: u64 = 10;

pub struct Server {
    settings: NodeSettings,
    peering: Arc<PeerNetwork>,
    gossip: Arc<Gossip>,
    search: Arc<Search>,
    store: Arc<ChainStore>,
    mempool: MemoryPool,
    // Bumped on every tip change so an in-flight mining round knows to give up
    tip_version: AtomicU64,
    // Parents I'm already searching for
    fetching: Mutex<HashSet<[u8; 32]>>,
    token: ShutdownToken,
}

impl Server {
    // When I wire a node onto messaging over any transport; no threads are started here
    pub fn new(
        messaging: Arc<Messaging>,
        settings: NodeSettings,
        store: Arc<ChainStore>,
    ) -> Result<Arc<Server>> {
        let identity = NodeIdentity::generate(messaging.local_addr())?;
        let peering = PeerNetwork::new(messaging, identity, settings.peering());
        let gossip = Gossip::new(Arc::clone(&peering), settings.gossip());
        let search = Search::new(Arc::clone(&gossip));
        let mempool = MemoryPool::new(settings.mempool_timeout());

        let server = Arc::new(Server {
            settings,
            peering,
            gossip,
            search,
            store,
            mempool,
            tip_version: AtomicU64::new(0),
            fetching: Mutex::new(HashSet::new()),
            token: ShutdownToken::new(),
        });
        server.register_handlers();
        Ok(server)
    }

    // This is how I start a real node on a UDP socket
    pub fn start(
        settings: NodeSettings,
        store: Arc<ChainStore>,
        miner: Option<Address>,
    ) -> Result<NodeHandle> {
        let transport = Arc::new(UdpTransport::bind(settings.listen_addr()?)?);
        let bootstrap = settings.bootstrap_addrs()?;
        let messaging = Messaging::new(transport.clone());
        let server = Self::new(Arc::clone(&messaging), settings, store)?;

        let mut threads = vec![transport.spawn_receiver(messaging, server.token.clone())?];
        threads.extend(server.start_background(miner)?);

        info!(
            "Node {} started on {}",
            server.identity().id,
            server.identity().address
        );
        for addr in bootstrap {
            server.announce_to(addr);
        }
        Ok(NodeHandle { server, threads })
    }

    // I spawn the maintenance loops, plus the miner if I was given an address to pay
    pub fn start_background(
        self: &Arc<Self>,
        miner: Option<Address>,
    ) -> Result<Vec<JoinHandle<()>>> {
        let mut threads = vec![
            self.peering.start(self.token.clone())?,
            self.gossip.start(self.token.clone())?,
            self.search.start(self.token.clone())?,
        ];

        let weak = Arc::downgrade(self);
        let sweep = self
            .settings
            .mempool_timeout()
            .min(Duration::from_secs(MEMPOOL_SWEEP_SECS));
        let expiry = spawn_periodic("pool-expiry", sweep, self.token.clone(), move || {
            if let Some(server) = weak.upgrade() {
                let now = Instant::now();
                let dropped = server.mempool.expire_at(now);
                if dropped > 0 {
                    debug!("Expired {dropped} pooled transactions");
                }
                let stale = server.store.expire_orphans_at(now);
                if stale > 0 {
                    debug!("Dropped {stale} orphan blocks whose parents never came");
                }
            }
        })?;
        threads.push(expiry);

        if let Some(miner) = miner {
            let server = Arc::clone(self);
            let handle = thread::Builder::new()
                .name("miner".to_string())
                .spawn(move || server.mine_loop(&miner))
                .map_err(|e| BlockchainError::Io(format!("Failed to spawn miner: {e}")))?;
            threads.push(handle);
        }
        Ok(threads)
    }

    fn register_handlers(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.gossip.subscribe(NEW_TX, move |message| {
            if let Some(server) = weak.upgrade() {
                server.handle_new_tx(message);
            }
        });

        let weak = Arc::downgrade(self);
        self.gossip.subscribe(NEW_BLOCK, move |message| {
            if let Some(server) = weak.upgrade() {
                server.handle_new_block(message);
            }
        });

        let weak = Arc::downgrade(self);
        self.search.register(BLOCK_SEARCH, move |query| {
            weak.upgrade().and_then(|server| server.find_block(query))
        });
    }

    pub fn identity(&self) -> &NodeIdentity {
        self.peering.identity()
    }

    pub fn peering(&self) -> &Arc<PeerNetwork> {
        &self.peering
    }

    pub fn gossip(&self) -> &Arc<Gossip> {
        &self.gossip
    }

    pub fn search(&self) -> &Arc<Search> {
        &self.search
    }

    pub fn store(&self) -> &Arc<ChainStore> {
        &self.store
    }

    pub fn mempool(&self) -> &MemoryPool {
        &self.mempool
    }

    pub fn announce_to(&self, addr: SocketAddr) {
        self.peering.announce_to(addr);
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.peering.peers()
    }

    pub fn tip(&self) -> Option<BlockRef> {
        self.store.tip()
    }

    pub fn balance(&self, address: &Address) -> Result<u64> {
        Ok(self.store.tip_state()?.balance(address))
    }

    pub fn nonce(&self, address: &Address) -> Result<u64> {
        Ok(self.store.tip_state()?.nonce(address))
    }

    // The nonce the next transfer from `address` should carry, counting what's already pooled
    pub fn next_nonce(&self, address: &Address) -> Result<u64> {
        let state = self.store.tip_state()?;
        Ok(self.mempool.next_nonce(address, &state))
    }

    // When I want to send value: pool it locally and gossip it to everyone
    pub fn send_transaction(&self, tx: Transaction) -> Result<()> {
        if !tx.verify() {
            return Err(ValidationError::InvalidSignature.into());
        }
        let payload = Value::from(to_hex(&tx)?);
        info!(
            "Sending {} from {} (nonce {})",
            tx.get_amount(),
            tx.get_sender(),
            tx.get_nonce()
        );
        self.mempool.add(tx);
        self.gossip.publish(NEW_TX, payload)?;
        Ok(())
    }

    // I sign a transfer from `wallet` with its next free nonce and send it
    pub fn transfer(&self, wallet: &Wallet, receiver: Address, amount: u64) -> Result<Transaction> {
        let nonce = self.next_nonce(&wallet.get_address())?;
        let tx = wallet.sign_transfer(receiver, amount, nonce)?;
        self.send_transaction(tx.clone())?;
        Ok(tx)
    }

    fn handle_new_tx(&self, message: &GossipMessage) {
        let tx: Transaction = match message.payload.as_str().map(from_hex) {
            Some(Ok(tx)) => tx,
            _ => {
                debug!("Malformed transaction gossip #{}", message.id);
                return;
            }
        };
        if !tx.verify() {
            debug!("Dropping transaction {} with a bad signature", tx.id());
            return;
        }
        if self.mempool.add(tx.clone()) {
            debug!("Pooled transaction {}", tx.id());
        }
    }

    fn handle_new_block(self: &Arc<Self>, message: &GossipMessage) {
        let block: Block = match message.payload.as_str().map(from_hex) {
            Some(Ok(block)) => block,
            _ => {
                debug!("Malformed block gossip #{}", message.id);
                return;
            }
        };
        if !self.has_enough_work(&block) {
            warn!("Ignoring block {} without enough work", block.hash_hex());
            return;
        }
        self.accept_block(block);
    }

    fn has_enough_work(&self, block: &Block) -> bool {
        block.get_difficulty() >= self.store.params().difficulty && ProofOfWork::validate(block)
    }

    fn find_block(&self, query: &Value) -> Option<Value> {
        let bytes = HEXLOWER.decode(query.as_str()?.as_bytes()).ok()?;
        let hash: [u8; 32] = bytes.try_into().ok()?;
        // Orphans count too, so a peer can pull a branch I'm still syncing myself
        match self.store.block(&hash) {
            Ok(Some(block)) => to_hex(&block).ok().map(Value::from),
            Ok(None) => self
                .store
                .orphan(&hash)
                .and_then(|block| to_hex(&block).ok())
                .map(Value::from),
            Err(e) => {
                error!("Failed to read block for search: {e}");
                None
            }
        }
    }

    // Every block I learn of, mined or received, goes through here
    pub fn accept_block(self: &Arc<Self>, block: Block) -> Option<Submission> {
        let hash = block.hash_hex();
        let number = block.get_number();
        let submission = match self.store.submit(block) {
            Ok(submission) => submission,
            Err(e) => {
                error!("Failed to store block {hash}: {e}");
                return None;
            }
        };

        match &submission {
            Submission::Accepted {
                connected,
                tip_changed,
            } => {
                info!(
                    "Accepted block {hash} at height {number} ({} connected)",
                    connected.len()
                );
                for block_ref in connected {
                    self.done_fetching(&block_ref.hash);
                }
                if *tip_changed {
                    self.tip_version.fetch_add(1, Ordering::SeqCst);
                    match self.store.tip_state() {
                        Ok(state) => {
                            self.mempool.remove_confirmed(&state);
                        }
                        Err(e) => error!("Failed to load tip state: {e}"),
                    }
                }
            }
            Submission::Orphaned { missing_parent } => {
                debug!(
                    "Block {hash} waits for parent {}",
                    HEXLOWER.encode(missing_parent)
                );
                self.fetch_parent(*missing_parent);
            }
            Submission::Rejected(e) => warn!("Rejected block {hash}: {e}"),
            Submission::Duplicate => debug!("Block {hash} already known"),
        }
        Some(submission)
    }

    fn done_fetching(&self, hash: &[u8; 32]) {
        match self.fetching.lock() {
            Ok(mut fetching) => {
                fetching.remove(hash);
            }
            Err(_) => error!("Failed to acquire lock on parent fetches"),
        }
    }

    // When a block's parent is unknown I ask the network for it, once per hash
    fn fetch_parent(self: &Arc<Self>, hash: [u8; 32]) {
        let first_ask = match self.fetching.lock() {
            Ok(mut fetching) => fetching.insert(hash),
            Err(_) => {
                error!("Failed to acquire lock on parent fetches");
                false
            }
        };
        if !first_ask {
            return;
        }

        let weak = Arc::downgrade(self);
        let handler = move |result: Option<Value>| -> bool {
            let Some(server) = weak.upgrade() else {
                return true;
            };
            let Some(data) = result else {
                debug!("Gave up fetching block {}", HEXLOWER.encode(&hash));
                server.done_fetching(&hash);
                return true;
            };
            let block: Block = match data.as_str().map(from_hex) {
                Some(Ok(block)) => block,
                _ => return false,
            };
            // Anyone can answer, so I only take the block I actually asked for
            if block.hash() != hash || !server.has_enough_work(&block) {
                return false;
            }
            // Done with this hash even if the block turns out to be an orphan itself
            server.done_fetching(&hash);
            server.accept_block(block);
            true
        };

        let query = Value::from(HEXLOWER.encode(&hash));
        if let Err(e) = self.search.search(BLOCK_SEARCH, query, handler) {
            warn!("Failed to start block search: {e}");
            self.done_fetching(&hash);
        }
    }

    // One mining attempt on the current tip; None if the tip moved or I'm shutting down
    pub fn mine_once(self: &Arc<Self>, miner: &Address) -> Result<Option<Block>> {
        let version = self.tip_version.load(Ordering::SeqCst);
        let previous = self.store.tip_block()?;
        let state = self.store.tip_state()?;
        let candidates = self.mempool.candidates();
        let params = *self.store.params();

        let mined = build_block_cancellable(
            &params,
            &state,
            &candidates,
            miner,
            previous.as_ref(),
            params.difficulty,
            || self.token.is_shutdown() || self.tip_version.load(Ordering::SeqCst) != version,
        );
        let Some(block) = mined else {
            debug!("Mining round cancelled");
            return Ok(None);
        };

        info!(
            "Mined block {} at height {} with {} transactions",
            block.hash_hex(),
            block.get_number(),
            block.get_transactions().len()
        );
        self.accept_block(block.clone());
        self.gossip.publish(NEW_BLOCK, Value::from(to_hex(&block)?))?;
        Ok(Some(block))
    }

    fn mine_loop(self: &Arc<Self>, miner: &Address) {
        info!("Mining to {miner}");
        while !self.token.is_shutdown() {
            if let Err(e) = self.mine_once(miner) {
                error!("Mining failed: {e}");
                self.token.sleep(Duration::from_secs(1));
            }
        }
        debug!("Miner stopped");
    }

    pub fn shutdown_token(&self) -> &ShutdownToken {
        &self.token
    }
}

// A running node; dropping it stops every background thread
pub struct NodeHandle {
    server: Arc<Server>,
    threads: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.identity().address
    }

    // I stop the loops and wait for every thread to finish
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.server.token.shutdown();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("A node thread panicked during shutdown");
            }
        }
    }
}

impl Deref for NodeHandle {
    type Target = Server;

    fn deref(&self) -> &Server {
        &self.server
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
