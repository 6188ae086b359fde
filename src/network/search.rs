//! Unstructured search over gossip
//!
//! Queries and responses are both flooded; a response finds its way back
//! because the asking node recognises the query id.

use crate::error::{BlockchainError, Result};
use crate::network::{Gossip, GossipMessage};
use crate::utils::{spawn_periodic, ShutdownToken};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const SEARCH_QUERY: &str = "search:query";
pub const SEARCH_RESPONSE: &str = "search:response";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct QueryPayload {
    id: String,
    kind: String,
    query: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ResponsePayload {
    id: String,
    data: Value,
}

/// Answers queries of one kind; None means "not here"
pub type QueryHandler = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// Receives Some(data) per response, or None once on timeout. Returning true ends the query.
pub type ResponseHandler = Box<dyn FnMut(Option<Value>) -> bool + Send>;

struct PendingQuery {
    kind: String,
    handler: ResponseHandler,
    deadline: Instant,
}

pub struct Search {
    gossip: Arc<Gossip>,
    handlers: RwLock<HashMap<String, QueryHandler>>,
    pending: Mutex<HashMap<String, PendingQuery>>,
}

impl Search {
    pub fn new(gossip: Arc<Gossip>) -> Arc<Search> {
        let search = Arc::new(Search {
            gossip,
            handlers: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        });

        let weak = Arc::downgrade(&search);
        search.gossip.subscribe(SEARCH_QUERY, move |message| {
            if let Some(search) = weak.upgrade() {
                search.handle_query(message);
            }
        });
        let weak = Arc::downgrade(&search);
        search.gossip.subscribe(SEARCH_RESPONSE, move |message| {
            if let Some(search) = weak.upgrade() {
                search.handle_response(message);
            }
        });
        search
    }

    /// Install the answering handler for `kind`, replacing any earlier one
    pub fn register<F>(&self, kind: &str, handler: F)
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        match self.handlers.write() {
            Ok(mut handlers) => {
                handlers.insert(kind.to_string(), Arc::new(handler));
            }
            Err(_) => error!("Failed to acquire write lock on search handlers"),
        }
    }

    /// Start a query and return its id
    pub fn search_for<F>(
        &self,
        kind: &str,
        query: Value,
        handler: F,
        timeout: Duration,
    ) -> Result<String>
    where
        F: FnMut(Option<Value>) -> bool + Send + 'static,
    {
        let id = format!("q:{}", Uuid::new_v4().simple());
        let pending = PendingQuery {
            kind: kind.to_string(),
            handler: Box::new(handler),
            deadline: Instant::now() + timeout,
        };
        self.insert_pending(id.clone(), pending);

        let payload = serde_json::to_value(QueryPayload {
            id: id.clone(),
            kind: kind.to_string(),
            query,
        })?;
        self.gossip.publish(SEARCH_QUERY, payload)?;
        debug!("Searching for {kind} as {id}");
        Ok(id)
    }

    /// Same as `search_for` with the configured default timeout
    pub fn search(
        &self,
        kind: &str,
        query: Value,
        handler: impl FnMut(Option<Value>) -> bool + Send + 'static,
    ) -> Result<String> {
        let timeout = self.gossip.settings().search_timeout;
        self.search_for(kind, query, handler, timeout)
    }

    pub fn pending_count(&self) -> usize {
        match self.pending.lock() {
            Ok(pending) => pending.len(),
            Err(_) => 0,
        }
    }

    fn insert_pending(&self, id: String, query: PendingQuery) {
        match self.pending.lock() {
            Ok(mut pending) => {
                pending.insert(id, query);
            }
            Err(_) => error!("Failed to acquire lock on pending queries"),
        }
    }

    fn take_pending(&self, id: &str) -> Option<PendingQuery> {
        match self.pending.lock() {
            Ok(mut pending) => pending.remove(id),
            Err(_) => {
                error!("Failed to acquire lock on pending queries");
                None
            }
        }
    }

    fn handle_query(&self, message: &GossipMessage) {
        let query: QueryPayload = match serde_json::from_value(message.payload.clone()) {
            Ok(query) => query,
            Err(e) => {
                debug!("Malformed search query: {e}");
                return;
            }
        };
        let handler = match self.handlers.read() {
            Ok(handlers) => handlers.get(&query.kind).cloned(),
            Err(_) => None,
        };
        let Some(handler) = handler else {
            return;
        };
        let Some(data) = handler(&query.query) else {
            return;
        };

        let response = ResponsePayload { id: query.id, data };
        let published = serde_json::to_value(response)
            .map_err(BlockchainError::from)
            .and_then(|payload| self.gossip.publish(SEARCH_RESPONSE, payload));
        if let Err(e) = published {
            debug!("Failed to answer {} query: {e}", query.kind);
        }
    }

    fn handle_response(&self, message: &GossipMessage) {
        let response: ResponsePayload = match serde_json::from_value(message.payload.clone()) {
            Ok(response) => response,
            Err(e) => {
                debug!("Malformed search response: {e}");
                return;
            }
        };

        // The query leaves the table while its handler runs so the handler holds no lock
        let Some(mut query) = self.take_pending(&response.id) else {
            debug!("Ignoring response to unknown query {}", response.id);
            return;
        };
        if (query.handler)(Some(response.data)) {
            debug!("Query {} for {} answered", response.id, query.kind);
        } else {
            self.insert_pending(response.id, query);
        }
    }

    /// Remove every query past its deadline and tell its handler
    pub fn expire_at(&self, now: Instant) -> usize {
        let expired: Vec<(String, PendingQuery)> = match self.pending.lock() {
            Ok(mut pending) => {
                let ids: Vec<String> = pending
                    .iter()
                    .filter(|(_, q)| q.deadline <= now)
                    .map(|(id, _)| id.clone())
                    .collect();
                ids.into_iter()
                    .filter_map(|id| pending.remove(&id).map(|q| (id, q)))
                    .collect()
            }
            Err(_) => {
                error!("Failed to acquire lock on pending queries");
                vec![]
            }
        };

        let count = expired.len();
        for (id, mut query) in expired {
            debug!("Query {id} for {} timed out", query.kind);
            (query.handler)(None);
        }
        count
    }

    pub fn start(self: &Arc<Self>, token: ShutdownToken) -> Result<JoinHandle<()>> {
        let weak = Arc::downgrade(self);
        let period = self.gossip.settings().search_sweep_interval;
        spawn_periodic("search-timeout", period, token, move || {
            if let Some(search) = weak.upgrade() {
                search.expire_at(Instant::now());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testnet::{MemoryNetwork, TestPeer};
    use serde_json::json;

    fn linked_pair(network: &MemoryNetwork) -> (TestPeer, TestPeer) {
        let a = TestPeer::new(network, 5);
        let b = TestPeer::new(network, 5);
        a.peering.announce_to(b.address());
        network.pump();
        (a, b)
    }

    fn recorder() -> (
        Arc<Mutex<Vec<Option<Value>>>>,
        impl FnMut(Option<Value>) -> bool + Send + 'static,
    ) {
        let calls = Arc::new(Mutex::new(vec![]));
        let sink = Arc::clone(&calls);
        (calls, move |result| {
            sink.lock().unwrap().push(result);
            true
        })
    }

    #[test]
    fn test_query_answered_by_remote_handler() -> Result<()> {
        let network = MemoryNetwork::new();
        let (a, b) = linked_pair(&network);
        b.search.register("echo", |query| Some(json!({ "echo": query })));

        let (calls, handler) = recorder();
        a.search
            .search_for("echo", json!("ping"), handler, Duration::from_secs(60))?;
        network.pump();

        assert_eq!(
            *calls.lock().unwrap(),
            vec![Some(json!({"echo": "ping"}))]
        );
        assert_eq!(a.search.pending_count(), 0);
        Ok(())
    }

    #[test]
    fn test_unanswered_query_times_out_exactly_once() -> Result<()> {
        let network = MemoryNetwork::new();
        let (a, _b) = linked_pair(&network);

        let (calls, handler) = recorder();
        let timeout = Duration::from_secs(60);
        a.search.search_for("missing", json!("x"), handler, timeout)?;
        network.pump();

        assert_eq!(a.search.expire_at(Instant::now()), 0);
        assert!(calls.lock().unwrap().is_empty());

        let later = Instant::now() + timeout + Duration::from_secs(1);
        assert_eq!(a.search.expire_at(later), 1);
        assert_eq!(a.search.expire_at(later), 0);
        assert_eq!(*calls.lock().unwrap(), vec![None]);
        Ok(())
    }

    #[test]
    fn test_handler_returning_false_keeps_waiting() -> Result<()> {
        let network = MemoryNetwork::new();
        let (a, b) = linked_pair(&network);
        b.search.register("num", |_| Some(json!(1)));

        let calls = Arc::new(Mutex::new(vec![]));
        let sink = Arc::clone(&calls);
        let timeout = Duration::from_secs(60);
        a.search.search_for(
            "num",
            json!(null),
            move |result| {
                sink.lock().unwrap().push(result);
                false
            },
            timeout,
        )?;
        network.pump();
        assert_eq!(a.search.pending_count(), 1);

        a.search.expire_at(Instant::now() + timeout + Duration::from_secs(1));
        assert_eq!(*calls.lock().unwrap(), vec![Some(json!(1)), None]);
        Ok(())
    }

    #[test]
    fn test_response_after_completion_is_ignored() -> Result<()> {
        let network = MemoryNetwork::new();
        let a = TestPeer::new(&network, 5);
        let b = TestPeer::new(&network, 5);
        let c = TestPeer::new(&network, 5);
        a.peering.announce_to(b.address());
        a.peering.announce_to(c.address());
        network.pump();
        b.search.register("who", |_| Some(json!("b")));
        c.search.register("who", |_| Some(json!("c")));

        let (calls, handler) = recorder();
        a.search
            .search_for("who", json!(null), handler, Duration::from_secs(60))?;
        network.pump();

        assert_eq!(calls.lock().unwrap().len(), 1);
        Ok(())
    }

    #[test]
    fn test_handler_may_start_new_search() -> Result<()> {
        let network = MemoryNetwork::new();
        let (a, b) = linked_pair(&network);
        b.search.register("step", |query| {
            let n = query.as_u64()?;
            (n < 3).then(|| json!(n + 1))
        });

        let seen = Arc::new(Mutex::new(vec![]));
        fn chase(search: &Arc<Search>, n: u64, seen: Arc<Mutex<Vec<u64>>>) -> Result<()> {
            let weak = Arc::downgrade(search);
            search.search_for(
                "step",
                json!(n),
                move |result| {
                    if let (Some(next), Some(search)) =
                        (result.and_then(|v| v.as_u64()), weak.upgrade())
                    {
                        seen.lock().unwrap().push(next);
                        chase(&search, next, Arc::clone(&seen)).unwrap();
                    }
                    true
                },
                Duration::from_secs(60),
            )?;
            Ok(())
        }
        chase(&a.search, 0, Arc::clone(&seen))?;
        network.pump();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        Ok(())
    }
}
