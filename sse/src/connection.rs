use crate::config::BrokerConfig;
use crate::error::{Error, ErrorKind};
use crate::message::Filter;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::sink::Sink;
use log::*;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

// Type aliases for external identities (the transport layer supplies these as strings)
pub type UserId = String;
pub type SessionId = String;

/// Unique identifier for a client connection (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity and connection state for one subscriber.
pub struct ClientHandle {
    id: ClientId,
    user_id: Option<UserId>,
    session_id: Option<SessionId>,
    sink: Arc<dyn Sink>,
    connected_at: Instant,
    last_ping: Mutex<Option<Instant>>,
}

impl ClientHandle {
    pub fn new(user_id: Option<UserId>, session_id: Option<SessionId>, sink: Arc<dyn Sink>) -> Self {
        Self {
            id: ClientId::new(),
            user_id,
            session_id,
            sink,
            connected_at: Instant::now(),
            last_ping: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn sink(&self) -> &dyn Sink {
        self.sink.as_ref()
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn last_ping(&self) -> Option<Instant> {
        *self.last_ping.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records liveness at `now` (heartbeat or transport-level ping).
    pub fn touch(&self, now: Instant) {
        *self.last_ping.lock().unwrap_or_else(PoisonError::into_inner) = Some(now);
    }

    /// Time since the last ping, or since connecting when never pinged.
    pub fn idle_for(&self, now: Instant) -> Duration {
        let since = self.last_ping().unwrap_or(self.connected_at);
        now.saturating_duration_since(since)
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

struct Registered {
    // Insertion sequence, gives selections a stable order
    order: u64,
    handle: Arc<ClientHandle>,
}

#[derive(Default)]
struct Connections {
    /// Primary storage: lookup by client id
    clients: HashMap<ClientId, Registered>,

    /// Secondary index: user id -> client ids (key exists only while non-empty)
    user_index: HashMap<UserId, HashSet<ClientId>>,

    /// Secondary index: session id -> client ids (key exists only while non-empty)
    session_index: HashMap<SessionId, HashSet<ClientId>>,

    next_order: u64,

    // Set by `close`, cleared by `reset`. A closed registry admits nobody.
    closed: bool,
}

impl Connections {
    fn resolve<'a>(&self, ids: impl IntoIterator<Item = &'a ClientId>) -> Vec<Arc<ClientHandle>> {
        let mut found: Vec<&Registered> = ids
            .into_iter()
            .filter_map(|id| self.clients.get(id))
            .collect();
        found.sort_by_key(|registered| registered.order);
        found.dedup_by_key(|registered| registered.order);
        found
            .into_iter()
            .map(|registered| Arc::clone(&registered.handle))
            .collect()
    }

    fn unindex(index: &mut HashMap<String, HashSet<ClientId>>, key: &str, id: &ClientId) {
        if let Some(ids) = index.get_mut(key) {
            ids.remove(id);
            if ids.is_empty() {
                index.remove(key);
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Drain {
    Keep,
    Close,
    Reset,
}

/// Registry of live client handles with user and session indexes.
///
/// All three maps sit behind one mutex so a reader never observes an index
/// entry without its primary record (or the reverse). Sinks are closed only
/// after the lock is released.
pub struct ConnectionRegistry {
    connections: Mutex<Connections>,
    metrics: Metrics,
    max_clients: usize,
    client_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            connections: Mutex::new(Connections::default()),
            metrics: Metrics::default(),
            max_clients: config.max_clients(),
            client_timeout: config.client_timeout(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connections> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a handle. The only admission-control point in the broker.
    pub fn add(&self, handle: Arc<ClientHandle>) -> Result<(), Error> {
        let mut connections = self.lock();

        if connections.closed {
            debug!("Rejecting client {}: registry is closed", handle.id());
            return Err(Error::new(ErrorKind::ShutDown));
        }
        if connections.clients.len() >= self.max_clients {
            warn!(
                "Rejecting client {}: capacity of {} reached",
                handle.id(),
                self.max_clients
            );
            return Err(Error::capacity_exceeded(self.max_clients));
        }

        let id = handle.id().clone();
        if let Some(user_id) = handle.user_id() {
            connections
                .user_index
                .entry(user_id.to_string())
                .or_default()
                .insert(id.clone());
        }
        if let Some(session_id) = handle.session_id() {
            connections
                .session_index
                .entry(session_id.to_string())
                .or_default()
                .insert(id.clone());
        }

        let order = connections.next_order;
        connections.next_order += 1;
        connections.clients.insert(id, Registered { order, handle });
        self.metrics.bump_connections();

        Ok(())
    }

    /// Deregister a client and close its sink. Returns false if it was already absent.
    pub fn remove(&self, id: &ClientId) -> bool {
        let handle = {
            let mut connections = self.lock();
            let Some(registered) = connections.clients.remove(id) else {
                return false;
            };
            let handle = registered.handle;
            if let Some(user_id) = handle.user_id() {
                Connections::unindex(&mut connections.user_index, user_id, id);
            }
            if let Some(session_id) = handle.session_id() {
                Connections::unindex(&mut connections.session_index, session_id, id);
            }
            handle
        };

        Self::close_sink(&handle);
        debug!("Removed client {id}");
        true
    }

    fn close_sink(handle: &ClientHandle) {
        if let Err(e) = handle.sink().close() {
            warn!("Failed to close sink for client {}: {e}", handle.id());
        }
    }

    pub fn get(&self, id: &ClientId) -> Option<Arc<ClientHandle>> {
        self.lock()
            .clients
            .get(id)
            .map(|registered| Arc::clone(&registered.handle))
    }

    /// Resolve a filter to handles, in registration order. Unknown ids are skipped.
    pub fn select_by_filter(&self, filter: &Filter) -> Vec<Arc<ClientHandle>> {
        let connections = self.lock();
        match filter {
            Filter::Broadcast => connections.resolve(connections.clients.keys()),
            Filter::Clients { client_ids } => connections.resolve(client_ids),
            Filter::User { user_id } => connections
                .user_index
                .get(user_id)
                .map(|ids| connections.resolve(ids))
                .unwrap_or_default(),
            Filter::Session { session_id } => connections
                .session_index
                .get(session_id)
                .map(|ids| connections.resolve(ids))
                .unwrap_or_default(),
        }
    }

    pub fn all_handles(&self) -> Vec<Arc<ClientHandle>> {
        self.select_by_filter(&Filter::Broadcast)
    }

    pub fn count(&self) -> usize {
        self.lock().clients.len()
    }

    /// Evict every handle idle for strictly longer than the client timeout.
    pub fn mark_stale(&self, now: Instant) -> usize {
        let stale: Vec<ClientId> = self
            .lock()
            .clients
            .values()
            .filter(|registered| registered.handle.idle_for(now) > self.client_timeout)
            .map(|registered| registered.handle.id().clone())
            .collect();

        // A concurrent remove may win the race; only count our own evictions
        stale.iter().filter(|id| self.remove(id)).count()
    }

    /// Remove every client, closing each sink. Counters are left untouched.
    pub fn cleanup(&self) -> usize {
        let drained = self.drain(Drain::Keep);
        let count = drained.len();
        drained.iter().for_each(|handle| Self::close_sink(handle));
        count
    }

    /// Remove every client and refuse all later registrations until `reset`.
    ///
    /// The drain and the closed flag are applied under one lock, so an `add`
    /// racing with shutdown either lands before it (and is drained) or is rejected.
    pub fn close(&self) -> usize {
        let drained = self.drain(Drain::Close);
        let count = drained.len();
        drained.iter().for_each(|handle| Self::close_sink(handle));
        count
    }

    /// Remove every client and zero the counters under the same lock.
    /// Reopens a closed registry.
    pub fn reset(&self) -> usize {
        let drained = self.drain(Drain::Reset);
        let count = drained.len();
        drained.iter().for_each(|handle| Self::close_sink(handle));
        count
    }

    fn drain(&self, mode: Drain) -> Vec<Arc<ClientHandle>> {
        let mut connections = self.lock();
        match mode {
            Drain::Keep => {}
            Drain::Close => connections.closed = true,
            Drain::Reset => {
                connections.closed = false;
                self.metrics.zero();
            }
        }
        connections.user_index.clear();
        connections.session_index.clear();
        let mut drained: Vec<Registered> = connections
            .clients
            .drain()
            .map(|(_, registered)| registered)
            .collect();
        drop(connections);

        drained.sort_by_key(|registered| registered.order);
        drained
            .into_iter()
            .map(|registered| registered.handle)
            .collect()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.count())
    }

    pub fn bump_dispatched(&self) {
        self.metrics.bump_dispatched();
    }

    pub fn bump_errors(&self) {
        self.metrics.bump_errors();
    }

    #[cfg(test)]
    #[allow(clippy::type_complexity)]
    fn index_snapshot(
        &self,
    ) -> (
        HashMap<UserId, HashSet<ClientId>>,
        HashMap<SessionId, HashSet<ClientId>>,
    ) {
        let connections = self.lock();
        (
            connections.user_index.clone(),
            connections.session_index.clone(),
        )
    }
}
