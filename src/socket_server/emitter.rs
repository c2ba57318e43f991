//! Subscription registry
//!
//! Tracks which connections listen to the directory listing and which listen
//! to a given file, and fans domain events out to them.
//!
//! A connection is in at most one subscriber set at a time. Every membership
//! change happens while holding that connection's subscription lock, so a
//! switch from one set to another is never observed half done. Broadcasts
//! snapshot the target set first and enqueue without blocking, so no lock is
//! held while a message is delivered.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::socket_server::connection::{Connection, ConnectionId, Subscription};
use crate::socket_server::protocol::ServerMessage;
use crate::watcher::{DomainEvent, FileStore};

/// Set of subscribed connections keyed by id
#[derive(Default)]
pub struct SubscriberSet {
    members: DashMap<ConnectionId, Arc<Connection>>,
}

impl SubscriberSet {
    pub fn add(&self, conn: &Arc<Connection>) -> bool {
        self.members
            .insert(conn.id().clone(), Arc::clone(conn))
            .is_none()
    }

    pub fn remove(&self, id: &ConnectionId) -> bool {
        self.members.remove(id).is_some()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.members.contains_key(id)
    }

    /// Point-in-time copy of the members
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.members
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Root and per-file subscriber sets
pub struct SubscriptionRegistry {
    store: Arc<dyn FileStore>,
    root: SubscriberSet,
    /// Only non-empty sets are kept
    files: DashMap<String, SubscriberSet>,
}

impl SubscriptionRegistry {
    pub fn new(store: Arc<dyn FileStore>) -> Self {
        Self {
            store,
            root: SubscriberSet::default(),
            files: DashMap::new(),
        }
    }

    /// Subscribe to the directory listing, leaving any file subscription.
    ///
    /// The current listing is queued to the connection before it joins the
    /// root set, so the snapshot always precedes the first broadcast it sees.
    /// Returns false if the connection is already closed.
    pub fn subscribe_root(&self, conn: &Arc<Connection>) -> bool {
        let mut current = conn.lock_subscription();
        if conn.is_closed() {
            return false;
        }

        self.leave(conn.id(), &current);
        conn.send(ServerMessage::listing(self.store.current_listing()));
        self.root.add(conn);
        *current = Subscription::Root;

        tracing::debug!(connection = %conn.id(), "Subscribed to root");
        true
    }

    /// Subscribe to one file, leaving the root set and any previous file.
    ///
    /// Delivering the initial content is up to the caller. Returns false if
    /// the connection is already closed.
    pub fn subscribe_file(&self, conn: &Arc<Connection>, name: &str) -> bool {
        let mut current = conn.lock_subscription();
        if conn.is_closed() {
            return false;
        }

        self.leave(conn.id(), &current);
        self.files.entry(name.to_string()).or_default().add(conn);
        *current = Subscription::File(name.to_string());

        tracing::debug!(connection = %conn.id(), file = name, "Subscribed to file");
        true
    }

    pub fn unsubscribe_root(&self, conn: &Connection) {
        let mut current = conn.lock_subscription();
        self.root.remove(conn.id());
        if *current == Subscription::Root {
            *current = Subscription::None;
        }
    }

    pub fn unsubscribe_file(&self, name: &str, conn: &Connection) {
        let mut current = conn.lock_subscription();
        self.remove_from_file(name, conn.id());
        if matches!(&*current, Subscription::File(subscribed) if subscribed == name) {
            *current = Subscription::None;
        }
    }

    /// Drop a connection from whatever set it is in
    pub fn remove_connection(&self, conn: &Connection) {
        let mut current = conn.lock_subscription();
        self.leave(conn.id(), &current);
        *current = Subscription::None;
    }

    pub fn root_subscribers(&self) -> usize {
        self.root.len()
    }

    pub fn file_subscribers(&self, name: &str) -> usize {
        self.files.get(name).map(|set| set.len()).unwrap_or(0)
    }

    /// Names of files with at least one subscriber
    pub fn watched_files(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Fan one event out. Returns the number of connections that accepted it.
    pub fn dispatch(&self, event: &DomainEvent) -> usize {
        match event {
            DomainEvent::Created { .. } | DomainEvent::Removed { .. } => {
                let targets = self.root.snapshot();
                if targets.is_empty() {
                    return 0;
                }
                let message = ServerMessage::listing(self.store.current_listing());
                deliver(&targets, message)
            }
            DomainEvent::Modified { name, data } => {
                let targets = match self.files.get(name) {
                    Some(set) => set.snapshot(),
                    None => return 0,
                };
                deliver(&targets, ServerMessage::file_content(data.clone()))
            }
        }
    }

    /// Consume the domain event stream until it ends or shutdown
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<DomainEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        let delivered = self.dispatch(&event);
                        tracing::debug!(
                            kind = ?event.kind(),
                            file = event.name(),
                            delivered,
                            "Dispatched change"
                        );
                    }
                    None => {
                        tracing::info!("Domain event stream ended");
                        break;
                    }
                },
            }
        }
    }

    fn leave(&self, id: &ConnectionId, subscription: &Subscription) {
        match subscription {
            Subscription::None => {}
            Subscription::Root => {
                self.root.remove(id);
            }
            Subscription::File(name) => self.remove_from_file(name, id),
        }
    }

    fn remove_from_file(&self, name: &str, id: &ConnectionId) {
        let emptied = match self.files.get(name) {
            Some(set) => {
                set.remove(id);
                set.is_empty()
            }
            None => false,
        };
        if emptied {
            // Re-checked under the shard lock; a concurrent subscribe wins
            self.files.remove_if(name, |_, set| set.is_empty());
        }
    }
}

fn deliver(targets: &[Arc<Connection>], message: ServerMessage) -> usize {
    let message = Arc::new(message);
    targets
        .iter()
        .filter(|conn| conn.send_shared(Arc::clone(&message)))
        .count()
}
