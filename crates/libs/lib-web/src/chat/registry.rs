//! # Connection Registry
//!
//! Tracks live socket connections, grouped by [`Scope`], and fans frames out to them.
//!
//! Each connection is represented by the sending half of a bounded queue; the
//! socket's writer task drains the other half. Membership lives behind a mutex
//! that is never held across an `.await`, and [`ConnectionRegistry::broadcast`]
//! iterates a snapshot taken under that mutex, so registrations and removals
//! triggered while delivering cannot disturb an in-progress fan-out.

use lib_core::{AppError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Capacity of each connection's outbound queue.
pub const OUTBOUND_BUFFER: usize = 64;

/// Unique identifier of one registered connection.
pub type ConnectionId = Uuid;

/// Outbound queue handle for one connection.
pub type Outbound = mpsc::Sender<String>;

/// Broadcast group a connection belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Session(String),
}

impl Scope {
    /// Session id used to scope persisted history, `None` for the global scope.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Scope::Global => None,
            Scope::Session(id) => Some(id.as_str()),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Session(id) => write!(f, "session:{}", id),
        }
    }
}

/// Result of one fan-out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the payload was queued for
    pub delivered: usize,
    /// Connections skipped because their queue was full
    pub dropped: usize,
    /// Connections whose queue was closed; they have been unregistered
    pub failed: Vec<ConnectionId>,
}

impl BroadcastReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.dropped + self.failed.len()
    }
}

type Members = HashMap<Scope, HashMap<ConnectionId, Outbound>>;

/// Live connection membership, partitioned by scope.
#[derive(Default)]
pub struct ConnectionRegistry {
    members: Mutex<Members>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Members> {
        // Critical sections only touch the maps, so a poisoned lock still holds consistent data.
        self.members.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a connection to `scope`.
    ///
    /// Every call creates a distinct member, even for the same queue. The
    /// returned [`Membership`] unregisters the connection when dropped.
    pub fn register(self: &Arc<Self>, scope: Scope, outbound: Outbound) -> Membership {
        let id = Uuid::new_v4();
        let scope_size = {
            let mut members = self.lock();
            let group = members.entry(scope.clone()).or_default();
            group.insert(id, outbound);
            group.len()
        };

        info!(
            connection_id = %id,
            scope = %scope,
            scope_size,
            "[REGISTRY] REGISTERED connection_id={} scope={} members={}",
            id,
            scope,
            scope_size
        );

        Membership {
            registry: Arc::clone(self),
            scope,
            id,
            released: false,
        }
    }

    /// Remove a connection. Empty session groups are discarded.
    ///
    /// Returns `false` when the connection was not registered.
    pub fn unregister(&self, scope: &Scope, id: ConnectionId) -> bool {
        let (removed, remaining) = {
            let mut members = self.lock();
            let Some(group) = members.get_mut(scope) else {
                return false;
            };
            let removed = group.remove(&id).is_some();
            let remaining = group.len();
            if remaining == 0 {
                members.remove(scope);
            }
            (removed, remaining)
        };

        if removed {
            info!(
                connection_id = %id,
                scope = %scope,
                remaining,
                "[REGISTRY] UNREGISTERED connection_id={} scope={} remaining={}",
                id,
                scope,
                remaining
            );
        }

        removed
    }

    /// Queue `payload` for every connection currently in `scope`.
    ///
    /// Delivery is independent per connection and never fails as a whole: a
    /// full queue drops this payload for that connection only, and a closed
    /// queue marks the connection dead and unregisters it after the iteration.
    pub fn broadcast(&self, scope: &Scope, payload: &str) -> BroadcastReport {
        let snapshot: Vec<(ConnectionId, Outbound)> = {
            let members = self.lock();
            members
                .get(scope)
                .map(|group| group.iter().map(|(id, tx)| (*id, tx.clone())).collect())
                .unwrap_or_default()
        };

        let mut report = BroadcastReport::default();

        for (id, outbound) in snapshot {
            match outbound.try_send(payload.to_string()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        connection_id = %id,
                        scope = %scope,
                        "[REGISTRY] SLOW_CONSUMER connection_id={} - outbound queue full, frame dropped",
                        id
                    );
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(
                        connection_id = %id,
                        scope = %scope,
                        "[REGISTRY] SEND_FAILED connection_id={} - outbound queue closed",
                        id
                    );
                    report.failed.push(id);
                }
            }
        }

        for id in &report.failed {
            self.unregister(scope, *id);
        }

        debug!(
            scope = %scope,
            delivered = report.delivered,
            dropped = report.dropped,
            failed = report.failed.len(),
            "[REGISTRY] BROADCAST scope={} delivered={} dropped={} failed={}",
            scope,
            report.delivered,
            report.dropped,
            report.failed.len()
        );

        report
    }

    /// Queue `payload` for a single connection.
    pub fn send_to(&self, scope: &Scope, id: ConnectionId, payload: &str) -> Result<()> {
        let outbound = {
            let members = self.lock();
            members.get(scope).and_then(|group| group.get(&id)).cloned()
        };

        let outbound = outbound.ok_or_else(|| {
            AppError::Transport(format!("connection {} is not registered in {}", id, scope))
        })?;

        outbound.try_send(payload.to_string()).map_err(|e| match e {
            TrySendError::Full(_) => AppError::Transport(format!("outbound queue of {} is full", id)),
            TrySendError::Closed(_) => AppError::Transport(format!("connection {} is closed", id)),
        })
    }

    /// Connection ids currently registered in `scope`.
    pub fn members(&self, scope: &Scope) -> Vec<ConnectionId> {
        self.lock()
            .get(scope)
            .map(|group| group.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Number of scopes with at least one live connection.
    pub fn scope_count(&self) -> usize {
        self.lock().len()
    }

    pub fn connection_count(&self) -> usize {
        self.lock().values().map(HashMap::len).sum()
    }
}

/// Registration guard for one connection.
///
/// Unregisters exactly once: on [`Membership::release`] or on drop, whichever
/// comes first, so cleanup also runs when the owning task is cancelled.
pub struct Membership {
    registry: Arc<ConnectionRegistry>,
    scope: Scope,
    id: ConnectionId,
    released: bool,
}

impl Membership {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Queue a frame for this connection only.
    pub fn send(&self, payload: &str) -> Result<()> {
        self.registry.send_to(&self.scope, self.id, payload)
    }

    /// Unregister now instead of waiting for drop.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.registry.unregister(&self.scope, self.id);
        }
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        self.release_inner();
    }
}
