//! Versioned route cache
//!
//! Every poll appends one immutable `RouteTable` snapshot. Snapshots are
//! content-addressed: the hash depends only on the route sequence, so a
//! consumer can compare hashes to detect changes cheaply.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::route::Route;

/// A point-in-time snapshot of the routing table
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTable {
    routes: Vec<Route>,
    content_hash: String,
    created_at: DateTime<Utc>,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        let content_hash = content_hash(&routes);
        Self {
            routes,
            content_hash,
            created_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Copy this snapshot with a fresh timestamp and the routes replaced
    fn successor(&self, routes: Vec<Route>) -> Self {
        let mut next = self.clone();
        next.routes = routes;
        next.content_hash = content_hash(&next.routes);
        next.created_at = Utc::now();
        next
    }
}

/// Lowercase hex SHA-256 of the JSON encoding of the routes
pub fn content_hash(routes: &[Route]) -> String {
    // Serializing plain strings and unit enums cannot fail
    let encoded = serde_json::to_vec(routes).unwrap_or_default();
    format!("{:x}", Sha256::digest(&encoded))
}

/// Append-only history of routing snapshots
///
/// The last element is always the current routing table. Readers and the
/// writer share one lock, so a reader sees a complete snapshot or none.
#[derive(Debug, Default)]
pub struct RouteCache {
    snapshots: Mutex<VecDeque<Arc<RouteTable>>>,
    history_limit: Option<usize>,
}

impl RouteCache {
    /// Create a cache, optionally keeping only the newest `history_limit` snapshots
    pub fn new(history_limit: Option<usize>) -> Self {
        Self {
            snapshots: Mutex::new(VecDeque::new()),
            history_limit: history_limit.map(|limit| limit.max(1)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Arc<RouteTable>>> {
        // A panicking writer never leaves a half-built snapshot in the deque
        self.snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a snapshot holding `routes` and return it
    pub fn update(&self, routes: Vec<Route>) -> Arc<RouteTable> {
        let mut snapshots = self.lock();

        let next = match snapshots.back() {
            Some(last) => last.successor(routes),
            None => RouteTable::empty().successor(routes),
        };
        let next = Arc::new(next);
        snapshots.push_back(Arc::clone(&next));

        if let Some(limit) = self.history_limit {
            while snapshots.len() > limit {
                snapshots.pop_front();
            }
        }

        next
    }

    /// The newest snapshot, or an empty table if nothing was recorded yet
    pub fn current(&self) -> Arc<RouteTable> {
        self.lock()
            .back()
            .cloned()
            .unwrap_or_else(|| Arc::new(RouteTable::empty()))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// All retained snapshots, oldest first
    pub fn history(&self) -> Vec<Arc<RouteTable>> {
        self.lock().iter().cloned().collect()
    }
}
