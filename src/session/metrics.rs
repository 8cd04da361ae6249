//! Connection and query counters: a small `AtomicU64`-counter struct
//! owned by the wire server.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct SessionMetrics {
    connections_accepted: AtomicU64,
    auth_failures: AtomicU64,
    queries_total: AtomicU64,
    queries_failed: AtomicU64,
}

impl SessionMetrics {
    pub fn on_connection(&self) -> u64 {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn on_auth_failure(&self) -> u64 {
        self.auth_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn on_query(&self) -> u64 {
        self.queries_total.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn on_query_failed(&self) -> u64 {
        self.queries_failed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.connections_accepted.load(Ordering::Relaxed),
            self.auth_failures.load(Ordering::Relaxed),
            self.queries_total.load(Ordering::Relaxed),
            self.queries_failed.load(Ordering::Relaxed),
        )
    }
}
