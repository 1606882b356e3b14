//! Application state shared by every request handler

use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};

use crate::{config::Config, gateway::Gateway};

#[derive(Clone)]
pub struct AppState {
    /// Read-only after startup
    pub config: Arc<Config>,
    pub gateway: Arc<Gateway>,
    pub counters: Arc<AtomicCounters>,
}

impl AppState {
    pub fn new(config: Arc<Config>, gateway: Arc<Gateway>) -> Self {
        Self {
            config,
            gateway,
            counters: Arc::new(AtomicCounters::new()),
        }
    }
}

/// Process-lifetime request tallies, reported at shutdown.
pub struct AtomicCounters {
    pub total_requests: AtomicUsize,
    pub submissions: AtomicUsize,
    pub events_logged: AtomicUsize,
    pub rejected: AtomicUsize,
}

impl AtomicCounters {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicUsize::new(0),
            submissions: AtomicUsize::new(0),
            events_logged: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
        }
    }

    pub fn inc_total_requests(&self) -> usize {
        self.total_requests.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_submissions(&self) -> usize {
        self.submissions.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_events_logged(&self) -> usize {
        self.events_logged.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_rejected(&self) -> usize {
        self.rejected.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> (usize, usize, usize, usize) {
        (
            self.total_requests.load(Ordering::Relaxed),
            self.submissions.load(Ordering::Relaxed),
            self.events_logged.load(Ordering::Relaxed),
            self.rejected.load(Ordering::Relaxed),
        )
    }
}

impl Default for AtomicCounters {
    fn default() -> Self {
        Self::new()
    }
}
