use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicI64, AtomicU64, Ordering},
    time::Instant,
};

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct SystemStats {
    pub uptime_seconds: u64,
    pub cpus: usize,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ApiStats {
    pub total_requests: u64,
    pub active_connections: i64,
    pub users_total: usize,
    pub user_operations: BTreeMap<String, u64>,
}

/// Process-wide request accounting.
#[derive(Debug)]
pub struct StatsService {
    started: Instant,
    active: AtomicI64,
    total: AtomicU64,
}

/// Keeps a request counted as in flight until dropped.
pub struct InFlight<'a> {
    stats: &'a StatsService,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.stats.active.fetch_sub(1, Ordering::Relaxed);
    }
}

impl Default for StatsService {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsService {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            active: AtomicI64::new(0),
            total: AtomicU64::new(0),
        }
    }

    pub fn begin_request(&self) -> InFlight<'_> {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
        InFlight { stats: self }
    }

    pub fn active_requests(&self) -> i64 {
        self.active.load(Ordering::Relaxed).max(0)
    }

    pub fn total_requests(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn system_stats(&self) -> SystemStats {
        SystemStats {
            uptime_seconds: self.started.elapsed().as_secs(),
            cpus: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}
