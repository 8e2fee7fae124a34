// SPDX-License-Identifier: MIT

//! Centralized environment variable access for the worker pool's tunables.
//! Each accessor parses its own variable with a documented default rather
//! than populating a config singleton at startup.

use std::time::Duration;

/// How long a claimed lease is valid for before it is eligible for reaping.
pub fn lease_ttl_ms() -> u64 {
    std::env::var("DAR_LEASE_TTL_MS").ok().and_then(|s| s.parse().ok()).unwrap_or(30_000)
}

/// How often a worker renews its in-flight leases (`ttl / 3` by default, here
/// exposed directly so the renewer task doesn't need to recompute it).
pub fn lease_renewal_interval() -> Duration {
    std::env::var("DAR_LEASE_RENEWAL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(lease_ttl_ms() / 3))
}

/// Heartbeat interval; the reaper treats a worker as dead after
/// `2 * heartbeat_interval` without a fresh heartbeat.
pub fn heartbeat_interval() -> Duration {
    std::env::var("DAR_HEARTBEAT_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(10_000))
}

pub fn heartbeat_stale_after() -> Duration {
    heartbeat_interval() * 2
}

/// How long the reaper sleeps between sweeps.
pub fn reaper_interval() -> Duration {
    std::env::var("DAR_REAPER_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(15_000))
}

/// How long a worker blocks on the wakeup index before polling anyway.
pub fn poll_timeout() -> Duration {
    std::env::var("DAR_POLL_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(2_000))
}

/// Per-step deadline passed down to the tool adapter.
pub fn step_timeout() -> Duration {
    std::env::var("DAR_STEP_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(60))
}

/// Number of jobs a single worker process runs concurrently.
pub fn concurrency() -> usize {
    std::env::var("DAR_WORKER_CONCURRENCY").ok().and_then(|s| s.parse().ok()).unwrap_or(4)
}
