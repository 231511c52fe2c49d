//! Default configuration constants.
//!
//! Callers share these constants instead of duplicating literals.

/// Default agent streaming endpoint.
pub(super) const DEFAULT_CHAT_URL: &str = "http://localhost:3000/api/chat";
/// Default usage statistics endpoint.
pub(super) const DEFAULT_STATS_URL: &str = "http://localhost:3000/api/stats";
/// Default timeout for establishing API connections.
pub(super) const DEFAULT_API_TIMEOUT_SECS: u64 = 300;
/// Default fixed delay between stats poll attempts.
pub(super) const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
/// Default poll attempt ceiling.
pub(super) const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 8;
/// Default number of identical observations required to accept stats.
pub(super) const DEFAULT_CONSECUTIVE_MATCHES: u32 = 3;
