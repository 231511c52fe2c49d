//! Usage statistics resolution.
//!
//! - `client`: external stats endpoint access
//! - `poller`: per-message stability polling
//! - `aggregate`: conversation-wide totals

mod aggregate;
mod client;
mod poller;

pub use aggregate::CumulativeStats;
pub use client::{HttpStatsClient, StatsResponse, StatsSource};
pub use poller::{PollConfig, PollState, PollStep, ResolutionCallback, StatsPoller};
