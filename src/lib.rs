//! Duet: streaming conversation reconstruction for a dual-agent chat backend.
//!
//! A turn is sent to the agent backend, which answers with a stream of typed
//! events (text deltas, tool calls and results, citations, usage). This crate
//! decodes that stream into structured messages, resolves per-message usage
//! statistics that arrive late from an observability backend, and keeps
//! conversation-wide totals.
//!
//! # Quick start
//!
//! ```no_run
//! use duet::config::load_config;
//! use duet::session::{ChatSession, HttpChatTransport, LogSink, SendOptions};
//! use duet::stats::{HttpStatsClient, StatsPoller};
//! use duet::types::AgentKind;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let config = load_config(None).unwrap();
//! let api = &config.api;
//! let transport = Arc::new(HttpChatTransport::new(&api.chat_url, &api.api_key, api.timeout()));
//! let stats = Arc::new(HttpStatsClient::new(&api.stats_url, &api.api_key, api.timeout()));
//! let poller = StatsPoller::new(stats, config.stats.poll_config());
//! let session = ChatSession::new("conv-1", transport, poller, Arc::new(LogSink));
//! session.send("Hello!", SendOptions::new(AgentKind::Task)).await.unwrap();
//! println!("{:?}", session.messages().last());
//! # }
//! ```

pub mod build_info;
pub mod config;
pub mod error;
pub mod message;
pub mod render;
pub mod session;
pub mod stats;
pub mod stream;
#[cfg(test)]
pub mod testsupport;
pub mod types;
