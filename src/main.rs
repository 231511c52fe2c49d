//! CLI entry point for duet.

mod cli;

use clap::Parser;
use duet::config::{load_config_with_source, Config};
use duet::render::Renderer;
use duet::session::{ChatSession, HttpChatTransport, LogSink, SendOptions, SessionSnapshot};
use duet::stats::{HttpStatsClient, StatsPoller};
use duet::types::Role;
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "DUET_LOG";
const DEFAULT_LOG_FILTER: &str = "warn";

#[tokio::main]
async fn main() {
    init_logging();
    let args = cli::Args::parse();
    std::process::exit(run(args).await);
}

fn init_logging() {
    // Fall back to the default filter when DUET_LOG is unset or invalid.
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(args: cli::Args) -> i32 {
    let mut config = match load_config_with_source(args.config.as_deref()) {
        Ok(loaded) => {
            tracing::debug!(source = %loaded.source, "using config");
            loaded.config
        }
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };
    if args.no_color || !std::io::stderr().is_terminal() {
        config.display.color = false;
    }
    let renderer = Renderer::new(config.display.color);

    let prompt = match args.prompt {
        Some(prompt) => prompt,
        None => match std::io::read_to_string(std::io::stdin()) {
            Ok(text) => text,
            Err(e) => {
                renderer.error(&format!("failed to read prompt from stdin: {e}"));
                return 1;
            }
        },
    };
    if prompt.trim().is_empty() {
        renderer.error("prompt is empty");
        return 2;
    }

    let conversation_id = args
        .conversation
        .unwrap_or_else(|| format!("conv_{:016x}", rand::random::<u64>()));
    let session = Arc::new(build_session(&config, conversation_id));
    let options = SendOptions {
        mode: args.mode.unwrap_or(config.session.default_mode),
        context_id: None,
        env: args.env.into_iter().collect(),
    };

    let interrupter = {
        let session = session.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                session.stop();
            }
        })
    };
    let outcome = session.send(&prompt, options).await;
    interrupter.abort();

    let snapshot = session.snapshot();
    if let Some(reply) = last_reply(&snapshot) {
        renderer.message(reply);
    }
    if let Err(e) = outcome {
        renderer.error(&e.to_string());
        return 1;
    }

    if session.is_polling_stats() {
        let budget = config.stats.poll_config().base_interval
            * (config.stats.max_attempts.saturating_add(1));
        wait_for_stats(&session, budget).await;
    }
    let snapshot = session.snapshot();
    if let Some(stats) = last_reply(&snapshot).and_then(|reply| reply.stats.as_ref()) {
        renderer.stats(stats);
    }
    renderer.cumulative(&snapshot.cumulative);
    0
}

fn build_session(config: &Config, conversation_id: String) -> ChatSession {
    let api = &config.api;
    let transport = Arc::new(HttpChatTransport::new(
        &api.chat_url,
        &api.api_key,
        api.timeout(),
    ));
    let stats = Arc::new(HttpStatsClient::new(
        &api.stats_url,
        &api.api_key,
        api.timeout(),
    ));
    let poller = StatsPoller::new(stats, config.stats.poll_config());
    ChatSession::new(conversation_id, transport, poller, Arc::new(LogSink))
        .with_env(config.session.env.clone())
}

fn last_reply(snapshot: &SessionSnapshot) -> Option<&duet::types::Message> {
    snapshot
        .messages
        .last()
        .filter(|message| message.role == Role::Assistant)
}

/// Wait until no message has pending stats, the budget runs out, or Ctrl-C.
async fn wait_for_stats(session: &ChatSession, budget: Duration) {
    let mut rx = session.subscribe();
    let settled = rx.wait_for(|snapshot| snapshot.pending_stats().is_empty());
    tokio::select! {
        _ = tokio::time::timeout(budget, settled) => {}
        _ = tokio::signal::ctrl_c() => tracing::debug!("stopped waiting for stats"),
    }
}
