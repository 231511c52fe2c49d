//! CLI argument parsing via clap.

use clap::Parser;
use duet::build_info;
use duet::types::AgentKind;

/// Stream one prompt through the task or skill agent and report usage.
#[derive(Debug, Parser)]
#[command(name = "duet", version, long_version = build_info::LONG_VERSION)]
pub struct Args {
    /// Prompt to send. Read from stdin when omitted.
    pub prompt: Option<String>,

    /// Sub-agent that handles the prompt (`task` or `skill`).
    #[arg(short = 'm', long = "mode")]
    pub mode: Option<AgentKind>,

    /// Conversation id used for backend context and stats lookups.
    #[arg(long = "conversation", value_name = "ID")]
    pub conversation: Option<String>,

    /// Path to config file (default: ./duet.toml or ~/.config/duet/duet.toml).
    #[arg(short = 'c', long = "config")]
    pub config: Option<String>,

    /// Extra request environment entries; repeatable.
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Disable color output.
    #[arg(long = "no-color")]
    pub no_color: bool,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in `{raw}`"));
    }
    Ok((key.to_string(), value.to_string()))
}
