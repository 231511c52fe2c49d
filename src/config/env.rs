//! Environment overrides.
//!
//! `DUET_*` variables take precedence over every file source.

use crate::error::ConfigError;

use super::Config;

pub(super) fn apply_runtime_env_overrides<FEnv>(
    config: &mut Config,
    env_lookup: &FEnv,
) -> Result<(), ConfigError>
where
    FEnv: Fn(&str) -> Option<String>,
{
    if let Some(url) = non_blank(env_lookup, "DUET_CHAT_URL") {
        config.api.chat_url = url;
    }
    if let Some(url) = non_blank(env_lookup, "DUET_STATS_URL") {
        config.api.stats_url = url;
    }
    if let Some(key) = env_lookup("DUET_API_KEY") {
        config.api.api_key = key.trim().to_string();
    }
    if let Some(timeout) = non_blank(env_lookup, "DUET_API_TIMEOUT_SECS") {
        // Clamp to at least 1 second to avoid "no-timeout" accidental behavior.
        let parsed = timeout.parse::<u64>().map_err(|_| {
            ConfigError::Invalid(format!(
                "invalid DUET_API_TIMEOUT_SECS value `{timeout}`: expected positive integer seconds"
            ))
        })?;
        config.api.timeout_secs = parsed.max(1);
    }
    Ok(())
}

fn non_blank<FEnv>(env_lookup: &FEnv, name: &str) -> Option<String>
where
    FEnv: Fn(&str) -> Option<String>,
{
    env_lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
