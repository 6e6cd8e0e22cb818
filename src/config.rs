// Environment-driven settings
//
// `.env` is loaded by the binary before `Settings::from_env` runs.
// Malformed values are logged and replaced by their defaults.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::agents::types::{RetryPolicy, DEFAULT_MAX_RETRIES};

const DEFAULT_ENTRY_AGENT: &str = "router_agent";
const DEFAULT_RESULTS_CONSUMER: &str = "user_interface";
const DEFAULT_CLAIM_TIMEOUT_SECS: u64 = 5;
const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
const DEFAULT_MODEL_NAME: &str = "gpt-4o-mini";
const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind_addr: SocketAddr,
    /// Shared store; only honoured when built with the `redis` feature
    pub redis_url: Option<String>,
    /// PostgreSQL plan store; in-memory when absent
    pub database_url: Option<String>,
    /// Agent whose queue receives new user requests
    pub entry_agent: String,
    /// Consumer name of the user-facing reply channel
    pub results_consumer: String,
    pub max_retries: u32,
    pub claim_timeout: Duration,
    pub poll_interval: Duration,
    /// Queue served by the `worker` binary
    pub agent_name: Option<String>,
    /// Agents the API server runs in-process, for single-node deployments
    pub local_agents: Vec<String>,
    /// Base URL of an OpenAI-compatible chat completions endpoint
    pub model_base_url: Option<String>,
    pub model_api_key: Option<String>,
    pub model_name: String,
    pub model_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            redis_url: None,
            database_url: None,
            entry_agent: DEFAULT_ENTRY_AGENT.to_string(),
            results_consumer: DEFAULT_RESULTS_CONSUMER.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            claim_timeout: Duration::from_secs(DEFAULT_CLAIM_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            agent_name: None,
            local_agents: Vec::new(),
            model_base_url: None,
            model_api_key: None,
            model_name: DEFAULT_MODEL_NAME.to_string(),
            model_timeout: Duration::from_secs(DEFAULT_MODEL_TIMEOUT_SECS),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let optional = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Self {
            bind_addr: parsed(&lookup, "BIND_ADDR", default_bind_addr()),
            redis_url: optional("REDIS_URL"),
            database_url: optional("DATABASE_URL"),
            entry_agent: text("ENTRY_AGENT", DEFAULT_ENTRY_AGENT),
            results_consumer: text("RESULTS_CONSUMER", DEFAULT_RESULTS_CONSUMER),
            max_retries: parsed(&lookup, "MAX_RETRIES", DEFAULT_MAX_RETRIES),
            claim_timeout: Duration::from_secs(parsed(
                &lookup,
                "CLAIM_TIMEOUT_SECS",
                DEFAULT_CLAIM_TIMEOUT_SECS,
            )),
            poll_interval: Duration::from_millis(parsed(
                &lookup,
                "POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL_MS,
            )),
            agent_name: optional("AGENT_NAME"),
            local_agents: optional("LOCAL_AGENTS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            model_base_url: optional("MODEL_BASE_URL"),
            model_api_key: optional("MODEL_API_KEY"),
            model_name: text("MODEL_NAME", DEFAULT_MODEL_NAME),
            model_timeout: Duration::from_secs(parsed(
                &lookup,
                "MODEL_TIMEOUT_SECS",
                DEFAULT_MODEL_TIMEOUT_SECS,
            )),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

fn parsed<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, default = ?default, "Invalid setting, using default");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        assert_eq!(settings(&[]), Settings::default());
    }

    #[test]
    fn test_overrides() {
        let s = settings(&[
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("REDIS_URL", "redis://localhost:6379"),
            ("ENTRY_AGENT", "main_agent"),
            ("MAX_RETRIES", "5"),
            ("POLL_INTERVAL_MS", "250"),
        ]);
        assert_eq!(s.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(s.redis_url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(s.entry_agent, "main_agent");
        assert_eq!(s.retry_policy(), RetryPolicy::new(5));
        assert_eq!(s.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let s = settings(&[("MAX_RETRIES", "many"), ("BIND_ADDR", "nowhere"), ("DATABASE_URL", " ")]);
        assert_eq!(s.max_retries, 3);
        assert_eq!(s.bind_addr, Settings::default().bind_addr);
        assert_eq!(s.database_url, None);
    }

    #[test]
    fn test_agent_settings() {
        let s = settings(&[
            ("AGENT_NAME", "flight_agent"),
            ("LOCAL_AGENTS", "router_agent, ,weather_agent"),
            ("MODEL_BASE_URL", "http://localhost:11434/v1"),
            ("CLAIM_TIMEOUT_SECS", "1"),
        ]);
        assert_eq!(s.agent_name.as_deref(), Some("flight_agent"));
        assert_eq!(s.local_agents, vec!["router_agent", "weather_agent"]);
        assert_eq!(s.model_base_url.as_deref(), Some("http://localhost:11434/v1"));
        assert_eq!(s.model_name, "gpt-4o-mini");
        assert_eq!(s.claim_timeout, Duration::from_secs(1));
    }
}
