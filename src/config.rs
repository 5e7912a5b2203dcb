use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;

use crate::clients::openai_client::DEFAULT_MODEL;
use crate::models::busy::UnknownEndPolicy;
use crate::service::generation::RetryPolicy;
use crate::service::reconciler::MergeMode;
use crate::service::schedule_service::PlannerOptions;

pub const DEFAULT_DATA_FILE: &str = "./data.json";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3030";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config line {line}: {content}")]
    Syntax { line: usize, content: String },
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// `KEY=VALUE` pairs from a dotenv-style file.
#[derive(Debug, Default, Clone)]
pub struct AppConfig {
    values: HashMap<String, String>,
}

impl AppConfig {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut values = HashMap::new();
        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::Syntax {
                    line: idx + 1,
                    content: line.to_string(),
                });
            };
            let key = key.trim();
            let mut value = value.trim().to_string();
            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = value[1..value.len() - 1].to_string();
            }
            values.insert(key.to_string(), value);
        }
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Cli,
    Api,
}

/// Typed settings for one planner process.
#[derive(Debug, Clone)]
pub struct PlannerSettings {
    pub run_mode: RunMode,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub data_file: PathBuf,
    pub timezone: Tz,
    pub generation_timeout: Duration,
    pub retry: RetryPolicy,
    pub unknown_end: UnknownEndPolicy,
    pub merge_mode: MergeMode,
    pub bind_addr: SocketAddr,
    pub log_level: String,
}

impl PlannerSettings {
    /// Reads every setting through `lookup`, which is expected to consult the
    /// config file first and the process environment second.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let run_mode = match lookup("RUN_MODE").as_deref().map(str::trim) {
            None | Some("cli") => RunMode::Cli,
            Some("api") => RunMode::Api,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "RUN_MODE",
                    message: format!("expected `cli` or `api`, got `{}`", other),
                });
            }
        };

        let timeout_secs: u64 = parse_or(&lookup, "GENERATION_TIMEOUT_SECS", 60)?;
        let max_attempts: u32 = parse_or(&lookup, "GENERATION_MAX_ATTEMPTS", 3)?;
        let backoff_ms: u64 = parse_or(&lookup, "GENERATION_BACKOFF_MS", 500)?;

        Ok(Self {
            run_mode,
            openai_api_key: lookup("OPENAI_API_KEY").filter(|k| !k.trim().is_empty()),
            openai_model: lookup("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            data_file: PathBuf::from(lookup("DATA_FILE").unwrap_or_else(|| DEFAULT_DATA_FILE.to_string())),
            timezone: parse_or(&lookup, "PLANNER_TIMEZONE", chrono_tz::UTC)?,
            generation_timeout: Duration::from_secs(timeout_secs),
            retry: RetryPolicy {
                max_attempts: max_attempts.max(1),
                base_delay: Duration::from_millis(backoff_ms),
            },
            unknown_end: parse_or(&lookup, "UNKNOWN_END_POLICY", UnknownEndPolicy::default())?,
            merge_mode: parse_or(&lookup, "MERGE_MODE", MergeMode::default())?,
            bind_addr: parse_or(
                &lookup,
                "BIND_ADDR",
                SocketAddr::from(([127, 0, 0, 1], 3030)),
            )?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    pub fn planner_options(&self) -> PlannerOptions {
        PlannerOptions {
            tz: self.timezone,
            unknown_end: self.unknown_end,
            merge_mode: self.merge_mode,
            retry: self.retry,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            message: e.to_string(),
        }),
        _ => Ok(default),
    }
}
