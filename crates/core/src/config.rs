// Pipeline configuration from environment variables
//
// Decision: plain std::env parsing with defaults; dotenvy is loaded by the
// binary before this runs.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use thiserror::Error;

use crate::credit::CreditPolicy;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {name}: '{value}' ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Which restoration adapter to build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderMode {
    Gemini,
    /// Returns the original image unchanged. Only when asked for explicitly.
    Passthrough,
}

impl FromStr for ProviderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "passthrough" => Ok(Self::Passthrough),
            other => Err(format!("expected 'gemini' or 'passthrough', got '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeminiSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Unset means in-memory dev mode
    pub database_url: Option<String>,
    pub listen_addr: SocketAddr,
    pub object_store_root: PathBuf,
    pub provider_mode: ProviderMode,
    /// Present when `provider_mode` is Gemini
    pub gemini: Option<GeminiSettings>,
    /// Per-attempt ceiling for provider calls
    pub provider_timeout: Duration,
    pub provider_max_retries: u32,
    pub retry_initial_backoff: Duration,
    pub retry_max_backoff: Duration,
    /// Retry ceiling for persistence steps
    pub step_max_retries: u32,
    pub max_concurrent_jobs: usize,
    pub credit_policy: CreditPolicy,
}

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash-exp";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            object_store_root: PathBuf::from("./data/objects"),
            provider_mode: ProviderMode::Passthrough,
            gemini: None,
            provider_timeout: Duration::from_secs(30),
            provider_max_retries: 3,
            retry_initial_backoff: Duration::from_millis(1000),
            retry_max_backoff: Duration::from_millis(30_000),
            step_max_retries: 5,
            max_concurrent_jobs: 16,
            credit_policy: CreditPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from the process environment
    ///
    /// Environment variables:
    /// - `DATABASE_URL`: PostgreSQL URL (unset = in-memory dev mode)
    /// - `LISTEN_ADDR`: intake address (default: 0.0.0.0:8080)
    /// - `OBJECT_STORE_ROOT`: directory for image objects (default: ./data/objects)
    /// - `RESTORATION_PROVIDER`: `gemini` (default) or `passthrough`
    /// - `GEMINI_API_KEY`, `GEMINI_MODEL`, `GEMINI_BASE_URL`
    /// - `PROVIDER_TIMEOUT_SECS` (default: 30)
    /// - `PROVIDER_MAX_RETRIES` (default: 3)
    /// - `RETRY_INITIAL_BACKOFF_MS` (default: 1000), `RETRY_MAX_BACKOFF_MS` (default: 30000)
    /// - `STEP_MAX_RETRIES` (default: 5)
    /// - `MAX_CONCURRENT_JOBS` (default: 16)
    /// - `CREDITS_PER_PERIOD` (default: 50), `CREDIT_PERIOD_DAYS` (default: 30)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from any variable source (tests pass a map)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let provider_mode = parse_or(&var, "RESTORATION_PROVIDER", ProviderMode::Gemini)?;
        let gemini = match provider_mode {
            ProviderMode::Gemini => Some(GeminiSettings {
                api_key: var("GEMINI_API_KEY").ok_or(ConfigError::Missing("GEMINI_API_KEY"))?,
                model: var("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
                base_url: var("GEMINI_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            }),
            ProviderMode::Passthrough => None,
        };

        let credits_per_period: i32 = parse_or(&var, "CREDITS_PER_PERIOD", 50)?;
        if credits_per_period <= 0 {
            return Err(invalid("CREDITS_PER_PERIOD", credits_per_period, "must be positive"));
        }
        let period_days: i64 = parse_or(&var, "CREDIT_PERIOD_DAYS", 30)?;
        if period_days <= 0 {
            return Err(invalid("CREDIT_PERIOD_DAYS", period_days, "must be positive"));
        }

        let max_concurrent_jobs: usize = parse_or(&var, "MAX_CONCURRENT_JOBS", 16)?;
        if max_concurrent_jobs == 0 {
            return Err(invalid("MAX_CONCURRENT_JOBS", 0, "must be at least 1"));
        }

        Ok(Self {
            database_url: var("DATABASE_URL"),
            listen_addr: parse_or(&var, "LISTEN_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            object_store_root: var("OBJECT_STORE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/objects")),
            provider_mode,
            gemini,
            provider_timeout: Duration::from_secs(parse_or(&var, "PROVIDER_TIMEOUT_SECS", 30)?),
            provider_max_retries: parse_or(&var, "PROVIDER_MAX_RETRIES", 3)?,
            retry_initial_backoff: Duration::from_millis(parse_or(
                &var,
                "RETRY_INITIAL_BACKOFF_MS",
                1000,
            )?),
            retry_max_backoff: Duration::from_millis(parse_or(
                &var,
                "RETRY_MAX_BACKOFF_MS",
                30_000,
            )?),
            step_max_retries: parse_or(&var, "STEP_MAX_RETRIES", 5)?,
            max_concurrent_jobs,
            credit_policy: CreditPolicy {
                credits_per_period,
                period: ChronoDuration::days(period_days),
            },
        })
    }
}

fn parse_or<T, V>(var: &V, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            value: raw,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn invalid(name: &'static str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
