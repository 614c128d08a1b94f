//! Job queue configuration.
//!
//! Construction is programmatic — environment parsing, CLI flags, and
//! packaging are the embedder's concern, not this crate's.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for the job queue core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Redis connection configuration.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Worker loop configuration.
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL (DSN).
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Redis logical database number.
    #[serde(default)]
    pub database: i64,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Key namespace prefix. A trailing colon is appended if absent.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            database: 0,
            pool_size: default_pool_size(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_key_prefix() -> String {
    "resque:".to_string()
}

/// Worker main-loop configuration — the enumerated options the core reads
/// directly (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Seconds between poll attempts when no job is found. `0` means
    /// single-pass mode (the loop exits instead of sleeping); used by
    /// tests and by one-shot drains.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Whether to reserve with `BLPOP` (blocking) instead of polling with
    /// `LPOP`.
    #[serde(default)]
    pub blocking: bool,

    /// Seconds to wait after `TERM` before escalating (§4.5).
    #[serde(default = "default_graceful_delay")]
    pub graceful_delay_secs: u64,

    /// Secondary signal to send the child on first escalation. When unset,
    /// the first escalation sends `KILL` immediately.
    #[serde(default)]
    pub graceful_signal: Option<GracefulSignal>,

    /// Seconds to wait after the secondary signal before sending `KILL`.
    #[serde(default = "default_graceful_delay_two")]
    pub graceful_delay_two_secs: u64,

    /// Whether a `RedisUnavailable` error during reserve terminates the
    /// worker loop (it is always logged at alert level regardless).
    #[serde(default)]
    pub shutdown_on_reserve_error: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            blocking: false,
            graceful_delay_secs: default_graceful_delay(),
            graceful_signal: None,
            graceful_delay_two_secs: default_graceful_delay_two(),
            shutdown_on_reserve_error: false,
        }
    }
}

fn default_interval() -> u64 {
    5
}

fn default_graceful_delay() -> u64 {
    5
}

fn default_graceful_delay_two() -> u64 {
    2
}

impl WorkerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn graceful_delay(&self) -> Duration {
        Duration::from_secs(self.graceful_delay_secs)
    }

    pub fn graceful_delay_two(&self) -> Duration {
        Duration::from_secs(self.graceful_delay_two_secs)
    }
}

/// The configurable secondary signal sent on first graceful escalation.
/// Only the signals that make sense as a cooperative "please wrap up" nudge
/// are exposed; `KILL`/`STOP` are reached through the escalation path
/// itself, not through this setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GracefulSignal {
    Usr1,
    Usr2,
    Term,
    Quit,
}

impl GracefulSignal {
    pub fn to_nix(self) -> nix::sys::signal::Signal {
        use nix::sys::signal::Signal;
        match self {
            GracefulSignal::Usr1 => Signal::SIGUSR1,
            GracefulSignal::Usr2 => Signal::SIGUSR2,
            GracefulSignal::Term => Signal::SIGTERM,
            GracefulSignal::Quit => Signal::SIGQUIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.interval_secs, 5);
        assert!(!cfg.blocking);
        assert_eq!(cfg.graceful_delay_secs, 5);
        assert_eq!(cfg.graceful_delay_two_secs, 2);
        assert!(cfg.graceful_signal.is_none());
        assert!(!cfg.shutdown_on_reserve_error);
    }

    #[test]
    fn redis_default_prefix_has_trailing_colon() {
        assert!(RedisConfig::default().key_prefix.ends_with(':'));
    }
}
