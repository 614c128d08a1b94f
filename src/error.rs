//! Job error types.
//!
//! Seven kinds, matching the taxonomy the rest of the crate is built
//! against: one producer/Redis-facing kind, and the several distinct ways a
//! job can fail to run cleanly. Workers never crash on a job failure —
//! only `RedisUnavailable` during reserve, and only when the worker is
//! configured to shut down on reserve errors, terminates the main loop.

use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// Any failure reported by the Redis client. The namespaced adapter
    /// retries transient `LOADING` replies internally; everything else
    /// surfaces as this variant.
    #[error("Redis unavailable: {0}")]
    RedisUnavailable(String),

    /// A popped list entry failed to decode as a job envelope. Treated the
    /// same as an empty pop so one poison message cannot wedge a queue.
    #[error("Malformed job envelope: {0}")]
    MalformedEnvelope(String),

    /// The job factory could not resolve or instantiate the named class,
    /// or the resolved value has no `perform`.
    #[error("Job class not creatable: {0}")]
    JobNotCreatable(String),

    /// Cooperative skip signalled from `before_perform`/`set_up`. Not a
    /// failure: stats are not incremented and status is not set to
    /// `FAILED`.
    #[error("Job declined to perform: {0}")]
    DontPerform(String),

    /// The forked child exited with a non-zero status, or was killed.
    #[error("Dirty exit: child exited with status {0}")]
    DirtyExit(i32),

    /// Any error escaping `perform`/`tear_down`.
    #[error("Job threw: {0}")]
    JobThrew(String),

    /// Invalid producer input: empty class/queue name, a non-positive
    /// delay, a malformed timestamp.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<redis::RedisError> for JobError {
    fn from(e: redis::RedisError) -> Self {
        JobError::RedisUnavailable(e.to_string())
    }
}

impl From<deadpool_redis::PoolError> for JobError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        JobError::RedisUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for JobError {
    fn from(e: serde_json::Error) -> Self {
        JobError::MalformedEnvelope(e.to_string())
    }
}

/// Outcome of running a job through the descriptor's perform sequence.
/// `DontPerform` is a cooperative skip, not a failure — modeled as a result
/// variant rather than an exception so callers can't accidentally treat a
/// skip as an error.
#[derive(Debug)]
pub enum Perform {
    Ran,
    Skipped(String),
    Failed(JobError),
}

impl std::fmt::Display for Perform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Perform::Ran => write!(f, "ran"),
            Perform::Skipped(reason) => write!(f, "skipped: {reason}"),
            Perform::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perform_display() {
        assert_eq!(Perform::Ran.to_string(), "ran");
        assert_eq!(
            Perform::Skipped("dedup".into()).to_string(),
            "skipped: dedup"
        );
        assert_eq!(
            Perform::Failed(JobError::DirtyExit(1)).to_string(),
            "failed: Dirty exit: child exited with status 1"
        );
    }

    #[test]
    fn redis_error_maps_to_unavailable() {
        let e: JobError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(e, JobError::MalformedEnvelope(_)));
    }
}
