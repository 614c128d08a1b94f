//! Failure recorder (§3, §6): captures a failed job's payload, exception
//! chain, worker, and queue, keyed `failed:<id>` with a 24-hour TTL.

use crate::context::Context;
use crate::error::JobResult;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const FAILURE_TTL_SECS: u64 = 86_400;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub failed_at: String,
    pub payload: Value,
    pub exception: String,
    pub error: String,
    pub backtrace: Vec<String>,
    pub worker: String,
    pub queue: String,
}

impl FailureRecord {
    pub fn new(
        payload: Value,
        exception: impl Into<String>,
        error: impl Into<String>,
        backtrace: Vec<String>,
        worker: impl Into<String>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            failed_at: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            payload,
            exception: exception.into(),
            error: error.into(),
            backtrace,
            worker: worker.into(),
            queue: queue.into(),
        }
    }
}

#[derive(Clone)]
pub struct FailureRecorder {
    ctx: Context,
}

impl FailureRecorder {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub async fn record(&self, job_id: &str, record: &FailureRecord) -> JobResult<()> {
        let json = serde_json::to_string(record)?;
        self.ctx
            .setex(&failure_key(job_id), FAILURE_TTL_SECS, &json)
            .await
    }

    pub async fn get(&self, job_id: &str) -> JobResult<Option<FailureRecord>> {
        match self.ctx.get(&failure_key(job_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

fn failure_key(job_id: &str) -> String {
    format!("failed:{job_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_record_round_trips_through_json() {
        let record = FailureRecord::new(
            serde_json::json!({"a": 1}),
            "RuntimeError",
            "boom",
            vec!["frame 1".into(), "frame 2".into()],
            "host:1:q",
            "q",
        );
        let json = serde_json::to_string(&record).unwrap();
        let parsed: FailureRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.exception, "RuntimeError");
        assert_eq!(parsed.backtrace.len(), 2);
        assert_eq!(parsed.worker, "host:1:q");
    }

    #[test]
    fn failure_key_format() {
        assert_eq!(failure_key("abc123"), "failed:abc123");
    }
}
