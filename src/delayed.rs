//! Delayed-job extension (§4.7): a sorted-set scheduler that promotes
//! future-dated envelopes into live queues at their due time.
//!
//! This is a narrow extension, not a recurring-job scheduler: a job fires
//! once, at or after its due timestamp.

use crate::context::Context;
use crate::error::{JobError, JobResult};
use crate::job::{Envelope, JobSystem};
use serde_json::Value;
use tracing::info;

const SCHEDULE_SET: &str = "_schdlr_";

#[derive(Clone)]
pub struct DelayedJobs {
    ctx: Context,
}

impl DelayedJobs {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// `enqueueAt`: store the envelope under `_schdlr_:<ts>` and record the
    /// timestamp in the `_schdlr_` sorted set.
    pub async fn enqueue_at(
        &self,
        timestamp: i64,
        queue: &str,
        class: &str,
        args: Option<Value>,
        track: bool,
    ) -> JobResult<String> {
        if queue.is_empty() || class.is_empty() {
            return Err(JobError::ConfigError(
                "queue and class must not be empty".into(),
            ));
        }
        if timestamp <= 0 {
            return Err(JobError::ConfigError(
                "scheduled timestamp must be positive".into(),
            ));
        }

        let envelope = Envelope::new(class, args, None);
        let id = envelope.id.clone();

        // The delayed record additionally carries `queue` and `track` so
        // the promoter knows where and how to re-enqueue it (§6).
        let mut payload = serde_json::to_value(&envelope)?;
        if let Value::Object(ref mut map) = payload {
            map.insert("queue".into(), Value::String(queue.to_string()));
            map.insert("track".into(), Value::Bool(track));
        }
        let json = serde_json::to_string(&payload)?;

        self.ctx.rpush(&timestamp_key(timestamp), &json).await?;
        self.ctx
            .zadd(SCHEDULE_SET, timestamp as f64, &timestamp.to_string())
            .await?;

        Ok(id)
    }

    /// `enqueueIn`: sugar for `enqueue_at(now + seconds, ...)`.
    pub async fn enqueue_in(
        &self,
        seconds: i64,
        queue: &str,
        class: &str,
        args: Option<Value>,
        track: bool,
    ) -> JobResult<String> {
        self.enqueue_at(now_epoch() + seconds, queue, class, args, track)
            .await
    }

    /// `ZRANGEBYSCORE _schdlr_ -inf now LIMIT 0 1` — the next due
    /// timestamp, if any.
    pub async fn next_delayed_timestamp(&self, now: i64) -> JobResult<Option<i64>> {
        let matches = self
            .ctx
            .zrangebyscore_limit(SCHEDULE_SET, "-inf", &now.to_string(), 1)
            .await?;
        Ok(matches.first().and_then(|s| s.parse().ok()))
    }

    /// Remove a scheduled envelope by identity: scan all `_schdlr_:*` keys
    /// and `LREM key 0 envelope`.
    pub async fn remove(&self, envelope_json: &str) -> JobResult<i64> {
        let mut removed = 0;
        for key in self.ctx.keys("_schdlr_:*").await? {
            removed += self.ctx.lrem(&key, 0, envelope_json).await?;
        }
        Ok(removed)
    }
}

/// Drives one promotion pass: pop every envelope due at the next mature
/// timestamp and re-enqueue it into its target queue, clearing the
/// timestamp from the sorted set once its list is drained.
pub struct DelayedPromoter {
    delayed: DelayedJobs,
    system: JobSystem,
}

impl DelayedPromoter {
    pub fn new(delayed: DelayedJobs, system: JobSystem) -> Self {
        Self { delayed, system }
    }

    /// Run one pass: while a due timestamp exists, drain its list by
    /// re-enqueuing each envelope into its target queue. Returns the number
    /// of envelopes promoted.
    pub async fn promote_due(&self, now: i64) -> JobResult<usize> {
        let mut promoted = 0;

        while let Some(ts) = self.delayed.next_delayed_timestamp(now).await? {
            let key = timestamp_key(ts);
            loop {
                let Some(raw) = self.system.ctx.lpop(&key).await? else {
                    break;
                };
                let value: Value = serde_json::from_str(&raw)?;
                let queue = value
                    .get("queue")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let class = value
                    .get("class")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let args = value.get("args").and_then(|a| a.as_array()).and_then(|a| a.first().cloned());
                let track = value.get("track").and_then(Value::as_bool).unwrap_or(false);

                crate::job::JobDescriptor::create(&self.system, &queue, &class, args, track, None)
                    .await?;
                promoted += 1;
            }
            self.delayed.ctx.zrem(SCHEDULE_SET, &ts.to_string()).await?;
            info!(timestamp = ts, "promoted due delayed jobs");
        }

        if promoted > 0 {
            crate::metrics::record_delayed_promoted(promoted);
        }
        Ok(promoted)
    }
}

fn timestamp_key(ts: i64) -> String {
    format!("_schdlr_:{ts}")
}

fn now_epoch() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_key_format() {
        assert_eq!(timestamp_key(1700000000), "_schdlr_:1700000000");
    }
}
