//! Job status tracker (§3, §6, §8 property 3/4): a per-job state machine
//! persisted at `job:<id>:status`, with a TTL applied once a job reaches a
//! terminal state.

use crate::context::Context;
use crate::error::JobResult;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::{SystemTime, UNIX_EPOCH};

const TERMINAL_TTL_SECS: u64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
    Waiting = 1,
    Running = 2,
    Failed = 3,
    Complete = 4,
    Scheduled = 63,
}

impl Status {
    /// Whether this is a terminal state (causes the status key to expire).
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Failed | Status::Complete)
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i32(*self as i32)
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let n = i32::deserialize(d)?;
        match n {
            1 => Ok(Status::Waiting),
            2 => Ok(Status::Running),
            3 => Ok(Status::Failed),
            4 => Ok(Status::Complete),
            63 => Ok(Status::Scheduled),
            other => Err(serde::de::Error::custom(format!(
                "unknown job status code {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: Status,
    pub updated: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<i64>,
}

#[derive(Clone)]
pub struct StatusTracker {
    ctx: Context,
}

impl StatusTracker {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Create a fresh status record in `WAITING`, recording `started`. Used
    /// both by `create` and by `recreate`'s transition back to `WAITING`.
    pub async fn create(&self, job_id: &str) -> JobResult<()> {
        let now = now_epoch();
        let record = StatusRecord {
            status: Status::Waiting,
            updated: now,
            started: Some(now),
        };
        self.write(job_id, &record).await
    }

    /// Transition an existing record to `state`, preserving `started`. A
    /// no-op when no record exists — the §9 `isTracking` check: a job that
    /// was never tracked (or that already had tracking stopped) must not
    /// grow a status key as a side effect of `update`.
    pub async fn update(&self, job_id: &str, state: Status) -> JobResult<()> {
        let Some(existing) = self.get(job_id).await? else {
            return Ok(());
        };
        let record = StatusRecord {
            status: state,
            updated: now_epoch(),
            started: existing.started,
        };
        self.write(job_id, &record).await
    }

    pub async fn get(&self, job_id: &str) -> JobResult<Option<StatusRecord>> {
        match self.ctx.get(&status_key(job_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Stop tracking a job outright (used when a descriptor was created
    /// with `track_status = false`, or explicitly by the embedder).
    pub async fn stop(&self, job_id: &str) -> JobResult<()> {
        self.ctx.del(&status_key(job_id)).await
    }

    async fn write(&self, job_id: &str, record: &StatusRecord) -> JobResult<()> {
        let json = serde_json::to_string(record)?;
        let key = status_key(job_id);
        if record.status.is_terminal() {
            self.ctx.setex(&key, TERMINAL_TTL_SECS, &json).await
        } else {
            self.ctx.set(&key, &json).await
        }
    }
}

fn status_key(job_id: &str) -> String {
    format!("job:{job_id}:status")
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_json_uses_integer_codes() {
        let record = StatusRecord {
            status: Status::Running,
            updated: 100,
            started: Some(90),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"status":2,"updated":100,"started":90}"#);
    }

    #[test]
    fn status_round_trips() {
        for (code, status) in [
            (1, Status::Waiting),
            (2, Status::Running),
            (3, Status::Failed),
            (4, Status::Complete),
            (63, Status::Scheduled),
        ] {
            let json = format!(r#"{{"status":{code},"updated":1,"started":null}}"#);
            let parsed: StatusRecord = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed.status, status);
        }
    }

    #[test]
    fn terminal_states() {
        assert!(Status::Failed.is_terminal());
        assert!(Status::Complete.is_terminal());
        assert!(!Status::Waiting.is_terminal());
        assert!(!Status::Running.is_terminal());
        assert!(!Status::Scheduled.is_terminal());
    }

    #[test]
    fn status_key_format() {
        assert_eq!(status_key("abc"), "job:abc:status");
    }
}
