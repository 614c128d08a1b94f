//! Queue operations (§4.2): push/pop/blocking-pop/dequeue-by-predicate/size
//! over plain Redis lists and a `queues` registry set.

use crate::context::Context;
use crate::error::JobResult;
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// A predicate used by `dequeue` to match envelopes against a class name,
/// optionally an id, or optionally a superset of key/value args (§4.2).
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Bare class name: `class == name`.
    Class(String),
    /// `{class: id}`: `class == key && id == val`.
    ClassId { class: String, id: String },
    /// `{class: {k: v, ...}}`: `class == key && args[0]` is a superset of
    /// the given map.
    ClassArgs {
        class: String,
        args: serde_json::Map<String, Value>,
    },
}

impl Predicate {
    fn matches(&self, envelope: &Value) -> bool {
        let class = envelope.get("class").and_then(Value::as_str);
        match self {
            Predicate::Class(name) => class == Some(name.as_str()),
            Predicate::ClassId { class: c, id } => {
                class == Some(c.as_str())
                    && envelope.get("id").and_then(Value::as_str) == Some(id.as_str())
            }
            Predicate::ClassArgs { class: c, args } => {
                if class != Some(c.as_str()) {
                    return false;
                }
                let first_arg = envelope
                    .get("args")
                    .and_then(Value::as_array)
                    .and_then(|a| a.first());
                let Some(Value::Object(first_arg)) = first_arg else {
                    return false;
                };
                args.iter().all(|(k, v)| first_arg.get(k) == Some(v))
            }
        }
    }
}

#[derive(Clone)]
pub struct QueueOps {
    ctx: Context,
}

impl QueueOps {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// `SADD queues queue` then `RPUSH queue:<queue> envelope`.
    pub async fn push(&self, queue: &str, envelope: &str) -> JobResult<()> {
        self.ctx.sadd("queues", queue).await?;
        self.ctx.rpush(&queue_key(queue), envelope).await
    }

    /// `LPOP queue:<queue>`, decoded as JSON. A decode failure is treated
    /// as an empty pop (`MalformedEnvelope` is swallowed here, not
    /// surfaced) so one poison message cannot wedge the rest of the queue.
    pub async fn pop(&self, queue: &str) -> JobResult<Option<Value>> {
        let Some(raw) = self.ctx.lpop(&queue_key(queue)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                warn!(queue, error = %e, "discarding malformed envelope");
                Ok(None)
            }
        }
    }

    /// `BLPOP` across `queue:<q1> ... queue:<qN> timeout`, returning
    /// `(queue_name, envelope)` with both the Redis-level namespace prefix
    /// and the literal `queue:` prefix stripped from the key.
    pub async fn blpop(
        &self,
        queues: &[String],
        timeout_secs: u64,
    ) -> JobResult<Option<(String, Value)>> {
        let keys: Vec<String> = queues.iter().map(|q| queue_key(q)).collect();
        let Some((key, raw)) = self.ctx.blpop(&keys, timeout_secs).await? else {
            return Ok(None);
        };
        let queue_name = key.strip_prefix("queue:").unwrap_or(&key).to_string();
        match serde_json::from_str(&raw) {
            Ok(v) => Ok(Some((queue_name, v))),
            Err(e) => {
                warn!(queue = %queue_name, error = %e, "discarding malformed envelope");
                Ok(None)
            }
        }
    }

    pub async fn size(&self, queue: &str) -> JobResult<i64> {
        self.ctx.llen(&queue_key(queue)).await
    }

    /// Dequeue envelopes matching any of `predicates`. With no predicates,
    /// the whole queue is dropped and its prior size returned. With
    /// predicates, runs the safe-dequeue algorithm (§4.2): atomically
    /// rotate each envelope through a temporary per-attempt list,
    /// inspecting and removing matches, requeuing the rest back onto the
    /// source list in original order.
    pub async fn dequeue(&self, queue: &str, predicates: &[Predicate]) -> JobResult<i64> {
        if predicates.is_empty() {
            let size = self.size(queue).await?;
            self.ctx.del(&queue_key(queue)).await?;
            return Ok(size);
        }

        let now = now_epoch();
        let src = queue_key(queue);
        let temp = format!("{src}:temp:{now}");
        let requeue = format!("{src}:temp:{now}:requeue");

        let mut removed = 0i64;
        loop {
            let Some(raw) = self.ctx.rpoplpush(&src, &temp).await? else {
                break;
            };
            let matched = match serde_json::from_str::<Value>(&raw) {
                Ok(envelope) => predicates.iter().any(|p| p.matches(&envelope)),
                Err(_) => false,
            };
            if matched {
                self.ctx.rpop(&temp).await?;
                removed += 1;
            } else {
                self.ctx.rpoplpush(&temp, &requeue).await?;
            }
        }

        // Drain the requeue list back onto the source, preserving order.
        while self.ctx.rpoplpush(&requeue, &src).await?.is_some() {}

        self.ctx.del(&temp).await?;
        self.ctx.del(&requeue).await?;

        debug!(queue, removed, "dequeue complete");
        Ok(removed)
    }
}

pub fn queue_key(name: &str) -> String {
    format!("queue:{name}")
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn class_only_predicate() {
        let p = Predicate::Class("SendMail".into());
        assert!(p.matches(&json!({"class": "SendMail", "args": [{}], "id": "x"})));
        assert!(!p.matches(&json!({"class": "Other", "args": [{}], "id": "x"})));
    }

    #[test]
    fn class_id_predicate() {
        let p = Predicate::ClassId {
            class: "SendMail".into(),
            id: "abc".into(),
        };
        assert!(p.matches(&json!({"class": "SendMail", "id": "abc"})));
        assert!(!p.matches(&json!({"class": "SendMail", "id": "def"})));
    }

    #[test]
    fn class_args_predicate_is_superset_match() {
        let mut args = serde_json::Map::new();
        args.insert("user_id".into(), json!(5));
        let p = Predicate::ClassArgs {
            class: "SendMail".into(),
            args,
        };
        assert!(p.matches(&json!({
            "class": "SendMail",
            "args": [{"user_id": 5, "extra": "ignored"}]
        })));
        assert!(!p.matches(&json!({
            "class": "SendMail",
            "args": [{"user_id": 6}]
        })));
        assert!(!p.matches(&json!({"class": "SendMail", "args": [null]})));
    }

    #[test]
    fn queue_key_format() {
        assert_eq!(queue_key("mailers"), "queue:mailers");
    }
}
