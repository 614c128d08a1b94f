//! Job envelope and descriptor (§3, §4.3): the JSON record carried through
//! the queue, and the create/reserve/recreate/perform/fail operations that
//! surround it.

use crate::context::Context;
use crate::events::{names as event_names, EventBus, EventPayload};
use crate::error::{JobError, JobResult, Perform};
use crate::factory::{HookOutcome, JobRegistry};
use crate::failure::{FailureRecord, FailureRecorder};
use crate::queue::QueueOps;
use crate::stats::Stats;
use crate::status::{Status, StatusTracker};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::time::Instant;

/// The wire envelope — `{"class":"...","args":[<arg>]|null,"id":"..."}`.
/// Ids are 128-bit hex (16 random bytes rendered lowercase).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub class: String,
    #[serde(serialize_with = "serialize_args", deserialize_with = "deserialize_args")]
    pub args: Option<Value>,
    pub id: String,
}

fn serialize_args<S: Serializer>(args: &Option<Value>, s: S) -> Result<S::Ok, S::Error> {
    match args {
        Some(v) => [v].serialize(s),
        None => s.serialize_none(),
    }
}

fn deserialize_args<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Value>, D::Error> {
    let wrapped: Option<Vec<Value>> = Option::deserialize(d)?;
    Ok(wrapped.and_then(|mut v| if v.is_empty() { None } else { Some(v.remove(0)) }))
}

impl Envelope {
    pub fn new(class: impl Into<String>, args: Option<Value>, id: Option<String>) -> Self {
        Self {
            class: class.into(),
            args,
            id: id.unwrap_or_else(generate_job_id),
        }
    }

    /// `args[0]` as a list of one if present, else an empty list (§4.3
    /// `getArguments`).
    pub fn get_arguments(&self) -> Vec<Value> {
        match &self.args {
            Some(v) => vec![v.clone()],
            None => vec![],
        }
    }
}

/// 16 random bytes rendered as 32 lowercase hex characters — the wire
/// format other Resque clients expect (see SPEC_FULL.md's supplemented
/// features: a UUID's dashes would not match what those clients write).
pub fn generate_job_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// An id the caller already embedded in `args` (an `"id"` member of the
/// first positional argument), per §4.3 `create`'s "already embedded in
/// args" clause — checked before falling back to `generate_job_id`.
fn embedded_id(args: &Option<Value>) -> Option<String> {
    args.as_ref()
        .and_then(Value::as_object)
        .and_then(|o| o.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Shared handle every descriptor carries to the Redis-backed collaborators
/// it touches over its lifetime.
#[derive(Clone)]
pub struct JobSystem {
    pub ctx: Context,
    pub queues: QueueOps,
    pub status: StatusTracker,
    pub failures: FailureRecorder,
    pub stats: Stats,
    pub events: EventBus,
    pub registry: JobRegistry,
}

impl JobSystem {
    pub fn new(ctx: Context, registry: JobRegistry, events: EventBus) -> Self {
        Self {
            queues: QueueOps::new(ctx.clone()),
            status: StatusTracker::new(ctx.clone()),
            failures: FailureRecorder::new(ctx.clone()),
            stats: Stats::new(ctx.clone()),
            ctx,
            events,
            registry,
        }
    }
}

/// A reserved (or about-to-be-created) job, wrapping its envelope plus the
/// queue it belongs to and whether it is being status-tracked.
pub struct JobDescriptor {
    pub queue: String,
    pub envelope: Envelope,
    pub track_status: bool,
    system: JobSystem,
}

impl JobDescriptor {
    /// Push a new envelope to `queue`. Generates an id unless one is
    /// already embedded in `args` via `id`. If `track_status`, creates a
    /// `WAITING` status record. Returns the job id.
    pub async fn create(
        system: &JobSystem,
        queue: &str,
        class: &str,
        args: Option<Value>,
        track_status: bool,
        id: Option<String>,
    ) -> JobResult<String> {
        if queue.is_empty() {
            return Err(JobError::ConfigError("queue name must not be empty".into()));
        }
        if class.is_empty() {
            return Err(JobError::ConfigError("job class must not be empty".into()));
        }

        let id = id.or_else(|| embedded_id(&args));
        let envelope = Envelope::new(class, args, id);
        let json = serde_json::to_string(&envelope)?;
        system.queues.push(queue, &json).await?;

        if track_status {
            system.status.create(&envelope.id).await?;
        }

        Ok(envelope.id)
    }

    /// Pop and wrap the next envelope from `queue`, or `None` if empty.
    pub async fn reserve(system: &JobSystem, queue: &str) -> JobResult<Option<Self>> {
        let Some(value) = system.queues.pop(queue).await? else {
            return Ok(None);
        };
        Self::from_value(system, queue, value).await
    }

    /// Same as `reserve`, but blocks up to `timeout_secs` across several
    /// queues (`BLPOP`), returning a descriptor for whichever queue
    /// produced an envelope first.
    pub async fn reserve_blocking(
        system: &JobSystem,
        queues: &[String],
        timeout_secs: u64,
    ) -> JobResult<Option<Self>> {
        let Some((queue, value)) = system.queues.blpop(queues, timeout_secs).await? else {
            return Ok(None);
        };
        Self::from_value(system, &queue, value).await
    }

    /// Wraps a popped envelope, deriving `track_status` from whether a
    /// status record already exists for its id — the §9 `isTracking` check
    /// — rather than assuming every reserved job is tracked.
    async fn from_value(system: &JobSystem, queue: &str, value: Value) -> JobResult<Option<Self>> {
        match serde_json::from_value::<Envelope>(value) {
            Ok(envelope) => {
                let track_status = system.status.get(&envelope.id).await?.is_some();
                Ok(Some(Self {
                    queue: queue.to_string(),
                    envelope,
                    track_status,
                    system: system.clone(),
                }))
            }
            Err(_) => Ok(None),
        }
    }

    /// Re-create this descriptor's job with the same class/args, copying
    /// the tracking flag, and return the new id (§4.3 `recreate`).
    pub async fn recreate(&self) -> JobResult<String> {
        let was_tracking = self.system.status.get(&self.envelope.id).await?.is_some();
        Self::create(
            &self.system,
            &self.queue,
            &self.envelope.class,
            self.envelope.args.clone(),
            was_tracking,
            None,
        )
        .await
    }

    pub async fn update_status(&self, state: Status) -> JobResult<()> {
        if self.track_status {
            self.system.status.update(&self.envelope.id, state).await?;
        }
        Ok(())
    }

    pub fn get_arguments(&self) -> Vec<Value> {
        self.envelope.get_arguments()
    }

    /// Acquire the job instance from the factory, run `before_perform` /
    /// `set_up` / `perform` / `tear_down` / `after_perform` in order. A
    /// `Skip` outcome from either hook short-circuits without treating the
    /// run as a failure (§4.3, §7 `DontPerform`).
    pub async fn perform(&self, worker_id: &str) -> Perform {
        let args = self.get_arguments();
        let mut handler = match self.system.registry.create(&self.envelope.class, args, &self.queue) {
            Ok(h) => h,
            Err(e) => return Perform::Failed(e),
        };

        self.system.events.fire(
            event_names::BEFORE_PERFORM,
            &EventPayload::Job {
                queue: self.queue.clone(),
                envelope: self.envelope.id.clone(),
            },
        );

        let start = Instant::now();

        if let Err(e) = handler.before_perform().and_then(|outcome| match outcome {
            HookOutcome::Skip(reason) => Err(JobError::DontPerform(reason)),
            HookOutcome::Continue => Ok(()),
        }) {
            if let JobError::DontPerform(reason) = e {
                return Perform::Skipped(reason);
            }
            return Perform::Failed(e);
        }

        if let Err(e) = handler.set_up().and_then(|outcome| match outcome {
            HookOutcome::Skip(reason) => Err(JobError::DontPerform(reason)),
            HookOutcome::Continue => Ok(()),
        }) {
            if let JobError::DontPerform(reason) = e {
                return Perform::Skipped(reason);
            }
            return Perform::Failed(e);
        }

        if let Err(e) = handler.perform() {
            handler.on_failure(&e);
            return Perform::Failed(JobError::JobThrew(e.to_string()));
        }

        if let Err(e) = handler.tear_down() {
            handler.on_failure(&e);
            return Perform::Failed(JobError::JobThrew(e.to_string()));
        }

        handler.after_perform();

        self.system.events.fire(
            event_names::AFTER_PERFORM,
            &EventPayload::Job {
                queue: self.queue.clone(),
                envelope: self.envelope.id.clone(),
            },
        );

        tracing::info!(
            job_id = %self.envelope.id,
            queue = %self.queue,
            worker = worker_id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "job completed"
        );
        Perform::Ran
    }

    /// Record a failure: mark status `FAILED`, write a failure record,
    /// increment `failed` and `failed:<worker-id>` (§4.3 `fail`).
    pub async fn fail(&self, worker_id: &str, error: &JobError) -> JobResult<()> {
        self.update_status(Status::Failed).await?;

        let (exception, message, backtrace) = classify(error);
        let record = FailureRecord::new(
            self.envelope.args.clone().unwrap_or(Value::Null),
            exception,
            message,
            backtrace,
            worker_id,
            &self.queue,
        );
        self.system.failures.record(&self.envelope.id, &record).await?;

        self.system.stats.increment("failed").await?;
        self.system.stats.increment(&format!("failed:{worker_id}")).await?;

        self.system.events.fire(
            event_names::ON_FAILURE,
            &EventPayload::Message(error.to_string()),
        );

        Ok(())
    }
}

fn classify(error: &JobError) -> (&'static str, String, Vec<String>) {
    match error {
        JobError::DirtyExit(code) => (
            "DirtyExit",
            format!("child exited with status {code}"),
            vec![],
        ),
        JobError::JobThrew(msg) => ("JobThrew", msg.clone(), vec![msg.clone()]),
        JobError::JobNotCreatable(class) => (
            "JobNotCreatable",
            format!("class {class} could not be instantiated"),
            vec![],
        ),
        other => ("JobThrew", other.to_string(), vec![other.to_string()]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_is_32_lowercase_hex_chars() {
        let id = generate_job_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn envelope_args_serialize_as_single_element_array() {
        let envelope = Envelope::new("SendMail", Some(serde_json::json!({"to": "a@b.com"})), Some("abc".into()));
        let json = serde_json::to_string(&envelope).unwrap();
        assert_eq!(json, r#"{"class":"SendMail","args":[{"to":"a@b.com"}],"id":"abc"}"#);
    }

    #[test]
    fn envelope_without_args_serializes_as_null() {
        let envelope = Envelope::new("Cleanup", None, Some("xyz".into()));
        let json = serde_json::to_string(&envelope).unwrap();
        assert_eq!(json, r#"{"class":"Cleanup","args":null,"id":"xyz"}"#);
    }

    #[test]
    fn envelope_round_trips() {
        let envelope = Envelope::new("SendMail", Some(serde_json::json!({"x": 1})), None);
        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.class, "SendMail");
        assert_eq!(parsed.get_arguments(), vec![serde_json::json!({"x": 1})]);
    }

    #[test]
    fn get_arguments_empty_when_no_args() {
        let envelope = Envelope::new("Cleanup", None, None);
        assert!(envelope.get_arguments().is_empty());
    }

    #[test]
    fn classify_dirty_exit() {
        let (exception, message, _) = classify(&JobError::DirtyExit(7));
        assert_eq!(exception, "DirtyExit");
        assert!(message.contains('7'));
    }

    #[test]
    fn embedded_id_found_in_args_object() {
        let args = Some(serde_json::json!({"id": "caller-supplied", "x": 1}));
        assert_eq!(embedded_id(&args).as_deref(), Some("caller-supplied"));
    }

    #[test]
    fn embedded_id_absent_when_args_have_no_id() {
        assert_eq!(embedded_id(&Some(serde_json::json!({"x": 1}))), None);
        assert_eq!(embedded_id(&None), None);
    }

    #[test]
    fn create_prefers_explicit_id_over_embedded_one() {
        // `or_else` short-circuits: an explicit id always wins over one
        // embedded in args, matching §4.3's "generate id if not given".
        let explicit: Option<String> = Some("explicit".into());
        let resolved = explicit
            .clone()
            .or_else(|| embedded_id(&Some(serde_json::json!({"id": "embedded"}))));
        assert_eq!(resolved, explicit);
    }
}
