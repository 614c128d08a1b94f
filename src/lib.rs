//! A Redis-backed distributed job queue, wire-compatible with the Resque
//! keyspace: producers push JSON envelopes onto plain Redis lists, workers
//! fork a child process per job, and the whole surface — queue names,
//! worker registry entries, failure records, job status, delayed jobs — is
//! readable and writable by any other Resque-speaking client sharing the
//! same Redis instance.
//!
//! # Layout
//!
//! - [`context`] — the namespaced Redis adapter every other component is
//!   handed explicitly, including the LOADING-retry loop and the
//!   fork-safety reconnection logic.
//! - [`job`] — the wire envelope and the create/reserve/recreate/perform/
//!   fail operations around it.
//! - [`factory`] — the name-to-constructor registry a job class must be
//!   registered with before a worker can run it.
//! - [`queue`] — push/pop/size/dequeue over the plain-list queue model,
//!   including the safe-dequeue rotation used by predicate-filtered
//!   removal.
//! - [`resolver`] — expands a worker's queue pattern (literals, `*`
//!   wildcards, `!` exclusions) against the live queue registry.
//! - [`registry`] — the worker registry and the host-process-table pruner.
//! - [`status`] — per-job status records.
//! - [`failure`] — failure records.
//! - [`stats`] — the `stat:<name>` integer counters.
//! - [`events`] — the process-local synchronous event bus fired at each
//!   worker lifecycle hook.
//! - [`signals`] — POSIX signal handling and graceful shutdown escalation.
//! - [`worker`] — the main loop tying all of the above together.
//! - [`delayed`] — the `_schdlr_` sorted-set extension for future-dated
//!   jobs.
//! - [`config`] — programmatic configuration for every component above.
//! - [`error`] — the shared error taxonomy.
//! - [`metrics`] — process-local Prometheus-style counters, distinct from
//!   the Redis `stat:` counters.
//! - [`telemetry`] — an optional `tracing-subscriber` init helper.
//!
//! # Example
//!
//! ```rust,ignore
//! use resqueue::config::{JobsConfig};
//! use resqueue::context::Context;
//! use resqueue::events::EventBus;
//! use resqueue::factory::JobRegistry;
//! use resqueue::job::JobSystem;
//! use resqueue::worker::Worker;
//!
//! #[tokio::main]
//! async fn main() -> resqueue::error::JobResult<()> {
//!     let config = JobsConfig::default();
//!     let ctx = Context::connect(&config.redis).await?;
//!
//!     let registry = JobRegistry::new();
//!     registry.register("SendMail", |_args, _queue| {
//!         Ok(Box::new(MyMailJob) as Box<dyn resqueue::factory::JobHandler>)
//!     });
//!
//!     let system = JobSystem::new(ctx, registry, EventBus::new());
//!     let worker = Worker::new(system, config.worker, vec!["mail".into()], None, None);
//!     worker.run().await
//! }
//! ```

pub mod config;
pub mod context;
pub mod delayed;
pub mod error;
pub mod events;
pub mod factory;
pub mod failure;
pub mod job;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod resolver;
pub mod signals;
pub mod status;
pub mod stats;
pub mod telemetry;
pub mod worker;

pub use config::{GracefulSignal, JobsConfig, RedisConfig, WorkerConfig};
pub use context::Context;
pub use delayed::{DelayedJobs, DelayedPromoter};
pub use error::{JobError, JobResult, Perform};
pub use events::{EventBus, EventPayload};
pub use factory::{HookOutcome, JobHandler, JobRegistry};
pub use failure::{FailureRecord, FailureRecorder};
pub use job::{Envelope, JobDescriptor, JobSystem};
pub use queue::{Predicate, QueueOps};
pub use registry::{Pruner, WorkerRegistry};
pub use resolver::{QueuePattern, QueueResolver};
pub use signals::SignalState;
pub use status::{Status, StatusRecord, StatusTracker};
pub use stats::Stats;
pub use worker::Worker;

/// Re-export of the handful of types most embedders touch directly.
pub mod prelude {
    pub use crate::config::{JobsConfig, WorkerConfig};
    pub use crate::context::Context;
    pub use crate::error::{JobError, JobResult, Perform};
    pub use crate::events::EventBus;
    pub use crate::factory::{JobHandler, JobRegistry};
    pub use crate::job::{JobDescriptor, JobSystem};
    pub use crate::worker::Worker;
}
