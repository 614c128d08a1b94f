//! The worker main loop (§4.4, §4.4.1): the heart of the system. A worker
//! reserves one envelope at a time, forks a child process to run it, and
//! waits for that child before reserving again — the fork boundary is what
//! keeps a leaking or crashing job from ever taking the worker process down
//! with it.

use crate::config::WorkerConfig;
use crate::error::{JobError, JobResult, Perform};
use crate::events::{names as event_names, EventPayload};
use crate::job::{JobDescriptor, JobSystem};
use crate::registry::{self, Pruner, WorkerRegistry};
use crate::resolver::{QueuePattern, QueueResolver};
use crate::signals::{self, SignalState};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::time::Instant;
use tracing::{error, info, warn};

/// A single worker process. Owns no OS threads of its own beyond whatever
/// the ambient tokio runtime provides for the main loop; each reserved job
/// runs in a freshly forked child.
pub struct Worker {
    id: String,
    hostname: String,
    pid: u32,
    pattern: QueuePattern,
    raw_queues: Vec<String>,
    system: JobSystem,
    registry: WorkerRegistry,
    resolver: QueueResolver,
    pruner: Pruner,
    config: WorkerConfig,
}

impl Worker {
    /// `queues` is the worker's pattern list in priority order (literals,
    /// `*` wildcards, `!` exclusions — §4.6). `hostname`/`pid` default to
    /// the OS hostname and the current process id.
    pub fn new(
        system: JobSystem,
        config: WorkerConfig,
        queues: Vec<String>,
        hostname: Option<String>,
        pid: Option<u32>,
    ) -> Self {
        let hostname = hostname.unwrap_or_else(default_hostname);
        let pid = pid.unwrap_or_else(std::process::id);
        let id = registry::worker_id(&hostname, pid, &queues);
        let pattern = QueuePattern::parse(&queues);
        let registry = WorkerRegistry::new(system.ctx.clone());
        let resolver = QueueResolver::new(system.ctx.clone());
        let pruner = Pruner::new(registry.clone());

        Self {
            id,
            hostname,
            pid,
            pattern,
            raw_queues: queues,
            system,
            registry,
            resolver,
            pruner,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sweep dead workers registered on this host before joining the pool
    /// (§4.6, §8 property 9).
    pub async fn prune_dead_workers(&self) -> JobResult<Vec<String>> {
        let pruned = self.pruner.prune(&self.hostname, self.pid).await?;
        if !pruned.is_empty() {
            crate::metrics::record_workers_pruned(pruned.len());
        }
        Ok(pruned)
    }

    /// Refreshes the process-local "active workers" gauge from the `workers`
    /// registry set. Best-effort: a transient Redis error here must not take
    /// the worker down, it just leaves the gauge stale until the next call.
    async fn report_active_workers(&self) {
        match self.registry.all_workers().await {
            Ok(workers) => crate::metrics::set_workers_active(workers.len()),
            Err(e) => warn!(worker = %self.id, error = %e, "failed to refresh active worker gauge"),
        }
    }

    /// Runs until the signal state's shutdown flag is set, or, in
    /// single-pass mode (`interval_secs == 0`), until a reservation attempt
    /// finds every resolved queue empty.
    pub async fn run(&self) -> JobResult<()> {
        info!(worker = %self.id, queues = ?self.raw_queues, "starting worker");

        let state = signals::install(self.config.clone(), self.system.ctx.clone())
            .map_err(|e| JobError::ConfigError(format!("failed to install signal handlers: {e}")))?;

        self.system.events.fire(event_names::BEFORE_FIRST_FORK, &EventPayload::None);
        self.registry.register(&self.id).await?;
        self.report_active_workers().await;

        let result = self.main_loop(&state).await;

        if let Err(e) = &result {
            error!(worker = %self.id, error = %e, "worker loop exited with error");
        }
        self.registry.unregister(&self.id).await?;
        self.report_active_workers().await;
        info!(worker = %self.id, "worker stopped");

        result
    }

    async fn main_loop(&self, state: &SignalState) -> JobResult<()> {
        loop {
            if state.should_shutdown() {
                return Ok(());
            }
            if state.is_paused() {
                if self.config.interval_secs == 0 {
                    return Ok(());
                }
                tokio::time::sleep(self.config.interval()).await;
                continue;
            }

            let queues = self.resolver.resolve(&self.pattern).await?;
            if queues.is_empty() {
                if self.config.interval_secs == 0 {
                    return Ok(());
                }
                tokio::time::sleep(self.config.interval()).await;
                continue;
            }

            let reserve_started = Instant::now();
            let reserved = self.reserve(&queues).await;
            crate::metrics::record_reserve_duration(reserve_started.elapsed());
            let job = match reserved {
                Ok(Some(job)) => job,
                Ok(None) => {
                    if self.config.interval_secs == 0 {
                        return Ok(());
                    }
                    tokio::time::sleep(self.config.interval()).await;
                    continue;
                }
                Err(JobError::RedisUnavailable(msg)) => {
                    error!(worker = %self.id, error = %msg, "Redis unavailable while reserving");
                    if self.config.shutdown_on_reserve_error {
                        return Err(JobError::RedisUnavailable(msg));
                    }
                    tokio::time::sleep(self.config.interval()).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.system.events.fire(
                event_names::BEFORE_FORK,
                &EventPayload::Job {
                    queue: job.queue.clone(),
                    envelope: job.envelope.id.clone(),
                },
            );

            self.registry
                .working_on(&self.id, &serde_json::to_string(&job.envelope)?)
                .await?;
            job.update_status(crate::status::Status::Running).await?;
            crate::metrics::record_reserved();

            let job_started = Instant::now();
            let clean_exit = self.fork_and_run(state, &job).await?;
            if clean_exit {
                crate::metrics::record_completed(job_started.elapsed());
            } else {
                crate::metrics::record_failed(job_started.elapsed());
            }

            self.registry.done_working(&self.id).await?;
            self.system.stats.increment("processed").await?;
            self.system.stats.increment(&format!("processed:{}", self.id)).await?;
        }
    }

    /// Polling reservation: walk the resolved queue list in order and take
    /// the first non-empty one. Blocking reservation instead issues a
    /// single `BLPOP` across all of them.
    async fn reserve(&self, queues: &[String]) -> JobResult<Option<JobDescriptor>> {
        if self.config.blocking {
            return JobDescriptor::reserve_blocking(&self.system, queues, self.config.interval_secs).await;
        }
        for queue in queues {
            if let Some(job) = JobDescriptor::reserve(&self.system, queue).await? {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    /// Forks a child to run `job.perform()`, waits for it, and routes a
    /// dirty exit back through `job.fail()` (§4.4.1). Returns whether the
    /// child exited cleanly, for the caller's metrics.
    async fn fork_and_run(&self, state: &SignalState, job: &JobDescriptor) -> JobResult<bool> {
        // SAFETY: the parent resumes the ambient tokio runtime unchanged;
        // the child never touches it — see `run_job_in_child`.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                state.set_child(Some(child));
                let status = wait_for_child(child);
                state.set_child(None);

                match status {
                    Ok(WaitStatus::Exited(_, 0)) => Ok(true),
                    Ok(WaitStatus::Exited(_, code)) => {
                        job.fail(&self.id, &JobError::DirtyExit(code)).await?;
                        Ok(false)
                    }
                    Ok(WaitStatus::Signaled(_, sig, _)) => {
                        job.fail(&self.id, &JobError::DirtyExit(128 + sig as i32)).await?;
                        Ok(false)
                    }
                    Ok(_) => Ok(true),
                    Err(e) => {
                        warn!(worker = %self.id, error = %e, "waitpid failed");
                        Ok(false)
                    }
                }
            }
            Ok(ForkResult::Child) => {
                run_job_in_child(&self.id, job);
                unreachable!("run_job_in_child always exits the process");
            }
            Err(e) => {
                error!(worker = %self.id, error = %e, "fork failed, requeueing");
                job.recreate().await?;
                Ok(false)
            }
        }
    }
}

/// Runs entirely inside the forked child. A multi-threaded tokio runtime
/// does not survive `fork()` — only the calling thread exists afterward —
/// so the child builds its own single-threaded runtime rather than reusing
/// the parent's, then exits the process directly instead of returning.
///
/// Always exits `0` once `perform` has returned: `Ran`, `Skipped`, and
/// `Failed` are all handled here (status updates, failure records, stats).
/// A non-zero or signalled exit therefore unambiguously means the child
/// died *before* reaching that point — a genuine dirty exit for the parent
/// to record via `JobDescriptor::fail`.
fn run_job_in_child(worker_id: &str, job: &JobDescriptor) -> ! {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(_) => std::process::exit(70),
    };

    let start = Instant::now();
    let outcome = runtime.block_on(async {
        let perform = job.perform(worker_id).await;
        match &perform {
            Perform::Ran => {
                let _ = job.update_status(crate::status::Status::Complete).await;
            }
            Perform::Skipped(reason) => {
                // Not a failure (§7 `DontPerform`): status is left as-is,
                // no stats are touched.
                crate::metrics::record_skipped();
                info!(job_id = %job.envelope.id, worker = worker_id, reason = %reason, "job skipped");
            }
            Perform::Failed(e) => {
                let _ = job.fail(worker_id, e).await;
            }
        }
        perform
    });

    info!(
        job_id = %job.envelope.id,
        worker = worker_id,
        outcome = %outcome,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "job finished in child"
    );

    std::process::exit(0)
}

fn wait_for_child(pid: Pid) -> nix::Result<WaitStatus> {
    loop {
        match waitpid(pid, None) {
            Err(nix::errno::Errno::EINTR) => continue,
            other => return other,
        }
    }
}

fn default_hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|s| s.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_id_combines_hostname_pid_and_queues() {
        let id = registry::worker_id("host1", 42, &["high".into(), "low".into()]);
        assert_eq!(id, "host1:42:high,low");
    }

    #[test]
    fn default_hostname_never_empty() {
        assert!(!default_hostname().is_empty());
    }
}
