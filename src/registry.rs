//! Worker registry and pruner (§3, §4.6): tracks live workers in Redis and
//! garbage-collects entries whose process no longer exists on this host.
//!
//! Liveness is decided by the host's process table, not by a Redis TTL or
//! heartbeat — a transiently crashed worker stays registered until the next
//! prune, which is intentional (§5).

use crate::context::Context;
use crate::error::JobResult;
use chrono::Utc;
use std::collections::HashSet;
use tracing::{info, warn};

const WORKERS_SET: &str = "workers";

/// `<hostname>:<pid>:<comma-joined-queue-pattern>` — stable for a worker's
/// lifetime (§4.4).
pub fn worker_id(hostname: &str, pid: u32, queues: &[String]) -> String {
    format!("{hostname}:{pid}:{}", queues.join(","))
}

/// Split a worker id back into `(hostname, pid)`. Returns `None` if it
/// doesn't have the expected two-colon-separated shape.
pub fn parse_worker_id(id: &str) -> Option<(&str, u32)> {
    let mut parts = id.splitn(3, ':');
    let host = parts.next()?;
    let pid: u32 = parts.next()?.parse().ok()?;
    parts.next()?;
    Some((host, pid))
}

#[derive(Clone)]
pub struct WorkerRegistry {
    ctx: Context,
}

impl WorkerRegistry {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// `SADD workers id` and write the started-at timestamp.
    pub async fn register(&self, worker_id: &str) -> JobResult<()> {
        self.ctx.sadd(WORKERS_SET, worker_id).await?;
        self.ctx
            .set(
                &started_key(worker_id),
                &Utc::now().format("%Y-%m-%d %H:%M:%S %z").to_string(),
            )
            .await
    }

    /// `SREM workers id`, delete the current-job and started keys, and
    /// clear this worker's `processed:`/`failed:` stats (§4.4 shutdown).
    pub async fn unregister(&self, worker_id: &str) -> JobResult<()> {
        self.ctx.srem(WORKERS_SET, worker_id).await?;
        self.ctx.del(&current_job_key(worker_id)).await?;
        self.ctx.del(&started_key(worker_id)).await?;
        self.ctx.del(&format!("stat:processed:{worker_id}")).await?;
        self.ctx.del(&format!("stat:failed:{worker_id}")).await?;
        Ok(())
    }

    /// Record the job currently being processed (`workingOn`).
    pub async fn working_on(&self, worker_id: &str, payload_json: &str) -> JobResult<()> {
        self.ctx.set(&current_job_key(worker_id), payload_json).await
    }

    /// Clear the current-job record (`doneWorking`).
    pub async fn done_working(&self, worker_id: &str) -> JobResult<()> {
        self.ctx.del(&current_job_key(worker_id)).await
    }

    pub async fn current_job(&self, worker_id: &str) -> JobResult<Option<String>> {
        self.ctx.get(&current_job_key(worker_id)).await
    }

    pub async fn all_workers(&self) -> JobResult<Vec<String>> {
        self.ctx.smembers(WORKERS_SET).await
    }
}

fn current_job_key(worker_id: &str) -> String {
    format!("worker:{worker_id}")
}

fn started_key(worker_id: &str) -> String {
    format!("worker:{worker_id}:started")
}

/// Mark-and-sweep garbage collector: for each registered worker whose host
/// matches this host, if its pid is absent from the host's process table
/// (and isn't this process's own pid), unregister it (§4.6, §8 property 9).
pub struct Pruner {
    registry: WorkerRegistry,
}

impl Pruner {
    pub fn new(registry: WorkerRegistry) -> Self {
        Self { registry }
    }

    /// Run one prune pass against `this_host`/`this_pid` (normally the
    /// worker's own hostname and `std::process::id()`). Returns the ids
    /// that were pruned.
    pub async fn prune(&self, this_host: &str, this_pid: u32) -> JobResult<Vec<String>> {
        let live_pids = live_resque_pids();
        let mut pruned = Vec::new();

        for id in self.registry.all_workers().await? {
            let Some((host, pid)) = parse_worker_id(&id) else {
                continue;
            };
            if host != this_host {
                continue;
            }
            if pid == this_pid || live_pids.contains(&pid) {
                continue;
            }
            warn!(worker = %id, "pruning dead worker");
            self.registry.unregister(&id).await?;
            pruned.push(id);
        }

        if !pruned.is_empty() {
            info!(count = pruned.len(), "pruned dead workers");
        }
        Ok(pruned)
    }
}

/// Pids on this host whose command looks like a resque-style worker.
/// Reads `/proc/<pid>/cmdline` on Linux; falls back to shelling out to a
/// portable `ps` invocation elsewhere (§9 design note).
fn live_resque_pids() -> HashSet<u32> {
    #[cfg(target_os = "linux")]
    {
        read_proc_pids()
    }
    #[cfg(not(target_os = "linux"))]
    {
        read_ps_pids()
    }
}

#[cfg(target_os = "linux")]
fn read_proc_pids() -> HashSet<u32> {
    let mut pids = HashSet::new();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return read_ps_pids();
    };
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        let cmdline_path = entry.path().join("cmdline");
        if let Ok(cmdline) = std::fs::read(&cmdline_path) {
            let cmdline = String::from_utf8_lossy(&cmdline).replace('\0', " ");
            if cmdline.to_lowercase().contains("resque") {
                pids.insert(pid);
            }
        }
    }
    pids
}

fn read_ps_pids() -> HashSet<u32> {
    let output = std::process::Command::new("ps").args(["-A", "-o", "pid,comm"]).output();
    let Ok(output) = output else {
        return HashSet::new();
    };
    let text = String::from_utf8_lossy(&output.stdout);
    text.lines()
        .skip(1)
        .filter(|line| line.to_lowercase().contains("resque"))
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|pid| pid.parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_id_round_trips() {
        let id = worker_id("host1", 123, &["high".into(), "low".into()]);
        assert_eq!(id, "host1:123:high,low");
        assert_eq!(parse_worker_id(&id), Some(("host1", 123)));
    }

    #[test]
    fn parse_rejects_malformed_ids() {
        assert_eq!(parse_worker_id("not-a-worker-id"), None);
        assert_eq!(parse_worker_id("host:notanumber:q"), None);
    }

    #[test]
    fn current_job_key_format() {
        assert_eq!(current_job_key("host:1:q"), "worker:host:1:q");
        assert_eq!(started_key("host:1:q"), "worker:host:1:q:started");
    }
}
