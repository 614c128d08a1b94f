//! Signal-driven lifecycle (§4.5): POSIX signal semantics with graceful
//! shutdown escalation.
//!
//! True async-signal-safe handlers can only set flags — the rest of the
//! escalation logic described in §4.5 (checking the child's liveness,
//! deciding which signal to send next, re-arming the alarm) needs a normal
//! execution context. `tokio::signal::unix` already buys us that: it moves
//! the actual OS signal delivery through a self-pipe and wakes an async
//! task, so the task body below can carry the full state machine rather
//! than being restricted to flag-setting the way a raw C handler would be.

use crate::config::WorkerConfig;
use crate::context::Context;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tracing::{error, info, warn};

/// Shared flags the worker main loop polls every iteration.
#[derive(Clone)]
pub struct SignalState {
    shutdown: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    child_pid: Arc<Mutex<Option<Pid>>>,
    pending_signal: Arc<Mutex<Signal>>,
    escalated: Arc<AtomicBool>,
}

impl SignalState {
    pub fn new() -> Self {
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            child_pid: Arc::new(Mutex::new(None)),
            pending_signal: Arc::new(Mutex::new(Signal::SIGKILL)),
            escalated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Called by the worker right after a successful `fork()`, and cleared
    /// once the child has been reaped.
    pub fn set_child(&self, pid: Option<Pid>) {
        *self.child_pid.lock() = pid;
        self.escalated.store(false, Ordering::Release);
        *self.pending_signal.lock() = Signal::SIGKILL;
    }
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs signal handlers for the lifetime of the process and returns the
/// shared state the worker loop reads from. `config` supplies the graceful
/// delay/signal settings; `ctx` is reconnected on `PIPE`.
pub fn install(config: WorkerConfig, ctx: Context) -> std::io::Result<SignalState> {
    let state = SignalState::new();

    spawn_handler(SignalKind::terminate(), {
        let state = state.clone();
        let config = config.clone();
        move || on_term(&state, &config)
    })?;
    spawn_handler(SignalKind::interrupt(), {
        let state = state.clone();
        move || on_int(&state)
    })?;
    spawn_handler(SignalKind::quit(), {
        let state = state.clone();
        move || on_quit(&state)
    })?;
    spawn_handler(SignalKind::user_defined1(), {
        let state = state.clone();
        move || on_kill_child_now(&state)
    })?;
    spawn_handler(SignalKind::user_defined2(), {
        let state = state.clone();
        move || state.paused.store(true, Ordering::Release)
    })?;
    spawn_handler(SignalKind::from_raw(libc_sigcont()), {
        let state = state.clone();
        move || state.paused.store(false, Ordering::Release)
    })?;
    spawn_handler(SignalKind::alarm(), {
        let state = state.clone();
        let config = config.clone();
        move || on_alarm(&state, &config)
    })?;
    spawn_handler(SignalKind::pipe(), {
        let ctx = ctx.clone();
        move || ctx.invalidate()
    })?;

    Ok(state)
}

fn spawn_handler<F>(kind: SignalKind, mut on_signal: F) -> std::io::Result<()>
where
    F: FnMut() + Send + 'static,
{
    let mut stream = unix_signal(kind)?;
    tokio::spawn(async move {
        loop {
            if stream.recv().await.is_none() {
                break;
            }
            on_signal();
        }
    });
    Ok(())
}

fn on_term(state: &SignalState, config: &WorkerConfig) {
    info!("SIGTERM received, starting graceful shutdown");
    state.shutdown.store(true, Ordering::Release);
    if state.child_pid.lock().is_none() {
        return;
    }
    if let Some(secondary) = config.graceful_signal {
        *state.pending_signal.lock() = secondary.to_nix();
    }
    arm_alarm(config.graceful_delay_secs);
}

fn on_int(state: &SignalState) {
    info!("SIGINT received, shutting down immediately");
    state.shutdown.store(true, Ordering::Release);
    send_to_child(state, Signal::SIGKILL);
}

fn on_quit(state: &SignalState) {
    info!("SIGQUIT received, finishing current job and exiting");
    state.shutdown.store(true, Ordering::Release);
}

fn on_kill_child_now(state: &SignalState) {
    let pending = *state.pending_signal.lock();
    send_to_child(state, pending);
}

fn on_alarm(state: &SignalState, config: &WorkerConfig) {
    let already_escalated = state.escalated.swap(true, Ordering::AcqRel);
    let pending = *state.pending_signal.lock();

    if !already_escalated && pending != Signal::SIGKILL {
        // First ALRM after TERM with a configured secondary signal: send
        // it, then arm the final countdown to KILL.
        send_to_child(state, pending);
        *state.pending_signal.lock() = Signal::SIGKILL;
        arm_alarm(config.graceful_delay_two_secs);
    } else {
        send_to_child(state, Signal::SIGKILL);
    }
}

fn send_to_child(state: &SignalState, sig: Signal) {
    let Some(pid) = *state.child_pid.lock() else {
        return;
    };
    // A reused pid must never be signalled; treat absence as already dead.
    if signal::kill(pid, None).is_err() {
        error!(pid = pid.as_raw(), "child pid no longer present, treating as exited");
        state.shutdown.store(true, Ordering::Release);
        return;
    }
    if let Err(e) = signal::kill(pid, sig) {
        warn!(pid = pid.as_raw(), signal = ?sig, error = %e, "failed to signal child");
    }
}

fn arm_alarm(secs: u64) {
    nix::unistd::alarm::set(secs as u32);
}

fn libc_sigcont() -> std::ffi::c_int {
    // `SignalKind` has no named constructor for SIGCONT; its raw number is
    // stable across POSIX platforms this crate targets.
    #[cfg(target_os = "linux")]
    {
        18
    }
    #[cfg(not(target_os = "linux"))]
    {
        19
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pending_signal_is_kill() {
        let state = SignalState::new();
        assert_eq!(*state.pending_signal.lock(), Signal::SIGKILL);
    }

    #[test]
    fn pause_and_resume_flags() {
        let state = SignalState::new();
        assert!(!state.is_paused());
        state.paused.store(true, Ordering::Release);
        assert!(state.is_paused());
        state.paused.store(false, Ordering::Release);
        assert!(!state.is_paused());
    }

    #[test]
    fn setting_child_resets_escalation() {
        let state = SignalState::new();
        state.escalated.store(true, Ordering::Release);
        *state.pending_signal.lock() = Signal::SIGUSR1;
        state.set_child(Some(Pid::from_raw(999999)));
        assert!(!state.escalated.load(Ordering::Acquire));
        assert_eq!(*state.pending_signal.lock(), Signal::SIGKILL);
    }
}
