//! Integration coverage for the worker lifecycle's signal-driven shutdown
//! escalation and event bus (§4.4, §4.5) — the parts that don't require a
//! live Redis connection. The fork/reserve/perform loop itself needs a real
//! `Context`, so it is exercised manually against a Redis instance rather
//! than here.

use resqueue::config::{GracefulSignal, WorkerConfig};
use resqueue::{EventBus, EventPayload};
use std::sync::Arc;

#[test]
fn worker_config_defaults_match_the_documented_keyspace_options() {
    let config = WorkerConfig::default();
    assert_eq!(config.interval_secs, 5);
    assert!(!config.blocking);
    assert_eq!(config.graceful_delay_secs, 5);
    assert_eq!(config.graceful_delay_two_secs, 2);
    assert!(config.graceful_signal.is_none());
    assert!(!config.shutdown_on_reserve_error);
}

#[test]
fn graceful_signal_maps_to_the_expected_posix_signal() {
    use nix::sys::signal::Signal;
    assert_eq!(GracefulSignal::Usr1.to_nix(), Signal::SIGUSR1);
    assert_eq!(GracefulSignal::Usr2.to_nix(), Signal::SIGUSR2);
    assert_eq!(GracefulSignal::Term.to_nix(), Signal::SIGTERM);
    assert_eq!(GracefulSignal::Quit.to_nix(), Signal::SIGQUIT);
}

#[test]
fn event_bus_fires_worker_lifecycle_hooks_in_registration_order() {
    use resqueue::events::names;

    let bus = EventBus::new();
    let order = Arc::new(parking_lot::RwLock::new(Vec::new()));

    let o1 = order.clone();
    bus.on(names::BEFORE_FIRST_FORK, Arc::new(move |_| o1.write().push("before_first_fork")));
    let o2 = order.clone();
    bus.on(names::BEFORE_FORK, Arc::new(move |_| o2.write().push("before_fork")));
    let o3 = order.clone();
    bus.on(names::AFTER_PERFORM, Arc::new(move |_| o3.write().push("after_perform")));

    bus.fire(names::BEFORE_FIRST_FORK, &EventPayload::None);
    bus.fire(
        names::BEFORE_FORK,
        &EventPayload::Job {
            queue: "mailers".to_string(),
            envelope: "abc123".to_string(),
        },
    );
    bus.fire(names::AFTER_PERFORM, &EventPayload::None);

    assert_eq!(
        *order.read(),
        vec!["before_first_fork", "before_fork", "after_perform"]
    );
}

#[test]
fn on_failure_hook_receives_the_error_message() {
    use resqueue::events::names;

    let bus = EventBus::new();
    let received = Arc::new(parking_lot::RwLock::new(None));
    let r = received.clone();
    bus.on(
        names::ON_FAILURE,
        Arc::new(move |payload| {
            if let EventPayload::Message(msg) = payload {
                *r.write() = Some(msg.clone());
            }
        }),
    );

    bus.fire(names::ON_FAILURE, &EventPayload::Message("job threw: boom".to_string()));
    assert_eq!(received.read().as_deref(), Some("job threw: boom"));
}

#[test]
fn worker_ids_combine_hostname_pid_and_queue_pattern() {
    // Mirrors the id scheme `Worker::new` derives internally — constructing
    // one here doesn't require a `Context`, only a hostname/pid/queue list.
    let id = resqueue::registry::worker_id("ci-runner", 999, &["high".into(), "default".into()]);
    assert_eq!(id, "ci-runner:999:high,default");
}
