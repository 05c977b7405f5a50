//! Stop escalation tests.
//!
//! All timing runs on a paused tokio clock, so the multi-second waits below
//! complete instantly.

mod common;

use common::FakeProcess;
use orchestra_lifecycle::process::{
    EscalationPolicy, FailedStage, ProcessRegistry, TermSignal, Termination, terminate,
};
use std::time::Duration;
use tokio::time::Instant;

const SECOND: Duration = Duration::from_secs(1);

// ============================================================================
// Documented Scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_scenario_graceful_exit_within_timeout() {
    let registry = ProcessRegistry::new();
    let fake = FakeProcess::new(100).ignoring_term().exits_in(SECOND).shared();
    registry.track("a", fake.clone());

    let start = Instant::now();
    assert!(registry.stop("a", 5 * SECOND).await);
    let elapsed = start.elapsed();

    assert_eq!(fake.signals(), vec![TermSignal::Graceful]);
    assert_eq!(fake.count_of(TermSignal::Kill), 0);
    assert_eq!(registry.count(), 0);
    assert!(elapsed >= SECOND && elapsed < 2 * SECOND, "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_scenario_forced_kill_after_timeout() {
    let registry = ProcessRegistry::new();
    let fake = FakeProcess::new(200).ignoring_term().shared();
    registry.track("b", fake.clone());

    let start = Instant::now();
    assert!(registry.stop("b", 2 * SECOND).await);

    assert_eq!(fake.signals(), vec![TermSignal::Graceful, TermSignal::Kill]);
    assert!(start.elapsed() >= 2 * SECOND);
    assert_eq!(registry.count(), 0);
    assert!(!registry.contains_pid(200));
}

#[tokio::test(start_paused = true)]
async fn test_scenario_concurrent_stops_remove_once() {
    let registry = ProcessRegistry::new();
    let fake = FakeProcess::new(300)
        .term_delay(Duration::from_millis(200))
        .shared();
    registry.track("c", fake.clone());

    let (first, second) = tokio::join!(registry.stop("c", SECOND), registry.stop("c", SECOND));

    assert!(first);
    assert!(second);
    assert_eq!(fake.signals(), vec![TermSignal::Graceful]);
    assert_eq!(registry.count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scenario_concurrent_stops_across_threads() {
    let registry = ProcessRegistry::new();
    let fake = FakeProcess::new(301)
        .term_delay(Duration::from_millis(200))
        .shared();
    registry.track("c", fake.clone());

    let stoppers: Vec<_> = (0..4)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.stop("c", SECOND).await })
        })
        .collect();

    for stopper in stoppers {
        assert!(stopper.await.expect("stop task panicked"));
    }
    assert_eq!(fake.signals(), vec![TermSignal::Graceful]);
    assert_eq!(registry.count(), 0);
    assert!(!registry.contains_pid(301));
}

// ============================================================================
// Edge Cases
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stop_untracked_is_true() {
    let registry = ProcessRegistry::new();
    assert!(registry.stop("ghost", 5 * SECOND).await);
}

#[tokio::test(start_paused = true)]
async fn test_stop_already_exited_sends_nothing() {
    let registry = ProcessRegistry::new();
    let fake = FakeProcess::new(100).exited().shared();
    registry.track("done", fake.clone());

    assert!(registry.stop("done", 5 * SECOND).await);
    assert!(fake.signals().is_empty());
    assert_eq!(registry.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_exit_between_poll_and_signal_counts_as_stopped() {
    let registry = ProcessRegistry::new();
    let fake = FakeProcess::new(100).vanishing_on_signal().shared();
    registry.track("racing", fake.clone());

    assert!(registry.is_running("racing"));
    assert!(registry.stop("racing", 5 * SECOND).await);
    assert!(fake.signals().is_empty());
    assert_eq!(registry.count(), 0);
    assert!(!registry.contains_pid(100));
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent() {
    let registry = ProcessRegistry::new();
    let fake = FakeProcess::new(100).shared();
    registry.track("once", fake.clone());

    assert!(registry.stop("once", 5 * SECOND).await);
    assert!(registry.stop("once", 5 * SECOND).await);
    assert_eq!(fake.signals(), vec![TermSignal::Graceful]);
}

#[tokio::test(start_paused = true)]
async fn test_zero_timeout_escalates_immediately() {
    let registry = ProcessRegistry::new();
    let fake = FakeProcess::new(100).ignoring_term().shared();
    registry.track("now", fake.clone());

    let start = Instant::now();
    assert!(registry.stop("now", Duration::ZERO).await);

    assert_eq!(fake.signals(), vec![TermSignal::Graceful, TermSignal::Kill]);
    assert!(start.elapsed() < SECOND);
    assert_eq!(registry.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_graceful_signal_failure_leaves_entry_tracked() {
    let registry = ProcessRegistry::new();
    let fake = FakeProcess::new(100).rejecting_graceful().shared();
    registry.track("locked", fake.clone());

    assert!(!registry.stop("locked", SECOND).await);
    assert!(fake.signals().is_empty());
    assert_eq!(registry.count(), 1);
    assert!(registry.contains_pid(100));
}

#[tokio::test(start_paused = true)]
async fn test_kill_failure_is_false_not_error() {
    let registry = ProcessRegistry::new();
    let fake = FakeProcess::new(100).ignoring_term().rejecting_kill().shared();
    registry.track("stubborn", fake.clone());

    assert!(!registry.stop("stubborn", SECOND).await);
    assert_eq!(fake.signals(), vec![TermSignal::Graceful]);
    assert_eq!(registry.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unkillable_process_times_out() {
    let registry = ProcessRegistry::with_kill_timeout(3 * SECOND);
    let fake = FakeProcess::new(100).ignoring_term().unkillable().shared();
    registry.track("stuck", fake.clone());

    let start = Instant::now();
    assert!(!registry.stop("stuck", SECOND).await);

    assert!(start.elapsed() >= 4 * SECOND);
    assert_eq!(fake.signals(), vec![TermSignal::Graceful, TermSignal::Kill]);
    assert!(registry.is_running("stuck"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_stop_can_be_retried() {
    let registry = ProcessRegistry::with_kill_timeout(SECOND);
    let stuck = FakeProcess::new(100).ignoring_term().unkillable().shared();
    registry.track("job", stuck.clone());
    assert!(!registry.stop("job", SECOND).await);

    let replacement = FakeProcess::new(101).shared();
    registry.track("job", replacement.clone());
    assert!(registry.stop("job", SECOND).await);

    assert_eq!(replacement.signals(), vec![TermSignal::Graceful]);
    assert_eq!(registry.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_retrack_during_stop_keeps_new_entry() {
    let registry = ProcessRegistry::new();
    let old = FakeProcess::new(100).term_delay(SECOND).shared();
    let new = FakeProcess::new(101).shared();
    registry.track("slot", old.clone());

    let stopper = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.stop("slot", 5 * SECOND).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    registry.track("slot", new.clone());

    assert!(stopper.await.expect("stop task panicked"));
    assert_eq!(registry.get("slot").and_then(|h| h.pid()), Some(101));
    assert!(registry.contains_pid(101));
    assert!(!registry.contains_pid(100));
    assert!(new.signals().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_all_is_best_effort() {
    let registry = ProcessRegistry::with_kill_timeout(SECOND);
    let ok = FakeProcess::new(100).shared();
    let slow = FakeProcess::new(101).ignoring_term().shared();
    let broken = FakeProcess::new(102).rejecting_graceful().shared();
    registry.track("ok", ok.clone());
    registry.track("slow", slow.clone());
    registry.track("broken", broken.clone());

    let summary = registry.stop_all(2 * SECOND).await;

    assert_eq!(summary.stopped, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(registry.list_tracked_ids().len(), 1);
    assert!(registry.get("broken").is_some());
    assert_eq!(slow.signals(), vec![TermSignal::Graceful, TermSignal::Kill]);
}

// ============================================================================
// Terminator
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_terminate_outcomes() {
    let policy = EscalationPolicy {
        grace: SECOND,
        kill_wait: SECOND,
    };

    let exited = FakeProcess::new(1).exited();
    assert_eq!(terminate(&exited, &policy, "t").await, Termination::AlreadyExited);

    let polite = FakeProcess::new(2);
    assert_eq!(terminate(&polite, &policy, "t").await, Termination::Graceful);

    let deaf = FakeProcess::new(3).ignoring_term();
    assert_eq!(terminate(&deaf, &policy, "t").await, Termination::Forced);

    let vanished = FakeProcess::new(8).vanishing_on_signal();
    assert_eq!(terminate(&vanished, &policy, "t").await, Termination::AlreadyExited);

    let locked = FakeProcess::new(4).rejecting_graceful();
    assert_eq!(
        terminate(&locked, &policy, "t").await,
        Termination::Failed(FailedStage::GracefulSignal)
    );

    let unkillable_signal = FakeProcess::new(5).ignoring_term().rejecting_kill();
    assert_eq!(
        terminate(&unkillable_signal, &policy, "t").await,
        Termination::Failed(FailedStage::KillSignal)
    );

    let stuck = FakeProcess::new(6).ignoring_term().unkillable();
    assert_eq!(
        terminate(&stuck, &policy, "t").await,
        Termination::Failed(FailedStage::KillWaitTimedOut)
    );
}
