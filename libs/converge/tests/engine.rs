//! Behavior of `wait_for_state` against scripted resources.
//!
//! All tests run on a paused clock, so timeouts of minutes complete
//! instantly while elapsed time is still measured faithfully.

use std::sync::atomic::Ordering;
use std::time::Duration;

use kiln_converge::{refresh_fn, ConvergenceError, ConvergenceRequest, Observation, RefreshError};
use kiln_testing::{init_test_tracing, Scripted, ScriptedRefresh};
use tokio::sync::watch;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn target_reached_after_pending() {
    init_test_tracing();
    let refresh = ScriptedRefresh::states("srv-1", &["BUILD", "BUILD", "ACTIVE"]);
    let calls = refresh.calls();

    let done = ConvergenceRequest::new(refresh)
        .pending(["BUILD"])
        .target(["ACTIVE"])
        .wait()
        .await
        .unwrap();

    assert_eq!(done.resource, Some("srv-1"));
    assert_eq!(done.state, "ACTIVE");
    assert_eq!(done.polls, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn unexpected_state_fails_fast() {
    let refresh = ScriptedRefresh::states("srv-1", &["BUILD", "ERROR"]);
    let started = Instant::now();

    let err = ConvergenceRequest::new(refresh)
        .pending(["BUILD"])
        .target(["ACTIVE"])
        .timeout(Duration::from_secs(600))
        .wait()
        .await
        .unwrap_err();

    assert!(matches!(err, ConvergenceError::UnexpectedState { ref state, .. } if state == "ERROR"));
    assert_eq!(
        err.to_string(),
        "unexpected state 'ERROR', wanted target 'ACTIVE'"
    );
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn unknown_state_tolerated_without_pending_set() {
    let refresh = ScriptedRefresh::states(1u8, &["WHATEVER", "ACTIVE"]);

    let done = ConvergenceRequest::new(refresh)
        .target(["ACTIVE"])
        .wait()
        .await
        .unwrap();

    assert_eq!(done.polls, 2);
}

fn absent_then_active(absent: usize) -> ScriptedRefresh<&'static str> {
    let mut script: Vec<_> = (0..absent).map(|_| Scripted::absent()).collect();
    script.push(Scripted::found("vol-1", "available"));
    ScriptedRefresh::new(script)
}

#[tokio::test(start_paused = true)]
async fn not_found_tolerated_up_to_limit() {
    let k = 5;
    let done = ConvergenceRequest::new(absent_then_active(k as usize - 1))
        .pending(["creating"])
        .target(["available"])
        .not_found_checks(k)
        .wait()
        .await
        .unwrap();

    assert_eq!(done.polls, k);
}

#[tokio::test(start_paused = true)]
async fn not_found_exhausted() {
    let k = 5;
    let err = ConvergenceRequest::new(absent_then_active(k as usize - 1))
        .pending(["creating"])
        .target(["available"])
        .not_found_checks(k - 2)
        .wait()
        .await
        .unwrap_err();

    assert!(matches!(err, ConvergenceError::NotFound { retries: 4 }));
    assert_eq!(err.to_string(), "couldn't find resource (4 retries)");
}

#[tokio::test(start_paused = true)]
async fn not_found_counter_resets_on_presence() {
    let script = vec![
        Scripted::absent(),
        Scripted::absent(),
        Scripted::found("vol-1", "creating"),
        Scripted::absent(),
        Scripted::absent(),
        Scripted::found("vol-1", "available"),
    ];

    let done = ConvergenceRequest::new(ScriptedRefresh::new(script))
        .pending(["creating"])
        .target(["available"])
        .not_found_checks(2)
        .wait()
        .await
        .unwrap();

    assert_eq!(done.polls, 6);
}

#[tokio::test(start_paused = true)]
async fn timeout_respects_deadline_and_grace() {
    let timeout = Duration::from_secs(60);
    let grace = Duration::from_secs(30);
    let started = Instant::now();

    let err = ConvergenceRequest::new(ScriptedRefresh::states((), &["BUILD"]))
        .pending(["BUILD"])
        .target(["ACTIVE"])
        .timeout(timeout)
        .grace_period(grace)
        .wait()
        .await
        .unwrap_err();

    let elapsed = started.elapsed();
    assert!(elapsed >= timeout, "returned early: {elapsed:?}");
    assert!(elapsed <= timeout + grace, "returned late: {elapsed:?}");

    let ConvergenceError::Timeout(timeout_err) = err else {
        panic!("expected timeout, got {err:?}");
    };
    assert_eq!(timeout_err.last_state, "BUILD");
    assert_eq!(timeout_err.targets, vec!["ACTIVE"]);
}

#[tokio::test(start_paused = true)]
async fn stuck_poll_bounded_by_grace_period() {
    let timeout = Duration::from_secs(10);
    let grace = Duration::from_secs(5);
    let script = vec![
        Scripted::found((), "BUILD"),
        Scripted::found((), "ACTIVE").after(Duration::from_secs(3600)),
    ];
    let started = Instant::now();

    let err = ConvergenceRequest::new(ScriptedRefresh::new(script))
        .pending(["BUILD"])
        .target(["ACTIVE"])
        .timeout(timeout)
        .grace_period(grace)
        .wait()
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(started.elapsed(), timeout + grace);
}

#[tokio::test(start_paused = true)]
async fn late_result_within_grace_wins() {
    let script = vec![
        Scripted::found("img-1", "RUNNING"),
        Scripted::found("img-1", "SUCCESS").after(Duration::from_secs(15)),
    ];

    let done = ConvergenceRequest::new(ScriptedRefresh::new(script))
        .pending(["RUNNING"])
        .target(["SUCCESS"])
        .timeout(Duration::from_secs(10))
        .grace_period(Duration::from_secs(30))
        .wait()
        .await
        .unwrap();

    assert_eq!(done.state, "SUCCESS");
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_grace_period_is_not_a_timeout() {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let script = vec![
        Scripted::found((), "BUILD"),
        Scripted::found((), "ACTIVE").after(Duration::from_secs(3600)),
    ];
    let started = Instant::now();

    let wait = tokio::spawn(
        ConvergenceRequest::new(ScriptedRefresh::new(script))
            .pending(["BUILD"])
            .target(["ACTIVE"])
            .timeout(Duration::from_secs(10))
            .grace_period(Duration::from_secs(30))
            .cancel_on(cancel_rx)
            .wait(),
    );
    tokio::time::sleep(Duration::from_secs(15)).await;
    cancel_tx.send(true).unwrap();

    let err = wait.await.unwrap().unwrap_err();
    assert!(err.is_cancelled(), "{err:?}");
    assert!(!err.is_timeout());
    assert!(started.elapsed() < Duration::from_secs(40));
}

#[tokio::test(start_paused = true)]
async fn disappearance_timeout_names_the_wait() {
    let err = ConvergenceRequest::new(ScriptedRefresh::states("net-1", &["ACTIVE"]))
        .pending(["ACTIVE"])
        .timeout(Duration::from_secs(10))
        .grace_period(Duration::from_secs(1))
        .wait()
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(
        err.to_string(),
        "timeout while waiting for resource to be gone (last state: 'ACTIVE', timeout: 10s)"
    );
}

#[tokio::test(start_paused = true)]
async fn cancellation_before_second_poll_wins() {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let mut calls = 0u32;
    let refresh = refresh_fn(move || {
        calls += 1;
        if calls == 1 {
            let _ = cancel_tx.send(true);
        }
        let state = if calls >= 3 { "ACTIVE" } else { "BUILD" };
        async move { Ok::<_, RefreshError>(Observation::found(calls, state)) }
    });

    let err = ConvergenceRequest::new(refresh)
        .pending(["BUILD"])
        .target(["ACTIVE"])
        .cancel_on(cancel_rx)
        .wait()
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(!err.is_timeout());
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_first_poll() {
    let (cancel_tx, cancel_rx) = watch::channel(true);
    let refresh = ScriptedRefresh::states((), &["ACTIVE"]);
    let calls = refresh.calls();

    let err = ConvergenceRequest::new(refresh)
        .target(["ACTIVE"])
        .cancel_on(cancel_rx)
        .wait()
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    drop(cancel_tx);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_initial_delay() {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let started = Instant::now();

    let wait = tokio::spawn(
        ConvergenceRequest::new(ScriptedRefresh::states((), &["ACTIVE"]))
            .target(["ACTIVE"])
            .delay(Duration::from_secs(60))
            .cancel_on(cancel_rx)
            .wait(),
    );
    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel_tx.send(true).unwrap();

    let err = wait.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn absence_as_target() {
    let script = vec![
        Scripted::found("net-1", "ACTIVE"),
        Scripted::found("net-1", "ACTIVE"),
        Scripted::absent(),
    ];

    let done = ConvergenceRequest::new(ScriptedRefresh::new(script))
        .pending(["ACTIVE"])
        .wait()
        .await
        .unwrap();

    assert_eq!(done.resource, None);
    assert_eq!(done.polls, 3);
}

#[tokio::test(start_paused = true)]
async fn consecutive_target_occurrences() {
    let refresh = ScriptedRefresh::states(
        (),
        &["OK", "CREATING", "OK", "OK", "OK"],
    );

    let done = ConvergenceRequest::new(refresh)
        .pending(["CREATING"])
        .target(["OK"])
        .continuous_target_occurrence(3)
        .wait()
        .await
        .unwrap();

    assert_eq!(done.polls, 5);
}

#[tokio::test(start_paused = true)]
async fn refresh_error_carries_remote_failure() {
    let script = vec![
        Scripted::found("job-1", "RUNNING"),
        Scripted::error(RefreshError::with_state("FAIL", "quota exceeded for image")),
    ];

    let err = ConvergenceRequest::new(ScriptedRefresh::new(script))
        .pending(["INIT", "RUNNING"])
        .target(["SUCCESS"])
        .wait()
        .await
        .unwrap_err();

    assert_eq!(err.last_state(), Some("FAIL"));
    assert_eq!(err.to_string(), "quota exceeded for image");
}

#[tokio::test(start_paused = true)]
async fn refresh_error_keeps_last_observed_state() {
    let script = vec![
        Scripted::found((), "BUILD"),
        Scripted::error(RefreshError::new("connection reset")),
    ];

    let err = ConvergenceRequest::new(ScriptedRefresh::new(script))
        .pending(["BUILD"])
        .target(["ACTIVE"])
        .wait()
        .await
        .unwrap_err();

    assert_eq!(err.last_state(), Some("BUILD"));
}

#[tokio::test(start_paused = true)]
async fn fixed_poll_interval_is_used() {
    let started = Instant::now();

    let done = ConvergenceRequest::new(ScriptedRefresh::states((), &["BUILD", "BUILD", "ACTIVE"]))
        .pending(["BUILD"])
        .target(["ACTIVE"])
        .delay(Duration::from_secs(5))
        .poll_interval(Duration::from_secs(5))
        .wait()
        .await
        .unwrap();

    assert_eq!(done.polls, 3);
    assert_eq!(started.elapsed(), Duration::from_secs(15));
}
