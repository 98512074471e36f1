//! Integration tests for the fixed-timestep frame scheduler.
//!
//! Elapsed time is fed in explicitly, so every test is synchronous.

use std::time::Duration;

use outpost_tick::{
    ENTITY_WRAP_LIMIT, FrameScheduler, TIME_WRAP_THRESHOLD, TickConfig, WrapReason,
};

// =========================================================================
// Helpers
// =========================================================================

/// 20 Hz: one tick every 50 ms.
fn scheduler_20hz() -> FrameScheduler {
    FrameScheduler::with_fps(20)
}

// =========================================================================
// TickConfig
// =========================================================================

#[test]
fn test_default_config_is_20hz() {
    let cfg = TickConfig::default();
    assert_eq!(cfg.fps, 20);
    assert_eq!(cfg.frame_msec(), 50);
}

#[test]
fn test_fps_below_one_is_corrected_to_10() {
    let s = FrameScheduler::with_fps(0);
    assert_eq!(s.fps(), 10);
    assert_eq!(s.frame_msec(), 100);

    let s = FrameScheduler::with_fps(-5);
    assert_eq!(s.fps(), 10);
}

#[test]
fn test_set_fps_keeps_residual() {
    let mut s = scheduler_20hz();
    s.add_elapsed(30);
    s.set_fps(40);
    assert_eq!(s.frame_msec(), 25);
    assert_eq!(s.residual(), 30);
    assert!(s.tick_due());
}

// =========================================================================
// Accumulation
// =========================================================================

#[test]
fn test_two_and_a_half_periods_realize_two_ticks() {
    let mut s = scheduler_20hz();

    let ticks = s.advance(125);

    assert_eq!(ticks, 2);
    assert_eq!(s.residual(), 25);
    assert_eq!(s.server_time(), 100);
}

#[test]
fn test_remainder_carries_across_calls() {
    let mut s = scheduler_20hz();

    assert_eq!(s.advance(125), 2);
    // 25 left over + 25 more completes the third tick.
    assert_eq!(s.advance(25), 1);
    assert_eq!(s.residual(), 0);
    assert_eq!(s.server_time(), 150);
}

#[test]
fn test_short_elapsed_realizes_nothing() {
    let mut s = scheduler_20hz();
    assert_eq!(s.advance(49), 0);
    assert_eq!(s.server_time(), 0);
    assert_eq!(s.residual(), 49);
}

#[test]
fn test_negative_elapsed_is_ignored() {
    let mut s = scheduler_20hz();
    s.add_elapsed(-100);
    assert_eq!(s.residual(), 0);
}

#[test]
fn test_next_tick_yields_increasing_times() {
    let mut s = scheduler_20hz();
    s.add_elapsed(150);

    let times: Vec<i32> = std::iter::from_fn(|| s.next_tick()).collect();
    assert_eq!(times, vec![50, 100, 150]);
    assert_eq!(s.next_tick(), None);
}

// =========================================================================
// Idle time
// =========================================================================

#[test]
fn test_idle_time_reports_remaining_period() {
    let mut s = scheduler_20hz();
    s.add_elapsed(20);
    assert_eq!(s.idle_time(), Some(Duration::from_millis(30)));

    s.add_elapsed(30);
    assert_eq!(s.idle_time(), None);
}

// =========================================================================
// Wraparound
// =========================================================================

#[test]
fn test_no_wrap_in_normal_operation() {
    let s = scheduler_20hz();
    assert_eq!(s.check_wrap(1000, 64), None);
}

#[test]
fn test_time_wrap_detected_past_threshold() {
    let mut s = FrameScheduler::with_fps(1);
    // Drive time past the threshold in one large step.
    s.advance(TIME_WRAP_THRESHOLD + 1000);
    assert!(s.server_time() > TIME_WRAP_THRESHOLD);
    assert_eq!(s.check_wrap(0, 0), Some(WrapReason::Time));

    s.reset_time();
    assert_eq!(s.server_time(), 0);
    assert_eq!(s.check_wrap(0, 0), None);
}

#[test]
fn test_entity_wrap_accounts_for_headroom() {
    let s = scheduler_20hz();
    assert_eq!(s.check_wrap(ENTITY_WRAP_LIMIT - 100, 50), None);
    assert_eq!(
        s.check_wrap(ENTITY_WRAP_LIMIT - 100, 100),
        Some(WrapReason::Entities)
    );
}

// =========================================================================
// Scheduled restart
// =========================================================================

#[test]
fn test_restart_fires_once_when_due() {
    let mut s = scheduler_20hz();
    s.schedule_restart(100);

    s.advance(50);
    assert!(!s.take_due_restart());

    s.advance(50);
    assert!(s.take_due_restart());
    assert!(!s.take_due_restart());
    assert_eq!(s.restart_time(), None);
}

#[test]
fn test_cancel_restart() {
    let mut s = scheduler_20hz();
    s.schedule_restart(0);
    s.cancel_restart();
    assert!(!s.take_due_restart());
}

// =========================================================================
// Metrics
// =========================================================================

#[test]
fn test_initial_metrics_are_zero() {
    let s = scheduler_20hz();
    let m = s.metrics();
    assert_eq!(m.total_ticks, 0);
    assert_eq!(m.total_overruns, 0);
    assert_eq!(m.avg_tick_time, Duration::ZERO);
    assert_eq!(m.max_tick_time, Duration::ZERO);
}

#[test]
fn test_metrics_count_realized_ticks() {
    let mut s = scheduler_20hz();
    s.add_elapsed(200);
    while s.next_tick().is_some() {
        s.record_tick_end();
    }
    assert_eq!(s.metrics().total_ticks, 4);
}

#[test]
fn test_record_tick_end_without_tick_is_noop() {
    let mut s = scheduler_20hz();
    s.record_tick_end();
    assert_eq!(s.metrics().max_tick_time, Duration::ZERO);
}

#[test]
fn test_metrics_max_tick_time_tracked() {
    let mut s = scheduler_20hz();
    s.add_elapsed(50);
    s.next_tick();
    // record_tick_end measures wall-clock time.
    std::thread::sleep(Duration::from_micros(50));
    s.record_tick_end();

    assert!(s.metrics().max_tick_time > Duration::ZERO);
    assert!(s.metrics().budget_utilization > 0.0);
}

#[test]
fn test_metrics_disabled_skips_avg_update() {
    let mut s = FrameScheduler::new(TickConfig {
        metrics_enabled: false,
        ..TickConfig::with_fps(20)
    });
    s.add_elapsed(50);
    s.next_tick();
    std::thread::sleep(Duration::from_micros(50));
    s.record_tick_end();

    assert_eq!(s.metrics().avg_tick_time, Duration::ZERO);
    assert_eq!(s.metrics().max_tick_time, Duration::ZERO);
}
