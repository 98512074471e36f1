//! Fixed-timestep frame scheduler for Outpost.
//!
//! The server is driven by wall-clock milliseconds handed in from outside.
//! Elapsed time accumulates in a residual; every whole tick period in the
//! residual becomes exactly one simulation tick, and whatever is left over
//! carries into the next call. Server time is an `i32` millisecond counter
//! that only moves when a tick is realized.
//!
//! # Integration
//!
//! The scheduler does no I/O of its own. The server core feeds it and asks
//! it questions, in this order:
//!
//! ```ignore
//! scheduler.add_elapsed(msec);
//! if let Some(idle) = scheduler.idle_time() { return idle; }   // dedicated only
//! if let Some(reason) = scheduler.check_wrap(entities, headroom) { restart(reason); }
//! if scheduler.take_due_restart() { restart_map(); }
//! while let Some(time) = scheduler.next_tick() {
//!     simulation.run_frame(time);
//!     scheduler.record_tick_end();
//! }
//! ```
//!
//! The async runner races [`FrameScheduler::idle_time`] against socket
//! readiness to avoid busy-spinning between ticks.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Server time past which the scheduler demands a restart rather than
/// letting the millisecond counter overflow.
pub const TIME_WRAP_THRESHOLD: i32 = 0x7000_0000;

/// Upper bound for the simulation's cumulative entity counter.
pub const ENTITY_WRAP_LIMIT: u32 = 0x7FFF_FFFE;

/// Full configuration for the frame scheduler.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Simulation frames per second (`sv_fps`). Values below 1 are
    /// corrected to [`TickConfig::CORRECTED_FPS`].
    pub fps: i32,
    /// Budget warning threshold (0.0–1.0). Default: 0.80 (80%).
    pub budget_warn_threshold: f64,
    /// Budget critical threshold (0.0–1.0). Default: 1.0 (100%).
    pub budget_critical_threshold: f64,
    /// Enable per-tick metrics collection.
    pub metrics_enabled: bool,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            fps: Self::DEFAULT_FPS,
            budget_warn_threshold: 0.80,
            budget_critical_threshold: 1.0,
            metrics_enabled: true,
        }
    }
}

impl TickConfig {
    /// Tick rate used when the configured one is unusable.
    pub const DEFAULT_FPS: i32 = 20;

    /// Rate `sv_fps` is forced to when it drops below 1.
    pub const CORRECTED_FPS: i32 = 10;

    /// Create a config for a specific tick rate with sensible defaults.
    pub fn with_fps(fps: i32) -> Self {
        Self {
            fps,
            ..Default::default()
        }
    }

    /// Clamp and fix any out-of-range values so the config is safe to use.
    ///
    /// - `fps < 1` becomes [`Self::CORRECTED_FPS`]; above 1000 it is capped.
    /// - Thresholds clamped to `0.0..=1.0`.
    /// - `budget_warn_threshold` forced ≤ `budget_critical_threshold`.
    pub fn validated(mut self) -> Self {
        if self.fps < 1 {
            warn!(fps = self.fps, "sv_fps below 1, using {}", Self::CORRECTED_FPS);
            self.fps = Self::CORRECTED_FPS;
        } else if self.fps > 1000 {
            warn!(fps = self.fps, "sv_fps above 1000, clamping");
            self.fps = 1000;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self.budget_critical_threshold = self.budget_critical_threshold.clamp(0.0, 1.0);
        if self.budget_warn_threshold > self.budget_critical_threshold {
            self.budget_warn_threshold = self.budget_critical_threshold;
        }
        self
    }

    /// Length of one tick in milliseconds.
    pub fn frame_msec(&self) -> i32 {
        (1000 / self.fps.max(1)).max(1)
    }
}

// ---------------------------------------------------------------------------
// Wrap detection
// ---------------------------------------------------------------------------

/// Why the scheduler wants a full restart instead of another tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapReason {
    /// Server time crossed [`TIME_WRAP_THRESHOLD`].
    Time,
    /// The simulation's entity counter would pass [`ENTITY_WRAP_LIMIT`].
    Entities,
}

impl fmt::Display for WrapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time => f.write_str("Restarting server due to time wrapping"),
            Self::Entities => {
                f.write_str("Restarting server due to numSnapshotEntities wrapping")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Runtime metrics for the frame scheduler.
///
/// Timing values refer to the simulation work reported via
/// [`FrameScheduler::record_tick_end`].
#[derive(Debug, Clone, Default)]
pub struct TickMetrics {
    /// Total ticks realized.
    pub total_ticks: u64,
    /// Ticks whose work exceeded the critical budget threshold.
    pub total_overruns: u64,
    /// Exponential moving average of tick execution time (α = 0.1).
    pub avg_tick_time: Duration,
    /// Maximum tick execution time observed.
    pub max_tick_time: Duration,
    /// Budget utilization of the last measured tick. >1.0 means overrun.
    pub budget_utilization: f64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-timestep accumulator. One per server.
#[derive(Debug)]
pub struct FrameScheduler {
    config: TickConfig,
    frame_msec: i32,
    residual: i32,
    server_time: i32,
    restart_time: Option<i32>,
    /// Wall-clock instant the current tick's work started.
    /// Set by `next_tick`, consumed by `record_tick_end`.
    tick_start: Option<Instant>,
    metrics: TickMetrics,
}

impl FrameScheduler {
    /// Create a scheduler from config. Server time starts at zero.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let frame_msec = config.frame_msec();

        debug!(fps = config.fps, frame_msec, "frame scheduler created");

        Self {
            config,
            frame_msec,
            residual: 0,
            server_time: 0,
            restart_time: None,
            tick_start: None,
            metrics: TickMetrics::default(),
        }
    }

    /// Create a scheduler for a specific tick rate with default settings.
    pub fn with_fps(fps: i32) -> Self {
        Self::new(TickConfig::with_fps(fps))
    }

    /// Change the tick rate. The residual is kept.
    pub fn set_fps(&mut self, fps: i32) {
        let config = TickConfig {
            fps,
            ..self.config.clone()
        }
        .validated();
        if config.fps != self.config.fps {
            debug!(from = self.config.fps, to = config.fps, "tick rate changed");
        }
        self.frame_msec = config.frame_msec();
        self.config = config;
    }

    /// Adds elapsed wall time to the residual. Negative input is ignored.
    pub fn add_elapsed(&mut self, msec: i32) {
        self.residual = self.residual.saturating_add(msec.max(0));
    }

    /// How long until the next tick is due, or `None` if one is due now.
    pub fn idle_time(&self) -> Option<Duration> {
        (self.residual < self.frame_msec)
            .then(|| Duration::from_millis((self.frame_msec - self.residual) as u64))
    }

    /// Whether the residual holds at least one whole tick.
    pub fn tick_due(&self) -> bool {
        self.residual >= self.frame_msec
    }

    /// Consumes one tick period from the residual and advances server time.
    ///
    /// Returns the new server time, or `None` once the residual is below a
    /// whole period.
    pub fn next_tick(&mut self) -> Option<i32> {
        if !self.tick_due() {
            return None;
        }
        self.residual -= self.frame_msec;
        self.server_time = self.server_time.wrapping_add(self.frame_msec);
        self.metrics.total_ticks += 1;
        self.tick_start = Some(Instant::now());
        trace!(server_time = self.server_time, residual = self.residual, "tick");
        Some(self.server_time)
    }

    /// Adds `msec` and realizes every whole tick it completes.
    ///
    /// Returns the number of ticks realized; the remainder stays in the
    /// residual for the next call.
    pub fn advance(&mut self, msec: i32) -> u32 {
        self.add_elapsed(msec);
        let mut ticks = 0;
        while self.next_tick().is_some() {
            ticks += 1;
        }
        ticks
    }

    /// Checks both counters for impending wraparound.
    ///
    /// `entity_counter` is the simulation's cumulative entity count and
    /// `entity_headroom` how many it may add in one frame.
    pub fn check_wrap(&self, entity_counter: u32, entity_headroom: u32) -> Option<WrapReason> {
        if self.server_time > TIME_WRAP_THRESHOLD {
            return Some(WrapReason::Time);
        }
        if entity_counter >= ENTITY_WRAP_LIMIT.saturating_sub(entity_headroom) {
            return Some(WrapReason::Entities);
        }
        None
    }

    /// Arranges a restart once server time reaches `at`.
    pub fn schedule_restart(&mut self, at: i32) {
        debug!(at, now = self.server_time, "restart scheduled");
        self.restart_time = Some(at);
    }

    /// Server time of the pending restart, if any.
    pub fn restart_time(&self) -> Option<i32> {
        self.restart_time
    }

    /// Clears a pending restart without running it.
    pub fn cancel_restart(&mut self) {
        self.restart_time = None;
    }

    /// Returns `true` exactly once when the pending restart is due.
    pub fn take_due_restart(&mut self) -> bool {
        match self.restart_time {
            Some(at) if self.server_time >= at => {
                self.restart_time = None;
                true
            }
            _ => false,
        }
    }

    /// Resets server time and residual after a full restart.
    pub fn reset_time(&mut self) {
        debug!(server_time = self.server_time, "server time reset");
        self.server_time = 0;
        self.residual = 0;
        self.restart_time = None;
    }

    /// Record that the simulation work for the current tick has finished.
    ///
    /// Feeds budget monitoring and metrics. Without a preceding
    /// [`next_tick`](Self::next_tick) this does nothing.
    pub fn record_tick_end(&mut self) {
        let Some(start) = self.tick_start.take() else {
            return;
        };
        let elapsed = start.elapsed();
        let budget = Duration::from_millis(self.frame_msec as u64);

        let utilization = elapsed.as_secs_f64() / budget.as_secs_f64();
        self.metrics.budget_utilization = utilization;

        if utilization >= self.config.budget_critical_threshold {
            self.metrics.total_overruns += 1;
            warn!(
                server_time = self.server_time,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = self.frame_msec,
                utilization_pct = format!("{:.1}", utilization * 100.0),
                "CRITICAL: tick exceeded budget"
            );
        } else if utilization >= self.config.budget_warn_threshold {
            warn!(
                server_time = self.server_time,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = self.frame_msec,
                utilization_pct = format!("{:.1}", utilization * 100.0),
                "tick approaching budget limit"
            );
        }

        if self.config.metrics_enabled {
            if elapsed > self.metrics.max_tick_time {
                self.metrics.max_tick_time = elapsed;
            }
            let alpha = 0.1;
            let prev = self.metrics.avg_tick_time.as_secs_f64();
            let curr = elapsed.as_secs_f64();
            self.metrics.avg_tick_time =
                Duration::from_secs_f64(prev * (1.0 - alpha) + curr * alpha);
        }
    }

    /// Current server time in milliseconds.
    pub fn server_time(&self) -> i32 {
        self.server_time
    }

    /// Milliseconds accumulated toward the next tick.
    pub fn residual(&self) -> i32 {
        self.residual
    }

    /// Length of one tick in milliseconds.
    pub fn frame_msec(&self) -> i32 {
        self.frame_msec
    }

    /// The effective tick rate.
    pub fn fps(&self) -> i32 {
        self.config.fps
    }

    /// Snapshot of current metrics.
    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new(TickConfig::default())
    }
}

/// Whether a requested pause actually stops the frame.
///
/// Only a lone human (or nobody) may pause; with two or more humans
/// connected the request is ignored.
pub fn pause_applies(requested: bool, humans: usize) -> bool {
    requested && humans <= 1
}
