//! Wallclock: a clock driven by a dedicated thread in real time.
//!
//! In `sync` mode every tick is scheduled at `t0 + frame_duration * n`; the
//! thread sleeps off the remainder and accounts for overruns. With `sync`
//! off, pacing is delegated to the attached sources' own blocking I/O (see
//! the self-sync clock) and the loop ticks as fast as the sources let it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::clock::{Clock, SchedulerClock, SourceFilter, StartupThunk};
use crate::collector;

/// Consecutive silent overruns tolerated before a catch-up warning.
const OVERRUN_WARN_THRESHOLD: u32 = 100;
const LATENCY_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// A clock whose ticks are produced by an internal driving thread.
pub struct Wallclock {
    base: Clock,
    frame_duration: f64,
    max_latency: f64,
    sync: AtomicBool,
    running: Mutex<bool>,
}

/// Clock kinds that own a wallclock driving thread.
pub(crate) trait DrivenClock: SchedulerClock {
    fn wallclock(&self) -> &Wallclock;
}

impl Wallclock {
    /// Create and register a wallclock using the configured timing.
    pub fn new(id: &str, sync: bool) -> Arc<Self> {
        let config = collector::config();
        Self::new_with(id, sync, config.frame_duration, config.max_latency)
    }

    /// Create and register a wallclock with explicit timing.
    pub fn new_with(id: &str, sync: bool, frame_duration: f64, max_latency: f64) -> Arc<Self> {
        let allow = collector::config().allow_streaming_errors;
        Self::new_configured(id, sync, frame_duration, max_latency, allow)
    }

    /// Registration path that takes every knob explicitly, so the collector
    /// can build the default clock while it already holds the global lock.
    pub(crate) fn new_configured(
        id: &str,
        sync: bool,
        frame_duration: f64,
        max_latency: f64,
        allow_streaming_errors: bool,
    ) -> Arc<Self> {
        let clock = Arc::new(Self::unregistered(
            id,
            sync,
            frame_duration,
            max_latency,
            allow_streaming_errors,
        ));
        collector::register_clock(&(Arc::clone(&clock) as Arc<dyn SchedulerClock>));
        clock
    }

    pub(crate) fn unregistered(
        id: &str,
        sync: bool,
        frame_duration: f64,
        max_latency: f64,
        allow_streaming_errors: bool,
    ) -> Self {
        Self {
            base: Clock::unregistered(collector::unique_clock_name(id), allow_streaming_errors),
            frame_duration,
            max_latency,
            sync: AtomicBool::new(sync),
            running: Mutex::new(false),
        }
    }

    /// Whether the loop paces itself on real time.
    pub fn sync(&self) -> bool {
        self.sync.load(Ordering::SeqCst)
    }

    pub fn set_sync(&self, sync: bool) {
        self.sync.store(sync, Ordering::SeqCst);
    }

    pub fn frame_duration(&self) -> f64 {
        self.frame_duration
    }

    /// Seconds until tick `ticks + 1` is due; negative when late.
    fn delay(&self, t0: Instant, ticks: u64) -> f64 {
        self.frame_duration * (ticks + 1) as f64 - t0.elapsed().as_secs_f64()
    }
}

impl SchedulerClock for Wallclock {
    fn id(&self) -> &str {
        self.base.id()
    }

    fn base(&self) -> &Clock {
        &self.base
    }

    fn start_outputs(self: Arc<Self>, filter: SourceFilter) -> StartupThunk {
        let to_start = self.base.harvest(&filter);
        Box::new(move || {
            let errors = self.base.run_startup(to_start);
            if self.base.has_active_outputs() {
                ensure_driver(self);
            }
            errors
        })
    }
}

impl DrivenClock for Wallclock {
    fn wallclock(&self) -> &Wallclock {
        self
    }
}

/// Spawn the driving thread unless it is already running.
pub(crate) fn ensure_driver(clock: Arc<dyn DrivenClock>) {
    {
        let mut running = clock
            .wallclock()
            .running
            .lock()
            .expect("wallclock running flag poisoned");
        if *running {
            return;
        }
        *running = true;
    }
    let name = format!("clock-{}", clock.id());
    thread::Builder::new()
        .name(name)
        .spawn(move || drive(clock))
        .expect("failed to spawn clock thread");
}

fn drive(clock: Arc<dyn DrivenClock>) {
    let wall = clock.wallclock();
    let base = clock.base();
    info!(clock = base.id(), "streaming loop starts");

    let mut t0 = Instant::now();
    let mut ticks: u64 = 0;
    let mut acc: u32 = 0;
    let mut last_latency_log: Option<Instant> = None;

    loop {
        if base.is_empty() {
            break;
        }
        let sync = wall.sync();
        let rem = if sync { wall.delay(t0, ticks) } else { 0.0 };
        if rem > 0.0 || !sync {
            if rem > 0.0 {
                thread::sleep(Duration::from_secs_f64(rem));
            }
            acc = 0;
        } else if rem < -wall.max_latency {
            error!(
                clock = base.id(),
                "{:.2}s of latency exceeds the maximum, resetting active sources",
                -rem
            );
            for source in base.active_sources() {
                if source.is_active() {
                    source.output_reset();
                }
            }
            t0 = Instant::now();
            ticks = 0;
            acc = 0;
        } else if (rem <= -1.0 || acc >= OVERRUN_WARN_THRESHOLD)
            && last_latency_log.is_none_or(|at| at.elapsed() >= LATENCY_LOG_INTERVAL)
        {
            warn!(clock = base.id(), "late by {:.2}s, catching up", -rem);
            last_latency_log = Some(Instant::now());
            acc = 0;
        } else {
            acc += 1;
        }
        ticks += 1;
        base.end_tick();
    }

    {
        let mut running = wall
            .running
            .lock()
            .expect("wallclock running flag poisoned");
        *running = false;
    }
    info!(clock = base.id(), "streaming loop exits");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::Wallclock;

    #[test]
    fn delay_counts_down_to_the_next_tick() {
        let clock = Arc::new(Wallclock::unregistered("wc-delay", true, 10.0, 60.0, true));
        let t0 = Instant::now();
        let rem = clock.delay(t0, 0);
        assert!(rem > 9.0 && rem <= 10.0, "rem = {rem}");
        let rem = clock.delay(t0, 4);
        assert!(rem > 49.0 && rem <= 50.0, "rem = {rem}");
    }

    #[test]
    fn delay_goes_negative_when_late() {
        let clock = Arc::new(Wallclock::unregistered("wc-late", true, 0.001, 60.0, true));
        let t0 = Instant::now();
        std::thread::sleep(Duration::from_millis(10));
        assert!(clock.delay(t0, 0) < 0.0);
    }

    #[test]
    fn sync_flag_toggles() {
        let clock = Arc::new(Wallclock::unregistered("wc-sync", true, 0.04, 60.0, true));
        assert!(clock.sync());
        clock.set_sync(false);
        assert!(!clock.sync());
    }
}
