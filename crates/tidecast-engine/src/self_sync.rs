//! Wallclock that lets blocking sources provide the pacing.
//!
//! A soundcard write blocks for exactly one frame's worth of time, so a
//! clock driving such a source must not also sleep the frame off. Once
//! every blocking source stops, the clock falls back to wallclock pacing
//! instead of spinning at full speed.

use std::sync::{Arc, Mutex};

use tracing::info;

use crate::clock::{Clock, SchedulerClock, SourceFilter, StartupThunk};
use crate::collector;
use crate::wallclock::{ensure_driver, DrivenClock, Wallclock};

pub struct SelfSyncClock {
    wall: Wallclock,
    blocking_sources: Mutex<usize>,
}

impl SelfSyncClock {
    /// Create and register a self-sync clock with the configured timing.
    pub fn new(id: &str) -> Arc<Self> {
        let config = collector::config();
        Self::new_with(id, config.frame_duration, config.max_latency)
    }

    pub fn new_with(id: &str, frame_duration: f64, max_latency: f64) -> Arc<Self> {
        let allow = collector::config().allow_streaming_errors;
        let clock = Arc::new(Self {
            wall: Wallclock::unregistered(id, true, frame_duration, max_latency, allow),
            blocking_sources: Mutex::new(0),
        });
        collector::register_clock(&(Arc::clone(&clock) as Arc<dyn SchedulerClock>));
        clock
    }

    /// A blocking source started: with at least one running, pacing is
    /// delegated to the sources themselves.
    pub fn register_blocking_source(&self) {
        let mut count = self
            .blocking_sources
            .lock()
            .expect("blocking source counter poisoned");
        if *count == 0 {
            info!(clock = self.wall.id(), "delegating synchronisation to running sources");
            self.wall.set_sync(false);
        }
        *count += 1;
    }

    /// A blocking source stopped; the last one re-enables wallclock pacing.
    pub fn unregister_blocking_source(&self) {
        let mut count = self
            .blocking_sources
            .lock()
            .expect("blocking source counter poisoned");
        *count = count.saturating_sub(1);
        if *count == 0 {
            info!(clock = self.wall.id(), "no more blocking sources, resynching on wallclock");
            self.wall.set_sync(true);
        }
    }

    pub fn sync(&self) -> bool {
        self.wall.sync()
    }
}

impl SchedulerClock for SelfSyncClock {
    fn id(&self) -> &str {
        self.wall.id()
    }

    fn base(&self) -> &Clock {
        self.wall.base()
    }

    fn start_outputs(self: Arc<Self>, filter: SourceFilter) -> StartupThunk {
        let to_start = self.base().harvest(&filter);
        Box::new(move || {
            let errors = self.base().run_startup(to_start);
            if self.base().has_active_outputs() {
                ensure_driver(self);
            }
            errors
        })
    }
}

impl DrivenClock for SelfSyncClock {
    fn wallclock(&self) -> &Wallclock {
        &self.wall
    }
}

#[cfg(test)]
mod tests {
    use super::SelfSyncClock;

    #[test]
    fn sync_follows_the_blocking_source_count() {
        let clock = SelfSyncClock::new_with("ss-count", 0.04, 60.0);
        assert!(clock.sync());

        clock.register_blocking_source();
        assert!(!clock.sync());
        clock.register_blocking_source();
        assert!(!clock.sync());

        clock.unregister_blocking_source();
        assert!(!clock.sync());
        clock.unregister_blocking_source();
        assert!(clock.sync());
    }

    #[test]
    fn reregistering_after_drain_delegates_again() {
        let clock = SelfSyncClock::new_with("ss-again", 0.04, 60.0);
        clock.register_blocking_source();
        clock.unregister_blocking_source();
        assert!(clock.sync());
        clock.register_blocking_source();
        assert!(!clock.sync());
    }
}
