//! Shared fake source for scheduler scenarios.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tidecast_engine::clock_var::ClockVar;
use tidecast_engine::self_sync::SelfSyncClock;
use tidecast_engine::source::{ActiveSource, Source};
use tidecast_engine::{SchedulerClock, SourceError};

/// An active source that records what the clock does to it.
pub struct RecordingSource {
    id: String,
    clock_var: ClockVar,
    get_ready_calls: AtomicUsize,
    leave_calls: AtomicUsize,
    reset_calls: AtomicUsize,
    output_times: Mutex<Vec<Instant>>,
    fail_get_ready: AtomicBool,
    fail_output: AtomicBool,
    /// Milliseconds the first `output` blocks for (0 = none).
    block_first_output_ms: AtomicUsize,
    /// Milliseconds every `output` blocks for (0 = none).
    block_every_output_ms: AtomicUsize,
    /// Detach from the driving clock after this many outputs (0 = never).
    detach_after: AtomicUsize,
    /// Clock to (un)register as a blocking source on start/stop.
    blocking_on: Mutex<Option<Arc<SelfSyncClock>>>,
}

impl RecordingSource {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            clock_var: ClockVar::unknown(),
            get_ready_calls: AtomicUsize::new(0),
            leave_calls: AtomicUsize::new(0),
            reset_calls: AtomicUsize::new(0),
            output_times: Mutex::new(Vec::new()),
            fail_get_ready: AtomicBool::new(false),
            fail_output: AtomicBool::new(false),
            block_first_output_ms: AtomicUsize::new(0),
            block_every_output_ms: AtomicUsize::new(0),
            detach_after: AtomicUsize::new(0),
            blocking_on: Mutex::new(None),
        })
    }

    pub fn fail_get_ready(self: Arc<Self>) -> Arc<Self> {
        self.fail_get_ready.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_output(self: Arc<Self>) -> Arc<Self> {
        self.fail_output.store(true, Ordering::SeqCst);
        self
    }

    pub fn block_first_output(self: Arc<Self>, duration: Duration) -> Arc<Self> {
        self.block_first_output_ms
            .store(duration.as_millis() as usize, Ordering::SeqCst);
        self
    }

    pub fn block_every_output(self: Arc<Self>, duration: Duration) -> Arc<Self> {
        self.block_every_output_ms
            .store(duration.as_millis() as usize, Ordering::SeqCst);
        self
    }

    pub fn detach_after(self: Arc<Self>, outputs: usize) -> Arc<Self> {
        self.detach_after.store(outputs, Ordering::SeqCst);
        self
    }

    pub fn blocking_on(self: Arc<Self>, clock: &Arc<SelfSyncClock>) -> Arc<Self> {
        *self.blocking_on.lock().expect("blocking_on poisoned") = Some(Arc::clone(clock));
        self
    }

    pub fn get_ready_calls(&self) -> usize {
        self.get_ready_calls.load(Ordering::SeqCst)
    }

    pub fn leave_calls(&self) -> usize {
        self.leave_calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) -> usize {
        self.reset_calls.load(Ordering::SeqCst)
    }

    pub fn output_times(&self) -> Vec<Instant> {
        self.output_times.lock().expect("output times poisoned").clone()
    }

    pub fn output_count(&self) -> usize {
        self.output_times.lock().expect("output times poisoned").len()
    }
}

/// Poll until `probe` holds or the timeout elapses.
pub fn wait_until(probe: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if probe() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    probe()
}

impl Source for RecordingSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn clock_var(&self) -> &ClockVar {
        &self.clock_var
    }
}

impl ActiveSource for RecordingSource {
    fn get_ready(&self) -> Result<(), SourceError> {
        self.get_ready_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_get_ready.load(Ordering::SeqCst) {
            return Err(SourceError::failed("refusing to start"));
        }
        if let Some(clock) = &*self.blocking_on.lock().expect("blocking_on poisoned") {
            clock.register_blocking_source();
        }
        Ok(())
    }

    fn output(&self) -> Result<(), SourceError> {
        if self.fail_output.load(Ordering::SeqCst) {
            return Err(SourceError::failed("output failure"));
        }
        let count = {
            let mut times = self.output_times.lock().expect("output times poisoned");
            times.push(Instant::now());
            times.len()
        };
        if count == 1 {
            let ms = self.block_first_output_ms.load(Ordering::SeqCst);
            if ms > 0 {
                std::thread::sleep(Duration::from_millis(ms as u64));
            }
        }
        let every = self.block_every_output_ms.load(Ordering::SeqCst);
        if every > 0 {
            std::thread::sleep(Duration::from_millis(every as u64));
        }
        let detach_after = self.detach_after.load(Ordering::SeqCst);
        if detach_after > 0 && count >= detach_after {
            if let Some(clock) = self.clock_var.get() {
                let id = self.id.clone();
                clock.detach(&move |s| s.id() == id);
            }
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        true
    }

    fn output_reset(&self) {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn leave(&self) -> Result<(), SourceError> {
        self.leave_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(clock) = self.blocking_on.lock().expect("blocking_on poisoned").take() {
            clock.unregister_blocking_source();
        }
        Ok(())
    }
}
