//! Base clock scheduler.
//!
//! A clock owns a list of `(flag, source)` pairs and drives the active ones
//! in lock-step, one `output` per source per tick. Startup is two-phase:
//! the harvest runs inside the critical section and flags sources
//! `Starting`, the startup itself runs outside it so that user code (which
//! may trigger nested collections) never executes under a lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{error, warn};

use crate::clock_var::ClockVar;
use crate::collector;
use crate::error::StartupError;
use crate::shutdown;
use crate::source::{same_source, SharedSource};

/// Lifecycle of a source inside one clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFlag {
    /// Just attached, not yet started.
    New,
    /// Selected for startup by the current collection pass.
    Starting,
    /// Detached while still `Starting`; torn down once startup finishes.
    Aborted,
    /// Initialized and participating in `end_tick`.
    Active,
    /// Detached while `Active`; torn down at the next `end_tick`.
    Old,
}

pub type SourceFilter = Arc<dyn Fn(&SharedSource) -> bool + Send + Sync>;

/// Deferred startup phase returned by [`SchedulerClock::start_outputs`].
pub type StartupThunk = Box<dyn FnOnce() -> Vec<StartupError> + Send>;

/// The scheduler contract shared by all clock kinds.
pub trait SchedulerClock: Send + Sync {
    fn id(&self) -> &str;

    /// The base scheduler this clock drives.
    fn base(&self) -> &Clock;

    /// Harvest matching `New` sources now (inside the critical section) and
    /// return the startup phase to run outside it.
    fn start_outputs(self: Arc<Self>, filter: SourceFilter) -> StartupThunk;

    fn attach(&self, source: &SharedSource) {
        self.base().attach(source);
    }

    fn detach(&self, pred: &dyn Fn(&SharedSource) -> bool) {
        self.base().detach(pred);
    }

    fn get_tick(&self) -> u64 {
        self.base().get_tick()
    }

    fn end_tick(&self) {
        self.base().end_tick();
    }
}

/// Identity comparison on clocks, ignoring vtable identity.
pub(crate) fn same_clock(a: &Arc<dyn SchedulerClock>, b: &Arc<dyn SchedulerClock>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

struct ClockState {
    outputs: Vec<(SourceFlag, SharedSource)>,
    sub_clocks: Vec<ClockVar>,
}

/// Named scheduler over a mutable list of attached sources.
pub struct Clock {
    id: String,
    round: AtomicU64,
    allow_streaming_errors: bool,
    state: Mutex<ClockState>,
}

impl Clock {
    /// Create and register a manually driven clock.
    pub fn new(id: &str) -> Arc<Self> {
        let allow = collector::config().allow_streaming_errors;
        let clock = Arc::new(Self::unregistered(collector::unique_clock_name(id), allow));
        collector::register_clock(&(Arc::clone(&clock) as Arc<dyn SchedulerClock>));
        clock
    }

    pub(crate) fn unregistered(id: String, allow_streaming_errors: bool) -> Self {
        Self {
            id,
            round: AtomicU64::new(0),
            allow_streaming_errors,
            state: Mutex::new(ClockState {
                outputs: Vec::new(),
                sub_clocks: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClockState> {
        self.state.lock().expect("clock state poisoned")
    }

    /// Add a source as `New`. Idempotent.
    pub fn attach(&self, source: &SharedSource) {
        let mut state = self.lock();
        if !state.outputs.iter().any(|(_, s)| same_source(s, source)) {
            state.outputs.push((SourceFlag::New, Arc::clone(source)));
        }
    }

    /// Detach every source matching `pred`: `New` entries are removed,
    /// `Starting` becomes `Aborted`, `Active` becomes `Old`.
    pub fn detach(&self, pred: &dyn Fn(&SharedSource) -> bool) {
        let mut state = self.lock();
        state.outputs.retain_mut(|(flag, source)| {
            if !pred(source) {
                return true;
            }
            match flag {
                SourceFlag::New => false,
                SourceFlag::Starting => {
                    *flag = SourceFlag::Aborted;
                    true
                },
                SourceFlag::Active => {
                    *flag = SourceFlag::Old;
                    true
                },
                SourceFlag::Aborted | SourceFlag::Old => true,
            }
        });
    }

    pub fn attach_clock(&self, var: ClockVar) {
        let mut state = self.lock();
        if !state.sub_clocks.iter().any(|v| v.same_cell(&var)) {
            state.sub_clocks.push(var);
        }
    }

    pub fn detach_clock(&self, var: &ClockVar) {
        let mut state = self.lock();
        let before = state.sub_clocks.len();
        state.sub_clocks.retain(|v| !v.same_cell(var));
        debug_assert_ne!(before, state.sub_clocks.len(), "detached an unknown sub-clock");
        if before == state.sub_clocks.len() {
            warn!(clock = %self.id, "detach_clock called for a variable that was never attached");
        }
    }

    pub fn get_tick(&self) -> u64 {
        self.round.load(Ordering::Relaxed)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lock().outputs.is_empty()
    }

    pub(crate) fn has_active_outputs(&self) -> bool {
        self.lock()
            .outputs
            .iter()
            .any(|(flag, _)| *flag == SourceFlag::Active)
    }

    pub(crate) fn active_sources(&self) -> Vec<SharedSource> {
        self.lock()
            .outputs
            .iter()
            .filter(|(flag, _)| *flag == SourceFlag::Active)
            .map(|(_, source)| Arc::clone(source))
            .collect()
    }

    /// Harvest phase: flag matching `New` sources as `Starting` and return
    /// them for the startup phase.
    pub(crate) fn harvest(&self, filter: &SourceFilter) -> Vec<SharedSource> {
        let mut state = self.lock();
        let mut to_start = Vec::new();
        for (flag, source) in state.outputs.iter_mut() {
            if *flag == SourceFlag::New && filter(source) {
                *flag = SourceFlag::Starting;
                to_start.push(Arc::clone(source));
            }
        }
        to_start
    }

    /// Startup phase, run outside the critical section.
    pub(crate) fn run_startup(&self, to_start: Vec<SharedSource>) -> Vec<StartupError> {
        if to_start.is_empty() {
            return Vec::new();
        }

        enum Outcome {
            Started,
            GetReadyFailed(crate::error::SourceError),
            FinalizeFailed(crate::error::SourceError),
        }

        let mut outcomes = Vec::with_capacity(to_start.len());
        for source in &to_start {
            let outcome = match source.get_ready() {
                Err(error) => Outcome::GetReadyFailed(error),
                Ok(()) => match source.output_get_ready() {
                    Err(error) => Outcome::FinalizeFailed(error),
                    Ok(()) => Outcome::Started,
                },
            };
            outcomes.push(outcome);
        }

        let mut errors = Vec::new();
        let mut to_leave = Vec::new();
        {
            let mut state = self.lock();
            for (source, outcome) in to_start.iter().zip(outcomes) {
                let Some(position) = state
                    .outputs
                    .iter()
                    .position(|(_, s)| same_source(s, source))
                else {
                    warn!(clock = %self.id, source = source.id(), "started source vanished from outputs");
                    continue;
                };
                let flag = state.outputs[position].0;
                match (flag, outcome) {
                    (SourceFlag::Starting, Outcome::Started) => {
                        state.outputs[position].0 = SourceFlag::Active;
                    },
                    (SourceFlag::Starting, Outcome::GetReadyFailed(error)) => {
                        state.outputs.remove(position);
                        errors.push(StartupError {
                            source_id: source.id().to_string(),
                            error,
                        });
                    },
                    (SourceFlag::Starting, Outcome::FinalizeFailed(error)) => {
                        state.outputs.remove(position);
                        errors.push(StartupError {
                            source_id: source.id().to_string(),
                            error,
                        });
                        to_leave.push(Arc::clone(source));
                    },
                    (SourceFlag::Aborted, outcome) => {
                        // Detached mid-startup: always torn down, and also
                        // reported when startup failed on top of it.
                        state.outputs.remove(position);
                        to_leave.push(Arc::clone(source));
                        if let Outcome::GetReadyFailed(error) | Outcome::FinalizeFailed(error) =
                            outcome
                        {
                            errors.push(StartupError {
                                source_id: source.id().to_string(),
                                error,
                            });
                        }
                    },
                    (flag, _) => {
                        debug_assert!(false, "unexpected flag {flag:?} after startup");
                        warn!(
                            clock = %self.id,
                            source = source.id(),
                            ?flag,
                            "unexpected flag after startup"
                        );
                    },
                }
            }
        }
        for source in &to_leave {
            self.leave_source(source);
        }
        errors
    }

    /// One streaming tick.
    pub fn end_tick(&self) {
        let (leaving, active) = {
            let mut state = self.lock();
            let mut leaving = Vec::new();
            state.outputs.retain(|(flag, source)| {
                if *flag == SourceFlag::Old {
                    leaving.push(Arc::clone(source));
                    false
                } else {
                    true
                }
            });
            let active: Vec<SharedSource> = state
                .outputs
                .iter()
                .filter(|(flag, _)| *flag == SourceFlag::Active)
                .map(|(_, source)| Arc::clone(source))
                .collect();
            (leaving, active)
        };

        for source in &leaving {
            self.leave_source(source);
        }

        let mut failed: Vec<SharedSource> = Vec::new();
        for source in &active {
            if let Err(error) = source.output() {
                error!(
                    clock = %self.id,
                    source = source.id(),
                    %error,
                    "error while streaming, removing source"
                );
                failed.push(Arc::clone(source));
                self.leave_source(source);
            }
        }

        if !failed.is_empty() {
            {
                let mut state = self.lock();
                state
                    .outputs
                    .retain(|(_, source)| !failed.iter().any(|f| same_source(f, source)));
            }
            // Do not raise: this thread must survive so pending leaves can
            // still run at the next tick.
            if !self.allow_streaming_errors {
                shutdown::request("streaming error");
            }
        }

        self.round.fetch_add(1, Ordering::Relaxed);

        let survivors: Vec<SharedSource> = {
            let state = self.lock();
            state
                .outputs
                .iter()
                .filter(|(flag, _)| *flag == SourceFlag::Active)
                .map(|(_, source)| Arc::clone(source))
                .collect()
        };
        for source in survivors {
            source.after_output();
        }
    }

    /// Single teardown path. Errors are logged and swallowed: teardown must
    /// not fail noisily.
    pub(crate) fn leave_source(&self, source: &SharedSource) {
        if let Err(error) = source.leave() {
            warn!(clock = %self.id, source = source.id(), %error, "error while source was leaving");
        }
    }

    #[cfg(test)]
    pub(crate) fn flags(&self) -> Vec<SourceFlag> {
        self.lock().outputs.iter().map(|(flag, _)| *flag).collect()
    }
}

impl SchedulerClock for Clock {
    fn id(&self) -> &str {
        &self.id
    }

    fn base(&self) -> &Clock {
        self
    }

    fn start_outputs(self: Arc<Self>, filter: SourceFilter) -> StartupThunk {
        let to_start = self.harvest(&filter);
        Box::new(move || self.run_startup(to_start))
    }
}
