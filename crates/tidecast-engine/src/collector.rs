//! Clock registry and the collection machinery.
//!
//! A collection binds every source created since the last pass to the
//! default clock and starts it on whatever clock it ended up on. Collections
//! are deferred while `after_collect_tasks` holds the gate open, so that a
//! batch of sources created "simultaneously" (one configuration evaluation)
//! starts together. The counter begins at 1 and [`start`] releases that
//! boot-time task once initial configuration is loaded.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

use tracing::{error, info, warn};

use tidecast_core::Settings;

use crate::clock::{SchedulerClock, SourceFilter, StartupThunk};
use crate::clock_var::ClockVar;
use crate::error::StartupError;
use crate::shutdown;
use crate::source;
use crate::source::SharedSource;
use crate::wallclock::Wallclock;

/// Engine-level knobs captured from [`Settings`] at configure time. Clocks
/// copy what they need at construction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EngineConfig {
    pub allow_streaming_errors: bool,
    pub max_latency: f64,
    pub frame_duration: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            allow_streaming_errors: false,
            max_latency: 60.0,
            frame_duration: 0.04,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Started {
    No,
    Soon,
    Yes,
}

pub(crate) struct CollectorState {
    after_collect_tasks: usize,
    started: Started,
    launched: bool,
    config: EngineConfig,
    default_clock: Option<Arc<Wallclock>>,
}

fn state() -> &'static Mutex<CollectorState> {
    static STATE: OnceLock<Mutex<CollectorState>> = OnceLock::new();
    STATE.get_or_init(|| {
        Mutex::new(CollectorState {
            // The boot-time fake task, released by `start`.
            after_collect_tasks: 1,
            started: Started::No,
            launched: false,
            config: EngineConfig::default(),
            default_clock: None,
        })
    })
}

/// The global scheduler lock. Unification and collection serialise on it.
pub(crate) fn global_guard() -> MutexGuard<'static, CollectorState> {
    state().lock().expect("collector state poisoned")
}

fn registry() -> &'static Mutex<Vec<Weak<dyn SchedulerClock>>> {
    static REGISTRY: OnceLock<Mutex<Vec<Weak<dyn SchedulerClock>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

/// Capture engine settings. Call before [`start`]; clocks created earlier
/// keep the defaults they were built with.
pub fn configure(settings: &Settings) {
    let mut guard = global_guard();
    if guard.launched {
        warn!("scheduler already started, new clock settings only affect future clocks");
    }
    guard.config = EngineConfig {
        allow_streaming_errors: settings.clock.allow_streaming_errors,
        max_latency: settings.root.max_latency,
        frame_duration: settings.audio.frame_duration(),
    };
}

pub(crate) fn config() -> EngineConfig {
    global_guard().config
}

/// Weak-register a clock; clocks call this from their constructors.
pub(crate) fn register_clock(clock: &Arc<dyn SchedulerClock>) {
    registry()
        .lock()
        .expect("clock registry poisoned")
        .push(Arc::downgrade(clock));
}

/// Live clocks, pruning entries whose clocks were dropped.
pub fn clocks() -> Vec<Arc<dyn SchedulerClock>> {
    let mut registered = registry().lock().expect("clock registry poisoned");
    registered.retain(|weak| weak.strong_count() > 0);
    registered.iter().filter_map(Weak::upgrade).collect()
}

/// Pick a clock name that is not carried by any live clock.
pub(crate) fn unique_clock_name(base: &str) -> String {
    let live: Vec<String> = clocks().iter().map(|c| c.id().to_string()).collect();
    if !live.iter().any(|id| id == base) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}.{n}");
        if !live.iter().any(|id| *id == candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn ensure_default_clock(guard: &mut MutexGuard<'static, CollectorState>) -> Arc<Wallclock> {
    if let Some(clock) = &guard.default_clock {
        return Arc::clone(clock);
    }
    let config = guard.config;
    // Built while the state guard is held: take the config from the guard
    // rather than through `collector::config`.
    let clock = Wallclock::new_configured(
        "main",
        true,
        config.frame_duration,
        config.max_latency,
        config.allow_streaming_errors,
    );
    guard.default_clock = Some(Arc::clone(&clock));
    clock
}

fn bind_to_default(output: &SharedSource, default_var: &ClockVar) {
    if output.clock_var().is_known() {
        return;
    }
    if let Err(error) = output.clock_var().unify_locked(default_var) {
        warn!(source = output.id(), %error, "cannot bind source to the default clock");
    }
}

fn report_startup_errors(errors: &[StartupError], booting: bool) {
    if errors.is_empty() {
        return;
    }
    for failure in errors {
        error!(%failure, "source failed to start");
    }
    if booting {
        shutdown::request("source startup failed during initialization");
    }
}

/// Run a collection, consuming the guard. No-ops while the gate is held.
fn collect(mut guard: MutexGuard<'static, CollectorState>) {
    if guard.after_collect_tasks > 0 {
        return;
    }

    let default_clock = ensure_default_clock(&mut guard);
    let default_var = ClockVar::known(default_clock as Arc<dyn SchedulerClock>);
    for output in source::take_new_outputs() {
        bind_to_default(&output, &default_var);
    }

    let filter: SourceFilter = Arc::new(|_: &SharedSource| true);
    let collects: Vec<StartupThunk> = clocks()
        .into_iter()
        .map(|clock| clock.start_outputs(Arc::clone(&filter)))
        .collect();

    let announce = guard.started == Started::No;
    if announce {
        guard.started = Started::Soon;
    }
    let booting = guard.started != Started::Yes;
    drop(guard);

    let mut errors = Vec::new();
    for thunk in collects {
        errors.extend(thunk());
    }
    report_startup_errors(&errors, booting);

    if announce {
        info!("main phase starts");
        global_guard().started = Started::Yes;
    }
}

/// Run `task` while holding the collection gate open; collect once it
/// finishes, whether it returns or panics.
pub fn collect_after<T>(task: impl FnOnce() -> T) -> T {
    {
        global_guard().after_collect_tasks += 1;
    }
    let result = catch_unwind(AssertUnwindSafe(task));
    {
        let mut guard = global_guard();
        guard.after_collect_tasks = guard.after_collect_tasks.saturating_sub(1);
        collect(guard);
    }
    match result {
        Ok(value) => value,
        Err(payload) => std::panic::resume_unwind(payload),
    }
}

/// Synchronous early-boot startup: bind matching new sources to the default
/// clock and start them on every clock, returning every startup failure.
pub fn force_init(filter: SourceFilter) -> Vec<StartupError> {
    let mut guard = global_guard();
    let default_clock = ensure_default_clock(&mut guard);
    let default_var = ClockVar::known(default_clock as Arc<dyn SchedulerClock>);

    let mut deferred = Vec::new();
    for output in source::take_new_outputs() {
        if filter(&output) {
            bind_to_default(&output, &default_var);
        } else {
            deferred.push(output);
        }
    }
    source::requeue_new_outputs(deferred);

    let collects: Vec<StartupThunk> = clocks()
        .into_iter()
        .map(|clock| clock.start_outputs(Arc::clone(&filter)))
        .collect();
    let booting = guard.started != Started::Yes;
    drop(guard);

    let mut errors = Vec::new();
    for thunk in collects {
        errors.extend(thunk());
    }
    report_startup_errors(&errors, booting);
    errors
}

/// Release the boot-time task and run the first collection. Call exactly
/// once, after initial configuration is loaded.
pub fn start() {
    let mut guard = global_guard();
    if guard.launched {
        warn!("scheduler already started");
        return;
    }
    guard.launched = true;
    guard.after_collect_tasks = guard.after_collect_tasks.saturating_sub(1);
    collect(guard);
}

/// Detach every source from every clock; streaming threads observe their
/// empty output lists and exit on their own.
pub fn stop() {
    info!("stopping all clocks");
    for clock in clocks() {
        clock.detach(&|_| true);
    }
}
