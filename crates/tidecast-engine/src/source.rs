//! Source contracts and the queue of newly created outputs.
//!
//! A [`Source`] produces samples when polled; an [`ActiveSource`] also
//! consumes them (encoders, players, file writers) and is the kind of
//! entity a clock drives. Active sources announce themselves through
//! [`register_output`] so the next collection can bind them to a clock
//! and start them.

use std::sync::{Arc, Mutex, OnceLock};

use crate::clock_var::ClockVar;
use crate::error::SourceError;

/// Whether a source can run out of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    /// Always has a frame to produce.
    Infallible,
    /// May be unavailable (network ingest, finite files).
    Fallible,
}

pub trait Source: Send + Sync {
    fn id(&self) -> &str;

    /// The unification cell binding this source to the clock that drives it.
    fn clock_var(&self) -> &ClockVar;

    fn source_type(&self) -> SourceType {
        SourceType::Fallible
    }
}

/// A source that is driven by a clock, one `output` per tick.
///
/// Lifecycle: `get_ready` then `output_get_ready` once at startup,
/// `output`/`after_output` on every tick while attached, `leave` exactly
/// once at teardown. `output_reset` may be called between ticks after a
/// latency reset and must drop any pacing state the source keeps.
pub trait ActiveSource: Source {
    fn get_ready(&self) -> Result<(), SourceError>;

    /// Finalize initialization once every sibling source of the same
    /// collection pass has had its `get_ready` called.
    fn output_get_ready(&self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Produce one frame. An error removes the source from its clock.
    fn output(&self) -> Result<(), SourceError>;

    /// Post-tick hook, called after the round counter has advanced.
    fn after_output(&self) {}

    fn is_active(&self) -> bool;

    /// Drop internal pacing state after a latency reset.
    fn output_reset(&self) {}

    /// Release resources. Called exactly once per started source; errors
    /// are logged and swallowed by the clock.
    fn leave(&self) -> Result<(), SourceError>;
}

pub type SharedSource = Arc<dyn ActiveSource>;

/// Upcast a concrete source handle to the shared trait object.
pub trait AsShared {
    fn as_shared(&self) -> SharedSource;
}

impl<T: ActiveSource + 'static> AsShared for Arc<T> {
    fn as_shared(&self) -> SharedSource {
        Arc::clone(self) as SharedSource
    }
}

/// Identity comparison for shared sources, ignoring vtable identity.
pub(crate) fn same_source(a: &SharedSource, b: &SharedSource) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn new_outputs() -> &'static Mutex<Vec<SharedSource>> {
    static QUEUE: OnceLock<Mutex<Vec<SharedSource>>> = OnceLock::new();
    QUEUE.get_or_init(|| Mutex::new(Vec::new()))
}

/// Announce a freshly created active source to the collector.
pub fn register_output(source: SharedSource) {
    new_outputs()
        .lock()
        .expect("new output queue poisoned")
        .push(source);
}

/// Consume the queue of outputs created since the last collection.
pub(crate) fn take_new_outputs() -> Vec<SharedSource> {
    std::mem::take(&mut *new_outputs().lock().expect("new output queue poisoned"))
}

/// Put back outputs that a filtered collection did not touch.
pub(crate) fn requeue_new_outputs(sources: Vec<SharedSource>) {
    if sources.is_empty() {
        return;
    }
    new_outputs()
        .lock()
        .expect("new output queue poisoned")
        .extend(sources);
}
