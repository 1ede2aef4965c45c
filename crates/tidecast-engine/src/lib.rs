#![deny(clippy::wildcard_imports)]

pub mod clock;
pub mod clock_var;
pub mod collector;
mod error;
pub mod self_sync;
pub mod shutdown;
pub mod source;
pub mod wallclock;

pub use clock::{Clock, SchedulerClock, SourceFilter, SourceFlag, StartupThunk};
pub use clock_var::ClockVar;
pub use error::{ClockError, SourceError, StartupError};
pub use self_sync::SelfSyncClock;
pub use source::{ActiveSource, AsShared, SharedSource, Source, SourceType};
pub use wallclock::Wallclock;
