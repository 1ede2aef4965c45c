//! A streaming error with `allow_streaming_errors` off: the source is
//! removed and torn down, the clock survives, and a global shutdown is
//! requested instead of unwinding the driving thread.
//!
//! Runs alone in this binary: it flips the process-wide shutdown flag.

mod common;

use std::sync::Arc;

use common::RecordingSource;
use tidecast_engine::{shutdown, AsShared, Clock, SchedulerClock, SharedSource};

#[test]
fn streaming_failure_tears_down_the_source_and_requests_shutdown() {
    // default config: allow_streaming_errors = false
    let clock = Clock::new("strict");
    let source = RecordingSource::new("flaky").fail_output();
    clock.attach(&source.as_shared());
    let errors = Arc::clone(&clock).start_outputs(Arc::new(|_: &SharedSource| true))();
    assert!(errors.is_empty());
    assert!(!shutdown::requested());

    clock.end_tick();
    assert_eq!(source.leave_calls(), 1);
    assert!(shutdown::requested());

    // the clock itself is still usable
    clock.end_tick();
    assert_eq!(clock.get_tick(), 2);
}
