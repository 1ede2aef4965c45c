//! Self-sync clock with blocking sources: pacing is delegated while at
//! least one runs and resynchronises once they are all gone.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{wait_until, RecordingSource};
use tidecast_engine::clock_var::ClockVar;
use tidecast_engine::{AsShared, SchedulerClock, SelfSyncClock, SharedSource, Source};

#[test]
fn sync_is_off_while_any_blocking_source_runs() {
    let clock = SelfSyncClock::new_with("soundcards", 0.01, 60.0);
    assert!(clock.sync());

    // Each source paces the clock like a soundcard would: its output call
    // blocks for about a frame.
    let left = RecordingSource::new("card-left")
        .blocking_on(&clock)
        .block_every_output(Duration::from_millis(10));
    let right = RecordingSource::new("card-right")
        .blocking_on(&clock)
        .block_every_output(Duration::from_millis(10));
    for source in [&left, &right] {
        source
            .clock_var()
            .unify(&ClockVar::known(Arc::clone(&clock) as Arc<dyn SchedulerClock>))
            .expect("fresh variable");
        clock.attach(&source.as_shared());
    }

    let errors = Arc::clone(&clock).start_outputs(Arc::new(|_: &SharedSource| true))();
    assert!(errors.is_empty());
    assert!(!clock.sync());

    assert!(
        wait_until(|| left.output_count() >= 3 && right.output_count() >= 3, Duration::from_secs(5)),
        "blocking sources never streamed"
    );

    // one source stopping is not enough to resync
    clock.detach(&|s| s.id() == "card-left");
    assert!(wait_until(|| left.leave_calls() == 1, Duration::from_secs(5)));
    assert!(!clock.sync());

    // the last one is
    clock.detach(&|_| true);
    assert!(wait_until(|| right.leave_calls() == 1, Duration::from_secs(5)));
    assert!(wait_until(|| clock.sync(), Duration::from_secs(5)));
}
