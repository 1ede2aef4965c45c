//! A single source driven in sync mode: ticks land on the wallclock grid
//! and the driving thread winds down once the source detaches itself.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{wait_until, RecordingSource};
use tidecast_engine::clock_var::ClockVar;
use tidecast_engine::{AsShared, SchedulerClock, SharedSource, Source, Wallclock};

const FRAME: f64 = 0.1;

#[test]
fn ticks_follow_the_frame_grid_until_the_source_detaches() {
    let clock = Wallclock::new_with("sync-grid", true, FRAME, 60.0);
    let source = RecordingSource::new("ticker").detach_after(10);
    source
        .clock_var()
        .unify(&ClockVar::known(Arc::clone(&clock) as Arc<dyn SchedulerClock>))
        .expect("fresh variable");
    clock.attach(&source.as_shared());

    let errors = Arc::clone(&clock).start_outputs(Arc::new(|_: &SharedSource| true))();
    assert!(errors.is_empty());

    assert!(
        wait_until(|| source.leave_calls() == 1, Duration::from_secs(5)),
        "source never left the clock"
    );

    let times = source.output_times();
    assert_eq!(times.len(), 10);
    for pair in times.windows(2) {
        let gap = pair[1].duration_since(pair[0]).as_secs_f64();
        assert!(
            (gap - FRAME).abs() <= 0.02,
            "tick gap {gap:.3}s strays from the {FRAME}s grid"
        );
    }
    assert!(clock.get_tick() >= 10);

    // With its outputs gone the driving thread terminates within a tick:
    // the round counter stops advancing.
    std::thread::sleep(Duration::from_secs_f64(2.0 * FRAME));
    let settled = clock.get_tick();
    std::thread::sleep(Duration::from_secs_f64(2.0 * FRAME));
    assert_eq!(clock.get_tick(), settled);
}
