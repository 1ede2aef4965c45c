//! A source that fails `get_ready` before the main phase: the failure is
//! reported by the startup pass and takes the whole process down.
//!
//! Runs alone in this binary: it flips the process-wide shutdown flag.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::RecordingSource;
use tidecast_engine::source::register_output;
use tidecast_engine::{collector, shutdown, AsShared, SharedSource};

#[test]
fn boot_time_startup_failure_requests_shutdown() {
    let shutdown_rx = shutdown::subscribe();
    let source = RecordingSource::new("wont-start").fail_get_ready();
    register_output(source.as_shared());
    assert!(!shutdown::requested());

    let errors = collector::force_init(Arc::new(|_: &SharedSource| true));
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].source_id, "wont-start");

    // the failing source was dropped from its clock and never runs
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(source.output_count(), 0);
    assert_eq!(source.leave_calls(), 0);

    assert!(shutdown::requested());
    let reason = shutdown_rx
        .recv_timeout(Duration::from_secs(1))
        .expect("shutdown signalled");
    assert_eq!(reason, "source startup failed during initialization");
}
