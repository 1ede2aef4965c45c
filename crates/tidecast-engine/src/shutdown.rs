//! Process-wide shutdown request.
//!
//! Components that hit an unrecoverable condition (startup failures during
//! boot, streaming errors with `allow_streaming_errors` off) request a
//! shutdown here; the embedding binary waits on it and tears the process
//! down. Requesting is one-shot: later requests are absorbed quietly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use crossbeam_channel::{Receiver, Sender};
use tracing::info;

struct ShutdownState {
    requested: AtomicBool,
    subscribers: Mutex<Vec<Sender<String>>>,
}

fn cell() -> &'static ShutdownState {
    static CELL: OnceLock<ShutdownState> = OnceLock::new();
    CELL.get_or_init(|| ShutdownState {
        requested: AtomicBool::new(false),
        subscribers: Mutex::new(Vec::new()),
    })
}

/// Request a global shutdown. The first request logs and notifies
/// subscribers; the flag never clears.
pub fn request(reason: &str) {
    let state = cell();
    if state.requested.swap(true, Ordering::SeqCst) {
        return;
    }
    info!(reason, "shutdown requested");
    let mut subscribers = state
        .subscribers
        .lock()
        .expect("shutdown subscribers poisoned");
    subscribers.retain(|tx| tx.send(reason.to_string()).is_ok());
}

pub fn requested() -> bool {
    cell().requested.load(Ordering::SeqCst)
}

/// A channel that receives the shutdown reason; delivers immediately when
/// shutdown was already requested.
pub fn subscribe() -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let state = cell();
    // Checked under the subscriber lock so a concurrent `request` either
    // sees the new sender or is seen by us.
    let mut subscribers = state
        .subscribers
        .lock()
        .expect("shutdown subscribers poisoned");
    if state.requested.load(Ordering::SeqCst) {
        let _ = tx.send("shutdown".to_string());
    } else {
        subscribers.push(tx);
    }
    rx
}

/// Block until a shutdown is requested; returns the reason.
pub fn wait() -> String {
    let rx = subscribe();
    rx.recv().unwrap_or_default()
}
