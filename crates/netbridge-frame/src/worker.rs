use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::error;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Join a worker thread, giving up after `timeout`.
///
/// Returns `true` if the thread finished (even by panicking) within the
/// timeout. On timeout the handle is dropped, detaching the thread, and an
/// error is logged.
pub fn join_bounded(name: &str, handle: JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            error!(worker = name, ?timeout, "worker did not stop in time; detaching");
            return false;
        }
        std::thread::sleep(JOIN_POLL_INTERVAL);
    }

    if handle.join().is_err() {
        error!(worker = name, "worker panicked");
    }
    true
}
