//! Background session heartbeat.
//!
//! Broker sessions drop when idle, so a run holds a `Keepalive` guard
//! that pings on a fixed interval from its own thread. The guard owns
//! no reconciliation state; stopping is signalled through a channel and
//! the thread is joined on drop.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;

/// Drop-guard around the heartbeat thread.
pub struct Keepalive {
    stop: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Keepalive {
    /// Spawn a thread invoking `tick` every `interval` until the guard
    /// is dropped.
    pub fn spawn<F>(interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (stop, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => tick(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("keepalive thread stopped");
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for Keepalive {
    fn drop(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn ticks_then_stops_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        {
            let _guard = Keepalive::spawn(Duration::from_millis(10), move || {
                seen.fetch_add(1, Ordering::SeqCst);
            });
            thread::sleep(Duration::from_millis(60));
        }
        let after_drop = count.load(Ordering::SeqCst);
        assert!(after_drop >= 2, "expected at least 2 ticks, got {after_drop}");

        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), after_drop);
    }

    #[test]
    fn drop_without_ticks_is_clean() {
        let guard = Keepalive::spawn(Duration::from_secs(60), || {});
        drop(guard);
    }
}
