//! One-shot and periodic timers with stop-wins cancellation.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A restartable timer. `stop` cancels any pending fire and waits for an
/// in-flight callback to finish; a callback that was due but not yet entered
/// when `stop` was called does not run.
#[derive(Debug, Default)]
pub struct Timer {
    running: std::sync::Mutex<Option<Running>>,
}

#[derive(Debug)]
struct Running {
    cancellation: CancellationToken,
    worker: JoinHandle<()>,
}

impl Timer {
    pub fn new() -> Self {
        Timer::default()
    }

    /// Fires `callback` once after `interval` unless stopped first.
    /// Starting replaces any previous schedule.
    pub fn start_once(&self, interval: Duration, callback: impl FnOnce() + Send + 'static) {
        let cancellation = CancellationToken::new();
        let token = cancellation.clone();
        let worker = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(interval) => {
                    if !token.is_cancelled() {
                        callback();
                    }
                }
            }
        });
        self.replace(Running {
            cancellation,
            worker,
        });
    }

    /// Fires `callback` approximately every `interval` until stopped.
    /// Starting replaces any previous schedule.
    pub fn start_periodic(&self, interval: Duration, mut callback: impl FnMut() + Send + 'static) {
        let cancellation = CancellationToken::new();
        let token = cancellation.clone();
        let worker = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick of a tokio interval completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if token.is_cancelled() {
                            break;
                        }
                        callback();
                    }
                }
            }
        });
        self.replace(Running {
            cancellation,
            worker,
        });
    }

    /// Cancels the timer and waits for any in-flight callback to complete.
    /// Idempotent; a no-op on a timer that was never started.
    pub async fn stop(&self) {
        let running = self.running.lock().expect("timer lock poisoned").take();
        if let Some(running) = running {
            running.cancellation.cancel();
            let _ = running.worker.await;
        }
    }

    /// Cancels without waiting. Used from synchronous contexts; the worker
    /// observes the token before entering the callback.
    pub fn cancel(&self) {
        if let Some(running) = self
            .running
            .lock()
            .expect("timer lock poisoned")
            .take()
        {
            running.cancellation.cancel();
        }
    }

    fn replace(&self, running: Running) {
        let previous = self
            .running
            .lock()
            .expect("timer lock poisoned")
            .replace(running);
        if let Some(previous) = previous {
            previous.cancellation.cancel();
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}
