//! Serial executor used to defer work off I/O callbacks and to impose a
//! happens-before order between related operations. Each component that
//! needs ordering owns its own queue, which gives it a single logical worker.

use std::future::Future;
use std::pin::Pin;

use log::trace;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Command = Pin<Box<dyn Future<Output = ()> + Send>>;

/// An ordered queue of unit-of-work futures drained by a single worker task.
///
/// Submission never blocks. Work items run strictly in submission order, one
/// at a time, on the worker task, never re-entrantly on the submitting task.
/// Dropping the queue closes the channel; the worker finishes the items that
/// were already queued and then exits.
#[derive(Debug)]
pub struct CommandQueue {
    sender: mpsc::UnboundedSender<Command>,
    worker: JoinHandle<()>,
}

impl CommandQueue {
    /// Spawns the worker on the current tokio runtime. The name only shows
    /// up in logs.
    pub fn new(name: &str) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Command>();
        let worker_name = name.to_owned();
        let worker = tokio::spawn(async move {
            while let Some(command) = receiver.recv().await {
                command.await;
            }
            trace!("Command queue '{worker_name}' drained, worker exiting.");
        });
        CommandQueue { sender, worker }
    }

    /// Enqueues a unit of work. Returns `false` when the queue is already
    /// shut down, in which case the work is dropped.
    pub fn push(&self, command: impl Future<Output = ()> + Send + 'static) -> bool {
        self.sender.send(Box::pin(command)).is_ok()
    }

    /// Stops accepting work and waits for everything already queued to run.
    pub async fn shutdown(self) {
        drop(self.sender);
        let _ = self.worker.await;
    }
}
