//! Task queues
//!
//! Thin wrapper over an unbounded MPMC channel. Producers and consumers each
//! hold their own clone of the queue; dropping every clone closes the channel.
//! Delivery is at-most-once: a task handed to a worker that dies is lost,
//! which the trigger-driven design tolerates (the next login re-triggers).

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use tracing::debug;

use crate::task::SyncTask;

/// Unbounded FIFO task queue shared between the daemon and its workers.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    sender: Sender<SyncTask>,
    receiver: Receiver<SyncTask>,
}

impl TaskQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Enqueue a task. Only fails when every receiving clone has been dropped,
    /// which means the daemon is already gone.
    pub fn enqueue(&self, task: SyncTask) -> bool {
        debug!(task = %task, "enqueue");
        self.sender.send(task).is_ok()
    }

    /// Block until a task is available or the channel is closed.
    pub fn dequeue(&self) -> Option<SyncTask> {
        self.receiver.recv().ok()
    }

    /// Non-blocking dequeue.
    pub fn try_dequeue(&self) -> Option<SyncTask> {
        self.receiver.try_recv().ok()
    }

    /// Drain whatever is queued right now without blocking, up to `limit`
    /// tasks. Used at shutdown to log abandoned work.
    pub fn drain(&self, limit: usize) -> Vec<SyncTask> {
        let mut drained = Vec::new();
        while drained.len() < limit {
            match self.receiver.try_recv() {
                Ok(task) => drained.push(task),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
