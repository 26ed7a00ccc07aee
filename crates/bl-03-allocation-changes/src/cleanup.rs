//! # Deferred Blob Cleanup
//!
//! Producers push [`CleanupTask`]s onto an unbounded channel and return
//! immediately; a single [`CleanupWorker`] drains it. On shutdown the worker
//! finishes whatever is already queued, then exits.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::ports::{BlobFile, BlobStore};

/// Blob that is no longer needed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CleanupTask {
    /// Temp upload of a discarded or failed connection.
    DeleteTemp {
        allocation_id: String,
        connection_id: String,
        file: BlobFile,
    },
    /// Committed content no file references any more.
    DeleteContent {
        allocation_id: String,
        content_hash: String,
    },
}

/// Sending half. Cheap to clone.
#[derive(Clone)]
pub struct CleanupQueue {
    tx: mpsc::UnboundedSender<CleanupTask>,
}

impl CleanupQueue {
    /// Queue a task. Never blocks; a stopped worker only costs a warning.
    pub fn enqueue(&self, task: CleanupTask) {
        if let Err(e) = self.tx.send(task) {
            warn!("[bl-03] Cleanup worker gone, dropping {:?}", e.0);
        }
    }

    pub fn enqueue_all(&self, tasks: impl IntoIterator<Item = CleanupTask>) {
        for task in tasks {
            self.enqueue(task);
        }
    }
}

/// Receiving half.
pub struct CleanupWorker {
    rx: mpsc::UnboundedReceiver<CleanupTask>,
    blobs: Arc<dyn BlobStore>,
}

/// Create a connected queue and worker.
pub fn cleanup_channel(blobs: Arc<dyn BlobStore>) -> (CleanupQueue, CleanupWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CleanupQueue { tx }, CleanupWorker { rx, blobs })
}

impl CleanupWorker {
    /// Process tasks until shutdown or until every queue handle is dropped.
    /// Returns the number of tasks processed.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> usize {
        info!("[bl-03] Cleanup worker started");
        let mut processed = 0;

        loop {
            tokio::select! {
                task = self.rx.recv() => match task {
                    Some(task) => {
                        self.process(task).await;
                        processed += 1;
                    }
                    None => break,
                },
                _ = shutdown.changed() => {
                    while let Ok(task) = self.rx.try_recv() {
                        self.process(task).await;
                        processed += 1;
                    }
                    break;
                }
            }
        }

        info!("[bl-03] Cleanup worker stopped after {} tasks", processed);
        processed
    }

    async fn process(&self, task: CleanupTask) {
        let result = match &task {
            CleanupTask::DeleteTemp {
                allocation_id,
                connection_id,
                file,
            } => {
                self.blobs
                    .delete_temp_file(allocation_id, file, connection_id)
                    .await
            }
            CleanupTask::DeleteContent {
                allocation_id,
                content_hash,
            } => self.blobs.delete_content(allocation_id, content_hash).await,
        };

        match result {
            Ok(()) => debug!("[bl-03] Cleaned {:?}", task),
            Err(e) => warn!("[bl-03] Cleanup of {:?} failed: {}", task, e),
        }
    }
}
