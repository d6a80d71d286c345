//! Operation-Queue Engine
//!
//! Entity methods do not perform their side effects when called. They push an operation
//! onto the queue that was active when the entity was created and hand back a [`Deferred`]
//! handle. [`Engine::commit`] drains the queue in waves: before a wave runs, a fresh queue
//! becomes active, so whatever the wave's operations trigger through newly created entities
//! lands in the next wave. Calls made on entities bound to an already drained queue run
//! straight away and are awaited as part of the wave that made them.

pub mod deferred;
pub mod fileops;
pub mod index;
pub mod template;

pub use deferred::Deferred;

use crate::error::BuildError;
use futures::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

pub type OpFuture = BoxFuture<'static, Result<(), BuildError>>;

/// A unit of deferred work
pub struct Operation {
    pub label: String,
    fut: OpFuture,
}

impl Operation {
    pub fn new(label: impl Into<String>, fut: OpFuture) -> Self {
        Self {
            label: label.into(),
            fut,
        }
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation").field("label", &self.label).finish()
    }
}

/// How the operations of a single wave are driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveMode {
    /// One after another in queue order; the first failure stops the wave.
    #[default]
    Sequential,
    /// Started in queue order and polled together.
    Concurrent,
}

/// Identifies one generation of the active queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueRef(u64);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CommitReport {
    pub waves: usize,
    pub operations: usize,
}

struct ActiveQueue {
    generation: u64,
    ops: Vec<Operation>,
}

pub struct Engine {
    active: Mutex<ActiveQueue>,
    next_generation: AtomicU64,
    /// Calls that ran straight away; each wave waits for them before it counts as done.
    inflight: Mutex<Vec<(String, JoinHandle<Result<(), BuildError>>)>>,
    mode: WaveMode,
}

impl Engine {
    pub fn new(mode: WaveMode) -> Self {
        Self {
            active: Mutex::new(ActiveQueue {
                generation: 0,
                ops: Vec::new(),
            }),
            next_generation: AtomicU64::new(1),
            inflight: Mutex::new(Vec::new()),
            mode,
        }
    }

    pub fn mode(&self) -> WaveMode {
        self.mode
    }

    /// The queue new entities bind to.
    pub fn current(&self) -> QueueRef {
        QueueRef(self.active.lock().generation)
    }

    /// Operations waiting in the active queue.
    pub fn pending(&self) -> usize {
        self.active.lock().ops.len()
    }

    /// Append an operation to the active queue.
    pub fn push(&self, op: Operation) {
        trace!(op = %op.label, "Queued operation");
        self.active.lock().ops.push(op);
    }

    /// Run `fut` through the queue `bound` if it is still active, otherwise right away.
    pub fn defer<T, F>(&self, bound: QueueRef, label: impl Into<String>, fut: F) -> Deferred<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, BuildError>> + Send + 'static,
    {
        let label = label.into();
        let (tx, rx) = oneshot::channel();
        let op: OpFuture = Box::pin(async move {
            let result = fut.await;
            let status = match &result {
                Ok(_) => Ok(()),
                Err(err) => Err(err.clone()),
            };
            // The caller may have dropped its handle.
            let _ = tx.send(result);
            status
        });

        {
            let mut active = self.active.lock();
            if active.generation == bound.0 {
                trace!(op = %label, "Queued operation");
                active.ops.push(Operation::new(label, op));
                return Deferred::queued(rx);
            }
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                trace!(op = %label, "Running operation immediately");
                let task = handle.spawn(op);
                self.inflight.lock().push((label, task));
                Deferred::queued(rx)
            }
            Err(_) => {
                warn!(op = %label, "Operation on a drained queue with no runtime to run it");
                Deferred::failed(BuildError::NoRuntime(label))
            }
        }
    }

    /// Swap in a fresh queue and return the drained one.
    fn rotate(&self) -> Vec<Operation> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let mut active = self.active.lock();
        active.generation = generation;
        std::mem::take(&mut active.ops)
    }

    /// Drain the active queue wave by wave until no wave produces further work.
    pub async fn commit(&self) -> Result<CommitReport, BuildError> {
        let mut report = CommitReport::default();
        loop {
            if self.pending() == 0 {
                self.settle_inflight().await?;
                if self.pending() == 0 {
                    break;
                }
            }
            let wave = self.rotate();
            report.waves += 1;
            report.operations += wave.len();
            debug!(wave = report.waves, ops = wave.len(), mode = ?self.mode, "Running commit wave");

            if let Err(err) = self.run_wave(wave).await {
                self.abort_inflight();
                return Err(err);
            }
            self.settle_inflight().await?;
        }
        Ok(report)
    }

    async fn run_wave(&self, wave: Vec<Operation>) -> Result<(), BuildError> {
        match self.mode {
            WaveMode::Sequential => {
                for op in wave {
                    trace!(op = %op.label, "Running operation");
                    op.fut.await.map_err(|err| {
                        warn!(op = %op.label, error = %err, "Operation failed");
                        err
                    })?;
                }
                Ok(())
            }
            WaveMode::Concurrent => {
                let labels: Vec<String> = wave.iter().map(|op| op.label.clone()).collect();
                let results = join_all(wave.into_iter().map(|op| op.fut)).await;
                for (label, result) in labels.iter().zip(results) {
                    if let Err(err) = result {
                        warn!(op = %label, error = %err, "Operation failed");
                        return Err(err);
                    }
                }
                Ok(())
            }
        }
    }

    /// Wait for every call that ran outside the queue, including ones they start.
    async fn settle_inflight(&self) -> Result<(), BuildError> {
        loop {
            let tasks = std::mem::take(&mut *self.inflight.lock());
            if tasks.is_empty() {
                return Ok(());
            }
            for (label, task) in tasks {
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        warn!(op = %label, error = %err, "Operation failed");
                        self.abort_inflight();
                        return Err(err);
                    }
                    Err(join) => {
                        self.abort_inflight();
                        return Err(BuildError::script(format!(
                            "operation {} did not complete: {}",
                            label, join
                        )));
                    }
                }
            }
        }
    }

    fn abort_inflight(&self) {
        for (_, task) in self.inflight.lock().drain(..) {
            task.abort();
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(WaveMode::default())
    }
}
