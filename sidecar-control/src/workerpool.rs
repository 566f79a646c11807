//! A fixed set of serial execution lanes.
//!
//! Each lane is one queue drained by one task, so jobs sharing a lane key
//! run one at a time in submission order while different lanes run in
//! parallel. A panicking job is logged and the lane keeps going.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// A unit of work for the pool.
#[async_trait]
pub trait Job: Send + 'static {
    /// Human-readable name for logs.
    fn name(&self) -> String;

    /// Jobs with equal keys always land on the same lane.
    fn lane_key(&self) -> u64;

    async fn run(self: Box<Self>);
}

/// Bounded pool of serial lanes.
pub struct WorkerPool {
    lanes: Vec<mpsc::UnboundedSender<Box<dyn Job>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawns `lanes` lane tasks (at least one) on the current runtime.
    pub fn new(lanes: usize) -> Self {
        let lanes = lanes.max(1);
        let mut senders = Vec::with_capacity(lanes);
        let mut tasks = Vec::with_capacity(lanes);
        for lane in 0..lanes {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            tasks.push(tokio::spawn(drain(lane, rx)));
        }
        debug!("Started worker pool with {} lane(s)", lanes);
        Self {
            lanes: senders,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Lane index for a key.
    pub fn lane_for(&self, key: u64) -> usize {
        let lanes = u64::try_from(self.lanes.len()).unwrap_or(u64::MAX);
        usize::try_from(key % lanes).unwrap_or_default()
    }

    /// Queues a job. Returns `false` if its lane has shut down.
    pub fn submit(&self, job: Box<dyn Job>) -> bool {
        let lane = self.lane_for(job.lane_key());
        let name = job.name();
        if self.lanes[lane].send(job).is_err() {
            warn!("Lane {} closed, dropping {}", lane, name);
            return false;
        }
        true
    }

    /// Stops every lane. Queued jobs are dropped without running.
    pub fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn drain(lane: usize, mut rx: mpsc::UnboundedReceiver<Box<dyn Job>>) {
    while let Some(job) = rx.recv().await {
        let name = job.name();
        if AssertUnwindSafe(job.run()).catch_unwind().await.is_err() {
            error!("Job {} panicked on lane {}", name, lane);
        }
    }
}
