//! Routes proxy jobs onto the worker pool and handles retries.
//!
//! Retry requests are coalesced: every key requested while a retry window
//! is open is re-enqueued once when the window closes. The window is the
//! configured retry delay with 50% jitter either way.

use crate::catalog::KubeController;
use crate::compiler::PolicyCompiler;
use crate::job::{JobContext, JobHandle, ProxyJob, RetryRequester};
use crate::proxy::{Proxy, ProxyRegistry};
use crate::publisher::VersionedPublisher;
use crate::workerpool::WorkerPool;
use rand::Rng;
use sidecar_types::ProxyKey;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Sends retry requests to a [`JobScheduler`].
#[derive(Debug, Clone)]
pub struct RetryHandle {
    tx: mpsc::UnboundedSender<ProxyKey>,
}

impl RetryRequester for RetryHandle {
    fn request_retry(&self, key: &ProxyKey) {
        if self.tx.send(*key).is_err() {
            debug!("Scheduler gone, dropping retry for {}", key);
        }
    }
}

struct SchedulerInner {
    pool: WorkerPool,
    ctx: Arc<JobContext>,
    registry: Arc<ProxyRegistry>,
}

/// Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
    retry: RetryHandle,
}

/// Collaborators a scheduler builds its jobs from.
pub struct SchedulerDeps {
    pub compiler: Arc<PolicyCompiler>,
    pub publisher: VersionedPublisher,
    pub kube: Arc<dyn KubeController>,
    pub registry: Arc<ProxyRegistry>,
}

impl JobScheduler {
    /// Starts the pool and the retry loop on the current runtime.
    pub fn new(deps: SchedulerDeps, workers: usize, retry_delay: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let retry = RetryHandle { tx };
        let ctx = Arc::new(JobContext {
            compiler: deps.compiler,
            publisher: deps.publisher,
            kube: deps.kube,
            retry: Arc::new(retry.clone()),
        });
        let inner = Arc::new(SchedulerInner {
            pool: WorkerPool::new(workers),
            ctx,
            registry: deps.registry,
        });
        tokio::spawn(retry_loop(Arc::downgrade(&inner), rx, retry_delay));
        Self { inner, retry }
    }

    /// Queues a job for `proxy` and returns its completion handle.
    pub fn enqueue(&self, proxy: Arc<Proxy>) -> JobHandle {
        let (job, handle) = ProxyJob::new(proxy, Arc::clone(&self.inner.ctx));
        self.inner.pool.submit(Box::new(job));
        handle
    }

    /// Queues a job for a registered proxy.
    pub fn enqueue_key(&self, key: &ProxyKey) -> Option<JobHandle> {
        match self.inner.registry.get(key) {
            Some(proxy) => Some(self.enqueue(proxy)),
            None => {
                debug!("Proxy {} not registered, not scheduling", key);
                None
            }
        }
    }

    /// Queues a job for every registered proxy.
    pub fn enqueue_all(&self) -> Vec<JobHandle> {
        self.inner
            .registry
            .list()
            .into_iter()
            .map(|proxy| self.enqueue(proxy))
            .collect()
    }

    /// A handle for requesting delayed re-runs.
    pub fn retry_handle(&self) -> RetryHandle {
        self.retry.clone()
    }

    pub fn lane_count(&self) -> usize {
        self.inner.pool.lane_count()
    }

    /// Stops the worker lanes.
    pub fn shutdown(&self) {
        self.inner.pool.shutdown();
    }
}

fn jittered(delay: Duration) -> Duration {
    delay.mul_f64(rand::thread_rng().gen_range(0.5..1.5))
}

async fn retry_loop(
    inner: Weak<SchedulerInner>,
    mut rx: mpsc::UnboundedReceiver<ProxyKey>,
    delay: Duration,
) {
    let mut pending = BTreeSet::new();
    let mut deadline: Option<Instant> = None;
    loop {
        tokio::select! {
            request = rx.recv() => match request {
                Some(key) => {
                    pending.insert(key);
                    if deadline.is_none() {
                        let wait = jittered(delay);
                        debug!("Retry scheduled in {:?}", wait);
                        deadline = Some(Instant::now() + wait);
                    }
                }
                None => break,
            },
            () = sleep_until(deadline), if deadline.is_some() => {
                deadline = None;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                for key in std::mem::take(&mut pending) {
                    match inner.registry.get(&key) {
                        Some(proxy) => {
                            let (job, _handle) = ProxyJob::new(proxy, Arc::clone(&inner.ctx));
                            inner.pool.submit(Box::new(job));
                        }
                        None => warn!("Proxy {} unregistered before its retry", key),
                    }
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(deadline).await;
    }
}
