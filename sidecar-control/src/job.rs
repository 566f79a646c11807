//! The per-proxy compile-and-publish job.

use crate::catalog::KubeController;
use crate::compiler::PolicyCompiler;
use crate::error::KubeError;
use crate::proxy::Proxy;
use crate::publisher::{PublishOutcome, VersionedPublisher};
use crate::workerpool::Job;
use async_trait::async_trait;
use sidecar_types::ProxyKey;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Receives requests to run a proxy's job again later.
pub trait RetryRequester: Send + Sync {
    fn request_retry(&self, key: &ProxyKey);
}

/// Collaborators shared by every job.
pub struct JobContext {
    pub compiler: Arc<PolicyCompiler>,
    pub publisher: VersionedPublisher,
    pub kube: Arc<dyn KubeController>,
    pub retry: Arc<dyn RetryRequester>,
}

/// How a job ended.
#[derive(Debug)]
pub enum JobOutcome {
    /// The proxy's services could not be listed; nothing was compiled.
    Skipped(KubeError),
    /// A document was compiled and handed to the publisher.
    Completed(PublishOutcome),
}

/// Summary delivered through a [`JobHandle`].
#[derive(Debug)]
pub struct JobReport {
    pub proxy: ProxyKey,
    pub outcome: JobOutcome,
    /// Whether a later run was requested because data was missing.
    pub retry_requested: bool,
}

impl JobReport {
    /// The publish outcome, if the job got that far.
    pub fn publish(&self) -> Option<&PublishOutcome> {
        match &self.outcome {
            JobOutcome::Completed(outcome) => Some(outcome),
            JobOutcome::Skipped(_) => None,
        }
    }
}

/// Completion handle for a queued job.
///
/// Resolves once the job finishes. Resolves to `None` if the job never ran
/// to completion, e.g. it panicked or the pool shut down.
#[derive(Debug)]
pub struct JobHandle {
    rx: oneshot::Receiver<JobReport>,
}

impl JobHandle {
    /// Waits for the job without blocking the runtime.
    pub async fn wait(self) -> Option<JobReport> {
        self.rx.await.ok()
    }

    /// Blocks the current thread until the job finishes.
    ///
    /// Must not be called from within an async context.
    pub fn wait_blocking(self) -> Option<JobReport> {
        self.rx.blocking_recv().ok()
    }
}

/// Compiles and publishes the document for one proxy.
pub struct ProxyJob {
    proxy: Arc<Proxy>,
    ctx: Arc<JobContext>,
    done: oneshot::Sender<JobReport>,
}

impl ProxyJob {
    pub fn new(proxy: Arc<Proxy>, ctx: Arc<JobContext>) -> (Self, JobHandle) {
        let (done, rx) = oneshot::channel();
        (Self { proxy, ctx, done }, JobHandle { rx })
    }

    /// Runs the job to completion and signals its handle.
    pub async fn execute(self) {
        let report = self.run_locked().await;
        // The waiter may have gone away.
        let _ = self.done.send(report);
    }

    async fn run_locked(&self) -> JobReport {
        let proxy = &self.proxy;
        let mut state = proxy.lock().await;

        let services = match self.ctx.kube.services_for_proxy(proxy) {
            Ok(services) => services,
            Err(e) => {
                warn!("Error looking up services for {}: {}", proxy, e);
                return JobReport {
                    proxy: proxy.key(),
                    outcome: JobOutcome::Skipped(e),
                    retry_requested: false,
                };
            }
        };

        let compiled = self.ctx.compiler.compile(proxy, &mut state, &services);
        let retry_requested = !compiled.is_ready();
        if retry_requested {
            debug!("Requesting retry for {}", proxy);
            self.ctx.retry.request_retry(&proxy.key());
        }

        let outcome = self
            .ctx
            .publisher
            .publish(proxy, &mut state, compiled.document, &compiled.plugin_version)
            .await;
        JobReport {
            proxy: proxy.key(),
            outcome: JobOutcome::Completed(outcome),
            retry_requested,
        }
    }
}

#[async_trait]
impl Job for ProxyJob {
    fn name(&self) -> String {
        format!("sidecarJob-{}", self.proxy.common_name_prefix())
    }

    fn lane_key(&self) -> u64 {
        self.proxy.key().lane_hash()
    }

    async fn run(self: Box<Self>) {
        self.execute().await;
    }
}
