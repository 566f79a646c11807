//! Repo server lifecycle.
//!
//! Startup is strictly ordered: wait for the repository, seed the base
//! namespace at version `0`, wait for the base to become consistent, then
//! start the event listener. Nothing is scheduled before the listener runs.

use crate::catalog::{KubeController, MeshCatalog};
use crate::certificate::CertificateAuthority;
use crate::compiler::PolicyCompiler;
use crate::config::{CodebasePaths, ServerConfig};
use crate::error::{ServerError, ServerResult};
use crate::proxy::ProxyRegistry;
use crate::publisher::VersionedPublisher;
use crate::scheduler::{JobScheduler, SchedulerDeps};
use sidecar_repo_client::{Batch, BatchItem, RepoClient};
use sidecar_types::ProxyKey;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Version the base namespace is seeded at.
const BASE_VERSION: &str = "0";

/// Files seeded into the base namespace.
const BOOTSTRAP_FILES: [(&str, &str); 4] = [
    ("main.js", include_str!("../bootstrap/main.js")),
    ("config.js", include_str!("../bootstrap/config.js")),
    ("probes.js", include_str!("../bootstrap/probes.js")),
    ("stats.js", include_str!("../bootstrap/stats.js")),
];

/// A request to recompute sidecar configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshEvent {
    ProxyChanged(ProxyKey),
    All,
}

/// Lifecycle of a [`RepoServer`]. Moves forward only, except into `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotStarted,
    WaitingForRepo,
    SeedingBase,
    WaitingForBaseReady,
    Ready,
    Failed,
}

/// Everything the server needs from outside.
pub struct ServerDeps {
    pub catalog: Arc<dyn MeshCatalog>,
    pub kube: Arc<dyn KubeController>,
    pub authority: Arc<dyn CertificateAuthority>,
    pub repo: Arc<dyn RepoClient>,
    pub registry: Arc<ProxyRegistry>,
}

/// Drives startup and turns mesh events into proxy jobs.
pub struct RepoServer {
    config: ServerConfig,
    paths: Arc<CodebasePaths>,
    repo: Arc<dyn RepoClient>,
    scheduler: JobScheduler,
    events: broadcast::Sender<MeshEvent>,
    state: watch::Sender<LifecycleState>,
    started: AtomicBool,
    listener_started: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl RepoServer {
    /// Builds the server and its scheduler. Must run inside a tokio runtime.
    pub fn new(deps: ServerDeps, config: ServerConfig, events: broadcast::Sender<MeshEvent>) -> Self {
        let paths = Arc::new(CodebasePaths::from_config(&config));
        let compiler = Arc::new(PolicyCompiler::new(
            Arc::clone(&deps.catalog),
            Arc::clone(&deps.kube),
            deps.authority,
            Arc::clone(&deps.registry),
        ));
        let scheduler = JobScheduler::new(
            SchedulerDeps {
                compiler,
                publisher: VersionedPublisher::new(Arc::clone(&deps.repo), Arc::clone(&paths)),
                kube: deps.kube,
                registry: deps.registry,
            },
            config.worker_count(),
            config.retry_delay(),
        );
        let (state, _) = watch::channel(LifecycleState::NotStarted);
        Self {
            config,
            paths,
            repo: deps.repo,
            scheduler,
            events,
            state,
            started: AtomicBool::new(false),
            listener_started: AtomicBool::new(false),
            listener: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watches lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == LifecycleState::Ready
    }

    /// Whether the event listener has been spawned.
    pub fn listener_started(&self) -> bool {
        self.listener_started.load(Ordering::SeqCst)
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn paths(&self) -> &CodebasePaths {
        &self.paths
    }

    /// Runs startup to completion.
    ///
    /// Returns once the server is ready and listening, or with an error if
    /// the repository or the base namespace did not become ready in time.
    pub async fn start(&self) -> ServerResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }
        let result = self.run_startup().await;
        if let Err(e) = &result {
            error!("Repo server failed to start: {}", e);
            self.transition(LifecycleState::Failed);
        }
        result
    }

    async fn run_startup(&self) -> ServerResult<()> {
        let interval = self.config.poll_interval();
        let timeout = self.config.ready_timeout();

        self.transition(LifecycleState::WaitingForRepo);
        let repo = &self.repo;
        let ready = poll_until(interval, timeout, || async move {
            match repo.is_ready().await {
                Ok(true) => true,
                Ok(false) => {
                    info!("Repo not ready yet");
                    false
                }
                Err(e) => {
                    info!("Repo not ready yet: {}", e);
                    false
                }
            }
        })
        .await;
        if !ready {
            return Err(ServerError::RepoUnavailable { waited: timeout });
        }
        info!("Repo is ready ({})", repo.provider_name());

        self.transition(LifecycleState::SeedingBase);
        let items = BOOTSTRAP_FILES
            .iter()
            .map(|(name, content)| BatchItem::new(*name, content.as_bytes()))
            .collect();
        self.repo
            .write_batch(BASE_VERSION, &[Batch::new(self.paths.base(), items)])
            .await
            .map_err(ServerError::Seed)?;

        self.transition(LifecycleState::WaitingForBaseReady);
        let base = self.paths.base();
        let ready = poll_until(interval, timeout, || async move {
            match repo.namespace_exists(base).await {
                Ok(exists) => exists,
                Err(e) => {
                    debug!("Base namespace check failed: {}", e);
                    false
                }
            }
        })
        .await;
        if !ready {
            return Err(ServerError::BaseNotReady {
                path: base.to_string(),
                waited: timeout,
            });
        }
        info!("Base namespace {} is ready", base);

        self.transition(LifecycleState::Ready);
        self.spawn_listener();
        Ok(())
    }

    fn transition(&self, next: LifecycleState) {
        debug!("Repo server {:?} -> {:?}", self.state(), next);
        self.state.send_replace(next);
    }

    fn spawn_listener(&self) {
        let rx = self.events.subscribe();
        let scheduler = self.scheduler.clone();
        let handle = tokio::spawn(listen(scheduler, rx));
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        self.listener_started.store(true, Ordering::SeqCst);
    }

    /// Stops the listener and the worker lanes.
    pub fn shutdown(&self) {
        if let Some(handle) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.scheduler.shutdown();
    }
}

/// Checks immediately, then every `interval`, until `check` passes or
/// `timeout` elapses.
async fn poll_until<F, Fut>(interval: Duration, timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(timeout, async {
        loop {
            if check().await {
                return;
            }
            tokio::time::sleep(interval).await;
        }
    })
    .await
    .is_ok()
}

/// Events gathered from one burst.
#[derive(Debug, Default)]
struct Pending {
    all: bool,
    proxies: BTreeSet<ProxyKey>,
}

impl Pending {
    fn add(&mut self, event: MeshEvent) {
        match event {
            MeshEvent::All => self.all = true,
            MeshEvent::ProxyChanged(key) => {
                self.proxies.insert(key);
            }
        }
    }

    fn dispatch(self, scheduler: &JobScheduler) {
        if self.all {
            let handles = scheduler.enqueue_all();
            debug!("Scheduled {} proxies", handles.len());
            return;
        }
        for key in &self.proxies {
            scheduler.enqueue_key(key);
        }
    }
}

async fn listen(scheduler: JobScheduler, mut rx: broadcast::Receiver<MeshEvent>) {
    scheduler.enqueue_all();
    loop {
        let mut pending = Pending::default();
        match rx.recv().await {
            Ok(event) => pending.add(event),
            Err(RecvError::Lagged(missed)) => {
                warn!("Event listener lagged by {} events, recomputing all", missed);
                pending.all = true;
            }
            Err(RecvError::Closed) => break,
        }
        loop {
            match rx.try_recv() {
                Ok(event) => pending.add(event),
                Err(TryRecvError::Lagged(_)) => pending.all = true,
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        pending.dispatch(&scheduler);
    }
    debug!("Event source closed, listener exiting");
}
