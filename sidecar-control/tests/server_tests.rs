mod common;

use common::*;
use async_trait::async_trait;
use sidecar_control::catalog::PathMatchType;
use sidecar_control::{
    LifecycleState, MeshEvent, RepoServer, ServerConfig, ServerDeps, ServerError,
};
use sidecar_repo_client::mock::{MemoryRepo, RepoCall};
use sidecar_repo_client::{Batch, RepoClient, RepoResult};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

fn config(prefix: Option<&str>) -> ServerConfig {
    ServerConfig {
        codebase_prefix: prefix.map(str::to_string),
        workers: 2,
        retry_delay_ms: 200,
        ..ServerConfig::default()
    }
}

fn build_server(
    harness: &Harness,
    repo: Arc<dyn RepoClient>,
    config: ServerConfig,
) -> (RepoServer, broadcast::Sender<MeshEvent>) {
    build_server_with_capacity(harness, repo, config, 16)
}

fn build_server_with_capacity(
    harness: &Harness,
    repo: Arc<dyn RepoClient>,
    config: ServerConfig,
    capacity: usize,
) -> (RepoServer, broadcast::Sender<MeshEvent>) {
    let (events, _) = broadcast::channel(capacity);
    let deps = ServerDeps {
        catalog: harness.catalog.clone(),
        kube: harness.catalog.clone(),
        authority: harness.authority.clone(),
        repo,
        registry: harness.registry.clone(),
    };
    (RepoServer::new(deps, config, events.clone()), events)
}

fn derives(repo: &MemoryRepo) -> Vec<RepoCall> {
    repo.calls()
        .into_iter()
        .filter(|c| matches!(c, RepoCall::Derive { .. }))
        .collect()
}

async fn settle(mut done: impl FnMut() -> bool) {
    for _ in 0..100 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ── Startup ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn unavailable_repo_fails_startup() {
    init_tracing();
    let harness = Harness::new(base_snapshot());
    let repo = Arc::new(MemoryRepo::never_ready());
    let (server, _events) = build_server(&harness, repo.clone(), config(None));

    let result = server.start().await;

    assert!(matches!(result, Err(ServerError::RepoUnavailable { .. })));
    assert_eq!(server.state(), LifecycleState::Failed);
    assert!(!server.listener_started());
    let calls = repo.calls();
    assert!(calls.len() >= 18);
    assert!(calls.iter().all(|c| *c == RepoCall::IsReady));
}

#[tokio::test(start_paused = true)]
async fn startup_waits_then_seeds_then_listens() {
    init_tracing();
    let harness = Harness::new(base_snapshot());
    let repo = Arc::new(MemoryRepo::ready_after(3));
    let (server, _events) = build_server(&harness, repo.clone(), config(None));
    let mut states = server.subscribe_state();

    server.start().await.unwrap();

    assert!(server.is_ready());
    assert!(server.listener_started());
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), LifecycleState::Ready);

    let calls = repo.calls();
    assert_eq!(
        calls[..6],
        [
            RepoCall::IsReady,
            RepoCall::IsReady,
            RepoCall::IsReady,
            RepoCall::IsReady,
            RepoCall::WriteBatch {
                version: "0".into(),
                paths: vec!["/osm-edge-base".into()],
            },
            RepoCall::NamespaceExists("/osm-edge-base".into()),
        ]
    );
    let base = repo.namespace("/osm-edge-base").unwrap();
    assert_eq!(base.version, "0");
    assert_eq!(
        base.files.keys().collect::<Vec<_>>(),
        vec!["config.js", "main.js", "probes.js", "stats.js"]
    );
}

#[tokio::test(start_paused = true)]
async fn seed_failure_fails_startup() {
    init_tracing();
    let harness = Harness::new(base_snapshot());
    let repo = Arc::new(MemoryRepo::new());
    repo.fail_next_batch();
    let (server, _events) = build_server(&harness, repo.clone(), config(None));

    let result = server.start().await;

    assert!(matches!(result, Err(ServerError::Seed(_))));
    assert_eq!(server.state(), LifecycleState::Failed);
    assert!(!server.listener_started());
}

#[tokio::test(start_paused = true)]
async fn second_start_is_rejected() {
    init_tracing();
    let harness = Harness::new(base_snapshot());
    let (server, _events) = build_server(&harness, Arc::new(MemoryRepo::new()), config(None));

    server.start().await.unwrap();

    assert!(matches!(server.start().await, Err(ServerError::AlreadyStarted)));
    assert!(server.is_ready());
}

#[tokio::test(start_paused = true)]
async fn nothing_is_published_before_ready() {
    init_tracing();
    let harness = Harness::new(base_snapshot());
    let repo = Arc::new(MemoryRepo::never_ready());
    let (server, events) = build_server(&harness, repo.clone(), config(None));

    let _ = events.send(MeshEvent::All);
    let _ = server.start().await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_ne!(server.state(), LifecycleState::Ready);
    assert!(!server.listener_started());
    assert!(repo.mutations().is_empty());
}

/// Records the server's lifecycle state at every derive.
struct StateRecordingRepo {
    inner: MemoryRepo,
    states: OnceLock<watch::Receiver<LifecycleState>>,
    seen: Mutex<Vec<LifecycleState>>,
}

#[async_trait]
impl RepoClient for StateRecordingRepo {
    fn provider_name(&self) -> &'static str {
        "state-recording"
    }

    async fn is_ready(&self) -> RepoResult<bool> {
        self.inner.is_ready().await
    }

    async fn namespace_exists(&self, path: &str) -> RepoResult<bool> {
        self.inner.namespace_exists(path).await
    }

    async fn write_batch(&self, version: &str, batches: &[Batch]) -> RepoResult<()> {
        self.inner.write_batch(version, batches).await
    }

    async fn derive_namespace(&self, path: &str, base: &str, version: &str) -> RepoResult<()> {
        if let Some(states) = self.states.get() {
            self.seen.lock().unwrap().push(*states.borrow());
        }
        self.inner.derive_namespace(path, base, version).await
    }

    async fn delete_namespace(&self, path: &str) -> RepoResult<()> {
        self.inner.delete_namespace(path).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn jobs_only_run_once_ready() {
    init_tracing();
    let harness = Harness::new(base_snapshot());
    let repo = Arc::new(StateRecordingRepo {
        inner: MemoryRepo::new(),
        states: OnceLock::new(),
        seen: Mutex::new(Vec::new()),
    });
    let (server, _events) = build_server(&harness, repo.clone(), config(None));
    repo.states.set(server.subscribe_state()).unwrap();

    server.start().await.unwrap();
    for _ in 0..200 {
        if !repo.seen.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let seen = repo.seen.lock().unwrap().clone();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|s| *s == LifecycleState::Ready));
    server.shutdown();
}

// ── Events ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn ready_server_publishes_every_proxy() {
    init_tracing();
    let harness = Harness::new(base_snapshot());
    let repo = Arc::new(MemoryRepo::new());
    let (server, _events) = build_server(&harness, repo.clone(), config(None));

    server.start().await.unwrap();
    settle(|| derives(&repo).len() == 1).await;

    let path = format!("/osm-edge-sidecar/{}", harness.p1().common_name_prefix());
    assert!(repo.file(&path, "config.json").is_some());
    server.shutdown();
}

#[tokio::test(start_paused = true)]
async fn proxy_event_triggers_republish() {
    init_tracing();
    let harness = Harness::new(base_snapshot());
    let repo = Arc::new(MemoryRepo::new());
    let (server, events) = build_server(&harness, repo.clone(), config(None));
    server.start().await.unwrap();
    settle(|| derives(&repo).len() == 1).await;

    harness.catalog.update(|s| {
        with_outbound(s, vec![route("r", "/", PathMatchType::Prefix, "ns2/api|8080")]);
    });
    events.send(MeshEvent::ProxyChanged(key(P1_KEY))).unwrap();
    settle(|| derives(&repo).len() == 2).await;

    assert_eq!(derives(&repo).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn event_without_change_publishes_nothing() {
    init_tracing();
    let harness = Harness::new(base_snapshot());
    let repo = Arc::new(MemoryRepo::new());
    let (server, events) = build_server(&harness, repo.clone(), config(None));
    server.start().await.unwrap();
    settle(|| derives(&repo).len() == 1).await;

    events.send(MeshEvent::All).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(derives(&repo).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn lagged_listener_recomputes_every_proxy() {
    init_tracing();
    let harness = Harness::new(base_snapshot());
    let repo = Arc::new(MemoryRepo::new());
    let (server, events) =
        build_server_with_capacity(&harness, repo.clone(), config(None), 1);
    server.start().await.unwrap();
    settle(|| derives(&repo).len() == 1).await;

    // A proxy nobody sends an event for.
    let entry = proxy_entry(P2_KEY, "ns2", "sa2", "p2");
    harness.catalog.update(|s| {
        s.pods.push(pod("p2", "ns2", Some("10.0.0.2"), "db"));
        s.proxies.push(entry.clone());
    });
    let p2 = harness.registry.register(entry.into_proxy());

    for _ in 0..3 {
        events.send(MeshEvent::ProxyChanged(key(P1_KEY))).unwrap();
    }
    let p2_path = format!("/osm-edge-sidecar/{}", p2.common_name_prefix());
    settle(|| repo.file(&p2_path, "config.json").is_some()).await;

    assert!(repo.file(&p2_path, "config.json").is_some());
    server.shutdown();
}

// ── Paths ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn prefix_applies_to_every_namespace() {
    init_tracing();
    let harness = Harness::new(base_snapshot());
    let repo = Arc::new(MemoryRepo::new());
    let (server, _events) = build_server(&harness, repo.clone(), config(Some("/mesh-a/")));

    server.start().await.unwrap();
    settle(|| derives(&repo).len() == 1).await;

    assert_eq!(server.paths().base(), "mesh-a/osm-edge-base");
    assert!(repo.namespace("/mesh-a/osm-edge-base").is_some());
    let calls = derives(&repo);
    let RepoCall::Derive { path, base, .. } = &calls[0] else {
        unreachable!();
    };
    assert_eq!(base, "/mesh-a/osm-edge-base");
    assert_eq!(
        *path,
        format!("/mesh-a/osm-edge-sidecar/{}", harness.p1().common_name_prefix())
    );
}
