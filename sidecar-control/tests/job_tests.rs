mod common;

use common::*;
use sidecar_control::catalog::{KubeController, Namespace, Pod, PathMatchType};
use sidecar_control::error::KubeResult;
use sidecar_control::workerpool::Job;
use sidecar_control::{JobOutcome, JobReport, Proxy, ProxyJob, PublishOutcome};
use sidecar_repo_client::mock::RepoCall;
use sidecar_types::{MeshService, PodMetadata, ServiceIdentity};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn run(harness: &Harness, proxy: Arc<Proxy>, retry: Arc<CountingRetry>) -> JobReport {
    let (job, handle) = ProxyJob::new(proxy, harness.job_context(retry));
    job.execute().await;
    handle.wait().await.unwrap()
}

fn published(report: &JobReport) -> bool {
    report.publish().is_some_and(PublishOutcome::is_published)
}

fn with_peer_without_ip(snapshot: &mut sidecar_control::MeshSnapshot) {
    snapshot.pods.push(pod("p2", "ns2", None, "db"));
    snapshot.proxies.push(proxy_entry(P2_KEY, "ns2", "sa2", "p2"));
}

// ── Retry ────────────────────────────────────────────────────────

#[tokio::test]
async fn not_ready_publishes_and_requests_one_retry() {
    let mut snapshot = base_snapshot();
    with_peer_without_ip(&mut snapshot);
    let harness = Harness::seeded(snapshot).await;
    let retry = Arc::new(CountingRetry::default());

    let report = run(&harness, harness.p1(), retry.clone()).await;

    assert!(report.retry_requested);
    assert!(published(&report));
    assert_eq!(retry.count(), 1);
}

#[tokio::test]
async fn retry_stops_once_data_arrives() {
    let mut snapshot = base_snapshot();
    with_peer_without_ip(&mut snapshot);
    let harness = Harness::seeded(snapshot).await;
    let retry = Arc::new(CountingRetry::default());
    run(&harness, harness.p1(), retry.clone()).await;

    harness.catalog.update(|s| {
        if let Some(p2) = s.pods.iter_mut().find(|p| p.name == "p2") {
            p2.ip = Some("10.0.0.2".into());
        }
    });
    let report = run(&harness, harness.p1(), retry.clone()).await;

    assert!(!report.retry_requested);
    assert!(published(&report));
    assert_eq!(retry.count(), 1);
}

// ── Skipping ─────────────────────────────────────────────────────

#[tokio::test]
async fn missing_pod_skips_without_side_effects() {
    let harness = Harness::seeded(base_snapshot()).await;
    let orphan = harness.registry.register(Proxy::new(
        key(P2_KEY),
        ServiceIdentity::new("ns9", "ghost"),
        "serial-9",
        Some(PodMetadata {
            pod_name: "gone".into(),
            namespace: "ns9".into(),
            ..PodMetadata::default()
        }),
    ));
    let retry = Arc::new(CountingRetry::default());

    let report = run(&harness, orphan.clone(), retry.clone()).await;

    assert!(matches!(report.outcome, JobOutcome::Skipped(_)));
    assert!(report.publish().is_none());
    assert!(harness.repo.calls().is_empty());
    assert_eq!(retry.count(), 0);
    assert!(orphan.lock().await.certificate.is_none());
}

// ── Publishing ───────────────────────────────────────────────────

#[tokio::test]
async fn republishes_only_on_change() {
    let harness = Harness::seeded(base_snapshot()).await;
    let retry = Arc::new(CountingRetry::default());
    let path = format!("/osm-edge-sidecar/{}", harness.p1().common_name_prefix());

    let first = run(&harness, harness.p1(), retry.clone()).await;
    let Some(PublishOutcome::Published { current: h1, .. }) = first.publish() else {
        panic!("first run should publish");
    };
    let h1 = *h1;
    assert_eq!(
        harness.repo.mutations()[1],
        RepoCall::WriteBatch {
            version: h1.offset_back(1).to_string(),
            paths: vec![path.clone()],
        }
    );

    harness.repo.clear_calls();
    let second = run(&harness, harness.p1(), retry.clone()).await;
    assert!(matches!(second.publish(), Some(PublishOutcome::Unchanged(fp)) if *fp == h1));
    assert!(harness.repo.calls().is_empty());

    harness.catalog.update(|s| {
        with_outbound(s, vec![route("r", "/", PathMatchType::Prefix, "ns2/api|8080")]);
    });
    let third = run(&harness, harness.p1(), retry.clone()).await;
    let Some(PublishOutcome::Published { previous, current: h2 }) = third.publish() else {
        panic!("changed policy should publish");
    };
    assert_eq!(*previous, Some(h1));
    assert_ne!(*h2, h1);
    assert_eq!(retry.count(), 0);
}

#[tokio::test]
async fn job_identity_follows_proxy() {
    let harness = Harness::new(base_snapshot());
    let proxy = harness.p1();
    let (job, _handle) = ProxyJob::new(
        proxy.clone(),
        harness.job_context(Arc::new(CountingRetry::default())),
    );

    assert_eq!(job.name(), format!("sidecarJob-{}", proxy.common_name_prefix()));
    assert_eq!(job.lane_key(), proxy.key().lane_hash());
}

// ── Mutual exclusion ─────────────────────────────────────────────

/// Delegates to the snapshot catalog while tracking how many service
/// lookups overlap.
struct SlowKube {
    inner: Arc<sidecar_control::SnapshotCatalog>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl KubeController for SlowKube {
    fn services_for_proxy(&self, proxy: &Proxy) -> KubeResult<Vec<MeshService>> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        let result = self.inner.services_for_proxy(proxy);
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn pod_for_proxy(&self, proxy: &Proxy) -> KubeResult<Pod> {
        self.inner.pod_for_proxy(proxy)
    }

    fn namespace(&self, name: &str) -> Option<Namespace> {
        self.inner.namespace(name)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_jobs_for_one_proxy_never_overlap() {
    let harness = Harness::seeded(base_snapshot()).await;
    let kube = Arc::new(SlowKube {
        inner: harness.catalog.clone(),
        active: AtomicUsize::new(0),
        max_active: AtomicUsize::new(0),
    });
    let ctx = Arc::new(sidecar_control::job::JobContext {
        compiler: harness.compiler.clone(),
        publisher: harness.publisher(),
        kube: kube.clone(),
        retry: Arc::new(CountingRetry::default()),
    });

    let mut tasks = Vec::new();
    let mut handles = Vec::new();
    for _ in 0..4 {
        let (job, handle) = ProxyJob::new(harness.p1(), ctx.clone());
        tasks.push(tokio::spawn(job.execute()));
        handles.push(handle);
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut published_count = 0;
    for handle in handles {
        if published(&handle.wait().await.unwrap()) {
            published_count += 1;
        }
    }
    assert_eq!(kube.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(published_count, 1);
}

// ── Handles ──────────────────────────────────────────────────────

#[tokio::test]
async fn handle_can_be_waited_on_from_blocking_code() {
    let harness = Harness::seeded(base_snapshot()).await;
    let (job, handle) = ProxyJob::new(
        harness.p1(),
        harness.job_context(Arc::new(CountingRetry::default())),
    );

    let waiter = tokio::task::spawn_blocking(move || handle.wait_blocking());
    tokio::spawn(job.execute());

    let report = waiter.await.unwrap().unwrap();
    assert_eq!(report.proxy, key(P1_KEY));
    assert!(published(&report));
}

#[tokio::test]
async fn dropped_job_resolves_handle_to_none() {
    let harness = Harness::new(base_snapshot());
    let (job, handle) = ProxyJob::new(
        harness.p1(),
        harness.job_context(Arc::new(CountingRetry::default())),
    );

    drop(job);

    assert!(handle.wait().await.is_none());
}
