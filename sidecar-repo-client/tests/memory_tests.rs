use pretty_assertions::assert_eq;
use sidecar_repo_client::mock::{MemoryRepo, RepoCall};
use sidecar_repo_client::{Batch, BatchItem, RepoClient, RepoError};

fn base_batch() -> Batch {
    Batch::new("osm-edge-base", vec![BatchItem::new("main.js", "pipy()")])
}

#[tokio::test]
async fn ready_after_counts_polls() {
    let repo = MemoryRepo::ready_after(2);
    assert!(!repo.is_ready().await.unwrap());
    assert!(!repo.is_ready().await.unwrap());
    assert!(repo.is_ready().await.unwrap());
    assert!(repo.is_ready().await.unwrap());
}

#[tokio::test]
async fn never_ready_stays_down() {
    let repo = MemoryRepo::never_ready();
    for _ in 0..10 {
        assert!(!repo.is_ready().await.unwrap());
    }
}

#[tokio::test]
async fn batch_then_derive_copies_base_files() {
    let repo = MemoryRepo::new();
    repo.write_batch("0", &[base_batch()]).await.unwrap();
    assert!(repo.namespace_exists("/osm-edge-base").await.unwrap());

    repo.derive_namespace("osm-edge-sidecar/p1", "/osm-edge-base", "40")
        .await
        .unwrap();
    let derived = repo.namespace("osm-edge-sidecar/p1").unwrap();
    assert_eq!(derived.version, "40");
    assert_eq!(derived.base.as_deref(), Some("/osm-edge-base"));
    assert_eq!(derived.files.get("main.js").unwrap(), b"pipy()");
}

#[tokio::test]
async fn derive_from_missing_base_fails() {
    let repo = MemoryRepo::new();
    let err = repo
        .derive_namespace("osm-edge-sidecar/p1", "/osm-edge-base", "1")
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound(_)));
    assert!(repo.namespace("osm-edge-sidecar/p1").is_none());
}

#[tokio::test]
async fn injected_failures_fire_once() {
    let repo = MemoryRepo::new();
    repo.fail_next_batch();
    assert!(matches!(
        repo.write_batch("0", &[base_batch()]).await,
        Err(RepoError::Injected(_))
    ));
    assert!(repo.namespace("osm-edge-base").is_none());
    repo.write_batch("0", &[base_batch()]).await.unwrap();
    assert!(repo.namespace("osm-edge-base").is_some());
}

#[tokio::test]
async fn delete_removes_namespace() {
    let repo = MemoryRepo::new();
    repo.write_batch("0", &[base_batch()]).await.unwrap();
    repo.delete_namespace("/osm-edge-base").await.unwrap();
    assert!(repo.namespace_paths().is_empty());
    // Deleting again is fine.
    repo.delete_namespace("/osm-edge-base").await.unwrap();
}

#[tokio::test]
async fn calls_are_recorded_in_order() {
    let repo = MemoryRepo::new();
    repo.is_ready().await.unwrap();
    repo.write_batch("0", &[base_batch()]).await.unwrap();
    repo.derive_namespace("s/p", "osm-edge-base", "5").await.unwrap();
    repo.delete_namespace("s/p").await.unwrap();

    assert_eq!(
        repo.calls(),
        vec![
            RepoCall::IsReady,
            RepoCall::WriteBatch {
                version: "0".into(),
                paths: vec!["/osm-edge-base".into()],
            },
            RepoCall::Derive {
                path: "/s/p".into(),
                base: "/osm-edge-base".into(),
                version: "5".into(),
            },
            RepoCall::Delete("/s/p".into()),
        ]
    );
    assert_eq!(repo.mutations().len(), 3);

    repo.clear_calls();
    assert!(repo.calls().is_empty());
}
