use super::*;
use crate::meta::connect_memory;
use crate::notify::EventKind;
use haven_core::storage::ObjectStore;
use haven_sbe_mem::InMemory;
use pretty_assertions::assert_eq;

struct Fx {
    pipeline: WritePipeline,
    backend: Arc<InMemory>,
    events: Arc<Broadcaster>,
}

async fn fx() -> Fx {
    let pool = connect_memory().await.unwrap();
    let logger = slog::Logger::root(slog::Discard, o!());
    let meta = MetaStore::new(pool.clone(), logger.clone());
    let perms = Evaluator::new(pool.clone(), logger.clone());
    let gate = Gate::new(pool.clone(), 1024, logger.clone());
    let backend = Arc::new(InMemory::new());
    let router = Arc::new(StorageRouter::new(backend.clone() as Arc<dyn ObjectStore>));
    let events = Arc::new(Broadcaster::new(64));
    // Alice gets the run of the namespace; other users start with nothing.
    perms.set_permission("alice", "/", Level::Owner).await.unwrap();
    let pipeline = WritePipeline::new(meta, router, perms, gate, events.clone(), None, logger);
    Fx { pipeline, backend, events }
}

fn alice() -> Claims {
    Claims::user("alice")
}

fn sha(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

#[tokio::test]
async fn first_write_creates_version_one() {
    let fx = fx().await;
    let out = fx
        .pipeline
        .write(&alice(), "/docs/a.txt", Bytes::from_static(b"v1"), None, None)
        .await
        .unwrap();

    assert!(out.created);
    assert_eq!(out.entry.version, 1);
    assert_eq!(out.entry.hash, sha(b"v1"));
    assert_eq!(out.entry.storage_key, "docs/a.txt");
    assert_eq!(out.entry.owner.as_deref(), Some("alice"));
    assert_eq!(fx.backend.get_bytes("docs/a.txt").await.unwrap(), Bytes::from_static(b"v1"));
    // Ancestor directories appeared without back-end interaction.
    let parent = fx.pipeline.meta().get_live("/docs").await.unwrap().unwrap();
    assert!(parent.is_dir);
}

#[tokio::test]
async fn overwrite_bumps_version_and_backs_up_content() {
    let fx = fx().await;
    fx.pipeline.write(&alice(), "/a.txt", Bytes::from_static(b"v1"), None, None).await.unwrap();
    let out = fx.pipeline.write(&alice(), "/a.txt", Bytes::from_static(b"v2"), None, None).await.unwrap();

    assert!(!out.created);
    assert_eq!(out.entry.version, 2);
    assert_eq!(out.entry.hash, sha(b"v2"));

    // The prior version is retrievable both as a record and as bytes.
    let (versions, current) = fx.pipeline.meta().list_versions("/a.txt").await.unwrap();
    assert_eq!(current, 2);
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].version, 1);
    assert_eq!(versions[0].hash, sha(b"v1"));
    assert_eq!(
        fx.backend.get_bytes("_versions/a.txt/1").await.unwrap(),
        Bytes::from_static(b"v1")
    );
}

#[tokio::test]
async fn stale_expected_version_conflicts_without_mutating() {
    let fx = fx().await;
    fx.pipeline.write(&alice(), "/a.txt", Bytes::from_static(b"v1"), None, None).await.unwrap();
    fx.pipeline
        .write(&alice(), "/a.txt", Bytes::from_static(b"v2"), Some(1), None)
        .await
        .unwrap();

    let err = fx
        .pipeline
        .write(&alice(), "/a.txt", Bytes::from_static(b"v3"), Some(1), None)
        .await
        .unwrap_err();
    match err {
        Error::Conflict {
            expected_version,
            current_version,
            current_hash,
            ..
        } => {
            assert_eq!(expected_version, 1);
            assert_eq!(current_version, 2);
            assert_eq!(current_hash, sha(b"v2"));
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    // No change to stored content.
    assert_eq!(fx.backend.get_bytes("a.txt").await.unwrap(), Bytes::from_static(b"v2"));
    assert_eq!(fx.pipeline.meta().get_live("/a.txt").await.unwrap().unwrap().version, 2);
}

#[tokio::test]
async fn stale_expected_hash_conflicts() {
    let fx = fx().await;
    fx.pipeline.write(&alice(), "/a.txt", Bytes::from_static(b"v1"), None, None).await.unwrap();

    let err = fx
        .pipeline
        .write(&alice(), "/a.txt", Bytes::from_static(b"v2"), None, Some("0000"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict { .. }));

    // The matching hash passes.
    fx.pipeline
        .write(&alice(), "/a.txt", Bytes::from_static(b"v2"), None, Some(&sha(b"v1")))
        .await
        .unwrap();
}

#[tokio::test]
async fn upload_limit_boundary() {
    let fx = fx().await;
    fx.pipeline.gate().set_quota("alice", 0, 8).await.unwrap();

    // Exactly at the limit succeeds, one byte over fails.
    fx.pipeline
        .write(&alice(), "/cap.bin", Bytes::from_static(b"12345678"), None, None)
        .await
        .unwrap();
    let err = fx
        .pipeline
        .write(&alice(), "/cap.bin", Bytes::from_static(b"123456789"), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PayloadTooLarge(_)));
}

#[tokio::test]
async fn storage_quota_rejects_before_any_write() {
    let fx = fx().await;
    fx.pipeline.gate().set_quota("alice", 4, 0).await.unwrap();

    let err = fx
        .pipeline
        .write(&alice(), "/big.bin", Bytes::from_static(b"12345"), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PayloadTooLarge(_)));
    assert!(!fx.backend.exists("big.bin").await.unwrap());
    assert!(fx.pipeline.meta().get("/big.bin").await.unwrap().is_none());
}

#[tokio::test]
async fn unauthorized_writer_is_refused() {
    let fx = fx().await;
    let err = fx
        .pipeline
        .write(&Claims::user("mallory"), "/a.txt", Bytes::from_static(b"x"), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));
}

#[tokio::test]
async fn delete_hides_and_restore_brings_back() {
    let fx = fx().await;
    fx.pipeline.write(&alice(), "/x/a", Bytes::from_static(b"a"), None, None).await.unwrap();
    fx.pipeline.write(&alice(), "/x/b", Bytes::from_static(b"b"), None, None).await.unwrap();

    let n = fx.pipeline.delete(&alice(), "/x").await.unwrap();
    assert_eq!(n, 3);
    assert!(fx.pipeline.meta().get_live("/x/a").await.unwrap().is_none());
    // Bytes survive a soft-delete.
    assert!(fx.backend.exists("x/a").await.unwrap());

    fx.pipeline.restore(&alice(), "/x").await.unwrap();
    let back = fx.pipeline.meta().get_live("/x/a").await.unwrap().unwrap();
    assert_eq!(back.hash, sha(b"a"));
}

#[tokio::test]
async fn purge_removes_bytes_versions_and_thumbs() {
    let fx = fx().await;
    fx.pipeline.write(&alice(), "/p/f.jpg", Bytes::from_static(b"v1"), None, None).await.unwrap();
    fx.pipeline.write(&alice(), "/p/f.jpg", Bytes::from_static(b"v2"), None, None).await.unwrap();
    fx.backend.put_bytes("_thumbs/p/f.jpg", Bytes::from_static(b"t")).await.unwrap();

    fx.pipeline.delete(&alice(), "/p").await.unwrap();
    let purged = fx.pipeline.purge(&alice(), "/p").await.unwrap();
    assert_eq!(purged, 1);

    assert!(!fx.backend.exists("p/f.jpg").await.unwrap());
    assert!(!fx.backend.exists("_versions/p/f.jpg/1").await.unwrap());
    assert!(!fx.backend.exists("_thumbs/p/f.jpg").await.unwrap());
    assert!(fx.pipeline.meta().get("/p/f.jpg").await.unwrap().is_none());
}

#[tokio::test]
async fn rollback_restores_old_bytes_under_new_version() {
    let fx = fx().await;
    fx.pipeline.write(&alice(), "/doc", Bytes::from_static(b"hello"), None, None).await.unwrap();
    fx.pipeline.write(&alice(), "/doc", Bytes::from_static(b"world"), None, None).await.unwrap();

    let rb = fx.pipeline.rollback(&alice(), "/doc", 1).await.unwrap();
    assert_eq!(rb.restored_version, 1);
    assert_eq!(rb.new_version, 3);

    let (entry, read) = fx.pipeline.read(&alice(), "/doc", None).await.unwrap();
    assert_eq!(entry.version, 3);
    assert_eq!(entry.hash, sha(b"hello"));
    assert_eq!(read.into_bytes().await.unwrap(), Bytes::from_static(b"hello"));
    // Both historical versions remain retrievable.
    let (versions, _) = fx.pipeline.meta().list_versions("/doc").await.unwrap();
    assert_eq!(versions.iter().map(|v| v.version).collect::<Vec<_>>(), vec![2, 1]);
}

#[tokio::test]
async fn read_honours_ranges() {
    let fx = fx().await;
    fx.pipeline
        .write(&alice(), "/r.bin", Bytes::from_static(b"0123456789"), None, None)
        .await
        .unwrap();

    let (_, read) = fx.pipeline.read(&alice(), "/r.bin", Some((0, 1))).await.unwrap();
    assert_eq!(&read.into_bytes().await.unwrap()[..], b"0");
    let (_, read) = fx.pipeline.read(&alice(), "/r.bin", Some((7, 0))).await.unwrap();
    assert_eq!(&read.into_bytes().await.unwrap()[..], b"789");
}

#[tokio::test]
async fn copy_duplicates_bytes_and_row() {
    let fx = fx().await;
    fx.pipeline.write(&alice(), "/src.txt", Bytes::from_static(b"body"), None, None).await.unwrap();

    let clone = fx.pipeline.copy_entry(&alice(), "/src.txt", "/dup/copy.txt").await.unwrap();
    assert_eq!(clone.version, 1);
    assert_eq!(clone.hash, sha(b"body"));
    assert_eq!(
        fx.backend.get_bytes("dup/copy.txt").await.unwrap(),
        Bytes::from_static(b"body")
    );
    // Independent objects from here on.
    fx.pipeline.write(&alice(), "/src.txt", Bytes::from_static(b"new"), None, None).await.unwrap();
    assert_eq!(
        fx.backend.get_bytes("dup/copy.txt").await.unwrap(),
        Bytes::from_static(b"body")
    );
}

#[tokio::test]
async fn moved_file_remains_readable() {
    let fx = fx().await;
    fx.pipeline.write(&alice(), "/old/f.txt", Bytes::from_static(b"keep"), None, None).await.unwrap();

    fx.pipeline.move_entry(&alice(), "/old/f.txt", "/new/f.txt").await.unwrap();
    let (entry, read) = fx.pipeline.read(&alice(), "/new/f.txt", None).await.unwrap();
    // The storage key still points at the original object.
    assert_eq!(entry.storage_key, "old/f.txt");
    assert_eq!(read.into_bytes().await.unwrap(), Bytes::from_static(b"keep"));
}

#[tokio::test]
async fn events_follow_commit_order() {
    let fx = fx().await;
    let mut rx = fx.events.subscribe();

    fx.pipeline.write(&alice(), "/e.txt", Bytes::from_static(b"1"), None, None).await.unwrap();
    fx.pipeline.write(&alice(), "/e.txt", Bytes::from_static(b"2"), None, None).await.unwrap();
    fx.pipeline.delete(&alice(), "/e.txt").await.unwrap();

    assert_eq!(rx.recv().await.unwrap().kind, EventKind::Create);
    let modify = rx.recv().await.unwrap();
    assert_eq!(modify.kind, EventKind::Modify);
    assert_eq!(modify.version, 2);
    assert_eq!(rx.recv().await.unwrap().kind, EventKind::Delete);
}
