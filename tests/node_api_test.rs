//! Node API tests: content addressing and the pin retention discipline.

mod support;

use std::sync::Arc;

use ed25519_dalek::SigningKey;
use hoard::Config;
use hoard::Node;
use hoard::NodeParams;
use hoard_swarm::MemRealm;
use support::init_tracing;
use support::make_node;

#[tokio::test]
async fn content_addressing_is_stable() {
    init_tracing();
    let realm = MemRealm::new();
    let n = make_node(&realm, 1).await;

    let first = n.node.post("", b"hello").await.unwrap();
    let second = n.node.post("", b"hello").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first, hoard_blobs::hash(b"hello"));
    assert_eq!(n.node.get(&first).await.unwrap().as_ref(), b"hello");
}

#[tokio::test]
async fn get_of_unknown_blob_is_not_found() {
    init_tracing();
    let realm = MemRealm::new();
    let n = make_node(&realm, 1).await;
    let err = n.node.get(&hoard_blobs::hash(b"nowhere")).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn oversized_posts_are_rejected() {
    init_tracing();
    let realm = MemRealm::new();
    let n = make_node(&realm, 1).await;
    let big = vec![0u8; n.node.max_blob_size() + 1];
    assert!(n.node.post("", &big).await.is_err());
}

#[tokio::test]
async fn pinned_blobs_survive_gc_and_unpinned_ones_do_not() {
    init_tracing();
    let realm = MemRealm::new();
    let n = make_node(&realm, 1).await;

    n.node.create_pin_set("keep").unwrap();
    let kept = n.node.post("keep", b"kept bytes").await.unwrap();
    let loose = n.node.post("", b"loose bytes").await.unwrap();

    assert_eq!(n.node.pin_sets().refcount(&kept).unwrap(), 1);
    assert_eq!(n.node.pin_sets().refcount(&loose).unwrap(), 0);

    n.node.gc().await.unwrap();
    assert!(n.node.exists(&kept).await.unwrap());
    assert!(!n.node.exists(&loose).await.unwrap());

    // Dropping the last pin makes the blob collectable.
    n.node.unpin("keep", &kept).unwrap();
    n.node.gc().await.unwrap();
    assert!(!n.node.exists(&kept).await.unwrap());
}

#[tokio::test]
async fn state_survives_reopen() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("hoard.redb");
    let signing_key = SigningKey::from_bytes(&[7u8; 32]);

    let id = {
        let db = Arc::new(redb::Database::create(&db_path).unwrap());
        let realm = MemRealm::new();
        let node = Node::new(NodeParams {
            config: Config::default(),
            db,
            swarm: Arc::new(realm.swarm(signing_key.clone())),
            signing_key: signing_key.clone(),
        })
        .await
        .unwrap();
        node.create_pin_set("durable").unwrap();
        node.post("durable", b"survives restart").await.unwrap()
    };

    let db = Arc::new(redb::Database::create(&db_path).unwrap());
    let realm = MemRealm::new();
    let node = Node::new(NodeParams {
        config: Config::default(),
        db,
        swarm: Arc::new(realm.swarm(signing_key.clone())),
        signing_key,
    })
    .await
    .unwrap();
    assert!(node.exists(&id).await.unwrap());
    assert_eq!(node.pin_sets().refcount(&id).unwrap(), 1);
    assert_eq!(node.get(&id).await.unwrap().as_ref(), b"survives restart");
}

#[tokio::test]
async fn pin_lifecycle_across_sets() {
    init_tracing();
    let realm = MemRealm::new();
    let n = make_node(&realm, 1).await;

    n.node.create_pin_set("a").unwrap();
    n.node.create_pin_set("b").unwrap();
    let id = n.node.post("a", b"shared").await.unwrap();
    assert_eq!(n.node.pin_sets().refcount(&id).unwrap(), 1);

    n.node.pin("b", &id).await.unwrap();
    assert_eq!(n.node.pin_sets().refcount(&id).unwrap(), 2);

    n.node.unpin("a", &id).unwrap();
    assert_eq!(n.node.pin_sets().refcount(&id).unwrap(), 1);

    n.node.delete_pin_set("b").unwrap();
    assert_eq!(n.node.pin_sets().refcount(&id).unwrap(), 0);

    let summary_err = n.node.get_pin_set("b").await.unwrap_err();
    assert!(summary_err.is_not_found());
}
