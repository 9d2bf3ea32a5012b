//! Crawler propagation over a line topology.
//!
//! Node 0 pins a blob; repeated crawl ticks carry the `(blob, holder)` fact
//! hop by hop through every node's published routing trie until the far end
//! of the line can resolve the holder.

mod support;

use hoard_swarm::MemRealm;
use support::init_tracing;
use support::line_cluster;

#[tokio::test(flavor = "multi_thread")]
async fn line_topology_resolves_far_pins() {
    init_tracing();
    let realm = MemRealm::new();
    let nodes = line_cluster(&realm, 10).await;

    nodes[0].node.create_pin_set("origin").unwrap();
    let id = nodes[0].node.post("origin", b"far away bytes").await.unwrap();

    // Crawl in line order so each tick can pick up what the previous node
    // just learned; a few rounds bound the propagation.
    let mut resolved = false;
    for _ in 0..5 {
        for n in &nodes {
            n.node.crawler().crawl().await;
        }
        if !nodes[9].node.blob_router().who_has(&id).is_empty() {
            resolved = true;
            break;
        }
    }
    assert!(resolved, "the far end never learned the holder");

    let holders = nodes[9].node.blob_router().who_has(&id);
    assert_eq!(holders, vec![nodes[0].id], "the holder must resolve to node 0");

    // Every intermediate node resolves the same holder, so a walk toward
    // node 0 follows one-hop neighbors all the way.
    for n in &nodes[1..] {
        assert_eq!(n.node.blob_router().who_has(&id), vec![nodes[0].id]);
    }

    // The direct neighbor can actually fetch the bytes over one-hop pull.
    let fetched = nodes[1].node.get(&id).await.unwrap();
    assert_eq!(fetched.as_ref(), b"far away bytes");
    // The fetch cached the blob locally.
    assert!(nodes[1].node.exists(&id).await.unwrap());
}
