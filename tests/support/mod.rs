//! Shared fixtures for multi-node tests: clusters of nodes wired over an
//! in-process swarm realm.

#![allow(dead_code)]

use std::sync::Arc;

use ed25519_dalek::SigningKey;
use hoard::Config;
use hoard::Node;
use hoard::NodeParams;
use hoard_swarm::AskSwarm;
use hoard_swarm::MemRealm;
use hoard_swarm::MemSwarm;
use hoard_swarm::PeerId;
use redb::backends::InMemoryBackend;

pub struct TestNode {
    pub node: Arc<Node>,
    pub swarm: MemSwarm,
    pub id: PeerId,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("hoard=info").try_init();
}

pub async fn make_node(realm: &MemRealm, seed: u8) -> TestNode {
    let signing_key = SigningKey::from_bytes(&[seed; 32]);
    let swarm = realm.swarm(signing_key.clone());
    let id = swarm.local_id();
    let db = Arc::new(
        redb::Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .expect("in-memory database"),
    );
    let node = Node::new(NodeParams {
        config: Config::default(),
        db,
        swarm: Arc::new(swarm.clone()),
        signing_key,
    })
    .await
    .expect("node assembles");
    TestNode { node, swarm, id }
}

pub fn connect(a: &TestNode, b: &TestNode) {
    a.swarm.add_peer(b.id);
    b.swarm.add_peer(a.id);
}

/// A line topology: node i is connected to i-1 and i+1 only.
pub async fn line_cluster(realm: &MemRealm, n: usize) -> Vec<TestNode> {
    let mut nodes = Vec::with_capacity(n);
    for i in 0..n {
        nodes.push(make_node(realm, (i + 1) as u8).await);
    }
    for pair in nodes.windows(2) {
        connect(&pair[0], &pair[1]);
    }
    nodes
}
