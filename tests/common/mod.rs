//! Common test utilities for integration tests.
#![allow(dead_code)]

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::signature::{Ed25519KeyPair, KeyPair};
use tdb::{LocalTransport, MemoryTransport, Node, NodeOption, TokioExecutor, Transport};

/// A node on its own single-worker runtime, isolated from the global node.
pub fn node_on(transport: Arc<dyn Transport>) -> Node {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("tdb-test")
        .enable_all()
        .build()
        .expect("test runtime should start");
    Node::new(
        NodeOption::default(),
        TokioExecutor::new(runtime),
        transport,
    )
}

pub fn local_node() -> Node {
    node_on(Arc::new(LocalTransport))
}

/// `size` nodes joined by one in-process transport.
pub fn cluster(size: usize) -> (Arc<MemoryTransport>, Vec<Node>) {
    let transport = Arc::new(MemoryTransport::default());
    let nodes = (0..size)
        .map(|_| node_on(transport.clone() as Arc<dyn Transport>))
        .collect();
    (transport, nodes)
}

/// Base64 (public, private) Ed25519 pair derived from a fixed seed byte.
pub fn key_pair(seed_byte: u8) -> (String, String) {
    let seed = [seed_byte; 32];
    let pair = Ed25519KeyPair::from_seed_unchecked(&seed).expect("seed should be valid");
    (
        STANDARD.encode(pair.public_key().as_ref()),
        STANDARD.encode(seed),
    )
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
