// tests/common/mod.rs

//! Shared integration-test scaffolding: a client pointed at whatever etcd endpoint(s)
//! the environment provides, plus small fixtures for generating collision-free keys.
//!
//! Every test in this suite expects a real etcd listening on `ETCD_ENDPOINTS`
//! (comma-separated, defaults to `http://127.0.0.1:2379`). Start one locally before
//! running `cargo test`:
//!
//! ```text
//! etcd --listen-client-urls http://127.0.0.1:2379 --advertise-client-urls http://127.0.0.1:2379
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use etcd_coord_client::{Client, ConfigBuilder};

fn endpoints() -> Vec<String> {
    std::env::var("ETCD_ENDPOINTS")
        .unwrap_or_else(|_| "http://127.0.0.1:2379".to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .collect()
}

/// Builds a client against the configured endpoint(s). Panics (failing the test) if
/// `Config` itself is invalid; a dead etcd surfaces later as an `Unavailable` error
/// from whichever RPC the test issues first.
pub async fn client() -> Client {
    let config = ConfigBuilder::new()
        .hosts(endpoints())
        .build()
        .expect("test endpoint configuration must be valid");
    Client::connect(config).await.expect("failed to build client")
}

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// A key unique to this test process run, namespaced under `prefix`, so concurrently
/// running test binaries (and reruns against a non-empty etcd) never collide.
pub fn unique_key(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("etcd-coord-client-tests/{prefix}/{}/{n}", std::process::id())
}
