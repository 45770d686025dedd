//! Shared helpers for ringcast integration tests.

#![allow(dead_code)]

use ringcast::{testing::MemoryNetwork, NodeConfig};
use std::{sync::Arc, time::Duration};

/// Anti-entropy interval used by ring clusters in tests.
pub const SYNC_INTERVAL: Duration = Duration::from_millis(20);

/// Upper bound on how long any cluster may take to converge.
pub const CONVERGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialized direct-mode cluster of `k` nodes.
pub async fn direct_cluster(k: usize) -> Arc<MemoryNetwork> {
    let net = MemoryNetwork::with_nodes(NodeConfig::direct(), k);
    net.init_all().await.expect("init");
    net
}

/// Initialized ring cluster of `k` nodes with a fast sync interval.
pub async fn ring_cluster(k: usize) -> Arc<MemoryNetwork> {
    ring_cluster_with(k, SYNC_INTERVAL).await
}

/// Initialized ring cluster of `k` nodes syncing every `interval`.
pub async fn ring_cluster_with(k: usize, interval: Duration) -> Arc<MemoryNetwork> {
    let net = MemoryNetwork::with_nodes(NodeConfig::ring().with_sync_interval(interval), k);
    net.init_all().await.expect("init");
    net
}

/// Values `0..n` as broadcast payloads.
pub fn values(n: i64) -> Vec<i64> {
    (0..n).collect()
}
