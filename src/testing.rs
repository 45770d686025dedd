//! In-memory cluster for convergence testing.
//!
//! [`MemoryNetwork`] hosts several [`Node`]s in one process and routes their
//! traffic directly to each other's [`Node::handle`], with failure injection
//! on the way:
//!
//! - **Forward loss**: fire-and-forget broadcasts are dropped with a
//!   configurable probability.
//! - **RPC loss**: anti-entropy requests fail with a transport error with a
//!   configurable probability.
//! - **Partitions**: all traffic between two nodes is blocked.
//! - **Latency**: every delivery is delayed by a fixed amount.
//!
//! ## Example
//!
//! ```ignore
//! use ringcast::{testing::{LossConfig, MemoryNetwork}, NodeConfig};
//!
//! let net = MemoryNetwork::with_nodes(NodeConfig::ring(), 5);
//! net.set_loss(LossConfig::new().with_forward_loss_rate(1.0));
//! net.init_all().await?;
//!
//! net.broadcast("n1", 7).await?;
//! // Anti-entropy carries 7 around the ring.
//! ```

use parking_lot::RwLock;
use rand::Rng;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use crate::{
    config::NodeConfig,
    error::{Error, Result},
    message::{Body, Envelope, MsgIdCounter, Payload},
    node::Node,
    transport::Transport,
};

/// Failure injection settings.
#[derive(Debug, Clone, Default)]
pub struct LossConfig {
    /// Probability of dropping a fire-and-forget send (0.0 to 1.0).
    pub forward_loss_rate: f64,

    /// Probability of failing an RPC (0.0 to 1.0).
    pub rpc_loss_rate: f64,

    /// Delay applied to every delivery.
    pub latency: Duration,
}

impl LossConfig {
    /// No loss, no latency.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the forward loss rate.
    pub fn with_forward_loss_rate(mut self, rate: f64) -> Self {
        self.forward_loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Set the RPC loss rate.
    pub fn with_rpc_loss_rate(mut self, rate: f64) -> Self {
        self.rpc_loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Set the delivery latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn roll(rate: f64) -> bool {
        rate > 0.0 && rand::rng().random::<f64>() < rate
    }

    /// Whether a send should be dropped.
    pub fn drop_forward(&self) -> bool {
        Self::roll(self.forward_loss_rate)
    }

    /// Whether an RPC should fail.
    pub fn drop_rpc(&self) -> bool {
        Self::roll(self.rpc_loss_rate)
    }
}

/// Delivery counters.
#[derive(Debug, Default)]
pub struct NetworkStats {
    sent: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    partitioned: AtomicU64,
}

impl NetworkStats {
    /// Current values.
    pub fn snapshot(&self) -> NetworkStatsSnapshot {
        NetworkStatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            partitioned: self.partitioned.load(Ordering::Relaxed),
        }
    }

    /// Zero all counters.
    pub fn reset(&self) {
        self.sent.store(0, Ordering::Relaxed);
        self.delivered.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.partitioned.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`NetworkStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkStatsSnapshot {
    /// Messages and RPCs attempted.
    pub sent: u64,
    /// Reached the destination node.
    pub delivered: u64,
    /// Dropped by the loss rates.
    pub dropped: u64,
    /// Blocked by a partition.
    pub partitioned: u64,
}

impl NetworkStatsSnapshot {
    /// Fraction of attempts that were delivered.
    pub fn delivery_rate(&self) -> f64 {
        if self.sent == 0 {
            return 1.0;
        }
        self.delivered as f64 / self.sent as f64
    }
}

/// A node hosted on a [`MemoryNetwork`].
pub type MemoryNode = Node<MemoryTransport>;

/// A set of in-process nodes wired to each other.
pub struct MemoryNetwork {
    config: NodeConfig,
    nodes: RwLock<HashMap<String, Arc<MemoryNode>>>,
    /// Insertion order, which is the ring order handed to `init`.
    order: RwLock<Vec<String>>,
    loss: RwLock<LossConfig>,
    partitions: RwLock<HashSet<(String, String)>>,
    stats: NetworkStats,
    client_ids: MsgIdCounter,
}

impl MemoryNetwork {
    /// Create an empty network whose nodes all use `config`.
    pub fn new(config: NodeConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            nodes: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            loss: RwLock::new(LossConfig::default()),
            partitions: RwLock::new(HashSet::new()),
            stats: NetworkStats::default(),
            client_ids: MsgIdCounter::new(),
        })
    }

    /// Create a network with nodes `n1..=nk`.
    pub fn with_nodes(config: NodeConfig, k: usize) -> Arc<Self> {
        let net = Self::new(config);
        for i in 1..=k {
            net.add_node(format!("n{i}"));
        }
        net
    }

    /// Add an uninitialized node.
    pub fn add_node(self: &Arc<Self>, id: impl Into<String>) -> Arc<MemoryNode> {
        let id = id.into();
        let transport = MemoryTransport {
            local: id.clone(),
            ids: MsgIdCounter::new(),
            network: Arc::downgrade(self),
        };
        let node = Arc::new(Node::new(self.config.clone(), Arc::new(transport)));

        if self.nodes.write().insert(id.clone(), node.clone()).is_none() {
            self.order.write().push(id);
        }
        node
    }

    /// Look up a node.
    pub fn node(&self, id: &str) -> Option<Arc<MemoryNode>> {
        self.nodes.read().get(id).cloned()
    }

    /// Node ids in ring order.
    pub fn node_ids(&self) -> Vec<String> {
        self.order.read().clone()
    }

    /// Send `init` to every node, with the full id list in ring order.
    pub async fn init_all(&self) -> Result<()> {
        let ids = self.node_ids();
        for id in &ids {
            self.client_request(
                id,
                Body::Init {
                    node_id: id.clone(),
                    node_ids: ids.clone(),
                },
            )
            .await?;
        }
        Ok(())
    }

    /// Deliver a client request to `dest` and return the reply body.
    pub async fn client_request(&self, dest: &str, body: Body) -> Result<Body> {
        let node = self
            .node(dest)
            .ok_or_else(|| Error::transport(dest, "unknown node"))?;
        let request = Envelope::new(
            "c1",
            dest,
            Payload::with_msg_id(body, self.client_ids.next()),
        );
        node.handle(request).await
    }

    /// Submit `value` to `dest` as a client broadcast.
    pub async fn broadcast(&self, dest: &str, value: i64) -> Result<()> {
        self.client_request(
            dest,
            Body::Broadcast {
                message: value,
                is_client_msg: None,
            },
        )
        .await
        .map(drop)
    }

    /// Read every value `dest` has observed, sorted.
    pub async fn read(&self, dest: &str) -> Result<Vec<i64>> {
        match self.client_request(dest, Body::Read).await? {
            Body::ReadOk { mut messages } => {
                messages.sort_unstable();
                Ok(messages)
            }
            other => Err(Error::UnexpectedReply {
                from: dest.to_owned(),
                expected: "read_ok",
                got: other.kind().to_owned(),
            }),
        }
    }

    /// Whether every node holds exactly `expected` (order ignored).
    pub fn converged(&self, expected: &[i64]) -> bool {
        let mut expected = expected.to_vec();
        expected.sort_unstable();
        self.nodes.read().values().all(|node| {
            let mut values = node.store().read_all();
            values.sort_unstable();
            values == expected
        })
    }

    /// Poll until [`converged`](Self::converged) or `timeout` elapses.
    pub async fn wait_converged(&self, expected: &[i64], timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.converged(expected) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Replace the failure injection settings.
    pub fn set_loss(&self, loss: LossConfig) {
        *self.loss.write() = loss;
    }

    /// Block traffic between two nodes in both directions.
    pub fn partition(&self, a: &str, b: &str) {
        let mut partitions = self.partitions.write();
        partitions.insert((a.to_owned(), b.to_owned()));
        partitions.insert((b.to_owned(), a.to_owned()));
    }

    /// Remove every partition.
    pub fn heal_all(&self) {
        self.partitions.write().clear();
    }

    /// Delivery counters.
    pub fn stats(&self) -> NetworkStatsSnapshot {
        self.stats.snapshot()
    }

    /// Zero the delivery counters.
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Shut every node down and wait for their sync tasks.
    pub async fn shutdown(&self) {
        let nodes: Vec<_> = self.nodes.read().values().cloned().collect();
        for node in nodes {
            node.shutdown_and_wait().await;
        }
    }

    /// Route one message. Returns the destination if it should be delivered.
    async fn route(&self, from: &str, to: &str, rpc: bool) -> Result<Option<Arc<MemoryNode>>> {
        self.stats.sent.fetch_add(1, Ordering::Relaxed);

        if self
            .partitions
            .read()
            .contains(&(from.to_owned(), to.to_owned()))
        {
            self.stats.partitioned.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        let (dropped, latency) = {
            let loss = self.loss.read();
            let dropped = if rpc {
                loss.drop_rpc()
            } else {
                loss.drop_forward()
            };
            (dropped, loss.latency)
        };
        if dropped {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        if latency > Duration::ZERO {
            tokio::time::sleep(latency).await;
        }

        let node = self
            .node(to)
            .ok_or_else(|| Error::transport(to, "unknown node"))?;
        self.stats.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(Some(node))
    }
}

/// [`Transport`] for a node on a [`MemoryNetwork`].
pub struct MemoryTransport {
    local: String,
    ids: MsgIdCounter,
    network: Weak<MemoryNetwork>,
}

impl MemoryTransport {
    fn network(&self) -> Result<Arc<MemoryNetwork>> {
        self.network
            .upgrade()
            .ok_or_else(|| Error::transport(&self.local, "network dropped"))
    }
}

impl Transport for MemoryTransport {
    fn next_msg_id(&self) -> u64 {
        self.ids.next()
    }

    async fn send(&self, envelope: Envelope) -> Result<()> {
        let network = self.network()?;
        let Some(node) = network.route(&self.local, &envelope.dest, false).await? else {
            // Lost in transit; the sender never finds out.
            return Ok(());
        };

        let dest = envelope.dest.clone();
        if let Err(err) = node.handle(envelope).await {
            tracing::debug!(from = %self.local, %dest, %err, "peer rejected send");
        }
        Ok(())
    }

    async fn rpc(&self, mut request: Envelope) -> Result<Envelope> {
        let network = self.network()?;
        let msg_id = self.next_msg_id();
        request.body.msg_id = Some(msg_id);
        let dest = request.dest.clone();

        let Some(node) = network.route(&self.local, &dest, true).await? else {
            return Err(Error::transport(dest, "request lost"));
        };

        let body = node.handle(request).await.unwrap_or_else(|err| Body::error(&err));
        Ok(Envelope::new(
            dest,
            self.local.clone(),
            Payload::reply(body, Some(msg_id)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_rates_are_clamped() {
        let loss = LossConfig::new()
            .with_forward_loss_rate(3.0)
            .with_rpc_loss_rate(-1.0);
        assert_eq!(loss.forward_loss_rate, 1.0);
        assert_eq!(loss.rpc_loss_rate, 0.0);
        assert!(loss.drop_forward());
        assert!(!loss.drop_rpc());
    }

    #[tokio::test]
    async fn test_nodes_are_initialized_in_order() {
        let net = MemoryNetwork::with_nodes(NodeConfig::direct(), 3);
        net.init_all().await.unwrap();

        assert_eq!(net.node_ids(), vec!["n1", "n2", "n3"]);
        let n3 = net.node("n3").unwrap().membership().unwrap();
        assert_eq!(n3.successor(), Some("n1"));
    }

    #[tokio::test]
    async fn test_partition_blocks_forwards() {
        let net = MemoryNetwork::with_nodes(NodeConfig::direct(), 2);
        net.init_all().await.unwrap();
        net.partition("n1", "n2");

        net.broadcast("n1", 3).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(net.read("n1").await.unwrap(), vec![3]);
        assert!(net.read("n2").await.unwrap().is_empty());
        assert_eq!(net.stats().partitioned, 1);
    }

    #[tokio::test]
    async fn test_rpc_reply_carries_request_id() {
        let net = MemoryNetwork::with_nodes(NodeConfig::direct(), 2);
        net.init_all().await.unwrap();
        let transport = MemoryTransport {
            local: "n1".into(),
            ids: MsgIdCounter::new(),
            network: Arc::downgrade(&net),
        };

        let reply = transport
            .rpc(Envelope::new(
                "n1",
                "n2",
                Payload::new(Body::SyncRequest {
                    message_map: Default::default(),
                    current_node_id: "n1".into(),
                }),
            ))
            .await
            .unwrap();

        assert_eq!(reply.src, "n2");
        assert_eq!(reply.body.in_reply_to, Some(1));
        assert!(matches!(reply.body.body, Body::SyncResponse { .. }));
    }
}
