//! Request handling for a broadcast node.
//!
//! [`Node`] maps each inbound request onto the store, the disseminator and
//! the anti-entropy syncer, and produces the reply body. It is transport
//! agnostic: the [`Runner`](crate::Runner) drives it over stdio, and
//! [`MemoryNetwork`](crate::testing::MemoryNetwork) drives several of them
//! in-process.
//!
//! # Lifecycle
//!
//! ```text
//!  ┌──────────────┐   init    ┌─────────────┐  shutdown()  ┌────────────┐
//!  │ uninitialized│ ────────▶ │ initialized │ ───────────▶ │  shut down │
//!  └──────────────┘           └─────────────┘              └────────────┘
//!   only `init` accepted       every request accepted       every request
//!                              sync task running (ring)     rejected
//! ```

use parking_lot::{Mutex, RwLock};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::task::JoinHandle;

use crate::{
    config::NodeConfig,
    dissemination::Disseminator,
    error::{Error, Result},
    membership::Membership,
    message::{Body, ClientSequences, Envelope, MessageId, MessageMap, Topology},
    store::MessageStore,
    sync::{respond_to_sync, AntiEntropySyncer},
    transport::Transport,
};

/// One participant in the broadcast service.
pub struct Node<T> {
    config: NodeConfig,
    transport: Arc<T>,
    store: Arc<MessageStore>,
    disseminator: Disseminator<T>,
    client_seqs: ClientSequences,

    /// Set once by `init`.
    membership: RwLock<Option<Arc<Membership>>>,

    /// Last adjacency description received. Not used for routing.
    topology: RwLock<Topology>,

    /// Anti-entropy task, if the strategy runs one.
    sync_task: Mutex<Option<JoinHandle<()>>>,

    /// Shutdown flag.
    shutdown: AtomicBool,

    /// Closing this wakes the sync task.
    shutdown_tx: async_channel::Sender<()>,
    shutdown_rx: async_channel::Receiver<()>,
}

impl<T: Transport> Node<T> {
    /// Create an uninitialized node.
    pub fn new(config: NodeConfig, transport: Arc<T>) -> Self {
        let (shutdown_tx, shutdown_rx) = async_channel::bounded(1);
        Self {
            disseminator: Disseminator::new(config.strategy, transport.clone()),
            config,
            transport,
            store: Arc::new(MessageStore::new()),
            client_seqs: ClientSequences::new(),
            membership: RwLock::new(None),
            topology: RwLock::new(Topology::new()),
            sync_task: Mutex::new(None),
            shutdown: AtomicBool::new(false),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Handle one request and return the reply body.
    ///
    /// Errors are meant to be reported to the sender; none of them leaves the
    /// node unable to serve further requests.
    pub async fn handle(&self, request: Envelope) -> Result<Body> {
        if self.is_shutdown() {
            return Err(Error::Shutdown);
        }

        let Envelope { src, body, .. } = request;
        match body.body {
            Body::Init { node_id, node_ids } => self.handle_init(node_id, node_ids),
            Body::Broadcast {
                message,
                is_client_msg,
            } => self.handle_broadcast(&src, body.msg_id, message, is_client_msg),
            Body::Read => self.handle_read(),
            Body::Topology { topology } => self.handle_topology(topology),
            Body::SyncRequest {
                message_map,
                current_node_id,
            } => self.handle_sync_request(&src, message_map, current_node_id),
            Body::Generate => self.handle_generate(),
            other => Err(Error::NotSupported(other.kind().to_owned())),
        }
    }

    fn handle_init(&self, node_id: String, node_ids: Vec<String>) -> Result<Body> {
        if node_id.is_empty() {
            return Err(Error::malformed("init", "node_id is empty"));
        }

        let membership = {
            let mut slot = self.membership.write();
            if let Some(existing) = slot.as_ref() {
                return Err(Error::AlreadyInitialized(existing.node_id().to_owned()));
            }
            let membership = Arc::new(Membership::new(node_id, node_ids));
            *slot = Some(membership.clone());
            membership
        };

        tracing::info!(
            node = %membership.node_id(),
            cluster = membership.len(),
            strategy = %self.config.strategy,
            "node initialized"
        );

        if self.config.strategy.needs_sync() {
            self.start_sync(membership);
        }

        Ok(Body::InitOk)
    }

    fn start_sync(&self, membership: Arc<Membership>) {
        let mut task = self.sync_task.lock();
        if task.is_some() {
            return;
        }

        let syncer = AntiEntropySyncer::new(
            membership,
            self.store.clone(),
            self.transport.clone(),
            self.config.sync_interval,
            self.shutdown_rx.clone(),
        );
        *task = Some(tokio::spawn(syncer.run()));
    }

    fn handle_broadcast(
        &self,
        src: &str,
        msg_id: Option<u64>,
        value: i64,
        is_client_msg: Option<bool>,
    ) -> Result<Body> {
        let membership = self.require_membership()?;

        if is_client_msg == Some(false) {
            // Peer forward: the sender is the origin and msg_id its sequence.
            let seq = msg_id
                .ok_or_else(|| Error::malformed("broadcast", "peer broadcast without msg_id"))?;
            let id = MessageId::new(src, seq);
            let new = self.store.add_message(id.to_string(), value);
            tracing::debug!(%id, value, new, "received peer broadcast");
            return Ok(Body::BroadcastOk);
        }

        let seq = match msg_id {
            Some(client_msg_id) => self
                .client_seqs
                .assign(src, client_msg_id, || self.transport.next_msg_id()),
            None => self.transport.next_msg_id(),
        };
        let id = MessageId::new(membership.node_id(), seq);
        let new = self.store.add_message(id.to_string(), value);
        tracing::debug!(%id, value, new, client = %src, "accepted client broadcast");

        // A client retry is forwarded again: in direct mode that is the only
        // way a lost forward gets healed.
        self.disseminator.disseminate(&membership, &id, value);

        Ok(Body::BroadcastOk)
    }

    fn handle_read(&self) -> Result<Body> {
        self.require_membership()?;
        Ok(Body::ReadOk {
            messages: self.store.read_all(),
        })
    }

    fn handle_topology(&self, topology: Topology) -> Result<Body> {
        let membership = self.require_membership()?;

        for (node, neighbors) in &topology {
            if node.is_empty() || neighbors.iter().any(String::is_empty) {
                return Err(Error::malformed("topology", "empty node id"));
            }
        }
        if !topology.contains_key(membership.node_id()) {
            tracing::warn!(node = %membership.node_id(), "topology has no entry for this node");
        }

        tracing::debug!(
            node = %membership.node_id(),
            neighbors = ?topology.get(membership.node_id()),
            "received topology"
        );
        *self.topology.write() = topology;

        Ok(Body::TopologyOk)
    }

    fn handle_sync_request(
        &self,
        src: &str,
        message_map: MessageMap,
        current_node_id: String,
    ) -> Result<Body> {
        self.require_membership()?;

        if current_node_id.is_empty() {
            return Err(Error::malformed("sync_request", "current_node_id is empty"));
        }
        tracing::trace!(%src, %current_node_id, entries = message_map.len(), "sync request");

        Ok(Body::SyncResponse {
            message_map: respond_to_sync(&self.store, message_map),
        })
    }

    fn handle_generate(&self) -> Result<Body> {
        let membership = self.require_membership()?;
        let id = MessageId::new(membership.node_id(), self.transport.next_msg_id());
        Ok(Body::GenerateOk { id: id.to_string() })
    }

    fn require_membership(&self) -> Result<Arc<Membership>> {
        self.membership.read().clone().ok_or(Error::NotInitialized)
    }

    /// This node's id, once initialized.
    pub fn node_id(&self) -> Option<String> {
        self.membership
            .read()
            .as_ref()
            .map(|m| m.node_id().to_owned())
    }

    /// Membership established by `init`.
    pub fn membership(&self) -> Option<Arc<Membership>> {
        self.membership.read().clone()
    }

    /// Last adjacency description received.
    pub fn topology(&self) -> Topology {
        self.topology.read().clone()
    }

    /// The node's message store.
    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    /// The node's configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Whether the anti-entropy task has been started.
    pub fn is_syncing(&self) -> bool {
        self.sync_task.lock().is_some()
    }

    /// Stop the anti-entropy task and reject further requests.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        // Closing the channel wakes the sync task.
        self.shutdown_tx.close();
        tracing::info!(node = ?self.node_id(), "node shutting down");
    }

    /// Shut down and wait for the anti-entropy task to exit.
    pub async fn shutdown_and_wait(&self) {
        self.shutdown();
        let task = self.sync_task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::error!(%err, "anti-entropy task failed");
            }
        }
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl<T> Drop for Node<T> {
    fn drop(&mut self) {
        self.shutdown_tx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Strategy, message::Payload, transport::StdioTransport};
    use bytes::Bytes;
    use std::time::Duration;

    fn node(config: NodeConfig) -> (Node<StdioTransport>, async_channel::Receiver<Bytes>) {
        let (transport, rx) = StdioTransport::new(Duration::from_millis(100));
        (Node::new(config, Arc::new(transport)), rx)
    }

    fn request(src: &str, msg_id: Option<u64>, body: Body) -> Envelope {
        Envelope::new(
            src,
            "n1",
            Payload {
                msg_id,
                in_reply_to: None,
                body,
            },
        )
    }

    fn init(node_ids: &[&str]) -> Envelope {
        request(
            "c0",
            Some(1),
            Body::Init {
                node_id: "n1".into(),
                node_ids: node_ids.iter().map(|s| s.to_string()).collect(),
            },
        )
    }

    fn client_broadcast(msg_id: u64, message: i64) -> Envelope {
        request(
            "c1",
            Some(msg_id),
            Body::Broadcast {
                message,
                is_client_msg: None,
            },
        )
    }

    #[tokio::test]
    async fn test_requests_before_init_are_rejected() {
        let (node, _rx) = node(NodeConfig::direct());

        let err = node.handle(request("c1", Some(1), Body::Read)).await;
        assert!(matches!(err, Err(Error::NotInitialized)));
    }

    #[tokio::test]
    async fn test_single_node_broadcast_then_read() {
        let (node, _rx) = node(NodeConfig::direct());
        node.handle(init(&["n1"])).await.unwrap();

        let reply = node.handle(client_broadcast(2, 5)).await.unwrap();
        assert_eq!(reply, Body::BroadcastOk);

        let reply = node.handle(request("c1", Some(3), Body::Read)).await.unwrap();
        assert_eq!(reply, Body::ReadOk { messages: vec![5] });
    }

    #[tokio::test]
    async fn test_client_retry_is_stored_once() {
        let (node, _rx) = node(NodeConfig::direct());
        node.handle(init(&["n1"])).await.unwrap();

        node.handle(client_broadcast(2, 5)).await.unwrap();
        node.handle(client_broadcast(2, 5)).await.unwrap();
        node.handle(client_broadcast(3, 5)).await.unwrap();

        assert_eq!(node.store().read_all(), vec![5, 5]);
    }

    #[tokio::test]
    async fn test_peer_broadcast_is_not_forwarded() {
        let (node, rx) = node(NodeConfig::direct());
        node.handle(init(&["n1", "n2", "n3"])).await.unwrap();

        let peer = request(
            "n2",
            Some(8),
            Body::Broadcast {
                message: 4,
                is_client_msg: Some(false),
            },
        );
        assert_eq!(node.handle(peer.clone()).await.unwrap(), Body::BroadcastOk);
        assert_eq!(node.handle(peer).await.unwrap(), Body::BroadcastOk);

        assert!(node.store().contains("n2-8"));
        assert_eq!(node.store().len(), 1);
        tokio::task::yield_now().await;
        assert!(rx.is_empty());
    }

    #[tokio::test]
    async fn test_peer_broadcast_without_msg_id_is_malformed() {
        let (node, _rx) = node(NodeConfig::direct());
        node.handle(init(&["n1", "n2"])).await.unwrap();

        let err = node
            .handle(request(
                "n2",
                None,
                Body::Broadcast {
                    message: 4,
                    is_client_msg: Some(false),
                },
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedPayload { .. }));
        assert!(node.store().is_empty());
    }

    #[tokio::test]
    async fn test_client_broadcast_fans_out() {
        let (node, rx) = node(NodeConfig::direct());
        node.handle(init(&["n1", "n2", "n3"])).await.unwrap();

        node.handle(client_broadcast(2, 7)).await.unwrap();

        let mut dests = Vec::new();
        for _ in 0..2 {
            let line = rx.recv().await.unwrap();
            dests.push(Envelope::decode(line.trim_ascii_end()).unwrap().dest);
        }
        dests.sort();
        assert_eq!(dests, vec!["n2", "n3"]);
    }

    #[tokio::test]
    async fn test_sync_request_merges_and_returns_union() {
        let (node, _rx) = node(NodeConfig::direct());
        node.handle(init(&["n1", "n2"])).await.unwrap();
        node.store().add_message("n1-2", 9);

        let reply = node
            .handle(request(
                "n2",
                Some(4),
                Body::SyncRequest {
                    message_map: [("n1-1".to_string(), 5)].into_iter().collect(),
                    current_node_id: "n2".into(),
                },
            ))
            .await
            .unwrap();

        let Body::SyncResponse { message_map } = reply else {
            panic!("expected sync_response");
        };
        assert_eq!(message_map.get("n1-1"), Some(&5));
        assert_eq!(message_map.get("n1-2"), Some(&9));

        let mut values = node.store().read_all();
        values.sort();
        assert_eq!(values, vec![5, 9]);
    }

    #[tokio::test]
    async fn test_topology_is_stored() {
        let (node, _rx) = node(NodeConfig::direct());
        node.handle(init(&["n1", "n2"])).await.unwrap();

        let topology: Topology = [
            ("n1".to_string(), vec!["n2".to_string()]),
            ("n2".to_string(), vec!["n1".to_string()]),
        ]
        .into_iter()
        .collect();

        let reply = node
            .handle(request(
                "c1",
                Some(2),
                Body::Topology {
                    topology: topology.clone(),
                },
            ))
            .await
            .unwrap();
        assert_eq!(reply, Body::TopologyOk);
        assert_eq!(node.topology(), topology);
    }

    #[tokio::test]
    async fn test_generate_is_unique() {
        let (node, _rx) = node(NodeConfig::direct());
        node.handle(init(&["n1"])).await.unwrap();

        let mut ids = std::collections::HashSet::new();
        for i in 0..100 {
            let Body::GenerateOk { id } = node
                .handle(request("c1", Some(i), Body::Generate))
                .await
                .unwrap()
            else {
                panic!("expected generate_ok");
            };
            assert!(id.starts_with("n1-"));
            assert!(ids.insert(id));
        }
    }

    #[tokio::test]
    async fn test_second_init_is_rejected_and_sync_starts_once() {
        let (node, _rx) = node(NodeConfig::ring().with_sync_interval(Duration::from_secs(60)));

        node.handle(init(&["n1", "n2"])).await.unwrap();
        assert!(node.is_syncing());

        let err = node.handle(init(&["n1", "n2"])).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyInitialized(_)));
        assert_eq!(node.membership().unwrap().len(), 2);

        node.shutdown_and_wait().await;
        assert!(!node.is_syncing());
    }

    #[tokio::test]
    async fn test_direct_strategy_has_no_sync_task() {
        let (node, _rx) = node(NodeConfig::new().with_strategy(Strategy::Direct));
        node.handle(init(&["n1", "n2"])).await.unwrap();
        assert!(!node.is_syncing());
    }

    #[tokio::test]
    async fn test_reply_types_are_not_supported_as_requests() {
        let (node, _rx) = node(NodeConfig::direct());
        node.handle(init(&["n1"])).await.unwrap();

        let err = node
            .handle(request("c1", Some(2), Body::BroadcastOk))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotSupported(ref kind) if kind == "broadcast_ok"));
    }

    #[tokio::test]
    async fn test_requests_after_shutdown_are_rejected() {
        let (node, _rx) = node(NodeConfig::direct());
        node.handle(init(&["n1"])).await.unwrap();
        node.shutdown();

        let err = node.handle(request("c1", Some(2), Body::Read)).await;
        assert!(matches!(err, Err(Error::Shutdown)));
    }
}
