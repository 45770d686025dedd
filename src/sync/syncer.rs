//! Ring anti-entropy task and its responder side.

use futures::FutureExt;
use futures_timer::Delay;
use std::{sync::Arc, time::Duration};

use crate::{
    error::{Error, Result},
    membership::Membership,
    message::{Body, Envelope, MessageMap, Payload},
    store::MessageStore,
    transport::Transport,
};

/// Periodically reconciles full state with the ring successor.
///
/// One instance runs per node, started once by `init`. Each round sends this
/// node's whole snapshot to the successor and merges the successor's whole
/// snapshot from the reply, so a single exchange heals both sides.
pub struct AntiEntropySyncer<T> {
    membership: Arc<Membership>,
    store: Arc<MessageStore>,
    transport: Arc<T>,
    interval: Duration,
    shutdown: async_channel::Receiver<()>,
}

impl<T: Transport> AntiEntropySyncer<T> {
    /// Create a syncer.
    ///
    /// The loop exits once `shutdown` is closed.
    pub fn new(
        membership: Arc<Membership>,
        store: Arc<MessageStore>,
        transport: Arc<T>,
        interval: Duration,
        shutdown: async_channel::Receiver<()>,
    ) -> Self {
        Self {
            membership,
            store,
            transport,
            interval,
            shutdown,
        }
    }

    /// Run a round immediately, then one every `interval` until shutdown.
    ///
    /// A failed round is logged and skipped; the next tick retries with fresh
    /// state.
    pub async fn run(self) {
        tracing::info!(
            node = %self.membership.node_id(),
            successor = ?self.membership.successor(),
            interval_ms = self.interval.as_millis() as u64,
            "anti-entropy started"
        );

        loop {
            // A stalled successor must not hold up shutdown.
            let round = self.sync_once().fuse();
            let shutdown = self.shutdown.recv().fuse();
            futures::pin_mut!(round, shutdown);

            futures::select! {
                result = round => match result {
                    Ok(merged) if merged > 0 => {
                        tracing::debug!(merged, total = self.store.len(), "anti-entropy merged");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(%err, "anti-entropy round failed");
                    }
                },
                _ = shutdown => break,
            }

            let tick = Delay::new(self.interval).fuse();
            let shutdown = self.shutdown.recv().fuse();
            futures::pin_mut!(tick, shutdown);

            futures::select! {
                _ = tick => {}
                _ = shutdown => break,
            }
        }

        tracing::info!(node = %self.membership.node_id(), "anti-entropy stopped");
    }

    /// Run one exchange with the successor.
    ///
    /// Returns the number of entries from the reply that were new here.
    pub async fn sync_once(&self) -> Result<usize> {
        let Some(successor) = self.membership.successor() else {
            tracing::trace!("no successor, skipping anti-entropy round");
            return Ok(0);
        };

        let request = Envelope::new(
            self.membership.node_id(),
            successor,
            Payload::new(Body::SyncRequest {
                message_map: self.store.read_snapshot(),
                current_node_id: self.membership.node_id().to_owned(),
            }),
        );

        tracing::trace!(%successor, "syncing");
        let reply = self.transport.rpc(request).await?;

        match reply.body.body {
            Body::SyncResponse { message_map } => Ok(self.store.merge(message_map)),
            Body::Error { code, text } => Err(Error::transport(
                successor,
                format!("sync rejected ({code}): {text}"),
            )),
            other => Err(Error::UnexpectedReply {
                from: successor.to_owned(),
                expected: "sync_response",
                got: other.kind().to_owned(),
            }),
        }
    }
}

/// Responder side of a sync round.
///
/// Merges the requester's snapshot, then returns this node's full snapshot,
/// which now includes everything the requester sent.
pub fn respond_to_sync(store: &MessageStore, message_map: MessageMap) -> MessageMap {
    let merged = store.merge(message_map);
    if merged > 0 {
        tracing::debug!(merged, total = store.len(), "merged sync request");
    }
    store.read_snapshot()
}
