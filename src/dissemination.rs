//! Peer fan-out of newly accepted client values.
//!
//! Only client-originated broadcasts are fanned out. A broadcast that arrives
//! marked `is_client_msg: false` has already taken its one hop and is applied
//! to the store without being forwarded again, so forwarding can never loop.

use std::sync::Arc;

use crate::{
    config::Strategy,
    membership::Membership,
    message::{Body, Envelope, MessageId, Payload},
    transport::Transport,
};

/// Sends newly accepted values to peers according to the node's [`Strategy`].
///
/// Sends are fire-and-forget: each one runs on its own task and a failure is
/// only logged. Lost sends are healed by anti-entropy (ring strategy) or by a
/// client retry, which is fanned out again.
pub struct Disseminator<T> {
    strategy: Strategy,
    transport: Arc<T>,
}

impl<T: Transport> Disseminator<T> {
    /// Create a disseminator sending through `transport`.
    pub fn new(strategy: Strategy, transport: Arc<T>) -> Self {
        Self {
            strategy,
            transport,
        }
    }

    /// The policy in use.
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Peers that receive a value accepted by this node.
    ///
    /// Both policies forward to every other node once; they differ in whether
    /// anti-entropy runs behind the forward (see [`Strategy`]).
    pub fn targets<'a>(&self, membership: &'a Membership) -> Vec<&'a str> {
        membership.peers().collect()
    }

    /// Forward a client value, accepted here under `id`, to every target.
    ///
    /// The forwarded broadcast carries `msg_id = id.seq()` and
    /// `is_client_msg: false`; receivers rebuild `id` from the sender and
    /// `msg_id`. Returns the number of sends started.
    pub fn disseminate(&self, membership: &Membership, id: &MessageId, value: i64) -> usize {
        let targets = self.targets(membership);

        for peer in &targets {
            let envelope = Envelope::new(
                membership.node_id(),
                *peer,
                Payload::with_msg_id(
                    Body::Broadcast {
                        message: value,
                        is_client_msg: Some(false),
                    },
                    id.seq(),
                ),
            );

            let transport = self.transport.clone();
            let peer = peer.to_string();
            tokio::spawn(async move {
                if let Err(err) = transport.send(envelope).await {
                    tracing::warn!(%peer, %err, "failed to forward broadcast");
                }
            });
        }

        tracing::debug!(
            %id,
            value,
            strategy = %self.strategy,
            fanout = targets.len(),
            "forwarded broadcast"
        );

        targets.len()
    }
}
