//! Transport abstraction for node-to-node messages.
//!
//! The node needs two primitives from its transport:
//! - **send**: fire-and-forget delivery, used for broadcast fan-out
//! - **rpc**: request/response, used for anti-entropy sync rounds
//!
//! Message ids are allocated by the transport so that every outbound id, and
//! every broadcast sequence number the node derives from it, is unique.
//!
//! # Available Transports
//!
//! - [`StdioTransport`]: JSON lines over stdin/stdout
//! - [`MemoryTransport`](crate::testing::MemoryTransport): in-process network for tests

use std::future::Future;

use crate::{error::Result, message::Envelope};

mod stdio;

pub use stdio::StdioTransport;

/// Transport trait for sending messages to peers.
///
/// # Example
///
/// ```ignore
/// use ringcast::{Body, Envelope, Payload, Transport};
///
/// let request = Envelope::new("n1", "n2", Payload::new(Body::Read));
/// let reply = transport.rpc(request).await?;
/// ```
#[auto_impl::auto_impl(Box, Arc)]
pub trait Transport: Send + Sync + 'static {
    /// Allocate a fresh message id.
    fn next_msg_id(&self) -> u64;

    /// Deliver a message without waiting for a reply.
    ///
    /// Success means the message was handed to the network, not that the peer
    /// processed it.
    fn send(&self, envelope: Envelope) -> impl Future<Output = Result<()>> + Send;

    /// Send a request and wait for the reply.
    ///
    /// The transport assigns the request's `msg_id` and returns the envelope
    /// whose `in_reply_to` matches it. Timeouts are the transport's own.
    fn rpc(&self, request: Envelope) -> impl Future<Output = Result<Envelope>> + Send;
}
