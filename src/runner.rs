//! Drives a [`Node`] over a JSON-lines byte stream.
//!
//! The runner owns both ends of the process's protocol channel:
//!
//! - **Input**: every line is decoded on the read loop. Replies (bodies with
//!   `in_reply_to`) are handed to the transport, which wakes the pending RPC.
//!   Requests are dispatched to [`Node::handle`] on their own task, so a slow
//!   handler never blocks the read loop.
//! - **Output**: a single writer task drains the transport's line channel, so
//!   concurrent replies and forwards never interleave within a line.
//!
//! On end of input the node is shut down, queued output is flushed, and
//! [`Runner::run`] returns.

use bytes::Bytes;
use std::sync::Arc;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    task::JoinSet,
};

use crate::{
    config::NodeConfig,
    error::{Error, Result},
    message::{Body, Envelope, Payload, RawEnvelope},
    node::Node,
    transport::StdioTransport,
};

/// Runs one node over stdin/stdout (or any pair of byte streams).
///
/// # Example
///
/// ```ignore
/// use ringcast::{NodeConfig, Runner};
///
/// Runner::new(NodeConfig::default()).run().await?;
/// ```
pub struct Runner {
    node: Arc<Node<StdioTransport>>,
    transport: Arc<StdioTransport>,
    lines: async_channel::Receiver<Bytes>,
}

impl Runner {
    /// Create a runner and its uninitialized node.
    pub fn new(config: NodeConfig) -> Self {
        let (transport, lines) = StdioTransport::new(config.rpc_timeout);
        let transport = Arc::new(transport);
        let node = Arc::new(Node::new(config, transport.clone()));
        Self {
            node,
            transport,
            lines,
        }
    }

    /// The node being driven.
    pub fn node(&self) -> &Arc<Node<StdioTransport>> {
        &self.node
    }

    /// Serve stdin/stdout until stdin closes.
    pub async fn run(self) -> Result<()> {
        self.run_with(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serve `reader`/`writer` until `reader` reaches end of input.
    pub async fn run_with<R, W>(self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let writer = tokio::spawn(write_lines(self.lines.clone(), writer));

        let mut handlers = JoinSet::new();
        let mut input = reader.lines();
        let read_result = loop {
            match input.next_line().await {
                Ok(Some(line)) => self.dispatch(line.trim(), &mut handlers),
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
            // Reap finished handlers.
            while handlers.try_join_next().is_some() {}
        };

        tracing::info!(in_flight = handlers.len(), "input closed, shutting down");
        // Requests already read still get their replies.
        while handlers.join_next().await.is_some() {}
        self.node.shutdown_and_wait().await;
        self.transport.close();

        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(%err, "output writer failed"),
            Err(err) => tracing::error!(%err, "output writer panicked"),
        }

        read_result?;
        Ok(())
    }

    /// Route one input line.
    fn dispatch(&self, line: &str, handlers: &mut JoinSet<()>) {
        if line.is_empty() {
            return;
        }

        let raw = match RawEnvelope::decode(line.as_bytes()) {
            Ok(raw) => raw,
            Err(err) => {
                match RawEnvelope::return_address(line.as_bytes()) {
                    Some((src, dest, msg_id)) => self.reject(dest, src, msg_id, err, handlers),
                    None => tracing::warn!(%err, "dropping undecodable line"),
                }
                return;
            }
        };

        if raw.in_reply_to().is_some() {
            self.complete(raw);
            return;
        }

        let msg_id = raw.msg_id();
        let src = raw.src.clone();
        let dest = raw.dest.clone();

        let request = match raw.into_envelope() {
            Ok(request) => request,
            Err(err) => {
                self.reject(dest, src, msg_id, err, handlers);
                return;
            }
        };

        let node = self.node.clone();
        let transport = self.transport.clone();
        handlers.spawn(async move {
            let kind = request.body.body.kind();
            let body = match node.handle(request).await {
                Ok(body) => body,
                Err(err) => {
                    tracing::debug!(%src, kind, %err, "request failed");
                    Body::error(&err)
                }
            };
            let reply = Envelope::new(dest, src, Payload::reply(body, msg_id));
            if let Err(err) = transport.write(&reply).await {
                tracing::warn!(%err, "failed to write reply");
            }
        });
    }

    /// Answer a request that never reached the node with an error body.
    fn reject(
        &self,
        dest: String,
        src: String,
        msg_id: Option<u64>,
        err: Error,
        handlers: &mut JoinSet<()>,
    ) {
        tracing::warn!(%src, %err, "rejecting request");
        let reply = Envelope::new(dest, src, Payload::reply(Body::error(&err), msg_id));
        let transport = self.transport.clone();
        handlers.spawn(async move {
            if let Err(err) = transport.write(&reply).await {
                tracing::warn!(%err, "failed to write error reply");
            }
        });
    }

    fn complete(&self, raw: RawEnvelope) {
        let src = raw.src.clone();
        match raw.into_envelope() {
            Ok(reply) => {
                let in_reply_to = reply.body.in_reply_to;
                if !self.transport.complete(reply) {
                    tracing::trace!(%src, ?in_reply_to, "unsolicited reply");
                }
            }
            Err(err) => tracing::debug!(%src, %err, "dropping undecodable reply"),
        }
    }
}

async fn write_lines<W>(lines: async_channel::Receiver<Bytes>, mut writer: W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Ok(line) = lines.recv().await {
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
    Ok(())
}
