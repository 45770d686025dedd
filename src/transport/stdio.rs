//! JSON-lines transport over the process's standard streams.

use bytes::Bytes;
use parking_lot::Mutex;
use std::{collections::HashMap, time::Duration};

use super::Transport;
use crate::{
    error::{Error, Result},
    message::{Envelope, MsgIdCounter},
};

/// Transport that writes encoded envelopes to an outgoing line channel and
/// correlates replies to pending RPCs.
///
/// The channel's receiver is drained by the [`Runner`](crate::Runner), which
/// owns stdout. Replies read from stdin are handed back through
/// [`StdioTransport::complete`].
#[derive(Debug)]
pub struct StdioTransport {
    ids: MsgIdCounter,
    out: async_channel::Sender<Bytes>,
    pending: Mutex<HashMap<u64, async_channel::Sender<Envelope>>>,
    rpc_timeout: Duration,
}

impl StdioTransport {
    /// Create a transport with an unbounded outgoing line channel.
    ///
    /// Returns the transport and the receiver for encoded lines.
    pub fn new(rpc_timeout: Duration) -> (Self, async_channel::Receiver<Bytes>) {
        let (out, rx) = async_channel::unbounded();
        let transport = Self {
            ids: MsgIdCounter::new(),
            out,
            pending: Mutex::new(HashMap::new()),
            rpc_timeout,
        };
        (transport, rx)
    }

    /// Encode and queue an envelope for output.
    pub async fn write(&self, envelope: &Envelope) -> Result<()> {
        let line = envelope.encode()?;
        self.out.send(line).await?;
        Ok(())
    }

    /// Hand a reply to the RPC waiting for it.
    ///
    /// Returns `false` if no RPC is waiting on `in_reply_to` (e.g. the reply
    /// to a fire-and-forget send, or a reply that arrived after its timeout).
    pub fn complete(&self, reply: Envelope) -> bool {
        let Some(in_reply_to) = reply.body.in_reply_to else {
            return false;
        };

        let waiter = self.pending.lock().remove(&in_reply_to);
        match waiter {
            Some(tx) => tx.try_send(reply).is_ok(),
            None => false,
        }
    }

    /// Number of RPCs waiting for a reply.
    pub fn pending_rpcs(&self) -> usize {
        self.pending.lock().len()
    }

    /// Stop accepting output. The runner's writer drains what is queued and
    /// exits.
    pub fn close(&self) {
        self.out.close();
        self.pending.lock().clear();
    }
}

impl Transport for StdioTransport {
    fn next_msg_id(&self) -> u64 {
        self.ids.next()
    }

    async fn send(&self, envelope: Envelope) -> Result<()> {
        let dest = envelope.dest.clone();
        self.write(&envelope)
            .await
            .map_err(|e| Error::transport(dest, e))
    }

    async fn rpc(&self, mut request: Envelope) -> Result<Envelope> {
        let msg_id = self.next_msg_id();
        request.body.msg_id = Some(msg_id);
        let dest = request.dest.clone();

        let (tx, rx) = async_channel::bounded(1);
        self.pending.lock().insert(msg_id, tx);

        if let Err(e) = self.write(&request).await {
            self.pending.lock().remove(&msg_id);
            return Err(Error::transport(dest, e));
        }

        let reply = tokio::time::timeout(self.rpc_timeout, rx.recv()).await;
        // Clear the slot whichever way the wait ended.
        self.pending.lock().remove(&msg_id);

        match reply {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::transport(dest, "transport closed")),
            Err(_) => Err(Error::transport(
                dest,
                format!("no reply within {}ms", self.rpc_timeout.as_millis()),
            )),
        }
    }
}
