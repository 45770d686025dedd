//! Message identifiers and sequence allocation.

use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fmt::{self, Display},
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
};

/// Identifier of a broadcast value.
///
/// Composed of the id of the node that first accepted the value from a client
/// and that node's sequence number for it. Rendered on the wire as
/// `{origin}-{seq}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId {
    origin: String,
    seq: u64,
}

impl MessageId {
    /// Create a message ID from its parts.
    pub fn new(origin: impl Into<String>, seq: u64) -> Self {
        Self {
            origin: origin.into(),
            seq,
        }
    }

    /// The node that accepted the value from a client.
    #[inline]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// The origin's sequence number for the value.
    #[inline]
    pub const fn seq(&self) -> u64 {
        self.seq
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.origin, self.seq)
    }
}

impl FromStr for MessageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (origin, seq) = s
            .rsplit_once('-')
            .ok_or_else(|| format!("message id {s:?} has no sequence suffix"))?;
        if origin.is_empty() {
            return Err(format!("message id {s:?} has an empty origin"));
        }
        let seq = seq
            .parse()
            .map_err(|e| format!("message id {s:?} has a bad sequence: {e}"))?;
        Ok(Self::new(origin, seq))
    }
}

/// Node-wide counter for outbound message ids and broadcast sequence numbers.
///
/// Both draw from the same counter so that a peer's reply to a forwarded
/// broadcast can never collide with a pending RPC.
#[derive(Debug)]
pub struct MsgIdCounter(AtomicU64);

impl MsgIdCounter {
    /// Create a counter whose first id is 1.
    pub const fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    /// Allocate the next id.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MsgIdCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps client requests to this node's sequence numbers.
///
/// A retried client broadcast carries the same `(client, msg_id)` pair and is
/// mapped to the sequence number assigned the first time, so the retry is
/// deduplicated by the store. Entries are kept for the process lifetime,
/// like the store itself.
#[derive(Debug, Default)]
pub struct ClientSequences {
    assigned: Mutex<HashMap<(String, u64), u64>>,
}

impl ClientSequences {
    /// Create an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the sequence number for a client request, allocating one with
    /// `alloc` on first sight.
    pub fn assign(&self, client: &str, client_msg_id: u64, alloc: impl FnOnce() -> u64) -> u64 {
        *self
            .assigned
            .lock()
            .entry((client.to_owned(), client_msg_id))
            .or_insert_with(alloc)
    }

    /// Number of client requests seen.
    pub fn len(&self) -> usize {
        self.assigned.lock().len()
    }

    /// Whether no client request has been seen.
    pub fn is_empty(&self) -> bool {
        self.assigned.lock().is_empty()
    }
}
