//! Wire format: JSON envelopes, one per line.
//!
//! ```text
//! {"src": "c1", "dest": "n1", "body": {"type": "broadcast", "msg_id": 3, "message": 7}}
//! ```
//!
//! Decoding is done in two steps so that a bad body can still be answered:
//! the envelope is first read with an untyped body ([`RawEnvelope`]), which
//! gives the runner `src` and `msg_id` to address an error reply to; the body
//! is then decoded into a typed [`Body`].

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Mapping of message identifier to value, exchanged during anti-entropy.
pub type MessageMap = HashMap<String, i64>;

/// Adjacency description delivered by `topology`.
pub type Topology = HashMap<String, Vec<String>>;

/// Message body, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Body {
    /// Establishes node identity and the full peer list.
    Init {
        /// This node's id.
        node_id: String,
        /// Every node in the cluster, in ring order.
        node_ids: Vec<String>,
    },
    /// Acknowledges `init`.
    InitOk,

    /// Submits a value, from a client or forwarded by a peer.
    Broadcast {
        /// The value.
        message: i64,
        /// `false` marks a peer-forwarded broadcast. Absent means client.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_client_msg: Option<bool>,
    },
    /// Acknowledges `broadcast`.
    BroadcastOk,

    /// Asks for every value observed.
    Read,
    /// Answers `read`.
    ReadOk {
        /// Values in first-insertion order.
        messages: Vec<i64>,
    },

    /// Delivers the cluster adjacency description.
    Topology {
        /// Node id to neighbor ids.
        topology: Topology,
    },
    /// Acknowledges `topology`.
    TopologyOk,

    /// Anti-entropy request carrying the sender's full state.
    SyncRequest {
        /// Sender's snapshot.
        message_map: MessageMap,
        /// Sender's node id.
        current_node_id: String,
    },
    /// Anti-entropy response carrying the responder's full state.
    SyncResponse {
        /// Responder's snapshot after merging the request.
        message_map: MessageMap,
    },

    /// Asks for a cluster-unique id.
    Generate,
    /// Answers `generate`.
    GenerateOk {
        /// The generated id.
        id: String,
    },

    /// Reports a failed request.
    Error {
        /// Wire error code.
        code: u32,
        /// Human-readable description.
        text: String,
    },
}

impl Body {
    /// Every `type` tag this crate understands.
    pub const KINDS: &'static [&'static str] = &[
        "init",
        "init_ok",
        "broadcast",
        "broadcast_ok",
        "read",
        "read_ok",
        "topology",
        "topology_ok",
        "sync_request",
        "sync_response",
        "generate",
        "generate_ok",
        "error",
    ];

    /// The `type` tag of this body.
    pub fn kind(&self) -> &'static str {
        match self {
            Body::Init { .. } => "init",
            Body::InitOk => "init_ok",
            Body::Broadcast { .. } => "broadcast",
            Body::BroadcastOk => "broadcast_ok",
            Body::Read => "read",
            Body::ReadOk { .. } => "read_ok",
            Body::Topology { .. } => "topology",
            Body::TopologyOk => "topology_ok",
            Body::SyncRequest { .. } => "sync_request",
            Body::SyncResponse { .. } => "sync_response",
            Body::Generate => "generate",
            Body::GenerateOk { .. } => "generate_ok",
            Body::Error { .. } => "error",
        }
    }

    /// Build an error body from a handler failure.
    pub fn error(err: &Error) -> Self {
        Body::Error {
            code: err.code(),
            text: err.to_string(),
        }
    }
}

/// A body together with the RPC correlation fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Sender-assigned id of this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,
    /// `msg_id` of the request this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,
    /// Typed body.
    #[serde(flatten)]
    pub body: Body,
}

impl Payload {
    /// A payload with no correlation fields.
    pub fn new(body: Body) -> Self {
        Self {
            msg_id: None,
            in_reply_to: None,
            body,
        }
    }

    /// A payload carrying a message id.
    pub fn with_msg_id(body: Body, msg_id: u64) -> Self {
        Self {
            msg_id: Some(msg_id),
            in_reply_to: None,
            body,
        }
    }

    /// A reply to the request with the given message id.
    pub fn reply(body: Body, in_reply_to: Option<u64>) -> Self {
        Self {
            msg_id: None,
            in_reply_to,
            body,
        }
    }
}

/// A fully decoded message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender node or client id.
    pub src: String,
    /// Destination node id.
    pub dest: String,
    /// Payload.
    pub body: Payload,
}

impl Envelope {
    /// Create an envelope.
    pub fn new(src: impl Into<String>, dest: impl Into<String>, body: Payload) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
            body,
        }
    }

    /// Encode as a single newline-terminated JSON line.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(128).writer();
        serde_json::to_writer(&mut buf, self).map_err(|e| Error::Encode(e.to_string()))?;
        let mut buf = buf.into_inner();
        buf.put_u8(b'\n');
        Ok(buf.freeze())
    }

    /// Decode a line in one step.
    pub fn decode(line: &[u8]) -> Result<Self> {
        RawEnvelope::decode(line)?.into_envelope()
    }
}

/// An envelope whose body has not been typed yet.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEnvelope {
    /// Sender node or client id.
    pub src: String,
    /// Destination node id.
    pub dest: String,
    /// Untyped body.
    pub body: serde_json::Map<String, serde_json::Value>,
}

impl RawEnvelope {
    /// Decode the envelope framing. Fails with [`Error::Decode`].
    pub fn decode(line: &[u8]) -> Result<Self> {
        serde_json::from_slice(line).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Recover `(src, dest, msg_id)` from a line whose framing failed to
    /// decode, so the sender can still be told.
    ///
    /// Returns `None` unless the line is a JSON object with a string `src`,
    /// or if the body carries `in_reply_to`; replies are never answered.
    pub fn return_address(line: &[u8]) -> Option<(String, String, Option<u64>)> {
        let value: serde_json::Value = serde_json::from_slice(line).ok()?;
        let src = value.get("src")?.as_str()?.to_owned();
        let dest = value
            .get("dest")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned();
        let body = value.get("body");
        if body.and_then(|b| b.get("in_reply_to")).is_some() {
            return None;
        }
        let msg_id = body.and_then(|b| b.get("msg_id")).and_then(|v| v.as_u64());
        Some((src, dest, msg_id))
    }

    /// The body's `msg_id`, if it is a valid id.
    pub fn msg_id(&self) -> Option<u64> {
        self.body.get("msg_id").and_then(|v| v.as_u64())
    }

    /// The body's `in_reply_to`, if it is a valid id.
    pub fn in_reply_to(&self) -> Option<u64> {
        self.body.get("in_reply_to").and_then(|v| v.as_u64())
    }

    /// The body's `type` tag.
    pub fn kind(&self) -> Option<&str> {
        self.body.get("type").and_then(|v| v.as_str())
    }

    /// Type the body.
    ///
    /// A missing tag is a decode error, an unknown tag is
    /// [`Error::NotSupported`], and a known tag with bad fields is
    /// [`Error::MalformedPayload`].
    pub fn into_envelope(self) -> Result<Envelope> {
        let kind = match self.kind() {
            Some(kind) if Body::KINDS.contains(&kind) => kind.to_owned(),
            Some(kind) => return Err(Error::NotSupported(kind.to_owned())),
            None => return Err(Error::Decode("body has no string \"type\" field".into())),
        };

        let body: Payload = serde_json::from_value(serde_json::Value::Object(self.body))
            .map_err(|e| Error::malformed(kind, e))?;

        Ok(Envelope {
            src: self.src,
            dest: self.dest,
            body,
        })
    }
}
