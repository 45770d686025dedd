//! Message types and identifiers.
//!
//! This module contains:
//! - [`MessageId`] - `{origin}-{seq}` identifiers of broadcast values
//! - [`Body`], [`Payload`], [`Envelope`] - the JSON wire format
//! - [`MsgIdCounter`], [`ClientSequences`] - sequence allocation

mod id;
mod types;

pub use id::{ClientSequences, MessageId, MsgIdCounter};
pub use types::{Body, Envelope, MessageMap, Payload, RawEnvelope, Topology};
