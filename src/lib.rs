//! # ringcast
//!
//! A node in a peer-to-peer value-broadcast service speaking the
//! JSON-lines node protocol over stdin/stdout.
//!
//! Clients submit integer values to any node. Every node forwards what it
//! accepts to its peers and answers reads with every value it has observed,
//! whoever received it first. Forwards are best-effort; a ring anti-entropy
//! exchange closes the gaps they leave, so every node converges on the same
//! set of values.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            Runner                               │
//! │      (stdin decode, reply routing, serialized stdout writes)     │
//! └────────────────────────────┬────────────────────────────────────┘
//!                              │ handle()
//! ┌────────────────────────────▼────────────────────────────────────┐
//! │                             Node                                │
//! │   (init, broadcast, read, topology, sync_request, generate)     │
//! ├─────────────────┬──────────────────────┬────────────────────────┤
//! │  MessageStore   │    Disseminator      │   AntiEntropySyncer    │
//! │  (dedup by id)  │  (peer fan-out)      │  (ring successor sync) │
//! └─────────────────┴──────────┬───────────┴───────────┬────────────┘
//!                              │ send()                │ rpc()
//! ┌────────────────────────────▼───────────────────────▼────────────┐
//! │                          Transport                              │
//! │         (StdioTransport, testing::MemoryTransport)              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Strategies
//!
//! | Strategy | Forward | Anti-entropy | Converges when |
//! |----------|---------|--------------|----------------|
//! | [`Strategy::Direct`] | once, to every peer | no | every forward or a client retry arrives |
//! | [`Strategy::RingDeferred`] | once, to every peer | yes | always, within `d` intervals at ring distance `d` |
//!
//! ## Example
//!
//! ```ignore
//! use ringcast::{NodeConfig, Runner};
//! use std::time::Duration;
//!
//! let config = NodeConfig::ring().with_sync_interval(Duration::from_millis(500));
//! Runner::new(config).run().await?;
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]

mod config;
mod dissemination;
mod error;
mod membership;
mod message;
mod node;
mod runner;
mod store;
pub mod sync;
pub mod testing;
mod transport;

// Re-export config types
pub use config::{NodeConfig, Strategy};

// Re-export error types
pub use error::{code, Error, Result};

// Re-export message types
pub use message::{
    Body, ClientSequences, Envelope, MessageId, MessageMap, MsgIdCounter, Payload, RawEnvelope,
    Topology,
};

// Re-export core types
pub use dissemination::Disseminator;
pub use membership::Membership;
pub use node::Node;
pub use store::MessageStore;
pub use sync::AntiEntropySyncer;

// Re-export runner and transport types
pub use runner::Runner;
pub use transport::{StdioTransport, Transport};
