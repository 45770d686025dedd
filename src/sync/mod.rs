//! Ring anti-entropy synchronization.
//!
//! Direct forwards can be lost. To guarantee convergence anyway, every node
//! periodically exchanges its full state with its successor on the ring
//! defined by the `init` peer list.
//!
//! # How a Round Works
//!
//! ```text
//! Node A (initiator)                         Node B (successor of A)
//! ──────────────────                         ───────────────────────
//!
//! every sync_interval:
//!   snapshot = store.read_snapshot()
//!          │
//!          ▼
//! ┌──────────────────────┐
//! │ sync_request         │ ───────────────▶  merge message_map into store
//! │ {message_map,        │                           │
//! │  current_node_id}    │                           ▼
//! └──────────────────────┘                  ┌──────────────────────┐
//!                                           │ sync_response        │
//! merge message_map into store  ◀────────── │ {message_map}        │
//!                                           └──────────────────────┘
//! ```
//!
//! Both sides end the round holding the union of the two snapshots. A value
//! present at one node reaches a node `d` hops further along the ring within
//! `d` intervals, even if every direct forward was lost.

mod syncer;

pub use syncer::{respond_to_sync, AntiEntropySyncer};
