//! scaleward-health: the two pieces of state the control loop carries
//! between cycles besides its target counts.
//!
//! # Architecture
//!
//! ```text
//! SessionController (single writer)
//!   ├── DownNodeTracker
//!   │   ├── list_nodes(Down) → reconcile
//!   │   └── down longer than the timeout → remove_node
//!   └── AlertRegistry
//!       ├── add(webhook batch)   firing alerts only
//!       └── query / remove       at-most-once per rule evaluation
//! ```
//!
//! Neither type locks: both are owned by the controller task and mutated
//! only from it.

pub mod alerts;
pub mod down_nodes;

pub use alerts::{Alert, AlertBatch, AlertRegistry};
pub use down_nodes::{DEFAULT_DOWN_TIMEOUT, DownNode, DownNodeTracker};
