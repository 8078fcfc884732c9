//! scaleward-policy: the declarative half of the autoscaler.
//!
//! A policy document names the metric queries, alerts, and constants a
//! session works from, plus the node groups and services it scales. This
//! crate parses and validates those documents, renders `{{ NAME }}`
//! placeholders in query strings, and loads the daemon configuration.
//!
//! # Layout
//!
//! ```text
//! Policy
//!   ├── stack
//!   ├── data
//!   │   ├── sources    (exporter endpoints)
//!   │   ├── constants  (name → value)
//!   │   ├── queries    (name → expression | literal)
//!   │   └── alerts     (alert rules)
//!   └── scaling
//!       ├── nodes      (NodeGroupSpec, policy order)
//!       ├── services   (ServiceSpec, policy order)
//!       └── userdata   (opaque, threaded between cycles)
//! ```

pub mod config;
pub mod error;
pub mod template;
pub mod types;

pub use config::{DryRun, DryRunComponent, KeeperConfig};
pub use error::{PolicyError, PolicyResult};
pub use template::render;
pub use types::*;
