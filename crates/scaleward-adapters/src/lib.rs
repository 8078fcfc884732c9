//! scaleward-adapters: the collaborators the control loop talks to.
//!
//! Two capability traits, each with boxed-future methods so backends can be
//! held as `Arc<dyn ...>`:
//!
//! - [`MetricsSource`]: resolves query expressions to scalars and manages
//!   exporter targets and alert rules ([`PrometheusSource`], [`StaticMetrics`])
//! - [`InfraAdapter`]: scales targets, counts instances, drops instances
//!   and manages nodes ([`OccopusAdapter`], [`TerraformAdapter`],
//!   [`KubernetesAdapter`], [`SimulatedAdapter`])
//!
//! [`OptimizerClient`] speaks to the advisory service. Every concrete
//! backend takes a dry-run switch: when set it logs the action and returns
//! a success-shaped result without contacting anything.

mod command;
pub mod dryrun;
pub mod error;
pub mod http;
pub mod infra;
pub mod kubernetes;
pub mod metrics;
pub mod occopus;
pub mod optimizer;
pub mod prometheus;
pub mod simulated;
pub mod terraform;

pub use error::{AdapterError, AdapterResult, MetricError, MetricResult};
pub use infra::{BoxFuture, InfraAdapter, NodeFilter, NodeInfo, ScaleAction, ScaleRequest};
pub use kubernetes::KubernetesAdapter;
pub use metrics::{MetricsSource, StaticMetrics};
pub use occopus::OccopusAdapter;
pub use optimizer::OptimizerClient;
pub use prometheus::PrometheusSource;
pub use simulated::{AdapterCall, SimulatedAdapter};
pub use terraform::TerraformAdapter;
