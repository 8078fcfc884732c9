//! scaleward-session: the control loop that turns a policy into scale
//! commands.
//!
//! A [`SessionController`] owns everything one running policy needs: its
//! targets and their carried state, the down-node tracker, the alert
//! registry and the optimizer bridge. Each cycle it gathers inputs per
//! target, evaluates the target's rule in the sandbox, clamps the result
//! to the target's bounds and dispatches it.
//!
//! ```text
//! SessionHandle ──stop/alerts──▶ SessionController::run
//!                                  ├── DownNodeTracker     (maintenance)
//!                                  ├── MetricsSource       (resolve)
//!                                  ├── OptimizerBridge     (m_opt_advice)
//!                                  ├── RuleEvaluator       (sandbox)
//!                                  └── InfraAdapter        (batched for node groups)
//! ```
//!
//! [`evaluate_offline`] runs the same cycle once against supplied values
//! and simulated infrastructure.

pub mod backends;
pub mod controller;
pub mod decision;
pub mod error;
pub mod handle;
pub mod offline;
pub mod optimizer;

pub use backends::{Backends, SessionSettings};
pub use controller::{Phase, SessionController};
pub use decision::{CycleReport, Decision, DecisionStatus, TargetKind};
pub use error::{SessionError, SessionResult};
pub use handle::{AlertCommand, SessionHandle};
pub use offline::{OfflineInputs, evaluate_offline};
pub use optimizer::OptimizerBridge;
