//! scaleward-api: HTTP control surface for the autoscaler.
//!
//! One session runs at a time. Starting a policy spawns its controller;
//! alert intake is forwarded to the running controller, which applies it
//! between cycles.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/policy/start` | Start a session from a YAML policy |
//! | POST | `/policy/stop` | Stop the running session |
//! | POST | `/policy/evaluate` | Run one offline cycle against supplied values |
//! | GET | `/policy/status` | Phase of the current session |
//! | POST | `/alerts/fire` | Alertmanager webhook intake |
//! | POST | `/alerts/reset` | Forget every tracked alert |
//! | POST | `/alerts/reset/{name}` | Forget one alert |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use scaleward_rules::SinkWriter;
use scaleward_session::{Backends, SessionHandle, SessionSettings};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub backends: Backends,
    pub settings: SessionSettings,
    pub sink: SinkWriter,
    session: Arc<RwLock<Option<SessionHandle>>>,
}

impl ApiState {
    pub fn new(backends: Backends, settings: SessionSettings, sink: SinkWriter) -> Self {
        Self {
            backends,
            settings,
            sink,
            session: Arc::new(RwLock::new(None)),
        }
    }

    /// Stop the running session, if any.
    pub async fn shutdown(&self) {
        let handle = self.session.write().await.take();
        if let Some(handle) = handle {
            info!("stopping session for shutdown");
            if let Err(e) = handle.stop().await {
                warn!(error = %e, "session did not stop cleanly");
            }
        }
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/policy/start", post(handlers::start_policy))
        .route("/policy/stop", post(handlers::stop_policy))
        .route("/policy/evaluate", post(handlers::evaluate_policy))
        .route("/policy/status", get(handlers::policy_status))
        .route("/alerts/fire", post(handlers::fire_alerts))
        .route("/alerts/reset", post(handlers::reset_alerts))
        .route("/alerts/reset/{name}", post(handlers::reset_alert))
        .with_state(state)
}
