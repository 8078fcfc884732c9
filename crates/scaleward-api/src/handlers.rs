//! REST API handlers.
//!
//! Every response uses the `{success, data?, error?}` envelope.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use scaleward_health::AlertBatch;
use scaleward_policy::Policy;
use scaleward_session::{
    OfflineInputs, Phase, SessionController, SessionError, SessionHandle, evaluate_offline,
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn session_error(e: &SessionError) -> axum::response::Response {
    let status = match e {
        SessionError::Policy(_) | SessionError::AlreadyRunning => StatusCode::BAD_REQUEST,
        SessionError::NotRunning => StatusCode::CONFLICT,
        SessionError::Closed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status).into_response()
}

// ── Policy ─────────────────────────────────────────────────────

/// POST /policy/start: body is the policy YAML.
pub async fn start_policy(State(state): State<ApiState>, body: String) -> impl IntoResponse {
    let policy = match Policy::from_yaml(&body) {
        Ok(policy) => policy,
        Err(e) => {
            warn!(error = %e, "rejected policy");
            return session_error(&e.into());
        }
    };

    let mut session = state.session.write().await;
    if session.as_ref().is_some_and(|h| !h.is_finished()) {
        return session_error(&SessionError::AlreadyRunning);
    }

    let stack = policy.stack.clone();
    let controller = match SessionController::new(
        policy,
        state.settings.clone(),
        state.backends.clone(),
        state.sink.clone(),
    ) {
        Ok(controller) => controller,
        Err(e) => return session_error(&e),
    };
    *session = Some(SessionHandle::spawn(controller));
    info!(stack = ?stack, "policy started");
    ApiResponse::ok("started").into_response()
}

/// POST /policy/stop
pub async fn stop_policy(State(state): State<ApiState>) -> impl IntoResponse {
    let mut session = state.session.write().await;
    let Some(handle) = session.take() else {
        return session_error(&SessionError::NotRunning);
    };
    match handle.stop().await {
        Ok(()) => {
            info!("policy stopped");
            ApiResponse::ok(Phase::Stopped).into_response()
        }
        Err(e) => session_error(&e),
    }
}

/// Offline evaluation request body.
#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    /// Policy YAML.
    pub policy: String,
    #[serde(flatten)]
    pub inputs: OfflineInputs,
}

/// POST /policy/evaluate
pub async fn evaluate_policy(
    State(state): State<ApiState>,
    Json(req): Json<EvaluateRequest>,
) -> impl IntoResponse {
    let policy = match Policy::from_yaml(&req.policy) {
        Ok(policy) => policy,
        Err(e) => return session_error(&e.into()),
    };
    match evaluate_offline(policy, req.inputs, state.settings.clone(), state.sink.clone()).await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => session_error(&e),
    }
}

/// GET /policy/status
pub async fn policy_status(State(state): State<ApiState>) -> impl IntoResponse {
    let session = state.session.read().await;
    let phase = session.as_ref().map(SessionHandle::phase);
    ApiResponse::ok(serde_json::json!({
        "running": phase.is_some_and(|p| p != Phase::Stopped),
        "phase": phase,
    }))
    .into_response()
}

// ── Alerts ─────────────────────────────────────────────────────

/// POST /alerts/fire: Alertmanager webhook body.
pub async fn fire_alerts(
    State(state): State<ApiState>,
    Json(batch): Json<AlertBatch>,
) -> impl IntoResponse {
    let session = state.session.read().await;
    let Some(handle) = session.as_ref() else {
        return session_error(&SessionError::NotRunning);
    };
    match handle.fire_alerts(batch).await {
        Ok(added) => ApiResponse::ok(added).into_response(),
        Err(e) => session_error(&e),
    }
}

/// POST /alerts/reset
pub async fn reset_alerts(State(state): State<ApiState>) -> impl IntoResponse {
    reset(state, None).await
}

/// POST /alerts/reset/{name}
pub async fn reset_alert(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    reset(state, Some(name)).await
}

async fn reset(state: ApiState, name: Option<String>) -> axum::response::Response {
    let session = state.session.read().await;
    let Some(handle) = session.as_ref() else {
        return session_error(&SessionError::NotRunning);
    };
    match handle.reset_alerts(name).await {
        Ok(removed) => ApiResponse::ok(serde_json::json!({ "removed": removed })).into_response(),
        Err(e) => session_error(&e),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use scaleward_adapters::{SimulatedAdapter, StaticMetrics};
    use scaleward_rules::OutputSink;
    use scaleward_session::{Backends, SessionSettings};

    use super::*;

    fn test_state(sink: &OutputSink) -> ApiState {
        ApiState::new(
            Backends::simulated(StaticMetrics::new(), Arc::new(SimulatedAdapter::new())),
            SessionSettings::default(),
            sink.writer(),
        )
    }

    const POLICY: &str = "scaling:\n  nodes:\n    - name: worker\n      scaling_rule: 'pass'\n";

    #[tokio::test]
    async fn empty_policy_is_rejected() {
        let sink = OutputSink::start();
        let resp = start_policy(State(test_state(&sink)), String::new())
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn second_start_is_rejected_until_stopped() {
        let sink = OutputSink::start();
        let state = test_state(&sink);
        let resp = start_policy(State(state.clone()), POLICY.to_string())
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = start_policy(State(state.clone()), POLICY.to_string())
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = stop_policy(State(state.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = start_policy(State(state.clone()), POLICY.to_string())
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        state.shutdown().await;
    }

    #[tokio::test]
    async fn stop_without_session_conflicts() {
        let sink = OutputSink::start();
        let resp = stop_policy(State(test_state(&sink))).await.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn alerts_need_a_session() {
        let sink = OutputSink::start();
        let resp = fire_alerts(State(test_state(&sink)), Json(AlertBatch::default()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }
}
