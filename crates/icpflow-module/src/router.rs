/*!
 * HTTP surface of the module.
 *
 * Action failures, including unknown actions and malformed arguments, are
 * reported as failed step responses with status 200; the orchestrator reads
 * the step body, not the HTTP status.
 */
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use icpflow_core::error::Error;
use icpflow_engine::Interrupt;

use crate::module::{IcpModule, ModuleAbout};
use crate::state::ModuleState;
use crate::step::StepResponse;

/// Shared state of the HTTP handlers
#[derive(Debug, Clone)]
pub struct AppState {
    /// The module behind the routes
    pub module: Arc<IcpModule>,
    /// Tripped by `/admin/shutdown` to stop the server
    pub shutdown: CancellationToken,
}

impl AppState {
    /// State for `module`, with a fresh shutdown token
    pub fn new(module: Arc<IcpModule>) -> Self {
        Self {
            module,
            shutdown: CancellationToken::new(),
        }
    }
}

/// Body of `POST /action`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionCall {
    /// Catalog name of the action
    pub action_handle: String,
    /// Action arguments
    #[serde(default)]
    pub action_vars: Value,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    connected: bool,
}

/// Build the module router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/state", get(state_handler))
        .route("/about", get(about_handler))
        .route("/health", get(health_handler))
        .route("/action", post(action_handler))
        .route("/admin/:command", post(admin_handler))
        .layer(middleware::from_fn(access_log_middleware))
        .with_state(state)
}

async fn access_log_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    info!(
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "http access"
    );
    response
}

async fn state_handler(State(state): State<AppState>) -> Json<ModuleState> {
    Json(state.module.state().await)
}

async fn about_handler(State(state): State<AppState>) -> Json<ModuleAbout> {
    Json(state.module.about())
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let connected = state.module.facade().session().is_connected();
    let status = if connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = HealthResponse {
        status: if connected { "ok" } else { "disconnected" },
        connected,
    };
    (status, Json(body))
}

async fn action_handler(
    State(state): State<AppState>,
    call: std::result::Result<Json<ActionCall>, JsonRejection>,
) -> Json<StepResponse> {
    match call {
        Ok(Json(call)) => Json(
            state
                .module
                .run_action(&call.action_handle, call.action_vars)
                .await,
        ),
        Err(rejection) => {
            warn!("Malformed action request: {}", rejection.body_text());
            Json(StepResponse::failed(&Error::invalid_parameters(
                rejection.body_text(),
            )))
        }
    }
}

async fn admin_handler(
    State(state): State<AppState>,
    Path(command): Path<String>,
) -> (StatusCode, Json<StepResponse>) {
    let kind = match command.as_str() {
        "cancel" => Interrupt::Cancel,
        "pause" => Interrupt::Pause,
        "safety_stop" => Interrupt::SafetyStop,
        "shutdown" => {
            info!("Shutdown requested over HTTP");
            state.module.facade().interrupt_wait();
            state.shutdown.cancel();
            return (StatusCode::OK, Json(StepResponse::succeeded("shutting down")));
        }
        other => {
            let error = Error::invalid_parameters(format!("unknown admin command '{}'", other));
            return (StatusCode::NOT_FOUND, Json(StepResponse::failed(&error)));
        }
    };
    (StatusCode::OK, Json(state.module.interrupt(kind).await))
}
