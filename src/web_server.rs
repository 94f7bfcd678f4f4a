use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::command::{CommandExecutor, CommandRequest};
use crate::config::WebConfig;
use crate::error::CommandError;
use crate::vehicle::VehicleState;

/// HTTP surface for the browser cockpit: state polling and command submission.
pub struct WebServer {
    executor: CommandExecutor,
    config: WebConfig,
}

#[derive(Clone)]
struct AppState {
    executor: CommandExecutor,
}

#[derive(Debug, Serialize)]
struct CommandResponse {
    success: bool,
    state: VehicleState,
}

#[derive(Debug, Deserialize)]
struct ActionsBody {
    actions: Vec<Value>,
}

struct ApiError(CommandError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

impl From<CommandError> for ApiError {
    fn from(e: CommandError) -> Self {
        Self(e)
    }
}

impl WebServer {
    pub fn new(executor: CommandExecutor, config: WebConfig) -> Self {
        Self { executor, config }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/vehicle/state", get(vehicle_state))
            .route("/api/vehicle/command", post(run_command))
            .route("/api/vehicle/actions", post(run_actions))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(AppState {
                executor: self.executor.clone(),
            })
    }

    pub async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;
        info!("Web server listening on {}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                info!("Shutting down web server...");
            })
            .await
            .context("Failed to serve")?;
        Ok(())
    }
}

async fn vehicle_state(State(app): State<AppState>) -> Json<VehicleState> {
    Json(app.executor.store().get_state())
}

async fn run_command(
    State(app): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<CommandResponse>, ApiError> {
    let request = CommandRequest::from_json(body)?;
    let success = app.executor.execute(&request).await?;
    Ok(Json(CommandResponse {
        success,
        state: app.executor.store().get_state(),
    }))
}

async fn run_actions(
    State(app): State<AppState>,
    Json(body): Json<ActionsBody>,
) -> Result<Json<CommandResponse>, ApiError> {
    let requests = body
        .actions
        .into_iter()
        .map(CommandRequest::from_json)
        .collect::<Result<Vec<_>, _>>()?;
    let success = app.executor.execute_all(&requests).await;
    Ok(Json(CommandResponse {
        success,
        state: app.executor.store().get_state(),
    }))
}
