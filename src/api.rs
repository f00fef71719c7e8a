//! HTTP surface the orchestrator calls
//!
//! - `POST /v2/{credits|debits}/{prepare|commit|abort}` - context JSON in, result JSON out
//! - `GET /health`

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::settlement::{AdapterResult, Phase, Schema, SettlementRouter, TransactionContext};

pub struct AppState {
    pub router: SettlementRouter,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub version: &'static str,
    pub routes: usize,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn not_found(message: String) -> ApiError {
    (StatusCode::NOT_FOUND, Json(ErrorBody { error: message }))
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v2/{schema}/{phase}", post(handle_phase))
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>, host: &str, port: u16) -> std::io::Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, routes = state.router.len(), "Settlement API listening");
    axum::serve(listener, app(state)).await
}

async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthBody>) {
    (
        StatusCode::OK,
        Json(HealthBody {
            status: "ok",
            version: state.version,
            routes: state.router.len(),
        }),
    )
}

async fn handle_phase(
    State(state): State<Arc<AppState>>,
    Path((schema, phase)): Path<(String, String)>,
    Json(ctx): Json<TransactionContext>,
) -> Result<Json<AdapterResult>, ApiError> {
    let schema: Schema = schema.parse().map_err(not_found)?;
    let phase: Phase = phase.parse().map_err(not_found)?;

    let result = state.router.dispatch(schema, phase, &ctx);
    debug!(
        job = %ctx.job_handle,
        command = %ctx.phase_command_handle,
        schema = %schema,
        phase = %phase,
        result = ?result,
        "Phase call"
    );
    Ok(Json(result))
}
