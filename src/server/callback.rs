//! Operator override endpoints
//!
//! - `POST /callback/disable-interception` - allow every eviction, clear the mirrored node set
//! - `POST /callback/enable-interception` - resume threshold-based interception
//! - `GET /callback/status` - latch state and mirrored NotReady nodes

use crate::server::health::AppState;
use axum::{extract::State, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub status: &'static str,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusData {
    pub intercepting: bool,
    pub not_ready_nodes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub data: StatusData,
}

pub async fn disable_interception(State(state): State<AppState>) -> Json<CallbackResponse> {
    state.interception.disable();
    Json(CallbackResponse {
        status: "success",
        message: "Interception disabled successfully",
    })
}

pub async fn enable_interception(State(state): State<AppState>) -> Json<CallbackResponse> {
    state.interception.enable();
    Json(CallbackResponse {
        status: "success",
        message: "Interception enabled successfully",
    })
}

pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let status = state.interception.status();
    Json(StatusResponse {
        status: "success",
        data: StatusData {
            intercepting: status.intercepting,
            not_ready_nodes: status.not_ready_nodes,
        },
    })
}
