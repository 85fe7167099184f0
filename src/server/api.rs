use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::http::AppState;
use crate::{CastSwitch, ConnectionState};

#[derive(Debug, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub device_type: String,
    pub address: String,
    pub device_id: String,
}

#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub casting_on: bool,
    pub streaming_detected: bool,
    pub connection: ConnectionState,
    pub device: Option<DeviceInfo>,
}

impl StateResponse {
    pub fn from_switch(switch: &CastSwitch) -> Self {
        let state = switch.state();
        Self {
            casting_on: state.casting_on,
            streaming_detected: state.streaming_detected,
            connection: switch.connection_state(),
            device: switch.device().map(|device| DeviceInfo {
                address: device.address(),
                name: device.name,
                device_type: device.device_type,
                device_id: device.device_id,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CastingRequest {
    pub on: bool,
}

pub async fn get_state(State(state): State<AppState>) -> Json<StateResponse> {
    Json(StateResponse::from_switch(&state.switch))
}

pub async fn set_casting(
    State(state): State<AppState>,
    Json(request): Json<CastingRequest>,
) -> Result<Json<StateResponse>, (StatusCode, Json<serde_json::Value>)> {
    info!("Casting {} requested over HTTP", if request.on { "on" } else { "off" });

    state.switch.set_casting_on(request.on).await.map_err(|e| {
        warn!("Failed to set casting: {}", e);
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        )
    })?;

    Ok(Json(StateResponse::from_switch(&state.switch)))
}
