//! Handler for health check endpoint.

use axum::{Json, extract::State, http::StatusCode};

use crate::api::dto::health::{CheckStatus, HealthChecks, HealthResponse};
use crate::state::AppState;

/// Code probed against the link partitions; its absence is a healthy answer.
const PROBE_CODE: &str = "health-probe";

/// Returns service health status with component checks.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response Codes
///
/// - **200 OK**: All components healthy
/// - **503 Service Unavailable**: One or more components degraded
///
/// # Components Checked
///
/// 1. **Database**: Point lookup on the link partitions
/// 2. **Remote store**: `PING`
/// 3. **Transport**: Event stream reachability
pub async fn health_handler(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<HealthResponse>)> {
    let (db_check, store_check, transport_check) = tokio::join!(
        check_database(&state),
        check_remote_store(&state),
        check_transport(&state),
    );

    let all_healthy =
        db_check.status == "ok" && store_check.status == "ok" && transport_check.status == "ok";

    let response = HealthResponse {
        status: if all_healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            database: db_check,
            remote_store: store_check,
            transport: transport_check,
        },
    };

    if all_healthy {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}

async fn check_database(state: &AppState) -> CheckStatus {
    match state.links.find_by_code(PROBE_CODE).await {
        Ok(_) => CheckStatus {
            status: "ok".to_string(),
            message: Some(format!("Connected, {} shards", state.links.shard_count())),
        },
        Err(e) => CheckStatus {
            status: "error".to_string(),
            message: Some(format!("Database error: {}", e)),
        },
    }
}

async fn check_remote_store(state: &AppState) -> CheckStatus {
    match state.remote.ping().await {
        Ok(()) => CheckStatus {
            status: "ok".to_string(),
            message: None,
        },
        Err(e) => CheckStatus {
            status: "error".to_string(),
            message: Some(format!("Remote store error: {}", e)),
        },
    }
}

async fn check_transport(state: &AppState) -> CheckStatus {
    match state.transport.ping().await {
        Ok(()) => CheckStatus {
            status: "ok".to_string(),
            message: None,
        },
        Err(e) => CheckStatus {
            status: "error".to_string(),
            message: Some(format!("Transport error: {}", e)),
        },
    }
}
