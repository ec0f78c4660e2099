use axum::{extract::State, Json};

use crate::api::{
    state::AppState,
    types::{ApiResult, HealthResponse},
};

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> ApiResult<HealthResponse> {
    let database_ok = state.store.ping().await;
    let agents = if database_ok {
        state.dispatch.registry().count().await?
    } else {
        0
    };

    Ok(Json(HealthResponse {
        ok: database_ok,
        status: if database_ok { "healthy" } else { "degraded" }.to_string(),
        uptime_secs: state.uptime_seconds(),
        agents,
    }))
}
