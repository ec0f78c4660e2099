use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::api::{handlers, state::AppState};

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        // Agent protocol
        .route("/agent/register", post(handlers::register_agent))
        .route("/agent/poll", get(handlers::poll_commands))
        .route("/agent/report", post(handlers::report_result))
        // Agents
        .route("/admin/agents", get(handlers::list_agents))
        .route("/admin/agents/:id/name", put(handlers::rename_agent))
        .route("/admin/agents/:id/commands", get(handlers::list_agent_commands))
        .route("/admin/agents/:id/recording", post(handlers::recording_intent))
        // Commands
        .route("/admin/commands", post(handlers::enqueue_command))
        .route("/admin/commands/:id", get(handlers::get_command))
        // Meetings
        .route(
            "/admin/meetings",
            get(handlers::list_meetings).post(handlers::create_meeting),
        )
        .route("/admin/sync", post(handlers::sync_now))
        .route("/admin/expire", post(handlers::expire_now))
        .route("/admin/status", get(handlers::system_status))
        // Links
        .route("/admin/links", post(handlers::create_link))
        .route("/admin/links/:token/dispatch", post(handlers::dispatch_link))
        // Add state, tracing and CORS
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
