pub mod auth;
pub mod handlers;
pub mod links;
pub mod routes;
pub mod state;
pub mod types;

pub use links::TtlCache;
pub use routes::create_router;
pub use state::AppState;
