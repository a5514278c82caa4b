pub mod config;
pub mod db;
pub mod errors;
pub mod extraction;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use axum::Router;
pub use state::AppState;

/// The full HTTP application over `state`.
pub fn build_router(state: AppState) -> Router {
    routes::routes::routes().with_state(state)
}
