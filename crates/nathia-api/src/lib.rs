pub mod chat;
pub mod error;
pub mod health;
pub mod history;
pub mod middleware;
pub mod pipeline;
pub mod profile;
pub mod prompt;
pub mod state;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

pub use error::ApiError;
pub use pipeline::{ChatPipeline, Stage, TurnOutcome};
pub use state::{AppState, AppStateInner};

/// All HTTP routes. Everything except `/health` requires a bearer token.
pub fn routes(state: AppState) -> Router {
    let public_routes = Router::new().route("/health", get(health::health));

    let protected_routes = Router::new()
        .route("/chat", post(chat::send_chat))
        .route("/chat/history", get(history::get_history))
        .route("/profile", get(profile::get_profile).put(profile::update_profile))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}
