pub mod chat;
pub mod middleware;
mod routes;

use axum::Router;
use std::path::PathBuf;

use crate::claude::Bridge;

#[derive(Clone)]
pub struct AppState {
    pub bridge: Bridge,
    /// Built UI assets served for any path the API does not handle.
    pub static_dir: Option<PathBuf>,
}

pub fn create_app(state: AppState) -> Router {
    routes::build_router(state)
}
