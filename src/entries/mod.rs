pub mod handlers;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod repo;
pub mod subscription;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
