pub mod handlers;
pub mod settings;
pub mod targets;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
