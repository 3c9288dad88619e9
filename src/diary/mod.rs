pub mod aggregate;
pub mod consolidate;
pub mod handlers;
pub mod insight;
pub mod ledger;
pub mod services;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::read_routes())
        .merge(handlers::write_routes())
}
