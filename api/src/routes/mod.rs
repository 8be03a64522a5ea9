pub mod auth;
pub mod expenses;

use axum::Router;
use std::sync::Arc;

use crate::AppState;

/// Routes served under /data
pub fn build_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(auth::routes())
        .merge(expenses::routes())
}
