/// API routes and handlers
pub mod health;
pub mod publickeys;
pub mod user;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(health::routes())
        .merge(publickeys::routes())
        .merge(user::routes())
}
