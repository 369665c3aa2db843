/// Raw public key lookup by key-hash
///
/// Clients hash what they receive and compare, so the server does not need
/// to be trusted here.
use crate::{
    context::AppContext,
    directory::Directory,
    error::{ServerError, ServerResult},
};
use axum::{
    extract::{Path, State},
    routing::get,
    Router,
};

pub fn routes() -> Router<AppContext> {
    Router::new().route("/user/:hash", get(public_key))
}

pub async fn public_key(State(ctx): State<AppContext>, Path(hash): Path<String>) -> ServerResult<String> {
    if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ServerError::Validation(format!("Invalid key hash: {}", hash)));
    }

    ctx.directory
        .load_pub_key(&hash)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("No public key for {}", hash)))
}
