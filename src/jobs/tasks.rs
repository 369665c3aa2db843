/// Background task implementations
use crate::{context::AppContext, db, error::ServerResult};

/// Keep the directory connection alive and notice when it is not
pub async fn ping_database(ctx: &AppContext) -> ServerResult<()> {
    db::test_connection(&ctx.db).await
}

/// Drop MX cache entries past their TTL
pub async fn cleanup_mx_cache(ctx: &AppContext) -> usize {
    ctx.mx_cache.cleanup_expired().await
}
