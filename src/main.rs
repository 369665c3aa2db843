/// Cipherpost server binary
use cipherpost::{config::ServerConfig, context::AppContext, error::ServerResult, jobs, server};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ServerResult<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cipherpost=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    print_banner();

    // Load configuration
    let config = ServerConfig::from_env()?;

    // Create application context
    let ctx = Arc::new(AppContext::new(config).await?);

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    // Start server
    server::serve((*ctx).clone()).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
       _       _                               _
   ___(_)_ __ | |__   ___ _ __ _ __   ___  ___| |_
  / __| | '_ \| '_ \ / _ \ '__| '_ \ / _ \/ __| __|
 | (__| | |_) | | | |  __/ |  | |_) | (_) \__ \ |_
  \___|_| .__/|_| |_|\___|_|  | .__/ \___/|___/\__|
        |_|                   |_|

        End-to-end encrypted mail server v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
