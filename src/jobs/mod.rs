use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

pub mod tasks;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<crate::context::AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<crate::context::AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        tokio::spawn(Self::database_ping_job(Arc::clone(&self)));
        tokio::spawn(Self::mx_cache_cleanup_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Ping the directory database (runs every minute)
    async fn database_ping_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(60));

        loop {
            interval.tick().await;

            match tasks::ping_database(&scheduler.context).await {
                Ok(_) => {
                    // Silent success
                }
                Err(e) => error!("Database ping failed: {}", e),
            }
        }
    }

    /// Purge expired MX cache entries (runs every 5 minutes)
    async fn mx_cache_cleanup_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(300));

        loop {
            interval.tick().await;

            let removed = tasks::cleanup_mx_cache(&scheduler.context).await;
            if removed > 0 {
                debug!("Purged {} expired MX cache entries", removed);
            }
        }
    }
}
