/// MX Cache - in-memory domain to MX host mappings with expiry
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct CachedMxHost {
    mx_host: String,
    cached_at: Instant,
}

/// MX cache manager
#[derive(Clone)]
pub struct MxCache {
    entries: Arc<RwLock<HashMap<String, CachedMxHost>>>,
    ttl: Duration,
}

impl MxCache {
    /// Create a new MX cache
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Get cached MX host, dropping it if expired
    pub async fn get(&self, domain: &str) -> Option<String> {
        let normalized = domain.to_lowercase();

        {
            let entries = self.entries.read().await;
            match entries.get(&normalized) {
                Some(entry) if entry.cached_at.elapsed() < self.ttl => {
                    return Some(entry.mx_host.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Cache expired, delete it
        self.entries.write().await.remove(&normalized);
        None
    }

    /// Cache an MX host for a domain
    pub async fn insert(&self, domain: &str, mx_host: &str) {
        self.entries.write().await.insert(
            domain.to_lowercase(),
            CachedMxHost {
                mx_host: mx_host.to_string(),
                cached_at: Instant::now(),
            },
        );
    }

    /// Clean up expired cache entries, returning how many were removed
    pub async fn cleanup_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.cached_at.elapsed() < self.ttl);
        before - entries.len()
    }

    /// Number of cached domains, expired or not
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
