/// MX Resolver - DNS MX lookups with local shortcuts and caching
use crate::{
    error::{ServerError, ServerResult},
    mx::{MxCache, MxResolver},
};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, warn};
use trust_dns_resolver::TokioAsyncResolver;

/// Routing rules applied before any DNS query
#[derive(Debug, Clone)]
pub struct MxRoutes {
    /// This server's own MX host
    pub own_mx_host: String,
    /// Extra domains whose mail lands on this server
    pub local_domains: Vec<String>,
    /// Static domain to MX host pairs
    pub overrides: HashMap<String, String>,
}

impl MxRoutes {
    /// Resolve a domain without DNS, if a rule covers it
    pub fn route(&self, domain: &str) -> Option<String> {
        let domain = domain.to_lowercase();

        // Our own host always resolves to itself. This saves setting up
        // MX records for localhost testing.
        if domain == self.own_mx_host || self.local_domains.iter().any(|d| *d == domain) {
            return Some(self.own_mx_host.clone());
        }

        self.overrides.get(&domain).cloned()
    }
}

/// DNS-backed MX resolver
#[derive(Clone)]
pub struct DnsMxResolver {
    dns: TokioAsyncResolver,
    routes: MxRoutes,
    cache: MxCache,
}

impl DnsMxResolver {
    /// Create a resolver from the system DNS configuration
    pub fn new(routes: MxRoutes, cache: MxCache) -> ServerResult<Self> {
        let dns = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| ServerError::Internal(format!("Failed to create DNS resolver: {}", e)))?;

        Ok(Self { dns, routes, cache })
    }

    /// Access the cache (for periodic cleanup)
    pub fn cache(&self) -> &MxCache {
        &self.cache
    }

    /// Query DNS and pick the most preferred exchange
    async fn lookup(&self, domain: &str) -> ServerResult<String> {
        // Fully qualified, so search domains never apply
        let fqdn = format!("{}.", domain.trim_end_matches('.'));

        let lookup = self.dns.mx_lookup(fqdn.as_str()).await.map_err(|e| {
            warn!("MX lookup for {} failed: {}", domain, e);
            ServerError::NoMxRecord(vec![domain.to_string()])
        })?;

        let best = lookup
            .iter()
            .min_by_key(|mx| mx.preference())
            .ok_or_else(|| ServerError::NoMxRecord(vec![domain.to_string()]))?;

        Ok(normalize_exchange(&best.exchange().to_utf8()))
    }
}

#[async_trait]
impl MxResolver for DnsMxResolver {
    async fn resolve_mx_host(&self, domain: &str) -> ServerResult<String> {
        let normalized = domain.to_lowercase();

        if let Some(host) = self.routes.route(&normalized) {
            return Ok(host);
        }

        // Check cache first
        if let Some(host) = self.cache.get(&normalized).await {
            return Ok(host);
        }

        let host = self.lookup(&normalized).await?;
        debug!("Resolved MX for {}: {}", normalized, host);

        self.cache.insert(&normalized, &host).await;

        Ok(host)
    }
}

/// Lowercase and strip the root label dot from an exchange name
fn normalize_exchange(exchange: &str) -> String {
    exchange.trim_end_matches('.').to_lowercase()
}
