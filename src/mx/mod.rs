/// Mail exchange resolution
///
/// Maps address domains to the MX host that owns them, with caching,
/// and groups request addresses by that host.

pub mod cache;
pub mod grouper;
pub mod resolver;

pub use cache::MxCache;
pub use grouper::{group_by_mx_host, AddressGroup, GroupedAddresses};
pub use resolver::{DnsMxResolver, MxRoutes};

use crate::error::{ServerError, ServerResult};
use async_trait::async_trait;
use std::collections::HashMap;

/// Resolves a domain to the mail-exchange host responsible for it
#[async_trait]
pub trait MxResolver: Send + Sync {
    async fn resolve_mx_host(&self, domain: &str) -> ServerResult<String>;
}

/// Fixed domain to MX host table, no DNS involved
#[derive(Debug, Clone, Default)]
pub struct StaticMxResolver {
    hosts: HashMap<String, String>,
}

impl StaticMxResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a domain mapping
    pub fn with_host(mut self, domain: &str, mx_host: &str) -> Self {
        self.hosts.insert(domain.to_lowercase(), mx_host.to_lowercase());
        self
    }
}

#[async_trait]
impl MxResolver for StaticMxResolver {
    async fn resolve_mx_host(&self, domain: &str) -> ServerResult<String> {
        self.hosts
            .get(&domain.to_lowercase())
            .cloned()
            .ok_or_else(|| ServerError::NoMxRecord(vec![domain.to_string()]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticMxResolver::new().with_host("Example.com", "MX.example.com");

        let host = resolver.resolve_mx_host("example.COM").await.unwrap();
        assert_eq!(host, "mx.example.com");

        assert!(resolver.resolve_mx_host("unknown.test").await.is_err());
    }
}
