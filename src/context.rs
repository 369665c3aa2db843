/// Application context and dependency injection
use crate::{
    config::ServerConfig,
    crypto::NotarySigner,
    db,
    directory::SqliteDirectory,
    error::ServerResult,
    federation::{Dispatcher, HttpPeerTransport, KeyQueryService, LocalResolver, PeerTransport},
    mx::{DnsMxResolver, MxCache, MxResolver, MxRoutes},
};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub directory: Arc<SqliteDirectory>,
    pub notary: Arc<NotarySigner>,
    pub mx_resolver: Arc<dyn MxResolver>,
    pub mx_cache: MxCache,
    pub key_query: KeyQueryService,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> ServerResult<Self> {
        // Validate configuration
        config.validate()?;

        // Initialize directory database
        let db = db::create_pool(&config.storage.database, db::DatabaseOptions::default()).await?;
        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        // DNS-backed MX resolution with local shortcuts
        let mx_cache = MxCache::new(Duration::from_secs(config.mail.mx_cache_ttl_secs));
        let routes = MxRoutes {
            own_mx_host: config.mail.mx_host.clone(),
            local_domains: config.mail.local_domains.clone(),
            overrides: config.mail.mx_overrides.clone(),
        };
        let mx_resolver = Arc::new(DnsMxResolver::new(routes, mx_cache.clone())?);

        // Outbound peer queries
        let user_agent = format!("cipherpost/{}", config.service.version);
        let transport = Arc::new(HttpPeerTransport::new(
            &user_agent,
            config.federation.peer_timeout(),
            &config.federation.peer_scheme,
            config.federation.peer_port,
        )?);

        Self::with_collaborators(config, db, mx_resolver, mx_cache, transport)
    }

    /// Assemble a context around already-built collaborators
    pub fn with_collaborators(
        config: ServerConfig,
        db: SqlitePool,
        mx_resolver: Arc<dyn MxResolver>,
        mx_cache: MxCache,
        transport: Arc<dyn PeerTransport>,
    ) -> ServerResult<Self> {
        let notary = Arc::new(NotarySigner::from_hex(&config.notary.signing_key_hex)?);
        let directory = Arc::new(SqliteDirectory::new(db.clone()));

        let dispatcher = Dispatcher::new(
            transport,
            config.federation.query_deadline(),
            config.federation.drain_timeout(),
        );
        let key_query = KeyQueryService::new(
            LocalResolver::new(directory.clone(), notary.clone()),
            mx_resolver.clone(),
            dispatcher,
            config.mail.mx_host.clone(),
        );

        tracing::info!("Notary public key: {}", notary.public_key_hex());

        Ok(Self {
            config: Arc::new(config),
            db,
            directory,
            notary,
            mx_resolver,
            mx_cache,
            key_query,
        })
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }

    /// This server's MX host
    pub fn mx_host(&self) -> &str {
        &self.config.mail.mx_host
    }
}

/// Peers that always refuse the connection
#[cfg(test)]
pub(crate) struct UnreachablePeers;

#[cfg(test)]
#[async_trait::async_trait]
impl PeerTransport for UnreachablePeers {
    async fn query(
        &self,
        mx_host: &str,
        _query: &crate::federation::KeyQuery,
    ) -> ServerResult<crate::federation::ResolutionResponse> {
        Err(crate::error::ServerError::Federation(format!("{} unreachable", mx_host)))
    }
}

/// Context over an in-memory directory holding `alice` (password `pw`,
/// hash `h1`), serving `home.test` as `mx.home.test`, with `peer.test`
/// routed to an unreachable `mx.peer.test`.
#[cfg(test)]
pub(crate) async fn test_context() -> AppContext {
    use crate::{directory::NewUser, mx::StaticMxResolver};

    let db = db::open_in_memory().await.unwrap();
    SqliteDirectory::new(db.clone())
        .insert_user(&NewUser {
            token: "alice".to_string(),
            password_hash: "pw".to_string(),
            public_hash: "h1".to_string(),
            public_key: "KEY-alice".to_string(),
            cipher_private_key: String::new(),
        })
        .await
        .unwrap();

    let resolver = StaticMxResolver::new()
        .with_host("home.test", "mx.home.test")
        .with_host("peer.test", "mx.peer.test");

    AppContext::with_collaborators(
        crate::config::test_config(),
        db,
        Arc::new(resolver),
        MxCache::new(Duration::from_secs(60)),
        Arc::new(UnreachablePeers),
    )
    .unwrap()
}
