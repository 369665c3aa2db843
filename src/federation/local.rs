/// Local branch of a key query: addresses this server owns
use crate::{
    address::EmailAddress,
    crypto::NotarySigner,
    directory::Directory,
    error::ServerResult,
    federation::{KeyLookupResult, NotaryResult},
    mx::AddressGroup,
};
use std::sync::Arc;
use tracing::debug;

/// Error text when the directory's hash differs from the one the client expects
pub const WRONG_HASH: &str = "wrong hash for name";

/// What this server contributes for its own addresses
#[derive(Debug, Clone, Default)]
pub struct LocalResolution {
    /// Our notary's attestations, when requested
    pub notary: Option<NotaryResult>,
    /// Lookup results in write order. Later entries for the same key win.
    pub public_keys: Vec<(String, KeyLookupResult)>,
}

/// Resolves local users through the directory and signs notary statements
#[derive(Clone)]
pub struct LocalResolver {
    directory: Arc<dyn Directory>,
    notary: Arc<NotarySigner>,
}

impl LocalResolver {
    pub fn new(directory: Arc<dyn Directory>, notary: Arc<NotarySigner>) -> Self {
        Self { directory, notary }
    }

    /// Resolve every address in this server's group.
    ///
    /// `attest` controls whether our notary entry is produced. Name results are
    /// written before hash results so a hash check for the same user is what
    /// the caller ends up with.
    pub async fn resolve(
        &self,
        group: &AddressGroup,
        attest: bool,
        timestamp: i64,
    ) -> ServerResult<LocalResolution> {
        let mut resolution = LocalResolution::default();

        if attest {
            resolution.notary = Some(self.attest_names(&group.name_addresses, timestamp).await?);
        }

        for addr in &group.name_addresses {
            let result = self.lookup_name(addr).await?;
            resolution.public_keys.push((addr.to_string_no_hash(), result));
        }

        for addr in &group.hash_addresses {
            let result = self.lookup_hash(addr).await?;
            resolution.public_keys.push((addr.to_string_no_hash(), result));
        }

        Ok(resolution)
    }

    /// Sign name -> hash for each address. Unknown names get a signed empty hash.
    pub async fn attest_names(
        &self,
        addresses: &[EmailAddress],
        timestamp: i64,
    ) -> ServerResult<NotaryResult> {
        let mut result = NotaryResult::default();

        for addr in addresses {
            let pub_hash = self.directory.load_pub_hash(&addr.name).await?;
            let attestation = self.notary.attest(addr, pub_hash, timestamp);
            result.attestations.insert(addr.to_string_no_hash(), attestation);
        }

        debug!("Attested {} name resolution(s)", result.attestations.len());

        Ok(result)
    }

    /// Plain key lookup for a name address
    pub async fn lookup_name(&self, addr: &EmailAddress) -> ServerResult<KeyLookupResult> {
        let Some(pub_hash) = self.directory.load_pub_hash(&addr.name).await? else {
            return Ok(KeyLookupResult::error(format!("unknown name {}", addr.name)));
        };

        let pub_key = self.directory.load_pub_key(&pub_hash).await?;

        Ok(KeyLookupResult::found(pub_key, pub_hash))
    }

    /// Key lookup checked against the hash the client expects
    pub async fn lookup_hash(&self, addr: &EmailAddress) -> ServerResult<KeyLookupResult> {
        let Some(pub_hash) = self.directory.load_pub_hash(&addr.name).await? else {
            return Ok(KeyLookupResult::error(format!("unknown name {}", addr.name)));
        };

        let pub_key = self.directory.load_pub_key(&pub_hash).await?;
        let mut result = KeyLookupResult::found(pub_key, pub_hash.clone());

        // Never "correct" the hash: report what we have and flag the mismatch
        if addr.hash.as_deref() != Some(pub_hash.as_str()) {
            result.error = Some(WRONG_HASH.to_string());
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        address::parse_address_list,
        crypto::verify_attestation,
        db,
        directory::{NewUser, SqliteDirectory},
    };

    async fn create_test_resolver() -> (LocalResolver, Arc<NotarySigner>) {
        let directory = SqliteDirectory::new(db::open_in_memory().await.unwrap());
        directory
            .insert_user(&NewUser {
                token: "alice".to_string(),
                password_hash: "pw".to_string(),
                public_hash: "h1".to_string(),
                public_key: "KEY-ALICE".to_string(),
                cipher_private_key: String::new(),
            })
            .await
            .unwrap();

        let notary = Arc::new(NotarySigner::generate());
        (LocalResolver::new(Arc::new(directory), notary.clone()), notary)
    }

    #[tokio::test]
    async fn test_hash_match() {
        let (resolver, _) = create_test_resolver().await;
        let addr = EmailAddress::parse("alice@home.test#h1").unwrap();

        let result = resolver.lookup_hash(&addr).await.unwrap();
        assert_eq!(result, KeyLookupResult::found(Some("KEY-ALICE".to_string()), "h1".to_string()));
    }

    #[tokio::test]
    async fn test_hash_mismatch_keeps_real_key_and_flags_error() {
        let (resolver, _) = create_test_resolver().await;
        let addr = EmailAddress::parse("alice@home.test#stale").unwrap();

        let result = resolver.lookup_hash(&addr).await.unwrap();
        assert_eq!(result.pub_key.as_deref(), Some("KEY-ALICE"));
        assert_eq!(result.pub_hash.as_deref(), Some("h1"));
        assert_eq!(result.error.as_deref(), Some(WRONG_HASH));
    }

    #[tokio::test]
    async fn test_unknown_name() {
        let (resolver, _) = create_test_resolver().await;
        let addr = EmailAddress::parse("mallory@home.test#h1").unwrap();

        let result = resolver.lookup_hash(&addr).await.unwrap();
        assert_eq!(result.error.as_deref(), Some("unknown name mallory"));
        assert_eq!(result.pub_key, None);

        let result = resolver.lookup_name(&addr).await.unwrap();
        assert_eq!(result.error.as_deref(), Some("unknown name mallory"));
    }

    #[tokio::test]
    async fn test_attestations_cover_known_and_unknown_names() {
        let (resolver, notary) = create_test_resolver().await;
        let names = parse_address_list("alice@home.test,ghost@home.test").unwrap();

        let result = resolver.attest_names(&names, 1700000000).await.unwrap();
        assert_eq!(result.error, None);

        let alice = &result.attestations["alice@home.test"];
        assert_eq!(alice.pub_hash.as_deref(), Some("h1"));
        assert_eq!(alice.timestamp, 1700000000);
        assert!(verify_attestation(&notary.public_key_hex(), &names[0], alice).unwrap());

        let ghost = &result.attestations["ghost@home.test"];
        assert_eq!(ghost.pub_hash, None);
        assert!(verify_attestation(&notary.public_key_hex(), &names[1], ghost).unwrap());
    }

    #[tokio::test]
    async fn test_resolve_orders_hash_results_last() {
        let (resolver, _) = create_test_resolver().await;
        let group = AddressGroup {
            name_addresses: parse_address_list("alice@home.test").unwrap(),
            hash_addresses: parse_address_list("alice@home.test#wrong").unwrap(),
        };

        let resolution = resolver.resolve(&group, false, 1).await.unwrap();
        assert!(resolution.notary.is_none());
        assert_eq!(resolution.public_keys.len(), 2);

        let (key, last) = resolution.public_keys.last().unwrap();
        assert_eq!(key, "alice@home.test");
        assert_eq!(last.error.as_deref(), Some(WRONG_HASH));
    }
}
