/// Local user directory
///
/// Answers the two questions the key resolution protocol asks about this
/// server's own users: which key-hash belongs to a name, and which public
/// key belongs to a key-hash. Each lookup is independent; nothing couples
/// lookups made within the same request.

pub mod sqlite;

pub use sqlite::SqliteDirectory;

use crate::error::ServerResult;
use async_trait::async_trait;

#[async_trait]
pub trait Directory: Send + Sync {
    /// name -> key-hash, `None` if no such user
    async fn load_pub_hash(&self, name: &str) -> ServerResult<Option<String>>;

    /// key-hash -> public key, `None` if unknown
    async fn load_pub_key(&self, pub_hash: &str) -> ServerResult<Option<String>>;
}

/// A user as stored by the account layer
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct UserRecord {
    pub token: String,
    pub password_hash: String,
    pub password_hash_old: Option<String>,
    pub public_hash: String,
    pub public_key: String,
}

/// Fields needed to seed a user
#[derive(Debug, Clone)]
pub struct NewUser {
    pub token: String,
    pub password_hash: String,
    pub public_hash: String,
    pub public_key: String,
    pub cipher_private_key: String,
}
