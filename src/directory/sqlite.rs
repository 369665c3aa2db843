/// SQLite-backed directory over the `users` table
use crate::{
    directory::{Directory, NewUser, UserRecord},
    error::{ServerError, ServerResult},
};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

#[derive(Clone)]
pub struct SqliteDirectory {
    db: SqlitePool,
}

impl SqliteDirectory {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Insert a user. Returns false if the token or key-hash is already taken.
    pub async fn insert_user(&self, user: &NewUser) -> ServerResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO users
                (token, password_hash, public_hash, public_key, cipher_private_key)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&user.token)
        .bind(&user.password_hash)
        .bind(&user.public_hash)
        .bind(&user.public_key)
        .bind(&user.cipher_private_key)
        .execute(&self.db)
        .await
        .map_err(ServerError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    /// Load the credential record for a login token
    pub async fn load_user(&self, token: &str) -> ServerResult<Option<UserRecord>> {
        let user = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT token, password_hash, password_hash_old, public_hash, public_key
            FROM users
            WHERE token = ?1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.db)
        .await
        .map_err(ServerError::Database)?;

        Ok(user)
    }
}

#[async_trait]
impl Directory for SqliteDirectory {
    async fn load_pub_hash(&self, name: &str) -> ServerResult<Option<String>> {
        let row = sqlx::query("SELECT public_hash FROM users WHERE token = ?1")
            .bind(name)
            .fetch_optional(&self.db)
            .await
            .map_err(ServerError::Database)?;

        match row {
            Some(row) => Ok(Some(row.try_get("public_hash")?)),
            None => Ok(None),
        }
    }

    async fn load_pub_key(&self, pub_hash: &str) -> ServerResult<Option<String>> {
        let row = sqlx::query("SELECT public_key FROM users WHERE public_hash = ?1")
            .bind(pub_hash)
            .fetch_optional(&self.db)
            .await
            .map_err(ServerError::Database)?;

        match row {
            Some(row) => Ok(Some(row.try_get("public_key")?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn create_test_directory() -> SqliteDirectory {
        let pool = db::open_in_memory().await.unwrap();
        SqliteDirectory::new(pool)
    }

    fn alice() -> NewUser {
        NewUser {
            token: "alice".to_string(),
            password_hash: "pw1".to_string(),
            public_hash: "hashalice".to_string(),
            public_key: "-----BEGIN PGP PUBLIC KEY BLOCK-----alice".to_string(),
            cipher_private_key: "deadbeef".to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let directory = create_test_directory().await;
        assert!(directory.insert_user(&alice()).await.unwrap());

        let hash = directory.load_pub_hash("alice").await.unwrap();
        assert_eq!(hash.as_deref(), Some("hashalice"));

        let key = directory.load_pub_key("hashalice").await.unwrap();
        assert_eq!(key, Some(alice().public_key));
    }

    #[tokio::test]
    async fn test_missing_entries() {
        let directory = create_test_directory().await;

        assert_eq!(directory.load_pub_hash("nobody").await.unwrap(), None);
        assert_eq!(directory.load_pub_key("nohash").await.unwrap(), None);
        assert_eq!(directory.load_user("nobody").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_token_is_rejected() {
        let directory = create_test_directory().await;
        assert!(directory.insert_user(&alice()).await.unwrap());

        let mut again = alice();
        again.public_hash = "otherhash".to_string();
        assert!(!directory.insert_user(&again).await.unwrap());
    }

    #[tokio::test]
    async fn test_load_user_record() {
        let directory = create_test_directory().await;
        directory.insert_user(&alice()).await.unwrap();

        let user = directory.load_user("alice").await.unwrap().unwrap();
        assert_eq!(user.password_hash, "pw1");
        assert_eq!(user.password_hash_old, None);
        assert_eq!(user.public_hash, "hashalice");
    }
}
