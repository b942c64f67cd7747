//! Redis-backed scratch store for upload and user bookkeeping.
//!
//! Entries are flat string hashes under `upload:<filename>` or
//! `userinfo:<username>`, optionally expiring. The client is built once at
//! startup and handed to whatever needs it; nothing on the per-file path
//! uses it today.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to connect to Redis: {0}")]
    Connect(#[source] redis::RedisError),

    #[error("Redis {op} on {key} failed: {source}")]
    Command {
        op: &'static str,
        key: String,
        #[source]
        source: redis::RedisError,
    },
}

/// Hash key namespaces.
#[derive(Debug, Clone, Copy)]
pub struct CacheKeys;

impl CacheKeys {
    pub fn upload(filename: &str) -> String {
        format!("upload:{filename}")
    }

    pub fn user_info(username: &str) -> String {
        format!("userinfo:{username}")
    }
}

#[derive(Clone)]
pub struct UploadCache {
    conn: ConnectionManager,
}

impl fmt::Debug for UploadCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadCache")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl UploadCache {
    /// Open a connection and verify it with `PING`.
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url).map_err(CacheError::Connect)?;
        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(CacheError::Connect)?;

        redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await
            .map_err(CacheError::Connect)?;

        info!("Connected to Redis cache");
        Ok(Self { conn })
    }

    /// Release the connection.
    pub async fn close(self) {
        drop(self.conn);
        info!("Redis cache connection closed");
    }

    pub async fn store_upload_info<K, V>(
        &self,
        filename: &str,
        info: impl IntoIterator<Item = (K, V)>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>
    where
        K: ToString,
        V: ToString,
    {
        self.store_hash(&CacheKeys::upload(filename), info, ttl).await
    }

    pub async fn get_upload_info(
        &self,
        filename: &str,
    ) -> Result<Option<HashMap<String, String>>, CacheError> {
        self.get_hash(&CacheKeys::upload(filename)).await
    }

    /// Returns whether a hash was actually removed.
    pub async fn delete_upload_info(&self, filename: &str) -> Result<bool, CacheError> {
        self.delete_hash(&CacheKeys::upload(filename)).await
    }

    pub async fn store_user_info<K, V>(
        &self,
        username: &str,
        info: impl IntoIterator<Item = (K, V)>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>
    where
        K: ToString,
        V: ToString,
    {
        self.store_hash(&CacheKeys::user_info(username), info, ttl)
            .await
    }

    pub async fn get_user_info(
        &self,
        username: &str,
    ) -> Result<Option<HashMap<String, String>>, CacheError> {
        self.get_hash(&CacheKeys::user_info(username)).await
    }

    pub async fn delete_user_info(&self, username: &str) -> Result<bool, CacheError> {
        self.delete_hash(&CacheKeys::user_info(username)).await
    }

    async fn store_hash<K, V>(
        &self,
        key: &str,
        info: impl IntoIterator<Item = (K, V)>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>
    where
        K: ToString,
        V: ToString,
    {
        let fields = stringify_fields(info);
        if fields.is_empty() {
            debug!(key = %key, "Nothing to store");
            return Ok(());
        }

        let mut conn = self.conn.clone();
        let _: () = conn
            .hset_multiple(key, &fields)
            .await
            .map_err(|source| command_error("HSET", key, source))?;

        if let Some(ttl) = ttl.filter(|t| t.as_secs() > 0) {
            let _: () = conn
                .expire(key, ttl.as_secs() as i64)
                .await
                .map_err(|source| command_error("EXPIRE", key, source))?;
        }

        info!(key = %key, fields = fields.len(), ttl = ?ttl, "Stored cache hash");
        Ok(())
    }

    async fn get_hash(&self, key: &str) -> Result<Option<HashMap<String, String>>, CacheError> {
        let mut conn = self.conn.clone();
        let data: HashMap<String, String> = conn
            .hgetall(key)
            .await
            .map_err(|source| command_error("HGETALL", key, source))?;

        if data.is_empty() {
            debug!(key = %key, "Cache MISS");
            Ok(None)
        } else {
            debug!(key = %key, "Cache HIT");
            Ok(Some(data))
        }
    }

    async fn delete_hash(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .del(key)
            .await
            .map_err(|source| command_error("DEL", key, source))?;

        if removed == 1 {
            info!(key = %key, "Deleted cache hash");
        } else {
            info!(key = %key, "Cache hash not found to delete");
        }
        Ok(removed == 1)
    }
}

fn command_error(op: &'static str, key: &str, source: redis::RedisError) -> CacheError {
    error!(op, key = %key, error = %source, "Redis command failed");
    CacheError::Command {
        op,
        key: key.to_string(),
        source,
    }
}

fn stringify_fields<K, V>(info: impl IntoIterator<Item = (K, V)>) -> Vec<(String, String)>
where
    K: ToString,
    V: ToString,
{
    info.into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_namespaces() {
        assert_eq!(CacheKeys::upload("photo1.jpg"), "upload:photo1.jpg");
        assert_eq!(CacheKeys::user_info("ftp-user"), "userinfo:ftp-user");
    }

    #[test]
    fn test_values_are_stringified() {
        let fields = stringify_fields([("width", 800), ("height", 600)]);
        assert_eq!(
            fields,
            vec![
                ("width".to_string(), "800".to_string()),
                ("height".to_string(), "600".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_url_is_connect_error() {
        let err = UploadCache::connect("definitely not a redis url")
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Connect(_)));
    }
}
