//! Redis-backed blacklist and permission cache.
//!
//! Both keyspaces are TTL-bound, so `cleanup_expired` is a no-op here; Redis
//! reaps the keys itself.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::{aio::ConnectionManager, AsyncCommands, Client};

use crate::models::BlacklistEntry;
use crate::stores::{BlacklistStore, PermissionCache};

const BLACKLIST_PREFIX: &str = "auth:blacklist:";
const PERMISSION_PREFIX: &str = "auth:perms:user:";

async fn connect(url: &str) -> Result<ConnectionManager, anyhow::Error> {
    tracing::info!(url, "Connecting to Redis");
    let client = Client::open(url)?;
    let manager = client.get_connection_manager().await.map_err(|e| {
        tracing::error!("Failed to get Redis connection manager: {}", e);
        anyhow::anyhow!("Failed to connect to Redis: {}", e)
    })?;
    Ok(manager)
}

fn ttl_seconds(expires_at: DateTime<Utc>) -> i64 {
    (expires_at - Utc::now()).num_seconds().max(1)
}

#[derive(Clone)]
pub struct RedisBlacklistStore {
    manager: ConnectionManager,
}

impl RedisBlacklistStore {
    pub async fn new(url: &str) -> Result<Self, anyhow::Error> {
        Ok(Self {
            manager: connect(url).await?,
        })
    }
}

#[async_trait]
impl BlacklistStore for RedisBlacklistStore {
    async fn insert(&self, entry: &BlacklistEntry) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let key = format!("{BLACKLIST_PREFIX}{}", entry.token_id);
        redis::cmd("SET")
            .arg(&key)
            .arg("revoked")
            .arg("EX")
            .arg(ttl_seconds(entry.expires_at))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to blacklist token: {}", e))
    }

    async fn contains(&self, token_id: &str) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let key = format!("{BLACKLIST_PREFIX}{token_id}");
        let exists: bool = redis::cmd("EXISTS")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to check blacklist: {}", e))?;
        Ok(exists)
    }

    async fn cleanup_expired(&self) -> Result<u64, anyhow::Error> {
        // Keys carry their own TTL.
        Ok(0)
    }
}

#[derive(Clone)]
pub struct RedisPermissionCache {
    manager: ConnectionManager,
}

impl RedisPermissionCache {
    pub async fn new(url: &str) -> Result<Self, anyhow::Error> {
        Ok(Self {
            manager: connect(url).await?,
        })
    }

    async fn flush_permission_keys(&self) -> Result<u64, anyhow::Error> {
        let mut conn = self.manager.clone();
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(format!("{PERMISSION_PREFIX}*"))
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to scan permission keys: {}", e))?;
            if !keys.is_empty() {
                deleted += keys.len() as u64;
                conn.del::<_, ()>(keys)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to delete permission keys: {}", e))?;
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(deleted)
    }
}

#[async_trait]
impl PermissionCache for RedisPermissionCache {
    async fn get(&self, user_id: &str) -> Result<Option<Vec<String>>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let key = format!("{PERMISSION_PREFIX}{user_id}");
        let raw: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read permission cache: {}", e))?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        user_id: &str,
        permissions: &[String],
        ttl: Duration,
    ) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let key = format!("{PERMISSION_PREFIX}{user_id}");
        let json = serde_json::to_string(permissions)?;
        redis::cmd("SET")
            .arg(&key)
            .arg(json)
            .arg("EX")
            .arg(ttl.num_seconds().max(1))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write permission cache: {}", e))
    }

    async fn invalidate_user(&self, user_id: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let key = format!("{PERMISSION_PREFIX}{user_id}");
        conn.del::<_, ()>(&key)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to invalidate permission cache: {}", e))
    }

    async fn invalidate_role(&self, role_id: &str) -> Result<(), anyhow::Error> {
        // No reverse index from role to users; flush the whole keyspace
        // rather than leave stale grants live until TTL.
        let deleted = self.flush_permission_keys().await?;
        tracing::warn!(
            role_id,
            deleted,
            "role-level invalidation flushed permission cache"
        );
        Ok(())
    }

    async fn invalidate_all(&self) -> Result<(), anyhow::Error> {
        self.flush_permission_keys().await?;
        Ok(())
    }
}
