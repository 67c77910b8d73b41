// Copyright © 2026 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cipher::Cipher;
use crate::config::CacheConfig;
use crate::connection::ConnectionManager;
use crate::namespace;
use crate::types::{Result, StoreError};

/// Write options for [`CacheStore::set`].
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// TTL in seconds; `None` uses the configured default. Zero is rejected.
    pub ttl_seconds: Option<u64>,
    /// Encrypt the value at rest.
    pub encrypted: bool,
    /// Tags to index this key under for group invalidation.
    pub tags: Vec<String>,
}

#[derive(Debug, Default)]
struct CacheMetrics {
    hits: AtomicUsize,
    misses: AtomicUsize,
    errors: AtomicUsize,
    writes: AtomicUsize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub hits: usize,
    pub misses: usize,
    pub errors: usize,
    pub writes: usize,
}

/// Tenant-scoped cache with optional encryption and tag-based invalidation.
///
/// Values are JSON-serialized; with `encrypted` set they are sealed into an
/// [`EncryptionEnvelope`](crate::cipher::EncryptionEnvelope) instead. A miss
/// is `Ok(None)`; a decryption failure is an error, never a silent miss.
pub struct CacheStore {
    connection: Arc<ConnectionManager>,
    cipher: Arc<Cipher>,
    key_prefix: String,
    default_ttl_seconds: u64,
    metrics: Arc<CacheMetrics>,
}

impl CacheStore {
    pub(crate) fn new(
        connection: Arc<ConnectionManager>,
        cipher: Arc<Cipher>,
        key_prefix: String,
        config: &CacheConfig,
    ) -> Self {
        Self {
            connection,
            cipher,
            key_prefix,
            default_ttl_seconds: config.default_ttl_seconds,
            metrics: Arc::new(CacheMetrics::default()),
        }
    }

    fn storage_key(&self, namespaced: &str) -> String {
        format!("{}{}", self.key_prefix, namespaced)
    }

    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        tenant: &str,
        options: &SetOptions,
    ) -> Result<()> {
        let namespaced = namespace::namespaced_key(key, tenant)?;
        let ttl = options.ttl_seconds.unwrap_or(self.default_ttl_seconds);
        if ttl == 0 {
            return Err(StoreError::Validation(
                "ttl must be a positive number of seconds".to_string(),
            ));
        }

        let payload = if options.encrypted {
            self.cipher.encrypt(value)?
        } else {
            serde_json::to_string(value)?
        };

        let storage_key = self.storage_key(&namespaced);
        let mut conn = self.connection.handle().await?;

        // Index the tags before the value goes live: a dangling tag member
        // is a tolerated no-op during invalidation, while a live entry
        // missing from its tag set could never be evicted by
        // `invalidate_tag`.
        for tag in &options.tags {
            let tag_key = self.storage_key(&namespace::tag_key(tag, tenant)?);
            let registry_key = self.storage_key(&namespace::tag_registry_key(tenant)?);
            self.connection
                .run(conn.sadd::<_, _, ()>(&tag_key, &namespaced))
                .await?;
            self.extend_expiry(&mut conn, &tag_key, ttl).await?;
            self.connection
                .run(conn.sadd::<_, _, ()>(&registry_key, namespace::sanitize_key(tag)))
                .await?;
            self.extend_expiry(&mut conn, &registry_key, ttl).await?;
        }

        if let Err(e) = self
            .connection
            .run(conn.set_ex::<_, _, ()>(&storage_key, payload, ttl))
            .await
        {
            self.metrics.errors.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }

        self.metrics.writes.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Cache set {} ttl={}s encrypted={} tags={}",
            namespaced,
            ttl,
            options.encrypted,
            options.tags.len()
        );
        Ok(())
    }

    /// EXPIRE NX sets an expiry when none exists; EXPIRE GT only ever
    /// extends one. Together they keep an index key alive at least as long
    /// as its longest-lived member without shortening it. Requires the
    /// Redis 7 EXPIRE options.
    async fn extend_expiry(
        &self,
        conn: &mut MultiplexedConnection,
        key: &str,
        ttl_seconds: u64,
    ) -> Result<()> {
        self.connection
            .run(
                redis::cmd("EXPIRE")
                    .arg(key)
                    .arg(ttl_seconds)
                    .arg("NX")
                    .query_async::<i64>(conn),
            )
            .await?;
        self.connection
            .run(
                redis::cmd("EXPIRE")
                    .arg(key)
                    .arg(ttl_seconds)
                    .arg("GT")
                    .query_async::<i64>(conn),
            )
            .await?;
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        tenant: &str,
        encrypted: bool,
    ) -> Result<Option<T>> {
        let namespaced = namespace::namespaced_key(key, tenant)?;
        let storage_key = self.storage_key(&namespaced);
        let mut conn = self.connection.handle().await?;

        let raw = match self
            .connection
            .run(conn.get::<_, Option<String>>(&storage_key))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let Some(raw) = raw else {
            self.metrics.misses.fetch_add(1, Ordering::Relaxed);
            debug!("Cache miss for {}", namespaced);
            return Ok(None);
        };

        let value = if encrypted {
            self.cipher.decrypt(&raw).map_err(|e| {
                self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                e
            })?
        } else {
            serde_json::from_str(&raw).map_err(|e| {
                self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                StoreError::Serialization(e.to_string())
            })?
        };

        self.metrics.hits.fetch_add(1, Ordering::Relaxed);
        debug!("Cache hit for {}", namespaced);
        Ok(Some(value))
    }

    pub async fn delete(&self, key: &str, tenant: &str) -> Result<()> {
        let namespaced = namespace::namespaced_key(key, tenant)?;
        let storage_key = self.storage_key(&namespaced);
        let mut conn = self.connection.handle().await?;
        self.connection
            .run(conn.del::<_, ()>(&storage_key))
            .await?;
        debug!("Cache delete for {}", namespaced);
        Ok(())
    }

    /// Delete every key currently indexed under `tag`. Best-effort: a key
    /// that already expired counts as removed work done by the store, and a
    /// failed per-key delete is logged without failing the invalidation.
    /// Returns the number of keys the store actually deleted.
    pub async fn invalidate_tag(&self, tag: &str, tenant: &str) -> Result<usize> {
        let tag_key = self.storage_key(&namespace::tag_key(tag, tenant)?);
        let registry_key = self.storage_key(&namespace::tag_registry_key(tenant)?);
        let mut conn = self.connection.handle().await?;

        let members = self
            .connection
            .run(conn.smembers::<_, Vec<String>>(&tag_key))
            .await?;

        let mut removed = 0usize;
        for namespaced in &members {
            let storage_key = self.storage_key(namespaced);
            match self
                .connection
                .run(conn.del::<_, usize>(&storage_key))
                .await
            {
                Ok(n) => removed += n,
                Err(e) => {
                    warn!(
                        "Failed to delete {} during invalidation of tag '{}': {}",
                        namespaced, tag, e
                    );
                }
            }
        }

        if let Err(e) = self.connection.run(conn.del::<_, ()>(&tag_key)).await {
            warn!("Failed to drop tag set '{}': {}", tag, e);
        }
        if let Err(e) = self
            .connection
            .run(conn.srem::<_, _, ()>(&registry_key, namespace::sanitize_key(tag)))
            .await
        {
            warn!("Failed to unregister tag '{}': {}", tag, e);
        }

        debug!(
            "Invalidated tag '{}' for tenant {}: {} of {} indexed key(s) deleted",
            tag,
            tenant,
            removed,
            members.len()
        );
        Ok(removed)
    }

    /// Enumerate the tags currently registered for a tenant.
    pub async fn list_tags(&self, tenant: &str) -> Result<Vec<String>> {
        let registry_key = self.storage_key(&namespace::tag_registry_key(tenant)?);
        let mut conn = self.connection.handle().await?;
        self.connection
            .run(conn.smembers::<_, Vec<String>>(&registry_key))
            .await
    }

    /// Explicit read-through wrapper: return the cached value if present,
    /// otherwise produce one, store it under `options`, and return it. This
    /// is the composable form of a caching decorator; the wrapping stays
    /// visible at the call site.
    pub async fn get_or_set<T, F, Fut>(
        &self,
        key: &str,
        tenant: &str,
        options: &SetOptions,
        producer: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if let Some(value) = self.get(key, tenant, options.encrypted).await? {
            return Ok(value);
        }
        let value = producer().await?;
        self.set(key, &value, tenant, options).await?;
        Ok(value)
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            errors: self.metrics.errors.load(Ordering::Relaxed),
            writes: self.metrics.writes.load(Ordering::Relaxed),
        }
    }
}
