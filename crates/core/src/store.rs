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

use std::sync::Arc;

use tracing::info;

use crate::cache::CacheStore;
use crate::cipher::Cipher;
use crate::config::StoreConfig;
use crate::connection::ConnectionManager;
use crate::rate_limit::RateLimiter;
use crate::session::SessionStore;
use crate::types::{Result, StoreError};

/// The explicit context object for the whole subsystem.
///
/// Constructed once at process startup via [`init`](Self::init) and passed by
/// reference to every consumer; there is no implicit global instance. All
/// three facades share one [`ConnectionManager`] and, where relevant, one
/// [`Cipher`] whose key lives for the process lifetime.
pub struct TenantStore {
    connection: Arc<ConnectionManager>,
    cache: CacheStore,
    rate_limiter: RateLimiter,
    sessions: SessionStore,
}

impl TenantStore {
    /// Validate the configuration, set up the cipher, connect to the backing
    /// store and start the health-check loop.
    pub async fn init(config: StoreConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| StoreError::Configuration(e.to_string()))?;

        let cipher = Arc::new(match &config.encryption_key {
            Some(hex_key) => Cipher::from_hex_key(hex_key)?,
            None => Cipher::new(),
        });

        let connection = ConnectionManager::new(&config.redis, &config.health)?;
        connection.connect().await?;

        let prefix = config.redis.key_prefix.clone();
        let cache = CacheStore::new(
            Arc::clone(&connection),
            Arc::clone(&cipher),
            prefix.clone(),
            &config.cache,
        );
        let rate_limiter = RateLimiter::new(
            Arc::clone(&connection),
            prefix.clone(),
            config.rate_limit.clone(),
        );
        let sessions = SessionStore::new(Arc::clone(&connection), cipher, prefix);

        info!("Tenant store initialized");
        Ok(Self {
            connection,
            cache,
            rate_limiter,
            sessions,
        })
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Stop the health-check loop and release the connection. Best-effort;
    /// failures during teardown are logged, never raised.
    pub async fn shutdown(&self) {
        self.connection.disconnect().await;
        info!("Tenant store shut down");
    }
}
