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

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{HealthConfig, RedisConfig};
use crate::types::{Result, StoreError};

/// Owns the single logical connection to the backing store.
///
/// The multiplexed connection is clonable and queues concurrent commands
/// over one transport, which is what makes the single-connection model work:
/// dependents clone a handle per operation and never lock each other out.
/// A background task checks liveness on a fixed interval and reconnects
/// with bounded backoff when the check fails.
pub struct ConnectionManager {
    client: redis::Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    connected: AtomicBool,
    operation_timeout: Duration,
    health_interval: Duration,
    health_timeout: Duration,
    max_reconnect_attempts: u32,
    health_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(redis: &RedisConfig, health: &HealthConfig) -> Result<Arc<Self>> {
        let client = if redis.tls_enabled
            && (redis.tls_cert_path.is_some() || redis.tls_ca_path.is_some())
        {
            redis::Client::build_with_tls(redis.connection_url(), load_tls_certificates(redis)?)
                .map_err(|e| StoreError::Configuration(format!("Invalid Redis endpoint: {}", e)))?
        } else {
            redis::Client::open(redis.connection_url())
                .map_err(|e| StoreError::Configuration(format!("Invalid Redis endpoint: {}", e)))?
        };

        Ok(Arc::new(Self {
            client,
            connection: RwLock::new(None),
            connected: AtomicBool::new(false),
            operation_timeout: Duration::from_millis(redis.operation_timeout_ms),
            health_interval: Duration::from_secs(health.interval_seconds),
            health_timeout: Duration::from_millis(health.timeout_ms),
            max_reconnect_attempts: redis.max_reconnect_attempts,
            health_task: std::sync::Mutex::new(None),
        }))
    }

    /// Establish the connection, verify it with PING and start the periodic
    /// health check. Transient failures come back as `Connection` errors,
    /// never panics.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        let conn = self.open_connection().await?;
        *self.connection.write().await = Some(conn);
        self.connected.store(true, Ordering::SeqCst);
        info!("Connected to Redis");

        self.spawn_health_task();
        Ok(())
    }

    async fn open_connection(&self) -> Result<MultiplexedConnection> {
        let mut conn = tokio::time::timeout(
            self.operation_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| StoreError::Timeout)?
        .map_err(|e| StoreError::Connection(format!("Failed to connect to Redis: {}", e)))?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Connection(format!("Redis PING failed: {}", e)))?;
        if pong != "PONG" {
            return Err(StoreError::Connection(
                "Unexpected PING response".to_string(),
            ));
        }
        Ok(conn)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Hand out a command handle for one operation.
    pub(crate) async fn handle(&self) -> Result<MultiplexedConnection> {
        if !self.is_connected() {
            return Err(StoreError::Connection(
                "Not connected to the backing store".to_string(),
            ));
        }
        self.connection.read().await.clone().ok_or_else(|| {
            StoreError::Connection("Not connected to the backing store".to_string())
        })
    }

    /// Run one command future under the operation timeout. An I/O-level
    /// failure flips `is_connected` so subsequent calls fail fast until the
    /// health loop restores the connection.
    pub(crate) async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if e.is_io_error() {
                    self.connected.store(false, Ordering::SeqCst);
                }
                Err(StoreError::Connection(format!(
                    "Redis command failed: {}",
                    e
                )))
            }
            Err(_) => Err(StoreError::Timeout),
        }
    }

    /// Check liveness with a short timeout distinct from the operation
    /// timeout. Flips `is_connected` to match the observed state.
    pub async fn health_check(&self) -> bool {
        let conn = self.connection.read().await.clone();
        let Some(mut conn) = conn else {
            self.connected.store(false, Ordering::SeqCst);
            return false;
        };

        let cmd = redis::cmd("PING");
        let ping = cmd.query_async::<String>(&mut conn);
        match tokio::time::timeout(self.health_timeout, ping).await {
            Ok(Ok(pong)) if pong == "PONG" => {
                self.connected.store(true, Ordering::SeqCst);
                true
            }
            Ok(Ok(other)) => {
                warn!("Health check got unexpected response: {}", other);
                self.connected.store(false, Ordering::SeqCst);
                false
            }
            Ok(Err(e)) => {
                warn!("Health check failed: {}", e);
                self.connected.store(false, Ordering::SeqCst);
                false
            }
            Err(_) => {
                warn!("Health check timed out");
                self.connected.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// Drop the current connection (close errors are irrelevant) and dial
    /// again with bounded backoff `min(attempt * 50ms, 2s)`. Never loops
    /// forever inside one call; persistent failure is the caller's signal to
    /// back off itself.
    pub async fn reconnect(&self) -> Result<()> {
        *self.connection.write().await = None;
        self.connected.store(false, Ordering::SeqCst);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.open_connection().await {
                Ok(conn) => {
                    *self.connection.write().await = Some(conn);
                    self.connected.store(true, Ordering::SeqCst);
                    info!("Reconnected to Redis after {} attempt(s)", attempt);
                    return Ok(());
                }
                Err(e) if attempt < self.max_reconnect_attempts => {
                    let backoff = Duration::from_millis((u64::from(attempt) * 50).min(2000));
                    warn!(
                        "Reconnect attempt {} failed: {}, retrying in {:?}",
                        attempt, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    error!("Reconnect gave up after {} attempts: {}", attempt, e);
                    return Err(e);
                }
            }
        }
    }

    fn spawn_health_task(self: &Arc<Self>) {
        // The task keeps only a weak handle so it never prolongs the
        // manager's lifetime; the loop winds down once the last external
        // handle drops.
        let manager = Arc::downgrade(self);
        let health_interval = self.health_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(health_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; connect() just verified the
            // connection, so consume it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if !manager.health_check().await {
                    warn!("Health check failed, attempting reconnect");
                    if let Err(e) = manager.reconnect().await {
                        error!("Reconnect after failed health check did not succeed: {}", e);
                    }
                } else {
                    debug!("Health check ok");
                }
            }
        });

        if let Ok(mut slot) = self.health_task.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Stop the health-check task and release the connection. Safe to call
    /// on every exit path; errors during close are ignored by design of the
    /// shutdown sequence.
    pub async fn disconnect(&self) {
        if let Ok(mut slot) = self.health_task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        *self.connection.write().await = None;
        self.connected.store(false, Ordering::SeqCst);
        info!("Disconnected from Redis");
    }
}

/// Read PEM material for a TLS connection. Cert and key come as a pair
/// (enforced by config validation); a custom CA root is independent.
fn load_tls_certificates(config: &RedisConfig) -> Result<redis::TlsCertificates> {
    let read = |path: &str| {
        std::fs::read(path).map_err(|e| {
            StoreError::Configuration(format!("Failed to read TLS material {}: {}", path, e))
        })
    };

    let client_tls = match (&config.tls_cert_path, &config.tls_key_path) {
        (Some(cert), Some(key)) => Some(redis::ClientTlsConfig {
            client_cert: read(cert)?,
            client_key: read(key)?,
        }),
        _ => None,
    };
    let root_cert = match &config.tls_ca_path {
        Some(ca) => Some(read(ca)?),
        None => None,
    };

    Ok(redis::TlsCertificates {
        client_tls,
        root_cert,
    })
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.health_task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}
