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

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cipher::Cipher;
use crate::connection::ConnectionManager;
use crate::namespace;
use crate::types::{Result, Session, StoreError};

/// Wire form of a session: the caller payload is replaced by its encrypted
/// envelope before anything touches the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSession {
    id: String,
    tenant_id: String,
    payload: String,
    expires_at: i64,
    last_accessed: i64,
}

/// CRUD for ephemeral, encrypted, tenant-scoped session records.
///
/// TTL is derived from the session's absolute expiry at write time. Reads
/// never extend a session; callers wanting sliding lifetimes re-issue
/// `set_session` with a later `expires_at`.
pub struct SessionStore {
    connection: Arc<ConnectionManager>,
    cipher: Arc<Cipher>,
    key_prefix: String,
}

impl SessionStore {
    pub(crate) fn new(
        connection: Arc<ConnectionManager>,
        cipher: Arc<Cipher>,
        key_prefix: String,
    ) -> Self {
        Self {
            connection,
            cipher,
            key_prefix,
        }
    }

    fn storage_key(&self, namespaced: &str) -> String {
        format!("{}{}", self.key_prefix, namespaced)
    }

    /// Store a session with `ttl = max(0, (expires_at - now) / 1000)`.
    ///
    /// A TTL of zero means the record is expired the instant it would be
    /// written, so the write is skipped entirely (write-then-immediately-
    /// evict): the call succeeds and an immediate read observes absence.
    pub async fn set_session(&self, session: &Session) -> Result<()> {
        namespace::validate_tenant(&session.tenant_id)?;
        if session.id.trim().is_empty() {
            return Err(StoreError::Validation(
                "session id must be a non-empty string".to_string(),
            ));
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        let ttl = session_ttl_seconds(session.expires_at, now_ms);
        if ttl == 0 {
            debug!(
                "Session {} for tenant {} already expired, skipping write",
                session.id, session.tenant_id
            );
            return Ok(());
        }

        let payload = self.cipher.encrypt(&session.data)?;
        let record = StoredSession {
            id: session.id.clone(),
            tenant_id: session.tenant_id.clone(),
            payload,
            expires_at: session.expires_at,
            last_accessed: session.last_accessed,
        };
        let serialized = serde_json::to_string(&record)?;

        let storage_key =
            self.storage_key(&namespace::session_key(&session.id, &session.tenant_id)?);
        let mut conn = self.connection.handle().await?;
        self.connection
            .run(conn.set_ex::<_, _, ()>(&storage_key, serialized, ttl))
            .await?;

        debug!(
            "Session {} for tenant {} stored, ttl={}s",
            session.id, session.tenant_id, ttl
        );
        Ok(())
    }

    /// Fetch and decrypt a session. Absence is `Ok(None)`; a payload that
    /// fails authentication propagates as a `Decryption` error.
    pub async fn get_session(&self, id: &str, tenant: &str) -> Result<Option<Session>> {
        let storage_key = self.storage_key(&namespace::session_key(id, tenant)?);
        let mut conn = self.connection.handle().await?;

        let raw = self
            .connection
            .run(conn.get::<_, Option<String>>(&storage_key))
            .await?;
        let Some(raw) = raw else {
            debug!("Session {} for tenant {} not found", id, tenant);
            return Ok(None);
        };

        let record: StoredSession = serde_json::from_str(&raw)?;
        let data: serde_json::Value = self.cipher.decrypt(&record.payload)?;

        Ok(Some(Session {
            id: record.id,
            tenant_id: record.tenant_id,
            data,
            expires_at: record.expires_at,
            last_accessed: record.last_accessed,
        }))
    }

    /// Remove a session ahead of its expiry. Deleting an absent session is a
    /// no-op, not an error.
    pub async fn delete_session(&self, id: &str, tenant: &str) -> Result<()> {
        let storage_key = self.storage_key(&namespace::session_key(id, tenant)?);
        let mut conn = self.connection.handle().await?;
        self.connection
            .run(conn.del::<_, ()>(&storage_key))
            .await?;
        debug!("Session {} for tenant {} deleted", id, tenant);
        Ok(())
    }
}

/// TTL in whole seconds from an absolute epoch-millisecond expiry; clamped
/// at zero for expiries in the past.
pub(crate) fn session_ttl_seconds(expires_at_ms: i64, now_ms: i64) -> u64 {
    ((expires_at_ms - now_ms).max(0) / 1000) as u64
}
