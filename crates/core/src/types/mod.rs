pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};

/// A tenant-scoped session record.
///
/// `expires_at` and `last_accessed` are absolute epoch milliseconds. The
/// stored form carries the payload encrypted; `data` here is always the
/// caller-visible plaintext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub tenant_id: String,
    pub data: serde_json::Value,
    pub expires_at: i64,
    pub last_accessed: i64,
}

impl Session {
    pub fn new(
        id: String,
        tenant_id: String,
        data: serde_json::Value,
        expires_at: i64,
        last_accessed: i64,
    ) -> Self {
        Self {
            id,
            tenant_id,
            data,
            expires_at,
            last_accessed,
        }
    }
}
