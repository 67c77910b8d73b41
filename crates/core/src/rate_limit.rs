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

use redis::Script;
use tracing::debug;
use uuid::Uuid;

use crate::config::RateLimitConfig;
use crate::connection::ConnectionManager;
use crate::namespace;
use crate::types::{Result, StoreError};

/// Sliding-window admission as one server-side script: prune entries older
/// than the window, count what remains, and record the new request only if
/// the count is under the limit. Running all steps in a single script keeps
/// concurrent callers for the same tenant+resource from both being admitted
/// past the limit; three separate round trips would race.
///
/// KEYS[1] window sorted set, KEYS[2] block key.
/// ARGV[1] window start (ms), ARGV[2] max requests, ARGV[3] now (ms),
/// ARGV[4] unique member, ARGV[5] block duration (s), ARGV[6] window (s).
const SLIDING_WINDOW_SCRIPT: &str = r#"
if tonumber(ARGV[5]) > 0 and redis.call('EXISTS', KEYS[2]) == 1 then
    return 0
end
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[1])
local count = redis.call('ZCARD', KEYS[1])
if count >= tonumber(ARGV[2]) then
    if tonumber(ARGV[5]) > 0 then
        redis.call('SET', KEYS[2], '1', 'EX', ARGV[5])
    end
    return 0
end
redis.call('ZADD', KEYS[1], ARGV[3], ARGV[4])
redis.call('EXPIRE', KEYS[1], ARGV[6])
return 1
"#;

#[derive(Debug, Clone)]
pub struct RateLimitOptions {
    pub window_size_seconds: u64,
    pub max_requests: u64,
    /// Seconds to reject everything after a rejection; 0 disables blocking.
    pub block_duration_seconds: u64,
}

impl From<&RateLimitConfig> for RateLimitOptions {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            window_size_seconds: config.window_size_seconds,
            max_requests: config.max_requests,
            block_duration_seconds: config.block_duration_seconds,
        }
    }
}

/// Sliding-window rate limiter at per-(tenant, resource) granularity.
pub struct RateLimiter {
    connection: Arc<ConnectionManager>,
    key_prefix: String,
    script: Script,
    defaults: RateLimitConfig,
}

impl RateLimiter {
    pub(crate) fn new(
        connection: Arc<ConnectionManager>,
        key_prefix: String,
        defaults: RateLimitConfig,
    ) -> Self {
        Self {
            connection,
            key_prefix,
            script: Script::new(SLIDING_WINDOW_SCRIPT),
            defaults,
        }
    }

    /// Returns `Ok(true)` when the request is admitted and recorded,
    /// `Ok(false)` when rejected (the attempt is not recorded). Rejection is
    /// an admission result, not an error.
    pub async fn check_rate_limit(
        &self,
        resource: &str,
        tenant: &str,
        options: &RateLimitOptions,
    ) -> Result<bool> {
        if options.max_requests == 0 {
            return Err(StoreError::Validation(
                "max_requests must be positive".to_string(),
            ));
        }
        if options.window_size_seconds == 0 {
            return Err(StoreError::Validation(
                "window_size_seconds must be positive".to_string(),
            ));
        }

        let window_key = format!(
            "{}{}",
            self.key_prefix,
            namespace::rate_limit_key(resource, tenant)?
        );
        let block_key = format!(
            "{}{}",
            self.key_prefix,
            namespace::rate_limit_block_key(resource, tenant)?
        );

        let now_ms = chrono::Utc::now().timestamp_millis();
        let window_start = now_ms - (options.window_size_seconds as i64) * 1000;
        // Unique member so two requests in the same millisecond never
        // collapse into one sorted-set entry.
        let member = format!("{}:{}", now_ms, Uuid::new_v4());

        let mut conn = self.connection.handle().await?;
        let admitted: i64 = self
            .connection
            .run(
                self.script
                    .key(&window_key)
                    .key(&block_key)
                    .arg(window_start)
                    .arg(options.max_requests)
                    .arg(now_ms)
                    .arg(&member)
                    .arg(options.block_duration_seconds)
                    .arg(options.window_size_seconds)
                    .invoke_async(&mut conn),
            )
            .await?;

        debug!(
            "Rate limit check for {} tenant={} admitted={}",
            resource,
            tenant,
            admitted == 1
        );
        Ok(admitted == 1)
    }

    /// Admission check with the configured default window and limit.
    pub async fn check_rate_limit_default(&self, resource: &str, tenant: &str) -> Result<bool> {
        let options = RateLimitOptions::from(&self.defaults);
        self.check_rate_limit(resource, tenant, &options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HealthConfig, RedisConfig};

    fn offline_limiter() -> RateLimiter {
        let redis = RedisConfig {
            port: 1,
            operation_timeout_ms: 500,
            ..RedisConfig::default()
        };
        let connection = ConnectionManager::new(&redis, &HealthConfig::default()).unwrap();
        RateLimiter::new(connection, "stratus:".to_string(), RateLimitConfig::default())
    }

    #[tokio::test]
    async fn test_zero_limit_is_a_validation_error() {
        let limiter = offline_limiter();
        let options = RateLimitOptions {
            window_size_seconds: 60,
            max_requests: 0,
            block_duration_seconds: 0,
        };
        let err = limiter
            .check_rate_limit("api", "acme", &options)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_zero_window_is_a_validation_error() {
        let limiter = offline_limiter();
        let options = RateLimitOptions {
            window_size_seconds: 0,
            max_requests: 3,
            block_duration_seconds: 0,
        };
        let err = limiter
            .check_rate_limit("api", "acme", &options)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_disconnected_store_surfaces_connection_error() {
        let limiter = offline_limiter();
        let options = RateLimitOptions {
            window_size_seconds: 60,
            max_requests: 3,
            block_duration_seconds: 0,
        };
        let err = limiter
            .check_rate_limit("api", "acme", &options)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Connection(_)));
    }
}
