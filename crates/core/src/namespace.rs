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

//! Tenant-scoped key derivation.
//!
//! Every storage key is derived here; callers never assemble raw keys. A
//! namespaced key has the shape `tenant:{tenant}:{sanitized}` where the
//! logical part is stripped to the `[A-Za-z0-9:-]` allow-list, so no
//! caller-supplied input can escape its tenant's namespace.

use crate::types::{Result, StoreError};

/// Strip characters outside the allow-list. Colons survive so callers can
/// keep hierarchical logical keys like `profile:42`.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ':' || *c == '-')
        .collect()
}

/// Tenant ids double as namespace segments, so they must be non-empty and
/// colon-free; a colon inside a tenant id would let `("a:b", "c")` collide
/// with `("a", "b:c")`.
pub fn validate_tenant(tenant: &str) -> Result<()> {
    if tenant.trim().is_empty() {
        return Err(StoreError::Validation(
            "tenant id must be a non-empty string".to_string(),
        ));
    }
    if !tenant
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(StoreError::Validation(format!(
            "tenant id '{}' contains characters outside [A-Za-z0-9_-]",
            tenant
        )));
    }
    Ok(())
}

pub fn namespaced_key(key: &str, tenant: &str) -> Result<String> {
    validate_tenant(tenant)?;
    Ok(format!("tenant:{}:{}", tenant, sanitize_key(key)))
}

pub(crate) fn session_key(id: &str, tenant: &str) -> Result<String> {
    namespaced_key(&format!("session:{}", sanitize_key(id)), tenant)
}

pub(crate) fn tag_key(tag: &str, tenant: &str) -> Result<String> {
    namespaced_key(&format!("tag:{}", sanitize_key(tag)), tenant)
}

pub(crate) fn tag_registry_key(tenant: &str) -> Result<String> {
    namespaced_key("tags", tenant)
}

pub(crate) fn rate_limit_key(resource: &str, tenant: &str) -> Result<String> {
    namespaced_key(&format!("ratelimit:{}", sanitize_key(resource)), tenant)
}

pub(crate) fn rate_limit_block_key(resource: &str, tenant: &str) -> Result<String> {
    namespaced_key(
        &format!("ratelimit-block:{}", sanitize_key(resource)),
        tenant,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_namespaced_key_shape() {
        assert_eq!(
            namespaced_key("profile:42", "acme").unwrap(),
            "tenant:acme:profile:42"
        );
    }

    #[test]
    fn test_sanitize_strips_injection_attempts() {
        assert_eq!(sanitize_key("a b*c\n"), "abc");
        // A crafted key cannot smuggle wildcard or whitespace characters
        // into the stored key.
        assert_eq!(
            namespaced_key("profile *", "acme").unwrap(),
            "tenant:acme:profile"
        );
    }

    #[test]
    fn test_empty_tenant_rejected() {
        assert!(matches!(
            namespaced_key("k", ""),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            namespaced_key("k", "   "),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn test_tenant_with_colon_rejected() {
        // Would otherwise make ("a:b", "c") and ("a", "b:c") collide.
        assert!(namespaced_key("c", "a:b").is_err());
    }

    #[test]
    fn test_distinct_tenants_never_collide() {
        let a = namespaced_key("profile:42", "acme").unwrap();
        let b = namespaced_key("profile:42", "other-tenant").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        assert_eq!(
            namespaced_key("profile:42", "acme").unwrap(),
            namespaced_key("profile:42", "acme").unwrap()
        );
    }

    #[test]
    fn test_internal_key_shapes() {
        assert_eq!(
            session_key("sess-1", "acme").unwrap(),
            "tenant:acme:session:sess-1"
        );
        assert_eq!(tag_key("leads", "acme").unwrap(), "tenant:acme:tag:leads");
        assert_eq!(tag_registry_key("acme").unwrap(), "tenant:acme:tags");
        assert_eq!(
            rate_limit_key("api:quotes", "acme").unwrap(),
            "tenant:acme:ratelimit:api:quotes"
        );
        assert_eq!(
            rate_limit_block_key("api:quotes", "acme").unwrap(),
            "tenant:acme:ratelimit-block:api:quotes"
        );
    }

    proptest! {
        #[test]
        fn prop_tenant_isolation(
            key in "[ -~]{0,64}",
            a in "[A-Za-z0-9_-]{1,16}",
            b in "[A-Za-z0-9_-]{1,16}",
        ) {
            prop_assume!(a != b);
            let ka = namespaced_key(&key, &a).unwrap();
            let kb = namespaced_key(&key, &b).unwrap();
            prop_assert_ne!(ka, kb);
        }

        #[test]
        fn prop_sanitized_output_is_allow_listed(key in "[ -~]{0,64}") {
            let sanitized = sanitize_key(&key);
            prop_assert!(sanitized
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == ':' || c == '-'));
        }
    }
}
