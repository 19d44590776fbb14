//! # Key Construction
//!
//! Pure key builders with a documented collision-avoidance contract:
//! namespace prefix first, then identifier, then optional field, joined
//! with `:`. Derived computation keys hash their parameters in stable
//! (name-sorted) order so the same logical arguments always map to the
//! same key regardless of call-site ordering.

use sha2::{Digest, Sha256};

/// Build a `{namespace}:{identifier}` key.
pub fn namespaced(namespace: &str, identifier: &str) -> String {
    format!("{namespace}:{identifier}")
}

/// Build a `{namespace}:{identifier}:{field}` key.
pub fn namespaced_field(namespace: &str, identifier: &str, field: &str) -> String {
    format!("{namespace}:{identifier}:{field}")
}

/// Rate-limit state key for an identity acting on an endpoint.
pub fn rate_key(endpoint: &str, identity: &str) -> String {
    format!("rate:{endpoint}:{identity}")
}

/// Single-flight token key guarding recomputation of `key`.
pub fn lock_key(key: &str) -> String {
    format!("lock:{key}")
}

/// Derive a cache key for a parameterized computation.
///
/// Parameters are sorted by name before hashing, so `[("a","1"),("b","2")]`
/// and `[("b","2"),("a","1")]` produce the same key. The digest keeps
/// arbitrary argument values out of the keyspace.
pub fn derived(prefix: &str, params: &[(&str, &str)]) -> String {
    let mut sorted: Vec<(&str, &str)> = params.to_vec();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    for (name, value) in &sorted {
        hasher.update(name.as_bytes());
        hasher.update([0x1f]);
        hasher.update(value.as_bytes());
        hasher.update([0x1e]);
    }
    let digest = hasher.finalize();

    let mut hex = String::with_capacity(prefix.len() + 1 + digest.len() * 2);
    hex.push_str(prefix);
    hex.push(':');
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}
