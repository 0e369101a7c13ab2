//! Stable function identifiers.
//!
//! Identifiers are derived from the project-relative source path and the
//! scope path only, never from the body, so editing an annotated function
//! does not churn its id (hot reload depends on this). The bundle content
//! digest is the separate cache key that does track edits.

use sha2::{Digest, Sha256};

/// Length in hex characters of the id suffix.
const ID_DIGEST_LEN: usize = 8;

/// Compute the stable identifier for an annotated function.
///
/// The shape is `scopePath.join("$") + "_" + hex(sha256(path ++ scopePath))`
/// truncated to [`ID_DIGEST_LEN`] characters. Two functions sharing a name
/// within one scope path collapse to the same id; that is an accepted
/// limitation.
#[must_use]
pub fn fn_id(rel_path: &str, scope_path: &[String]) -> String {
    let joined = scope_path.join("$");
    let mut hasher = Sha256::new();
    hasher.update(rel_path.as_bytes());
    hasher.update(b"\0");
    hasher.update(joined.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(ID_DIGEST_LEN);
    for byte in digest.iter().take(ID_DIGEST_LEN / 2) {
        hex.push_str(&format!("{byte:02x}"));
    }
    format!("{joined}_{hex}")
}

/// Normalise a source path for id derivation: project root stripped by the
/// caller, separators forced to `/`.
#[must_use]
pub fn normalize_rel_path(path: &str) -> String {
    path.replace('\\', "/")
        .trim_start_matches("./")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_id_is_deterministic() {
        let a = fn_id("app/api/x.ts", &path(&["foo"]));
        let b = fn_id("app/api/x.ts", &path(&["foo"]));
        assert_eq!(a, b);
        assert!(a.starts_with("foo_"));
        assert_eq!(a.len(), "foo_".len() + ID_DIGEST_LEN);
    }

    #[test]
    fn test_id_varies_with_path_and_scope() {
        let base = fn_id("app/api/x.ts", &path(&["foo"]));
        assert_ne!(base, fn_id("app/api/y.ts", &path(&["foo"])));
        assert_ne!(base, fn_id("app/api/x.ts", &path(&["bar"])));
        assert_ne!(base, fn_id("app/api/x.ts", &path(&["outer", "foo"])));
    }

    #[test]
    fn test_nested_id_joins_with_dollar() {
        let id = fn_id("lib/a.ts", &path(&["outer", "inner"]));
        assert!(id.starts_with("outer$inner_"));
    }

    #[test]
    fn test_normalize_rel_path() {
        assert_eq!(normalize_rel_path("./app\\api\\x.ts"), "app/api/x.ts");
    }
}
