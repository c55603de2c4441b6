// SPDX-License-Identifier: MIT OR Apache-2.0
//! Manifest-relative path validation and safe joining (C4).

use crate::error::{codes, VerifyError, VerifyResult};
use std::path::{Path, PathBuf};

/// Validate a manifest-relative `name` against the required path grammar:
/// non-empty, no leading `/`, no `\`/NUL/`:`, no trailing `/`, and no
/// segment that is empty, `.`, or `..`.
pub fn validate_relative_name(name: &str) -> VerifyResult<()> {
    let err = |msg: &str| {
        Err(VerifyError::new(codes::MANIFEST_PATH_INVALID, msg.to_string()).with_path(name.to_string()))
    };
    if name.is_empty() {
        return err("path must not be empty");
    }
    if name.starts_with('/') {
        return err("path must not have a leading slash");
    }
    if name.ends_with('/') {
        return err("path must not have a trailing slash");
    }
    if name.contains('\\') || name.contains('\0') || name.contains(':') {
        return err("path must not contain backslash, NUL, or colon");
    }
    for segment in name.split('/') {
        if segment.is_empty() {
            return err("path must not contain an empty segment");
        }
        if segment == "." || segment == ".." {
            return err("path must not contain '.' or '..' segments");
        }
    }
    Ok(())
}

/// Join `name` onto `base` and require the result to stay within `base`.
/// `name` must already have passed [`validate_relative_name`]; this function
/// re-derives safety from the resulting path components rather than trusting
/// the caller: safe iff `resolve(base, name)` equals `base` or starts with
/// `base` plus a path separator.
pub fn resolve_bundle_path(base: &Path, name: &str) -> VerifyResult<PathBuf> {
    validate_relative_name(name)?;
    let joined = base.join(name);
    let base_components: Vec<_> = base.components().collect();
    let joined_components: Vec<_> = joined.components().collect();
    if joined_components.len() < base_components.len()
        || joined_components[..base_components.len()] != base_components[..]
    {
        return Err(
            VerifyError::new(codes::MANIFEST_PATH_INVALID, "path escapes bundle root")
                .with_path(name.to_string()),
        );
    }
    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_relative_paths() {
        assert!(validate_relative_name("a/b/c.json").is_ok());
    }

    #[test]
    fn rejects_leading_slash() {
        assert!(validate_relative_name("/etc/passwd").is_err());
    }

    #[test]
    fn rejects_parent_segment() {
        assert!(validate_relative_name("a/../b").is_err());
        assert!(validate_relative_name("..").is_err());
    }

    #[test]
    fn rejects_empty_segment() {
        assert!(validate_relative_name("a//b").is_err());
    }

    #[test]
    fn rejects_backslash_colon_nul() {
        assert!(validate_relative_name("a\\b").is_err());
        assert!(validate_relative_name("a:b").is_err());
        assert!(validate_relative_name("a\0b").is_err());
    }

    #[test]
    fn resolve_stays_within_base() {
        let base = Path::new("/bundle/root");
        let resolved = resolve_bundle_path(base, "events/events.jsonl").unwrap();
        assert_eq!(resolved, Path::new("/bundle/root/events/events.jsonl"));
    }

    #[test]
    fn resolve_rejects_traversal_even_if_grammar_checked_upstream() {
        let base = Path::new("/bundle/root");
        assert!(resolve_bundle_path(base, "../escape").is_err());
    }
}
