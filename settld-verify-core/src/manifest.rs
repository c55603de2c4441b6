// SPDX-License-Identifier: MIT OR Apache-2.0
//! Manifest verifier (C5): parse `manifest.json`, recompute `manifestHash`,
//! verify every listed file's SHA-256, and enforce the required-file set for
//! the bundle kind.

use crate::canonical::canonical_without_fields;
use crate::crypto::sha256_hex;
use crate::error::{codes, VerifyError, VerifyResult, Warning};
use crate::kinds::BundleKind;
use crate::path_safe::{resolve_bundle_path, validate_relative_name};
use rayon::ThreadPoolBuilder;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestFileEntry {
    pub name: String,
    pub sha256: String,
    #[serde(rename = "sizeBytes")]
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestDoc {
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
    pub kind: String,
    #[serde(rename = "tenantId")]
    pub tenant_id: Option<String>,
    pub scope: Option<String>,
    pub files: Vec<ManifestFileEntry>,
    #[serde(rename = "manifestHash")]
    pub manifest_hash: String,
}

#[derive(Debug, Clone)]
pub struct ManifestOutcome {
    pub doc: ManifestDoc,
    pub raw: Value,
    pub warnings: Vec<Warning>,
}

/// Verify `manifest.json` at `bundle_root` for `kind`. `hash_concurrency`
/// bounds the worker pool used to hash the listed files (default 16,
/// strictly positive).
pub fn verify_manifest(
    bundle_root: &Path,
    kind: BundleKind,
    strict: bool,
    hash_concurrency: usize,
) -> VerifyResult<ManifestOutcome> {
    let manifest_path = bundle_root.join("manifest.json");
    let bytes = fs::read(&manifest_path).map_err(|e| {
        VerifyError::new(codes::SCHEMA_INVALID, format!("cannot read manifest.json: {e}"))
            .with_path("manifest.json")
    })?;
    let raw: Value = serde_json::from_slice(&bytes).map_err(|e| {
        VerifyError::new(codes::INVALID_JSON, format!("manifest.json is not valid JSON: {e}"))
            .with_path("manifest.json")
    })?;
    let doc: ManifestDoc = serde_json::from_value(raw.clone()).map_err(|e| {
        VerifyError::new(codes::SCHEMA_INVALID, format!("manifest.json does not match schema: {e}"))
            .with_path("manifest.json")
    })?;

    // 1. schemaVersion must match the kind's required manifest schema.
    if doc.schema_version != kind.schema_tag() || doc.kind != kind.schema_tag() {
        return Err(VerifyError::new(
            codes::UNSUPPORTED_MANIFEST_SCHEMA_VERSION,
            format!(
                "expected schemaVersion/kind {:?}, found schemaVersion={:?} kind={:?}",
                kind.schema_tag(),
                doc.schema_version,
                doc.kind
            ),
        )
        .with_path("manifest.json"));
    }

    // 2. Pre-validate every files[].name; reject duplicates/case collisions.
    let mut seen_exact = HashSet::new();
    let mut seen_fold = HashSet::new();
    for entry in &doc.files {
        validate_relative_name(&entry.name).map_err(|e| e.with_path(format!("manifest.json#{}", entry.name)))?;
        if !seen_exact.insert(entry.name.clone()) {
            return Err(VerifyError::new(
                codes::MANIFEST_DUPLICATE_PATH,
                format!("duplicate manifest entry: {}", entry.name),
            )
            .with_path("manifest.json"));
        }
        let folded = entry.name.to_lowercase();
        if !seen_fold.insert(folded) {
            return Err(VerifyError::new(
                codes::MANIFEST_PATH_CASE_COLLISION,
                format!("case-folded collision at: {}", entry.name),
            )
            .with_path("manifest.json"));
        }
    }

    // 3. Recompute manifestHash and compare.
    let canonical_bytes = canonical_without_fields(&raw, &["manifestHash"])?;
    let recomputed = sha256_hex(&canonical_bytes);
    if recomputed != doc.manifest_hash {
        return Err(VerifyError::new(
            codes::MANIFEST_HASH_MISMATCH,
            format!("expected {}, computed {}", doc.manifest_hash, recomputed),
        )
        .with_path("manifest.json")
        .with_detail(serde_json::json!({"expected": doc.manifest_hash, "actual": recomputed})));
    }

    // 4. Hash every listed file (bounded worker pool), reject symlinks.
    let concurrency = hash_concurrency.max(1);
    let pool = ThreadPoolBuilder::new()
        .num_threads(concurrency)
        .build()
        .map_err(|e| VerifyError::new(codes::SCHEMA_INVALID, format!("cannot build hash pool: {e}")))?;
    let results: Vec<VerifyResult<()>> = pool.install(|| {
        use rayon::prelude::*;
        doc.files
            .par_iter()
            .map(|entry| hash_and_check_one(bundle_root, entry))
            .collect()
    });
    for r in results {
        r?;
    }

    let mut warnings = Vec::new();

    // 5. Required-file set for strict mode.
    let present: HashSet<&str> = doc.files.iter().map(|f| f.name.as_str()).collect();
    let missing: Vec<&str> = kind
        .required_files()
        .iter()
        .copied()
        .filter(|f| !present.contains(f))
        .collect();
    if !missing.is_empty() {
        if strict {
            return Err(VerifyError::new(
                codes::MANIFEST_MISSING_REQUIRED_FILES,
                format!("missing required files: {}", missing.join(", ")),
            )
            .with_path("manifest.json")
            .with_detail(serde_json::json!({"missing": missing})));
        }
        warnings.push(
            Warning::new(
                codes::MANIFEST_REQUIRED_FILES_MISSING_LENIENT,
                format!("missing required files (lenient): {}", missing.join(", ")),
            )
            .with_path("manifest.json"),
        );
    }

    Ok(ManifestOutcome { doc, raw, warnings })
}

fn hash_and_check_one(bundle_root: &Path, entry: &ManifestFileEntry) -> VerifyResult<()> {
    let path = resolve_bundle_path(bundle_root, &entry.name)?;
    let meta = fs::symlink_metadata(&path).map_err(|e| {
        VerifyError::new(codes::SHA256_MISMATCH, format!("cannot stat {}: {e}", entry.name))
            .with_path(entry.name.clone())
    })?;
    if meta.file_type().is_symlink() {
        return Err(
            VerifyError::new(codes::MANIFEST_SYMLINK_FORBIDDEN, "symlinked manifest entries are forbidden")
                .with_path(entry.name.clone()),
        );
    }
    let bytes = fs::read(&path).map_err(|e| {
        VerifyError::new(codes::SHA256_MISMATCH, format!("cannot read {}: {e}", entry.name))
            .with_path(entry.name.clone())
    })?;
    if let Some(declared_size) = entry.size_bytes {
        if declared_size != bytes.len() as u64 {
            return Err(VerifyError::new(
                codes::SHA256_MISMATCH,
                format!("declared sizeBytes {} does not match actual {}", declared_size, bytes.len()),
            )
            .with_path(entry.name.clone()));
        }
    }
    let actual = sha256_hex(&bytes);
    if actual != entry.sha256 {
        return Err(VerifyError::new(
            codes::SHA256_MISMATCH,
            format!("expected {}, computed {}", entry.sha256, actual),
        )
        .with_path(entry.name.clone())
        .with_detail(serde_json::json!({"expected": entry.sha256, "actual": actual})));
    }
    Ok(())
}
