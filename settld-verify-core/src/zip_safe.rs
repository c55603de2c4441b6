// SPDX-License-Identifier: MIT OR Apache-2.0
//! Safe unzip (C3): unpack a local zip file into a freshly created temp
//! directory under strict budgets, rejecting anything that could turn a
//! bundle into a decompression bomb or a path-traversal vector.

use crate::error::{codes, VerifyError, VerifyResult};
use crate::path_safe::validate_relative_name;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Resource budgets enforced while unpacking.
#[derive(Debug, Clone, Copy)]
pub struct UnzipBudgets {
    pub max_entries: usize,
    pub max_path_bytes: usize,
    pub max_file_bytes: u64,
    pub max_total_bytes: u64,
    pub max_compression_ratio: u64,
}

impl Default for UnzipBudgets {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_path_bytes: 512,
            max_file_bytes: 50 * 1024 * 1024,
            max_total_bytes: 200 * 1024 * 1024,
            max_compression_ratio: 200,
        }
    }
}

/// Cooperative cancellation: workers check this between entries and chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> VerifyResult<()> {
        if self.is_cancelled() {
            Err(VerifyError::new(codes::ABORTED, "verification cancelled"))
        } else {
            Ok(())
        }
    }
}

const STREAM_CHUNK: usize = 64 * 1024;

/// Unpack `zip_path` into a freshly created temp directory and return its
/// path. If the archive's single top-level directory entry is a wrapper
/// (its subtree contains `manifest.json`), that wrapper directory is
/// stripped so the returned directory is the bundle root.
pub fn safe_unzip(
    zip_path: &Path,
    budgets: &UnzipBudgets,
    cancel: Option<&CancelToken>,
) -> VerifyResult<PathBuf> {
    let file = File::open(zip_path)
        .map_err(|e| VerifyError::new(codes::ZIP_MALFORMED, format!("cannot open zip: {e}")))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| VerifyError::new(codes::ZIP_MALFORMED, format!("invalid zip archive: {e}")))?;

    if archive.len() > budgets.max_entries {
        return Err(VerifyError::new(
            codes::ZIP_TOO_MANY_ENTRIES,
            format!("archive has {} entries, budget is {}", archive.len(), budgets.max_entries),
        ));
    }

    let dest = tempfile::Builder::new()
        .prefix("settld-verify-bundle-")
        .tempdir()
        .map_err(|e| VerifyError::new(codes::ZIP_MALFORMED, format!("cannot create temp dir: {e}")))?
        .into_path();

    let mut seen_names = std::collections::HashSet::new();
    let mut total_written: u64 = 0;

    for i in 0..archive.len() {
        if let Some(c) = cancel {
            c.check()?;
        }
        let mut entry = archive
            .by_index(i)
            .map_err(|e| VerifyError::new(codes::ZIP_MALFORMED, format!("cannot read entry {i}: {e}")))?;

        let name = entry.name().to_string();
        if name.ends_with('/') {
            // Directory entry: validate the stem but don't extract content.
            let stem = name.trim_end_matches('/');
            if !stem.is_empty() {
                validate_relative_name(stem)?;
            }
            continue;
        }

        if entry.encrypted() {
            return Err(
                VerifyError::new(codes::ZIP_ENCRYPTED, "encrypted zip entries are forbidden")
                    .with_path(name),
            );
        }
        match entry.compression() {
            zip::CompressionMethod::Stored | zip::CompressionMethod::Deflated => {}
            other => {
                return Err(VerifyError::new(
                    codes::ZIP_COMPRESSION_METHOD,
                    format!("unsupported compression method: {other:?}"),
                )
                .with_path(name));
            }
        }
        if is_zip64_entry(&entry) {
            return Err(VerifyError::new(codes::ZIP_ZIP64_UNSUPPORTED, "ZIP64 entries are forbidden")
                .with_path(name));
        }
        if let Some(mode) = entry.unix_mode() {
            const S_IFLNK: u32 = 0o120000;
            if mode & 0o170000 == S_IFLNK {
                return Err(
                    VerifyError::new(codes::ZIP_SYMLINK_FORBIDDEN, "symlink entries are forbidden")
                        .with_path(name),
                );
            }
        }
        if name.len() > budgets.max_path_bytes {
            return Err(VerifyError::new(
                codes::ZIP_NAME_TOO_LONG,
                format!("entry name exceeds {} bytes", budgets.max_path_bytes),
            )
            .with_path(name));
        }
        validate_relative_name(&name).map_err(|e| {
            VerifyError::new(codes::ZIP_NAME_INVALID, e.message.clone()).with_path(name.clone())
        })?;
        let case_fold = name.to_lowercase();
        if !seen_names.insert(case_fold) {
            return Err(VerifyError::new(codes::ZIP_DUPLICATE_ENTRY, "duplicate entry name")
                .with_path(name));
        }

        let declared_uncompressed = entry.size();
        let declared_compressed = entry.compressed_size().max(1);
        if declared_compressed > 0 {
            let ratio = declared_uncompressed / declared_compressed;
            if ratio > budgets.max_compression_ratio {
                return Err(VerifyError::new(
                    codes::ZIP_COMPRESSION_RATIO_EXCEEDED,
                    format!("entry compression ratio {ratio} exceeds budget {}", budgets.max_compression_ratio),
                )
                .with_path(name));
            }
        }
        if declared_uncompressed > budgets.max_file_bytes {
            return Err(VerifyError::new(
                codes::ZIP_FILE_TOO_LARGE,
                format!("entry size {declared_uncompressed} exceeds budget {}", budgets.max_file_bytes),
            )
            .with_path(name));
        }

        let out_path = dest.join(&name);
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                VerifyError::new(codes::ZIP_MALFORMED, format!("cannot create directory: {e}"))
                    .with_path(name.clone())
            })?;
        }

        let written = stream_extract(
            &mut entry,
            &out_path,
            budgets,
            &mut total_written,
            cancel,
            &name,
        );
        match written {
            Ok(n) => {
                if n > budgets.max_file_bytes {
                    let _ = std::fs::remove_file(&out_path);
                    return Err(VerifyError::new(
                        codes::ZIP_FILE_TOO_LARGE,
                        format!("streamed entry exceeded budget {}", budgets.max_file_bytes),
                    )
                    .with_path(name));
                }
            }
            Err(e) => {
                let _ = std::fs::remove_file(&out_path);
                return Err(e);
            }
        }
    }

    strip_wrapper_directory(&dest)
}

fn is_zip64_entry(entry: &zip::read::ZipFile) -> bool {
    const ZIP64_EXTRA_FIELD_HEADER_ID: [u8; 2] = [0x01, 0x00];
    let sentinel = u32::MAX;
    if entry.size() >= sentinel as u64 || entry.compressed_size() >= sentinel as u64 {
        return true;
    }
    let extra = entry.extra_data();
    extra
        .windows(2)
        .any(|w| w == ZIP64_EXTRA_FIELD_HEADER_ID)
}

fn stream_extract(
    entry: &mut zip::read::ZipFile,
    out_path: &Path,
    budgets: &UnzipBudgets,
    total_written: &mut u64,
    cancel: Option<&CancelToken>,
    name: &str,
) -> VerifyResult<u64> {
    let mut out = File::create(out_path)
        .map_err(|e| VerifyError::new(codes::ZIP_MALFORMED, format!("cannot create {name}: {e}")))?;
    let mut buf = [0u8; STREAM_CHUNK];
    let mut entry_written: u64 = 0;
    loop {
        if let Some(c) = cancel {
            c.check()?;
        }
        let n = entry
            .read(&mut buf)
            .map_err(|e| VerifyError::new(codes::ZIP_MALFORMED, format!("read error in {name}: {e}")))?;
        if n == 0 {
            break;
        }
        entry_written += n as u64;
        *total_written += n as u64;
        if entry_written > budgets.max_file_bytes {
            return Err(VerifyError::new(
                codes::ZIP_FILE_TOO_LARGE,
                format!("entry exceeds per-file budget {}", budgets.max_file_bytes),
            )
            .with_path(name.to_string()));
        }
        if *total_written > budgets.max_total_bytes {
            return Err(VerifyError::new(
                codes::ZIP_TOTAL_SIZE_EXCEEDED,
                format!("archive exceeds total budget {}", budgets.max_total_bytes),
            )
            .with_path(name.to_string()));
        }
        out.write_all(&buf[..n])
            .map_err(|e| VerifyError::new(codes::ZIP_MALFORMED, format!("write error for {name}: {e}")))?;
    }
    Ok(entry_written)
}

/// If the extracted tree has exactly one top-level entry and that entry is
/// a directory whose subtree contains `manifest.json`, return the inner
/// directory instead, transparently stripping the wrapper.
fn strip_wrapper_directory(dest: &Path) -> VerifyResult<PathBuf> {
    let entries: Vec<_> = std::fs::read_dir(dest)
        .map_err(|e| VerifyError::new(codes::ZIP_MALFORMED, format!("cannot read temp dir: {e}")))?
        .filter_map(|e| e.ok())
        .collect();
    if entries.len() == 1 {
        let only = &entries[0];
        let path = only.path();
        if path.is_dir() && path.join("manifest.json").exists() {
            return Ok(path);
        }
    }
    Ok(dest.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_zip(entries: &[(&str, &[u8])]) -> PathBuf {
        let file = tempfile::Builder::new().suffix(".zip").tempfile().unwrap();
        let path = file.path().to_path_buf();
        let mut writer = zip::ZipWriter::new(file.reopen().unwrap());
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
        // keep the NamedTempFile alive until the path is reopened by safe_unzip
        std::mem::forget(file);
        path
    }

    #[test]
    fn extracts_a_simple_bundle() {
        let path = write_zip(&[
            ("manifest.json", b"{}"),
            ("events/events.jsonl", b"{}\n"),
        ]);
        let budgets = UnzipBudgets::default();
        let dest = safe_unzip(&path, &budgets, None).unwrap();
        assert!(dest.join("manifest.json").exists());
        assert!(dest.join("events/events.jsonl").exists());
    }

    #[test]
    fn strips_single_wrapper_directory() {
        let path = write_zip(&[
            ("bundle-v1/manifest.json", b"{}"),
            ("bundle-v1/events/events.jsonl", b"{}\n"),
        ]);
        let budgets = UnzipBudgets::default();
        let dest = safe_unzip(&path, &budgets, None).unwrap();
        assert!(dest.join("manifest.json").exists());
    }

    #[test]
    fn rejects_path_traversal_entry() {
        let path = write_zip(&[("../../etc/passwd", b"pwned")]);
        let budgets = UnzipBudgets::default();
        let err = safe_unzip(&path, &budgets, None).unwrap_err();
        assert_eq!(err.code, codes::ZIP_NAME_INVALID);
    }

    #[test]
    fn rejects_entry_over_file_budget() {
        let path = write_zip(&[("manifest.json", &[0u8; 16])]);
        let budgets = UnzipBudgets {
            max_file_bytes: 8,
            ..UnzipBudgets::default()
        };
        let err = safe_unzip(&path, &budgets, None).unwrap_err();
        assert_eq!(err.code, codes::ZIP_FILE_TOO_LARGE);
    }

    #[test]
    fn rejects_too_many_entries() {
        let entries: Vec<(String, Vec<u8>)> =
            (0..5).map(|i| (format!("f{i}.json"), b"{}".to_vec())).collect();
        let refs: Vec<(&str, &[u8])> = entries.iter().map(|(n, c)| (n.as_str(), c.as_slice())).collect();
        let path = write_zip(&refs);
        let budgets = UnzipBudgets {
            max_entries: 2,
            ..UnzipBudgets::default()
        };
        let err = safe_unzip(&path, &budgets, None).unwrap_err();
        assert_eq!(err.code, codes::ZIP_TOO_MANY_ENTRIES);
    }

    #[test]
    fn cancellation_aborts_extraction() {
        let path = write_zip(&[("manifest.json", b"{}"), ("a.json", b"{}")]);
        let budgets = UnzipBudgets::default();
        let token = CancelToken::new();
        token.cancel();
        let err = safe_unzip(&path, &budgets, Some(&token)).unwrap_err();
        assert_eq!(err.code, codes::ABORTED);
    }
}
