// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire-stable verdict shapes (§6) plus exit code mapping.

use serde::Serialize;
use serde_json::Value;
use settld_verify_core::{VerifyError, Warning};

#[derive(Debug, Serialize)]
pub struct ErrorEntry {
    pub code: String,
    pub path: Option<String>,
    pub message: String,
    pub detail: Option<Value>,
}

impl From<&VerifyError> for ErrorEntry {
    fn from(e: &VerifyError) -> Self {
        ErrorEntry { code: e.code.to_string(), path: e.path.clone(), message: e.message.clone(), detail: e.detail.clone() }
    }
}

#[derive(Debug, Serialize)]
pub struct WarningEntry {
    pub code: String,
    pub path: Option<String>,
    pub message: String,
    pub detail: Option<Value>,
}

impl From<&Warning> for WarningEntry {
    fn from(w: &Warning) -> Self {
        WarningEntry { code: w.code.to_string(), path: w.path.clone(), message: w.message.clone(), detail: w.detail.clone() }
    }
}

fn entry_sort_key(path: &Option<String>, code: &str) -> (String, String) {
    (path.clone().unwrap_or_default(), code.to_string())
}

pub fn sort_errors(errors: &mut [ErrorEntry]) {
    errors.sort_by(|a, b| entry_sort_key(&a.path, &a.code).cmp(&entry_sort_key(&b.path, &b.code)));
}

pub fn sort_warnings(warnings: &mut [WarningEntry]) {
    warnings.sort_by(|a, b| entry_sort_key(&a.path, &a.code).cmp(&entry_sort_key(&b.path, &b.code)));
}

#[derive(Debug, Serialize)]
pub struct Tool {
    pub name: &'static str,
    pub version: &'static str,
    pub commit: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Mode {
    pub strict: bool,
    #[serde(rename = "failOnWarnings")]
    pub fail_on_warnings: bool,
}

#[derive(Debug, Serialize)]
pub struct Target {
    pub kind: &'static str,
    pub input: String,
    pub resolved: String,
    pub dir: String,
}

#[derive(Debug, Serialize, Default)]
pub struct Summary {
    #[serde(rename = "tenantId", skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub bundle_type: Option<String>,
    #[serde(rename = "manifestHash", skip_serializing_if = "Option::is_none")]
    pub manifest_hash: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyCliOutput {
    #[serde(rename = "schemaVersion")]
    pub schema_version: &'static str,
    pub tool: Tool,
    pub mode: Mode,
    pub target: Target,
    pub ok: bool,
    #[serde(rename = "verificationOk")]
    pub verification_ok: bool,
    pub errors: Vec<ErrorEntry>,
    pub warnings: Vec<WarningEntry>,
    pub summary: Summary,
}

/// `verify` subcommand exit codes. Only `verify-release` has externally
/// pinned codes; `verify` follows the conventional CLI ladder instead:
/// 0 ok, 1 verification failed, 2 usage.
pub const EXIT_OK: u8 = 0;
pub const EXIT_VERIFY_FAILED: u8 = 1;
pub const EXIT_USAGE: u8 = 2;

#[derive(Debug, Serialize)]
pub struct ReleaseIdentity {
    pub tag: Option<String>,
    pub version: Option<String>,
    pub commit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyReleaseOutput {
    #[serde(rename = "schemaVersion")]
    pub schema_version: &'static str,
    pub ok: bool,
    pub release: ReleaseIdentity,
    #[serde(rename = "signatureOk")]
    pub signature_ok: bool,
    #[serde(rename = "artifactsOk")]
    pub artifacts_ok: bool,
    pub errors: Vec<ErrorEntry>,
    pub warnings: Vec<WarningEntry>,
}

pub const EXIT_RELEASE_OK: u8 = 0;
pub const EXIT_RELEASE_TRUST_INVALID: u8 = 3;
pub const EXIT_RELEASE_SIGNATURE_ISSUES: u8 = 4;
pub const EXIT_RELEASE_ASSET_ISSUES: u8 = 5;
#[allow(dead_code)]
pub const EXIT_RELEASE_TOOLCHAIN_MISMATCH: u8 = 6;
pub const EXIT_RELEASE_OTHER: u8 = 1;
#[allow(dead_code)]
pub const EXIT_RELEASE_USAGE: u8 = 2;

/// Map a release-verification error code to its documented exit code.
pub fn release_exit_code_for(code: &str) -> u8 {
    match code {
        "RELEASE_TRUST_INVALID" | "RELEASE_TOOLCHAIN_EPOCH_MISSING" => EXIT_RELEASE_TRUST_INVALID,
        "RELEASE_SIGNER_UNAUTHORIZED"
        | "RELEASE_SIGNER_REVOKED"
        | "RELEASE_SIGNATURE_UNSUPPORTED_ALGORITHM"
        | "RELEASE_SIGNATURE_INVALID"
        | "RELEASE_SIGNATURE_QUORUM_NOT_SATISFIED" => EXIT_RELEASE_SIGNATURE_ISSUES,
        "RELEASE_ASSET_MISSING" | "RELEASE_ASSET_SIZE_MISMATCH" | "RELEASE_ASSET_HASH_MISMATCH"
        | "RELEASE_ASSET_DUPLICATE_PATH" => EXIT_RELEASE_ASSET_ISSUES,
        _ => EXIT_RELEASE_OTHER,
    }
}
