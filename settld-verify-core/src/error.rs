// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed error kind shared by every subsystem (C1-C12).
//!
//! Every failure carries a stable `code` (a user-facing contract: tests and
//! downstream tooling match on it), an optional `path` pointing at the
//! offending file/field inside the bundle, a human `message`, and an
//! optional structured `detail` payload for expected/actual style context.
//! The first failure encountered along a component's documented check order
//! short-circuits and is returned as-is; callers that wrap a child
//! verification (e.g. a bundle verifier wrapping C5/C6/C9/C10, or an outer
//! bundle wrapping a recursively-verified sub-bundle) attach the child error
//! under `detail["inner"]` rather than discarding it.

use serde_json::Value;
use std::fmt;

/// A single structured failure.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyError {
    pub code: &'static str,
    pub path: Option<String>,
    pub message: String,
    pub detail: Option<Value>,
}

impl VerifyError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            path: None,
            message: message.into(),
            detail: None,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Wrap `self` as the `detail["inner"]` of a new error raised by an
    /// outer component, preserving the whole chain so nothing is lost when
    /// an inner failure is re-raised under an outer error code.
    #[must_use]
    pub fn wrap(self, code: &'static str, message: impl Into<String>) -> Self {
        let mut detail = serde_json::json!({ "inner": self.to_json() });
        if let Some(map) = detail.as_object_mut() {
            map.insert("innerCode".to_string(), Value::String(self.code.to_string()));
        }
        VerifyError {
            code,
            path: None,
            message: message.into(),
            detail: Some(detail),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "code": self.code,
            "path": self.path,
            "message": self.message,
            "detail": self.detail,
        })
    }
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(p) => write!(f, "{} ({}): {}", self.code, p, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for VerifyError {}

pub type VerifyResult<T> = Result<T, VerifyError>;

/// A non-fatal observation appended (in insertion order) to a verdict.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Warning {
    pub code: &'static str,
    pub path: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl Warning {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            path: None,
            message: message.into(),
            detail: None,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Stable error/warning code strings, grouped by the stage of verification
/// that raises them.
pub mod codes {
    // Parse/shape
    pub const SCHEMA_INVALID: &str = "SCHEMA_INVALID";
    pub const UNSUPPORTED_MANIFEST_SCHEMA_VERSION: &str = "unsupported manifest schemaVersion";
    pub const UNSUPPORTED_ARTIFACT_TYPE: &str = "unsupported artifactType";
    pub const INVALID_JSON: &str = "invalid JSON";

    // Integrity
    pub const MANIFEST_HASH_MISMATCH: &str = "manifestHash mismatch";
    pub const SHA256_MISMATCH: &str = "sha256 mismatch";
    pub const ATTESTATION_HASH_MISMATCH: &str = "attestationHash mismatch";
    pub const REPORT_HASH_MISMATCH: &str = "reportHash mismatch";
    pub const CHAIN_HASH_MISMATCH: &str = "chainHash mismatch";
    pub const PAYLOAD_HASH_MISMATCH: &str = "payloadHash mismatch";
    pub const POLICY_HASH_MISMATCH: &str = "policyHash mismatch";
    pub const ARTIFACT_HASH_MISMATCH: &str = "artifactHash mismatch";

    // Manifest specific
    pub const MANIFEST_PATH_INVALID: &str = "MANIFEST_PATH_INVALID";
    pub const MANIFEST_DUPLICATE_PATH: &str = "MANIFEST_DUPLICATE_PATH";
    pub const MANIFEST_PATH_CASE_COLLISION: &str = "MANIFEST_PATH_CASE_COLLISION";
    pub const MANIFEST_SYMLINK_FORBIDDEN: &str = "MANIFEST_SYMLINK_FORBIDDEN";
    pub const MANIFEST_MISSING_REQUIRED_FILES: &str = "manifest missing required files";

    // Authorization
    pub const ATTESTATION_SIGNER_NOT_AUTHORIZED: &str = "attestation signer not authorized";
    pub const REPORT_SIGNER_NOT_AUTHORIZED: &str = "verification report signer not authorized";
    pub const SIGNER_KEYID_NOT_ALLOWED: &str = "signer keyId not allowed by policy";
    pub const SIGNER_SCOPE_NOT_ALLOWED: &str = "signer scope not allowed by policy";
    pub const SERVER_SIGNER_KEY_NOT_GOVERNED: &str = "server signer key not governed";

    // Temporal
    pub const KEY_NOT_YET_VALID: &str = "KEY_NOT_YET_VALID";
    pub const KEY_EXPIRED: &str = "KEY_EXPIRED";
    pub const KEY_REVOKED: &str = "KEY_REVOKED";
    pub const KEY_ROTATED: &str = "KEY_ROTATED";
    pub const SIGNER_REVOKED: &str = "SIGNER_REVOKED";
    pub const SIGNER_ROTATED: &str = "SIGNER_ROTATED";
    pub const SIGNING_TIME_UNPROVABLE: &str = "SIGNING_TIME_UNPROVABLE";

    // Cross-bundle binding
    pub const JOB_PROOF_BUNDLE_HASH_MISMATCH: &str = "jobProofBundleHash mismatch";
    pub const GL_BATCH_HASH_MISMATCH: &str = "glBatchHash mismatch";
    pub const RECONCILE_MISMATCH: &str = "reconcile.json mismatch";
    pub const CLOSEPACK_EVIDENCE_INDEX_MISMATCH: &str = "closepack evidence_index mismatch";
    pub const METERING_REPORT_EMBEDDED_PATH_MISMATCH: &str =
        "meteringReport jobProof.embeddedPath mismatch";
    pub const SLA_EVALUATION_MISMATCH: &str = "sla_evaluation.json mismatch";
    pub const ACCEPTANCE_EVALUATION_MISMATCH: &str = "acceptance_evaluation.json mismatch";
    pub const INVOICE_TOTAL_MISMATCH: &str = "invoice total mismatch";
    pub const EVIDENCE_REF_MISMATCH: &str = "evidence ref mismatch";
    pub const PROVENANCE_REF_MISMATCH: &str = "provenance ref mismatch";
    pub const FACTS_HASH_STALE: &str = "facts hash stale";
    pub const JOURNAL_CSV_SHA_MISMATCH: &str = "journalCsv.csvSha256 mismatch";
    pub const GOVERNANCE_SCOPE_VIOLATION: &str = "governance scope violation";
    pub const BUNDLE_TYPE_MISMATCH: &str = "bundle type mismatch";
    pub const HEADS_MISMATCH: &str = "heads mismatch";

    // Zip
    pub const ZIP_MULTI_DISK: &str = "ZIP_MULTI_DISK_UNSUPPORTED";
    pub const ZIP_ZIP64_UNSUPPORTED: &str = "ZIP_ZIP64_UNSUPPORTED";
    pub const ZIP_ENCRYPTED: &str = "ZIP_ENCRYPTED_UNSUPPORTED";
    pub const ZIP_COMPRESSION_METHOD: &str = "ZIP_COMPRESSION_METHOD_UNSUPPORTED";
    pub const ZIP_SYMLINK_FORBIDDEN: &str = "ZIP_SYMLINK_FORBIDDEN";
    pub const ZIP_NAME_INVALID: &str = "ZIP_NAME_INVALID";
    pub const ZIP_NAME_TOO_LONG: &str = "ZIP_NAME_TOO_LONG";
    pub const ZIP_TOO_MANY_ENTRIES: &str = "ZIP_TOO_MANY_ENTRIES";
    pub const ZIP_TOTAL_SIZE_EXCEEDED: &str = "ZIP_TOTAL_SIZE_EXCEEDED";
    pub const ZIP_FILE_TOO_LARGE: &str = "ZIP_FILE_TOO_LARGE";
    pub const ZIP_COMPRESSION_RATIO_EXCEEDED: &str = "ZIP_COMPRESSION_RATIO_EXCEEDED";
    pub const ZIP_LOCAL_HEADER_MISMATCH: &str = "ZIP_LOCAL_HEADER_NAME_MISMATCH";
    pub const ZIP_DUPLICATE_ENTRY: &str = "ZIP_DUPLICATE_ENTRY";
    pub const ZIP_MALFORMED: &str = "ZIP_MALFORMED";
    pub const ABORTED: &str = "ABORTED";

    // Release
    pub const RELEASE_TRUST_INVALID: &str = "RELEASE_TRUST_INVALID";
    pub const RELEASE_SIGNER_UNAUTHORIZED: &str = "RELEASE_SIGNER_UNAUTHORIZED";
    pub const RELEASE_SIGNER_REVOKED: &str = "RELEASE_SIGNER_REVOKED";
    pub const RELEASE_SIGNATURE_UNSUPPORTED_ALGORITHM: &str =
        "RELEASE_SIGNATURE_UNSUPPORTED_ALGORITHM";
    pub const RELEASE_SIGNATURE_INVALID: &str = "RELEASE_SIGNATURE_INVALID";
    pub const RELEASE_SIGNATURE_QUORUM_NOT_SATISFIED: &str =
        "RELEASE_SIGNATURE_QUORUM_NOT_SATISFIED";
    pub const RELEASE_ASSET_MISSING: &str = "RELEASE_ASSET_MISSING";
    pub const RELEASE_ASSET_SIZE_MISMATCH: &str = "RELEASE_ASSET_SIZE_MISMATCH";
    pub const RELEASE_ASSET_HASH_MISMATCH: &str = "RELEASE_ASSET_HASH_MISMATCH";
    pub const RELEASE_ASSET_DUPLICATE_PATH: &str = "RELEASE_ASSET_DUPLICATE_PATH";
    pub const RELEASE_TOOLCHAIN_EPOCH_MISSING: &str = "RELEASE_TOOLCHAIN_EPOCH_MISSING";

    // Pricing
    pub const PRICING_MATRIX_SIGNATURE_MISSING: &str = "PRICING_MATRIX_SIGNATURE_MISSING";
    pub const PRICING_MATRIX_SIGNATURE_INVALID: &str = "PRICING_MATRIX_SIGNATURE_INVALID";
    pub const PRICING_MATRIX_SIGNATURE_PAYLOAD_MISMATCH: &str =
        "PRICING_MATRIX_SIGNATURE_PAYLOAD_MISMATCH";
    pub const PRICING_MATRIX_SIGNATURE_V1_BYTES_LEGACY_STRICT_REJECTED: &str =
        "PRICING_MATRIX_SIGNATURE_V1_BYTES_LEGACY_STRICT_REJECTED";

    // Governance/policy
    pub const GOVERNANCE_POLICY_V1_UNDER_STRICT: &str = "strict requires GovernancePolicy.v2";
    pub const GOVERNANCE_POLICY_SIGNATURE_INVALID: &str = "governance policy signature invalid";
    pub const REVOCATION_LIST_HASH_MISMATCH: &str = "revocation list hash mismatch";
    pub const TRUST_ANCHOR_MISSING: &str = "trust anchor missing";

    // Timestamp proof
    pub const TIMESTAMP_PROOF_INVALID: &str = "timestamp proof invalid";
    pub const TIMESTAMP_PROOF_HASH_MISMATCH: &str = "timestamp proof messageHash mismatch";

    // CLI-layer synthetic
    pub const FAIL_ON_WARNINGS: &str = "FAIL_ON_WARNINGS";

    // Warnings (closed enum, non-fatal)
    pub const VERIFICATION_REPORT_MISSING_LENIENT: &str = "VERIFICATION_REPORT_MISSING_LENIENT";
    pub const GOVERNANCE_POLICY_V1_ACCEPTED_LENIENT: &str = "GOVERNANCE_POLICY_V1_ACCEPTED_LENIENT";
    pub const MANIFEST_REQUIRED_FILES_MISSING_LENIENT: &str =
        "MANIFEST_REQUIRED_FILES_MISSING_LENIENT";
    pub const PRICING_MATRIX_SIGNATURES_MISSING_LENIENT: &str =
        "PRICING_MATRIX_SIGNATURES_MISSING_LENIENT";
    pub const PRICING_MATRIX_SIGNATURE_V1_BYTES_LEGACY_LENIENT: &str =
        "PRICING_MATRIX_SIGNATURE_V1_BYTES_LEGACY_LENIENT";
    pub const BUNDLE_HEAD_ATTESTATION_MISSING_LENIENT: &str =
        "BUNDLE_HEAD_ATTESTATION_MISSING_LENIENT";
    pub const GOVERNANCE_DIRECTORY_ABSENT_LENIENT: &str = "GOVERNANCE_DIRECTORY_ABSENT_LENIENT";
}
