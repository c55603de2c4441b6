// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bundle kind: a closed, tagged variant (per the "lazy dispatch to
//! variants" design note) instead of open polymorphism. Each variant knows
//! its manifest schema tag and its strict-mode required file set.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BundleKind {
    JobProof,
    MonthProof,
    Invoice,
    FinancePack,
    ClosePack,
}

impl BundleKind {
    /// The value both `manifest.json`'s `schemaVersion` and `kind` fields
    /// must carry for this variant.
    pub fn schema_tag(self) -> &'static str {
        match self {
            BundleKind::JobProof => "JobProofBundle.v1",
            BundleKind::MonthProof => "MonthProofBundle.v1",
            BundleKind::Invoice => "InvoiceBundle.v1",
            BundleKind::FinancePack => "FinancePackBundle.v1",
            BundleKind::ClosePack => "ClosePack.v1",
        }
    }

    pub fn from_schema_tag(tag: &str) -> Option<Self> {
        match tag {
            "JobProofBundle.v1" => Some(BundleKind::JobProof),
            "MonthProofBundle.v1" => Some(BundleKind::MonthProof),
            "InvoiceBundle.v1" => Some(BundleKind::Invoice),
            "FinancePackBundle.v1" => Some(BundleKind::FinancePack),
            "ClosePack.v1" => Some(BundleKind::ClosePack),
            _ => None,
        }
    }

    /// The type-asserting header file this kind expects at its root, if any
    /// (`nooterra.json` / `settld.json` per §4.11 step 1), and the `type`
    /// value it must carry.
    pub fn header_file(self) -> Option<(&'static str, &'static str)> {
        match self {
            BundleKind::JobProof | BundleKind::MonthProof => None,
            BundleKind::Invoice => Some(("nooterra.json", "InvoiceBundle")),
            BundleKind::FinancePack => Some(("settld.json", "FinancePackBundle")),
            BundleKind::ClosePack => Some(("settld.json", "ClosePack")),
        }
    }

    /// Files that must be present among `manifest.json`'s `files[]` entries
    /// in strict mode (§6). Paths of embedded sub-bundles are checked by
    /// recursing into the sub-bundle verifier, not listed flatly here.
    pub fn required_files(self) -> &'static [&'static str] {
        match self {
            BundleKind::JobProof => &[
                "events/events.jsonl",
                "events/payload_material.jsonl",
                "job/snapshot.json",
                "keys/public_keys.json",
                "governance/global/events/events.jsonl",
                "governance/global/events/payload_material.jsonl",
                "governance/global/snapshot.json",
                "governance/tenant/events/events.jsonl",
                "governance/tenant/events/payload_material.jsonl",
                "governance/tenant/snapshot.json",
                "attestation/bundle_head_attestation.json",
                "verify/verification_report.json",
            ],
            BundleKind::MonthProof => &[
                "events/events.jsonl",
                "events/payload_material.jsonl",
                "keys/public_keys.json",
                "governance/global/events/events.jsonl",
                "governance/global/events/payload_material.jsonl",
                "governance/global/snapshot.json",
                "governance/tenant/events/events.jsonl",
                "governance/tenant/events/payload_material.jsonl",
                "governance/tenant/snapshot.json",
                "attestation/bundle_head_attestation.json",
                "verify/verification_report.json",
            ],
            BundleKind::Invoice => &[
                "governance/global/snapshot.json",
                "governance/tenant/snapshot.json",
                "pricing/pricing_matrix.json",
                "metering/metering_report.json",
                "invoice/invoice_claim.json",
            ],
            BundleKind::FinancePack => &[
                "governance/global/snapshot.json",
                "governance/tenant/snapshot.json",
                "finance/GLBatch.v1.json",
                "finance/JournalCsv.v1.json",
                "finance/JournalCsv.v1.csv",
                "finance/reconcile.json",
            ],
            BundleKind::ClosePack => &[
                "governance/global/snapshot.json",
                "governance/tenant/snapshot.json",
                "evidence/evidence_index.json",
            ],
        }
    }
}

impl fmt::Display for BundleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.schema_tag())
    }
}
