// SPDX-License-Identifier: MIT OR Apache-2.0
//! Command-line surface: two subcommands over the same offline verifier,
//! `verify` (a bundle directory or zip) and `verify-release` (a release
//! index + trust file).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "settld-verify", version, about = "Offline verifier for settlement evidence bundles")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Verify a bundle directory or zip archive.
    Verify(VerifyArgs),
    /// Verify a release index directory against a trust file.
    VerifyRelease(VerifyReleaseArgs),
}

#[derive(Debug, Parser)]
pub struct VerifyArgs {
    /// Bundle directory or `.zip` file.
    pub input: PathBuf,

    /// Disable strict mode (accept legacy/lenient forms with warnings).
    #[arg(long)]
    pub no_strict: bool,

    /// Treat any warning as a verification failure.
    #[arg(long)]
    pub fail_on_warnings: bool,

    /// Bounded worker pool size used for manifest file hashing.
    #[arg(long, default_value_t = 16)]
    pub hash_concurrency: usize,

    /// Emit `VerifyCliOutput.v1` JSON instead of a human-readable summary.
    #[arg(long)]
    pub json: bool,

    /// Environment variable prefix used for trust anchor lookup (e.g. `SETTLD`).
    #[arg(long, default_value = "SETTLD")]
    pub env_prefix: String,
}

#[derive(Debug, Parser)]
pub struct VerifyReleaseArgs {
    /// Directory containing `release_index_v1.json` and `release_index_v1.sig`.
    pub release_dir: PathBuf,

    /// Path to the `ReleaseTrust.v2` trust file.
    #[arg(long)]
    pub trust: PathBuf,

    /// Emit `VerifyReleaseOutput.v1` JSON instead of a human-readable summary.
    #[arg(long)]
    pub json: bool,
}
