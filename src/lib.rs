//! Automated pull request review built on the gh CLI and an agent CLI.
//!
//! The pipeline parses a unified diff, enriches changed files with
//! tree-sitter structure, packs them into token-budgeted chunks,
//! analyzes each chunk, maps findings back onto diff positions, and
//! posts one review per head commit.

pub mod ai;
pub mod config;
pub mod context;
pub mod diff;
pub mod findings;
pub mod github;
pub mod review;
pub mod structure;
