//! Merges parsed diff hunks with extracted structure into prioritized,
//! token-bounded chunks for the analysis service.
//!
//! Structure data is optional: a file with no entry in the structure map
//! gets empty scopes and imports, never an error. Security-sensitive paths
//! are ordered first so they land in the earliest chunks.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::diff::{ChangeKind, DiffHunk, Language, ParsedDiff};
use crate::structure::{AstFileContext, AstImport, AstScope};

/// A hunk paired with every scope whose line range overlaps it.
#[derive(Debug, Clone)]
pub struct HunkContext {
    pub hunk: DiffHunk,
    pub enclosing_scopes: Vec<AstScope>,
}

/// Per-file merged view sent for analysis.
#[derive(Debug, Clone)]
pub struct FileReviewContext {
    pub path: String,
    pub language: Option<Language>,
    pub change_kind: ChangeKind,
    pub hunks: Vec<HunkContext>,
    pub imports: Vec<AstImport>,
    pub full_text: Option<String>,
}

impl FileReviewContext {
    pub fn changed_line_count(&self) -> usize {
        self.hunks.iter().map(|h| h.hunk.changed_line_count()).sum()
    }
}

/// A batch of file contexts bounded by an estimated token budget.
#[derive(Debug, Clone)]
pub struct ReviewChunk {
    pub files: Vec<FileReviewContext>,
    pub estimated_tokens: usize,
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("no reviewable files in diff")]
    NoReviewableFiles,
}

/// Path keywords that mark a file as security sensitive. Matching files are
/// prioritized into the earliest chunks.
const SECURITY_KEYWORDS: &[&str] = &[
    "auth",
    "secret",
    "token",
    "credential",
    "crypto",
    "session",
    "password",
    "permission",
    "injection",
    "sanitize",
    "oauth",
    "login",
    "security",
    ".env",
];

/// Rough characters-per-token ratio for budget estimation.
const CHARS_PER_TOKEN: usize = 4;
/// Per-line formatting overhead (prefix, line number, newline).
const PER_LINE_OVERHEAD: usize = 2;
/// Per-scope and per-import label overhead in the rendered prompt.
const PER_SCOPE_OVERHEAD: usize = 8;
const PER_IMPORT_OVERHEAD: usize = 8;

pub fn is_security_sensitive_path(path: &str) -> bool {
    let lower = path.to_lowercase();
    SECURITY_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Estimated token cost of one file context.
pub fn estimate_file_tokens(file: &FileReviewContext) -> usize {
    let mut chars = file.path.len();
    for hc in &file.hunks {
        for line in &hc.hunk.lines {
            chars += line.content.len() + PER_LINE_OVERHEAD;
        }
        for scope in &hc.enclosing_scopes {
            chars += scope.name.len() + scope.kind.name().len() + PER_SCOPE_OVERHEAD;
        }
    }
    for import in &file.imports {
        chars += import.source.len() + PER_IMPORT_OVERHEAD;
    }
    chars / CHARS_PER_TOKEN
}

/// Build prioritized, token-bounded chunks from a parsed diff plus
/// best-effort structure and content maps.
///
/// Files that are binary, deleted, or hunkless are dropped here; if nothing
/// remains the diff has no reviewable content and
/// [`ContextError::NoReviewableFiles`] is returned.
pub fn build(
    diff: &ParsedDiff,
    structures: &HashMap<String, AstFileContext>,
    contents: &HashMap<String, String>,
    max_tokens_per_chunk: usize,
) -> Result<Vec<ReviewChunk>, ContextError> {
    let mut files: Vec<FileReviewContext> = diff
        .files
        .iter()
        .filter(|f| !f.is_binary && f.change_kind != ChangeKind::Deleted && !f.hunks.is_empty())
        .map(|f| {
            let structure = structures.get(&f.path);
            let hunks = f
                .hunks
                .iter()
                .map(|hunk| HunkContext {
                    enclosing_scopes: structure
                        .map(|s| enclosing_scopes(hunk, &s.scopes))
                        .unwrap_or_default(),
                    hunk: hunk.clone(),
                })
                .collect();
            FileReviewContext {
                path: f.path.clone(),
                language: f.language,
                change_kind: f.change_kind,
                hunks,
                imports: structure.map(|s| s.imports.clone()).unwrap_or_default(),
                full_text: contents.get(&f.path).cloned(),
            }
        })
        .collect();

    if files.is_empty() {
        return Err(ContextError::NoReviewableFiles);
    }

    // Security-sensitive paths first, then descending changed-line count
    // within each tier. Stable sort keeps diff order for ties.
    files.sort_by_key(|f| {
        (
            !is_security_sensitive_path(&f.path),
            std::cmp::Reverse(f.changed_line_count()),
        )
    });

    Ok(chunk_files(files, max_tokens_per_chunk))
}

/// Every scope whose line range overlaps the hunk's new-file range,
/// inclusive on both ends. Nested scopes all apply.
fn enclosing_scopes(hunk: &DiffHunk, scopes: &[AstScope]) -> Vec<AstScope> {
    scopes
        .iter()
        .filter(|s| s.start_line <= hunk.new_end() && s.end_line >= hunk.new_start)
        .cloned()
        .collect()
}

/// Greedy accumulation in priority order. A chunk is closed when adding the
/// next file would exceed the budget; a single file that alone exceeds the
/// budget still becomes its own chunk rather than being split or dropped.
fn chunk_files(files: Vec<FileReviewContext>, max_tokens: usize) -> Vec<ReviewChunk> {
    let mut chunks: Vec<ReviewChunk> = Vec::new();
    let mut current = ReviewChunk {
        files: Vec::new(),
        estimated_tokens: 0,
    };

    for file in files {
        let cost = estimate_file_tokens(&file);
        if !current.files.is_empty() && current.estimated_tokens + cost > max_tokens {
            chunks.push(std::mem::replace(
                &mut current,
                ReviewChunk {
                    files: Vec::new(),
                    estimated_tokens: 0,
                },
            ));
        }
        if cost > max_tokens {
            debug!(path = %file.path, cost, "file alone exceeds chunk budget");
        }
        current.estimated_tokens += cost;
        current.files.push(file);
    }

    if !current.files.is_empty() {
        chunks.push(current);
    }

    chunks
}
