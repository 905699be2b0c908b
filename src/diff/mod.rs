//! Unified-diff parsing into a structured, line-addressed representation.
//!
//! The parser splits a raw multi-file diff into per-file entries, each with
//! ordered hunks whose lines carry both old-file and new-file line numbers.
//! Malformed per-file blocks are skipped rather than failing the whole parse;
//! the only hard failure is an empty input.

use std::path::Path;

use thiserror::Error;
use tracing::warn;

/// Classification of a single line within a hunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Line added in the new version (starts with +)
    Added,
    /// Line removed from the old version (starts with -)
    Removed,
    /// Unchanged line present in both versions (starts with space)
    Context,
}

/// One line within a hunk, addressed on both sides of the diff.
///
/// Exactly one of the two line numbers is `None` for added/removed lines;
/// context lines carry both.
#[derive(Debug, Clone)]
pub struct DiffLine {
    pub kind: LineKind,
    /// Line content without the +/-/space prefix.
    pub content: String,
    /// Line number in the new file (None for removed lines).
    pub new_line_number: Option<u32>,
    /// Line number in the old file (None for added lines).
    pub old_line_number: Option<u32>,
}

/// A contiguous change region within one file.
#[derive(Debug, Clone)]
pub struct DiffHunk {
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
    /// The raw `@@ ... @@` header line.
    pub header: String,
    pub lines: Vec<DiffLine>,
}

impl DiffHunk {
    /// Last new-file line covered by this hunk (inclusive).
    pub fn new_end(&self) -> u32 {
        self.new_start + self.new_count.saturating_sub(1)
    }

    /// Count of added plus removed lines.
    pub fn changed_line_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| matches!(l.kind, LineKind::Added | LineKind::Removed))
            .count()
    }
}

/// How a file was changed in the diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

/// Closed set of languages the structure extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    TypeScript,
    Tsx,
    JavaScript,
    Python,
    Rust,
    Go,
    Ruby,
    Java,
    C,
    Cpp,
    CSharp,
    Php,
}

impl Language {
    /// Map a file extension to a supported language. Unknown extensions
    /// yield `None`; the file is still reviewable, just without AST data.
    pub fn from_path(path: &str) -> Option<Language> {
        let ext = Path::new(path).extension().and_then(|e| e.to_str())?;
        match ext {
            "ts" | "mts" | "cts" => Some(Language::TypeScript),
            "tsx" => Some(Language::Tsx),
            "js" | "jsx" | "mjs" | "cjs" => Some(Language::JavaScript),
            "py" | "pyi" => Some(Language::Python),
            "rs" => Some(Language::Rust),
            "go" => Some(Language::Go),
            "rb" => Some(Language::Ruby),
            "java" => Some(Language::Java),
            "c" | "h" => Some(Language::C),
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" | "hh" => Some(Language::Cpp),
            "cs" => Some(Language::CSharp),
            "php" => Some(Language::Php),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Rust => "rust",
            Language::Go => "go",
            Language::Ruby => "ruby",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::CSharp => "csharp",
            Language::Php => "php",
        }
    }
}

/// One file entry in a parsed diff.
#[derive(Debug, Clone)]
pub struct ParsedDiffFile {
    /// Current path. For deleted files this is the old path.
    pub path: String,
    /// Previous path, set only on rename or delete.
    pub previous_path: Option<String>,
    pub change_kind: ChangeKind,
    pub language: Option<Language>,
    pub hunks: Vec<DiffHunk>,
    /// Binary files carry no hunks.
    pub is_binary: bool,
}

/// A parsed multi-file diff, order preserving the input order.
#[derive(Debug, Clone)]
pub struct ParsedDiff {
    pub files: Vec<ParsedDiffFile>,
}

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("diff text is empty")]
    Empty,
}

/// Path patterns that are never worth reviewing: lockfiles, minified or
/// generated assets, images, source maps, vendored trees.
const NON_REVIEWABLE_SUFFIXES: &[&str] = &[
    ".min.js",
    ".min.css",
    ".map",
    ".png",
    ".jpg",
    ".jpeg",
    ".gif",
    ".ico",
    ".svg",
    ".webp",
    ".woff",
    ".woff2",
    ".pdf",
    ".snap",
];

const NON_REVIEWABLE_FILENAMES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Cargo.lock",
    "Gemfile.lock",
    "composer.lock",
    "poetry.lock",
    "go.sum",
];

const NON_REVIEWABLE_DIR_SEGMENTS: &[&str] = &[
    "node_modules",
    "vendor",
    "dist",
    "build",
    "target",
    ".next",
    "__generated__",
    "generated",
];

/// Whether a path is worth sending for review at all.
pub fn is_reviewable_path(path: &str) -> bool {
    let filename = path.rsplit('/').next().unwrap_or(path);
    if NON_REVIEWABLE_FILENAMES.contains(&filename) {
        return false;
    }
    if NON_REVIEWABLE_SUFFIXES.iter().any(|s| path.ends_with(s)) {
        return false;
    }
    if path
        .split('/')
        .any(|seg| NON_REVIEWABLE_DIR_SEGMENTS.contains(&seg))
    {
        return false;
    }
    true
}

/// Parse unified-diff text into a [`ParsedDiff`].
///
/// Fails only when the trimmed input is empty. Per-file blocks that cannot
/// be understood are skipped with a warning; hunks with malformed headers
/// are skipped within their file.
pub fn parse(raw: &str) -> Result<ParsedDiff, DiffError> {
    if raw.trim().is_empty() {
        return Err(DiffError::Empty);
    }

    let lines: Vec<&str> = raw.lines().collect();
    let mut files = Vec::new();

    // Split into per-file blocks on the "diff --git" boundary. Diffs that
    // start mid-file (no leading marker) are treated as a single block.
    let mut block_starts: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.starts_with("diff --git "))
        .map(|(i, _)| i)
        .collect();
    if block_starts.is_empty() {
        block_starts.push(0);
    }

    for (bi, &start) in block_starts.iter().enumerate() {
        let end = block_starts.get(bi + 1).copied().unwrap_or(lines.len());
        match parse_file_block(&lines[start..end]) {
            Some(file) => {
                if is_reviewable_path(&file.path) {
                    files.push(file);
                }
            }
            None => warn!("skipping unparsable diff block at line {}", start + 1),
        }
    }

    Ok(ParsedDiff { files })
}

/// Parse one per-file block into a [`ParsedDiffFile`].
fn parse_file_block(block: &[&str]) -> Option<ParsedDiffFile> {
    let mut old_header_path: Option<String> = None;
    let mut new_header_path: Option<String> = None;
    let mut rename_from: Option<String> = None;
    let mut rename_to: Option<String> = None;
    let mut is_new_file = false;
    let mut is_deleted_file = false;
    let mut is_binary = false;

    for line in block {
        if let Some(rest) = line.strip_prefix("--- ") {
            if rest != "/dev/null" {
                old_header_path = strip_diff_prefix(rest);
            }
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            if rest != "/dev/null" {
                new_header_path = strip_diff_prefix(rest);
            }
        } else if let Some(rest) = line.strip_prefix("rename from ") {
            rename_from = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("rename to ") {
            rename_to = Some(rest.to_string());
        } else if line.starts_with("new file mode") {
            is_new_file = true;
        } else if line.starts_with("deleted file mode") {
            is_deleted_file = true;
        } else if line.starts_with("Binary files ") || line.starts_with("GIT binary patch") {
            is_binary = true;
        } else if line.starts_with("@@ ") {
            // Header region ends at the first hunk.
            break;
        }
    }

    // Current path: new-file header, falling back to the old-file header
    // for deletions, then to the "diff --git" line itself (binary blocks
    // often carry neither +++ nor ---).
    let path = new_header_path
        .clone()
        .or_else(|| rename_to.clone())
        .or_else(|| old_header_path.clone())
        .or_else(|| block.first().and_then(|l| extract_git_line_path(l)))?;

    let change_kind = if is_new_file {
        ChangeKind::Added
    } else if is_deleted_file {
        ChangeKind::Deleted
    } else if rename_from.is_some() || rename_to.is_some() {
        ChangeKind::Renamed
    } else {
        ChangeKind::Modified
    };

    // Previous path only exists for renames and deletions.
    let previous_path = match change_kind {
        ChangeKind::Renamed => rename_from.or_else(|| match (&old_header_path, &new_header_path) {
            (Some(old), Some(new)) if old != new => Some(old.clone()),
            _ => None,
        }),
        ChangeKind::Deleted => old_header_path,
        _ => None,
    };

    let hunks = if is_binary {
        Vec::new()
    } else {
        parse_hunks(block)
    };

    let language = Language::from_path(&path);

    Some(ParsedDiffFile {
        path,
        previous_path,
        change_kind,
        language,
        hunks,
        is_binary,
    })
}

/// Scan a file block for `@@` headers and collect each hunk's lines,
/// independently advancing old/new line counters.
fn parse_hunks(block: &[&str]) -> Vec<DiffHunk> {
    let mut hunks: Vec<DiffHunk> = Vec::new();
    let mut current: Option<(DiffHunk, u32, u32)> = None;

    for line in block {
        if line.starts_with("@@ ") || *line == "@@" {
            if let Some((hunk, _, _)) = current.take() {
                hunks.push(hunk);
            }
            match parse_hunk_header(line) {
                Some((old_start, old_count, new_start, new_count)) => {
                    let hunk = DiffHunk {
                        old_start,
                        old_count,
                        new_start,
                        new_count,
                        header: line.to_string(),
                        lines: Vec::new(),
                    };
                    current = Some((hunk, old_start, new_start));
                }
                None => {
                    warn!("skipping hunk with malformed header: {}", line);
                    current = None;
                }
            }
            continue;
        }

        let Some((hunk, old_line, new_line)) = current.as_mut() else {
            continue;
        };

        if line.starts_with('\\') {
            // "\ No newline at end of file" — consumed, no DiffLine.
            continue;
        }

        if let Some(content) = line.strip_prefix('+') {
            hunk.lines.push(DiffLine {
                kind: LineKind::Added,
                content: content.to_string(),
                new_line_number: Some(*new_line),
                old_line_number: None,
            });
            *new_line += 1;
        } else if let Some(content) = line.strip_prefix('-') {
            hunk.lines.push(DiffLine {
                kind: LineKind::Removed,
                content: content.to_string(),
                new_line_number: None,
                old_line_number: Some(*old_line),
            });
            *old_line += 1;
        } else {
            // Context lines start with a space; a fully empty line is an
            // empty context line (some tools trim the trailing space).
            let content = line.strip_prefix(' ').unwrap_or(line);
            hunk.lines.push(DiffLine {
                kind: LineKind::Context,
                content: content.to_string(),
                new_line_number: Some(*new_line),
                old_line_number: Some(*old_line),
            });
            *new_line += 1;
            *old_line += 1;
        }
    }

    if let Some((hunk, _, _)) = current {
        hunks.push(hunk);
    }

    hunks
}

/// Parse a hunk header of the form `@@ -old[,count] +new[,count] @@ rest`.
/// A missing count defaults to 1.
fn parse_hunk_header(line: &str) -> Option<(u32, u32, u32, u32)> {
    let rest = line.strip_prefix("@@ ")?;
    let close = rest.find(" @@")?;
    let ranges = &rest[..close];
    let mut parts = ranges.split(' ');

    let old = parts.next()?.strip_prefix('-')?;
    let new = parts.next()?.strip_prefix('+')?;

    let (old_start, old_count) = parse_range(old)?;
    let (new_start, new_count) = parse_range(new)?;
    Some((old_start, old_count, new_start, new_count))
}

fn parse_range(range: &str) -> Option<(u32, u32)> {
    match range.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((range.parse().ok()?, 1)),
    }
}

/// Strip the single-char diff prefix (a/, b/, c/, w/, i/, o/) from a
/// `---` or `+++` path. Paths produced with `--no-prefix` pass through.
fn strip_diff_prefix(path: &str) -> Option<String> {
    let path = path.split('\t').next().unwrap_or(path);
    if path.len() >= 2 && path.as_bytes()[1] == b'/' {
        Some(path[2..].to_string())
    } else {
        Some(path.to_string())
    }
}

/// Best-effort path recovery from a `diff --git a/x b/x` line when the
/// block carries no `+++`/`---` headers (binary patches). Only handles the
/// unambiguous non-rename case; renames without header lines are rare
/// enough to skip.
fn extract_git_line_path(line: &str) -> Option<String> {
    let content = line.strip_prefix("diff --git ")?;
    if content.len() < 2 || content.as_bytes()[1] != b'/' {
        return None;
    }
    let body = &content[2..];
    let total = body.len();
    // Non-rename layout: "path SP prefix-char / path" with equal paths.
    if total >= 3 && (total - 3) % 2 == 0 {
        let path_len = (total - 3) / 2;
        if path_len > 0 {
            let bytes = body.as_bytes();
            if bytes[path_len] == b' ' && bytes[path_len + 2] == b'/' {
                let first = &body[..path_len];
                let second = &body[path_len + 3..];
                if first == second {
                    return Some(second.to_string());
                }
            }
        }
    }
    None
}
