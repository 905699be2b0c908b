//! Mapping analysis findings back onto exact diff positions.
//!
//! Every finding resolves to exactly one of two buckets: a positioned
//! inline comment, or an unmapped finding carried in the review summary
//! with a human-readable reason. Mapping never fails.

use serde::Deserialize;

use crate::diff::{LineKind, ParsedDiff, ParsedDiffFile};

/// One reported issue from the analysis service. Line numbers refer to the
/// new file version unless the issue concerns a removed line.
///
/// Category and severity arrive as raw strings from the analysis contract;
/// unrecognized values fall back to their raw text in formatting.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewFinding {
    pub path: String,
    pub line: u32,
    pub category: String,
    pub severity: String,
    pub message: String,
    #[serde(default)]
    pub suggestion: Option<String>,
    #[serde(default)]
    pub confidence: f32,
}

impl ReviewFinding {
    pub fn is_critical(&self) -> bool {
        self.severity == "critical"
    }
}

/// Which side of the diff a comment attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Old-file side (removed lines).
    Left,
    /// New-file side (added and context lines).
    Right,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "LEFT",
            Side::Right => "RIGHT",
        }
    }
}

/// A finding resolved to an exact diff position.
#[derive(Debug, Clone)]
pub struct MappedReviewComment {
    pub path: String,
    /// Old-file line for LEFT, new-file line for RIGHT.
    pub line: u32,
    pub side: Side,
    /// Formatted display body.
    pub body: String,
    pub finding: ReviewFinding,
}

/// A finding that could not be placed on the diff.
#[derive(Debug, Clone)]
pub struct UnmappedFinding {
    pub finding: ReviewFinding,
    pub reason: String,
}

/// Result of mapping a batch of findings.
#[derive(Debug, Default)]
pub struct MappingOutcome {
    pub mapped: Vec<MappedReviewComment>,
    pub unmapped: Vec<UnmappedFinding>,
}

const REASON_FILE_NOT_IN_DIFF: &str = "file not in diff";
const REASON_NO_HUNKS: &str = "file has no reviewable hunks";
const REASON_LINE_OUTSIDE: &str = "line not within the diff context";

/// Map findings onto diff positions. Total: every input finding lands in
/// exactly one output bucket.
pub fn map_findings(findings: Vec<ReviewFinding>, diff: &ParsedDiff) -> MappingOutcome {
    let mut outcome = MappingOutcome::default();

    for finding in findings {
        let file = locate_file(diff, &finding.path);
        let Some(file) = file else {
            outcome.unmapped.push(UnmappedFinding {
                finding,
                reason: REASON_FILE_NOT_IN_DIFF.to_string(),
            });
            continue;
        };

        if file.hunks.is_empty() {
            outcome.unmapped.push(UnmappedFinding {
                finding,
                reason: REASON_NO_HUNKS.to_string(),
            });
            continue;
        }

        match resolve_position(file, finding.line) {
            Some((line, side)) => {
                let body = format_comment_body(&finding);
                outcome.mapped.push(MappedReviewComment {
                    path: file.path.clone(),
                    line,
                    side,
                    body,
                    finding,
                });
            }
            None => outcome.unmapped.push(UnmappedFinding {
                finding,
                reason: REASON_LINE_OUTSIDE.to_string(),
            }),
        }
    }

    outcome
}

/// Locate a diff file by current path, falling back to the previous path
/// for renames.
fn locate_file<'a>(diff: &'a ParsedDiff, path: &str) -> Option<&'a ParsedDiffFile> {
    diff.files
        .iter()
        .find(|f| f.path == path)
        .or_else(|| {
            diff.files
                .iter()
                .find(|f| f.previous_path.as_deref() == Some(path))
        })
}

/// Scan the file's hunks for the finding's line.
///
/// A new-file line number match resolves RIGHT (LEFT if that line is
/// somehow a removal); independently, a removal whose old-file number
/// matches resolves LEFT with the old number.
fn resolve_position(file: &ParsedDiffFile, target: u32) -> Option<(u32, Side)> {
    for hunk in &file.hunks {
        for line in &hunk.lines {
            if line.new_line_number == Some(target) {
                let side = if line.kind == LineKind::Removed {
                    Side::Left
                } else {
                    Side::Right
                };
                let number = match side {
                    Side::Left => line.old_line_number,
                    Side::Right => line.new_line_number,
                };
                return Some((number.unwrap_or(target), side));
            }
            if line.kind == LineKind::Removed && line.old_line_number == Some(target) {
                return Some((line.old_line_number.unwrap_or(target), Side::Left));
            }
        }
    }
    None
}

/// Severity badge lookup; unrecognized severities display their raw value.
fn severity_badge(severity: &str) -> String {
    match severity {
        "critical" => "🚨 Critical".to_string(),
        "warning" => "⚠️ Warning".to_string(),
        "suggestion" => "💡 Suggestion".to_string(),
        "nitpick" => "🔍 Nitpick".to_string(),
        other => other.to_string(),
    }
}

/// Category label lookup; unrecognized categories display their raw value.
fn category_label(category: &str) -> String {
    match category {
        "security" => "Security".to_string(),
        "bug-risk" => "Bug Risk".to_string(),
        "performance" => "Performance".to_string(),
        "style" => "Style".to_string(),
        "best-practice" => "Best Practice".to_string(),
        other => other.to_string(),
    }
}

/// Inline comment body: severity badge, category label, message, and an
/// optional suggestion block.
pub fn format_comment_body(finding: &ReviewFinding) -> String {
    let mut body = format!(
        "{} **{}**: {}",
        severity_badge(&finding.severity),
        category_label(&finding.category),
        finding.message
    );
    if let Some(suggestion) = &finding.suggestion {
        if !suggestion.trim().is_empty() {
            body.push_str(&format!("\n\n**Suggested fix:**\n```\n{}\n```", suggestion));
        }
    }
    body
}

/// Review summary: the analysis summary, an additional-findings section for
/// everything that could not be placed inline, and a fixed count line.
pub fn build_summary(
    analysis_summary: &str,
    mapped: &[MappedReviewComment],
    unmapped: &[UnmappedFinding],
) -> String {
    let mut summary = analysis_summary.trim_end().to_string();

    if !unmapped.is_empty() {
        summary.push_str("\n\n### Additional findings\n");
        for item in unmapped {
            summary.push_str(&format!(
                "\n- `{}:{}` — {}",
                item.finding.path, item.finding.line, item.finding.message
            ));
        }
    }

    let total = mapped.len() + unmapped.len();
    summary.push_str(&format!(
        "\n\n---\n{} finding(s): {} inline, {} summary-only",
        total,
        mapped.len(),
        unmapped.len()
    ));

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff;

    const DIFF: &str = "\
diff --git a/src/a.ts b/src/a.ts
--- a/src/a.ts
+++ b/src/a.ts
@@ -10,3 +10,4 @@
 context ten
-removed eleven
+added eleven
+added twelve
 context thirteen
";

    fn finding(path: &str, line: u32) -> ReviewFinding {
        ReviewFinding {
            path: path.to_string(),
            line,
            category: "bug-risk".to_string(),
            severity: "warning".to_string(),
            message: "possible issue".to_string(),
            suggestion: None,
            confidence: 0.8,
        }
    }

    #[test]
    fn mapping_is_total() {
        let diff = diff::parse(DIFF).unwrap();
        let findings = vec![
            finding("src/a.ts", 11),
            finding("src/a.ts", 500),
            finding("other.ts", 1),
        ];
        let count = findings.len();
        let outcome = map_findings(findings, &diff);
        assert_eq!(outcome.mapped.len() + outcome.unmapped.len(), count);
    }

    #[test]
    fn added_line_maps_right_with_new_number() {
        let diff = diff::parse(DIFF).unwrap();
        let outcome = map_findings(vec![finding("src/a.ts", 12)], &diff);
        assert_eq!(outcome.mapped.len(), 1);
        let comment = &outcome.mapped[0];
        assert_eq!(comment.side, Side::Right);
        assert_eq!(comment.line, 12);
        assert_eq!(comment.path, "src/a.ts");
    }

    #[test]
    fn context_line_maps_right() {
        let diff = diff::parse(DIFF).unwrap();
        let outcome = map_findings(vec![finding("src/a.ts", 10)], &diff);
        assert_eq!(outcome.mapped[0].side, Side::Right);
        assert_eq!(outcome.mapped[0].line, 10);
    }

    #[test]
    fn removed_line_old_number_maps_left() {
        // A line only present as a removal resolves LEFT with the old number.
        let deleted_only = "\
diff --git a/c.rs b/c.rs
--- a/c.rs
+++ b/c.rs
@@ -90,3 +90,1 @@
 ninety
-ninety one
-ninety two
";
        let diff = diff::parse(deleted_only).unwrap();
        let outcome = map_findings(vec![finding("c.rs", 92)], &diff);
        assert_eq!(outcome.mapped.len(), 1);
        assert_eq!(outcome.mapped[0].side, Side::Left);
        assert_eq!(outcome.mapped[0].line, 92);
    }

    #[test]
    fn file_not_in_diff_is_unmapped() {
        let diff = diff::parse(DIFF).unwrap();
        let outcome = map_findings(vec![finding("missing.rs", 1)], &diff);
        assert_eq!(outcome.unmapped.len(), 1);
        assert_eq!(outcome.unmapped[0].reason, "file not in diff");
    }

    #[test]
    fn line_outside_hunks_is_unmapped() {
        let diff = diff::parse(DIFF).unwrap();
        let outcome = map_findings(vec![finding("src/a.ts", 5)], &diff);
        assert_eq!(outcome.unmapped.len(), 1);
        assert_eq!(outcome.unmapped[0].reason, "line not within the diff context");
    }

    #[test]
    fn rename_falls_back_to_previous_path() {
        let renamed = "\
diff --git a/src/old.rs b/src/new.rs
rename from src/old.rs
rename to src/new.rs
--- a/src/old.rs
+++ b/src/new.rs
@@ -1,2 +1,2 @@
-fn old() {}
+fn new() {}
 // end
";
        let diff = diff::parse(renamed).unwrap();
        let outcome = map_findings(vec![finding("src/old.rs", 1)], &diff);
        assert_eq!(outcome.mapped.len(), 1);
        // Comment lands on the file's current path.
        assert_eq!(outcome.mapped[0].path, "src/new.rs");
    }

    #[test]
    fn binary_file_has_no_reviewable_hunks() {
        let binary = "\
diff --git a/x.bin b/x.bin
Binary files a/x.bin and b/x.bin differ
";
        let diff = diff::parse(binary).unwrap();
        let outcome = map_findings(vec![finding("x.bin", 1)], &diff);
        assert_eq!(outcome.unmapped.len(), 1);
        assert_eq!(outcome.unmapped[0].reason, "file has no reviewable hunks");
    }

    #[test]
    fn comment_body_formatting() {
        let mut f = finding("a.ts", 1);
        f.severity = "critical".to_string();
        f.category = "security".to_string();
        f.message = "SQL built from user input".to_string();
        f.suggestion = Some("use a parameterized query".to_string());
        let body = format_comment_body(&f);
        assert_eq!(
            body,
            "🚨 Critical **Security**: SQL built from user input\n\n\
             **Suggested fix:**\n```\nuse a parameterized query\n```"
        );
    }

    #[test]
    fn unknown_severity_and_category_fall_back_to_raw() {
        let mut f = finding("a.ts", 1);
        f.severity = "catastrophic".to_string();
        f.category = "cosmic-rays".to_string();
        let body = format_comment_body(&f);
        assert!(body.starts_with("catastrophic **cosmic-rays**:"));
    }

    #[test]
    fn summary_lists_unmapped_and_counts() {
        let diff = diff::parse(DIFF).unwrap();
        let outcome = map_findings(
            vec![finding("src/a.ts", 11), finding("gone.rs", 3)],
            &diff,
        );
        let summary = build_summary("Looks mostly fine.", &outcome.mapped, &outcome.unmapped);
        assert!(summary.starts_with("Looks mostly fine."));
        assert!(summary.contains("### Additional findings"));
        assert!(summary.contains("- `gone.rs:3` — possible issue"));
        assert!(summary.ends_with("2 finding(s): 1 inline, 1 summary-only"));
    }

    #[test]
    fn summary_without_unmapped_omits_section() {
        let summary = build_summary("All good.", &[], &[]);
        assert!(!summary.contains("Additional findings"));
        assert!(summary.ends_with("0 finding(s): 0 inline, 0 summary-only"));
    }

    #[test]
    fn summary_layout() {
        let diff = diff::parse(DIFF).unwrap();
        let outcome = map_findings(
            vec![finding("src/a.ts", 11), finding("gone.rs", 3)],
            &diff,
        );
        let summary = build_summary("Looks mostly fine.", &outcome.mapped, &outcome.unmapped);
        insta::assert_snapshot!(summary, @r###"
        Looks mostly fine.

        ### Additional findings

        - `gone.rs:3` — possible issue

        ---
        2 finding(s): 1 inline, 1 summary-only
        "###);
    }
}
