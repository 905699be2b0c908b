//! Prompt construction for chunk analysis.
//!
//! The rendered prompt carries, per file: the change kind, imports,
//! the scopes each hunk lands in, and the hunk lines annotated with
//! new-file line numbers so the model reports lines we can map back.

use std::fmt::Write;

use crate::context::{FileReviewContext, ReviewChunk};
use crate::diff::LineKind;

const INSTRUCTIONS: &str = r#"You are reviewing a pull request. Examine the changes below and report genuine problems: bugs, security issues, performance regressions, and significant style concerns. Do not comment on unchanged code unless a change breaks it.

Respond with a single JSON object and nothing else:
{
  "findings": [
    {
      "path": "<file path as shown>",
      "line": <new-file line number from the annotations>,
      "category": "security" | "bug-risk" | "performance" | "style" | "best-practice",
      "severity": "critical" | "warning" | "suggestion" | "nitpick",
      "message": "<what is wrong and why it matters>",
      "suggestion": "<replacement code, or omit>",
      "confidence": <0.0 to 1.0>
    }
  ],
  "summary": "<one paragraph on the overall change>"
}

Report an empty findings array when the changes look fine."#;

/// Render one chunk into the analysis prompt.
pub fn render(chunk: &ReviewChunk) -> String {
    let mut prompt = String::from(INSTRUCTIONS);
    prompt.push_str("\n\n## Changed files\n");

    for file in &chunk.files {
        render_file(&mut prompt, file);
    }

    prompt
}

fn render_file(prompt: &mut String, file: &FileReviewContext) {
    let language = file
        .language
        .map(|l| l.name())
        .unwrap_or("unknown language");
    let _ = write!(
        prompt,
        "\n### {} ({:?}, {})\n",
        file.path, file.change_kind, language
    );

    if !file.imports.is_empty() {
        prompt.push_str("\nImports:\n");
        for import in &file.imports {
            let _ = writeln!(prompt, "- {}", import.source);
        }
    }

    for hunk_ctx in &file.hunks {
        let hunk = &hunk_ctx.hunk;
        if hunk_ctx.enclosing_scopes.is_empty() {
            let _ = write!(
                prompt,
                "\nHunk at new lines {}-{}:\n",
                hunk.new_start,
                hunk.new_end()
            );
        } else {
            let scopes: Vec<String> = hunk_ctx
                .enclosing_scopes
                .iter()
                .map(|s| format!("{} `{}`", s.kind.name(), s.name))
                .collect();
            let _ = write!(
                prompt,
                "\nHunk at new lines {}-{} (inside {}):\n",
                hunk.new_start,
                hunk.new_end(),
                scopes.join(", ")
            );
        }

        prompt.push_str("```\n");
        for line in &hunk.lines {
            let marker = match line.kind {
                LineKind::Added => '+',
                LineKind::Removed => '-',
                LineKind::Context => ' ',
            };
            match line.new_line_number {
                Some(n) => {
                    let _ = writeln!(prompt, "{:>5} {}{}", n, marker, line.content);
                }
                None => {
                    let _ = writeln!(prompt, "      {}{}", marker, line.content);
                }
            }
        }
        prompt.push_str("```\n");
    }
}
