//! Chunk analysis through an agent CLI subprocess.
//!
//! The analyzer shells out to a local agent CLI (claude by default),
//! feeds it the rendered prompt on stdin, and parses the JSON object
//! out of whatever surrounding prose the model produced.

pub mod prompts;

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::context::ReviewChunk;
use crate::findings::ReviewFinding;
use crate::review::{AnalyzerError, ChunkAnalysis, ChunkAnalyzer, TokenUsage};

/// Raw model output. Findings reuse the serde shape of [`ReviewFinding`];
/// unexpected category or severity values pass through as-is and fall
/// back to raw display downstream.
#[derive(Debug, Deserialize)]
struct RawAnalysisOutput {
    #[serde(default)]
    findings: Vec<ReviewFinding>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    usage: Option<RawUsage>,
}

#[derive(Debug, Deserialize)]
struct RawUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// [`ChunkAnalyzer`] backed by an agent CLI in print mode.
pub struct ClaudeCliAnalyzer {
    command: String,
    timeout_secs: u64,
}

impl ClaudeCliAnalyzer {
    pub fn new(command: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            command: command.into(),
            timeout_secs,
        }
    }

    async fn run_cli(&self, prompt: &str) -> Result<String, AnalyzerError> {
        let mut child = tokio::process::Command::new(&self.command)
            .arg("-p")
            .arg("--output-format")
            .arg("text")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                AnalyzerError::Unknown(format!(
                    "failed to start {}, is it installed? {}",
                    self.command, e
                ))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AnalyzerError::Unknown("agent stdin unavailable".to_string()))?;
        stdin
            .write_all(prompt.as_bytes())
            .await
            .map_err(|e| AnalyzerError::Unknown(format!("failed to write prompt: {}", e)))?;
        drop(stdin);

        let duration = Duration::from_secs(self.timeout_secs);
        let output = timeout(duration, child.wait_with_output())
            .await
            .map_err(|_| AnalyzerError::Timeout)?
            .map_err(|e| AnalyzerError::Unknown(format!("failed to wait for agent: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ChunkAnalyzer for ClaudeCliAnalyzer {
    async fn analyze(&self, chunk: &ReviewChunk) -> Result<ChunkAnalysis, AnalyzerError> {
        let prompt = prompts::render(chunk);
        debug!(
            files = chunk.files.len(),
            estimated_tokens = chunk.estimated_tokens,
            "analyzing chunk"
        );

        let stdout = self.run_cli(&prompt).await?;
        let raw = parse_output(&stdout)?;

        if raw.findings.is_empty() && raw.summary.is_empty() {
            warn!("analysis produced an empty result");
        }

        Ok(ChunkAnalysis {
            findings: raw.findings,
            summary: raw.summary,
            token_usage: raw.usage.map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            }),
        })
    }
}

/// Map agent stderr onto the analyzer error classes.
fn classify_failure(stderr: &str) -> AnalyzerError {
    let lower = stderr.to_lowercase();
    if lower.contains("api key") || lower.contains("credential") || lower.contains("please log in")
    {
        return AnalyzerError::MissingCredential;
    }
    if lower.contains("rate limit") || lower.contains("429") {
        return AnalyzerError::RateLimited;
    }
    if lower.contains("prompt is too long") || lower.contains("context window") {
        return AnalyzerError::ContextTooLong;
    }
    AnalyzerError::Unknown(stderr.trim().to_string())
}

/// Parse the JSON object out of the model output. Models wrap JSON in
/// prose or code fences often enough that this takes the outermost
/// brace span instead of requiring clean output.
fn parse_output(stdout: &str) -> Result<RawAnalysisOutput, AnalyzerError> {
    let json = extract_json(stdout)
        .ok_or_else(|| AnalyzerError::InvalidResponse("no JSON object in output".to_string()))?;
    serde_json::from_str(json).map_err(|e| AnalyzerError::InvalidResponse(e.to_string()))
}

fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}
