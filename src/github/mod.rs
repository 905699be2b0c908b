//! GitHub access through the gh CLI. Authentication, token refresh, and
//! HTTP are all delegated to `gh`; this module shapes requests and
//! classifies failures.

mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::review::{HostError, PostedReview, ReviewSubmission, SourceHost};

/// Review request body for `POST /repos/{owner}/{repo}/pulls/{n}/reviews`.
#[derive(Debug, Serialize)]
struct ReviewRequestBody<'a> {
    commit_id: &'a str,
    body: &'a str,
    event: &'a str,
    comments: Vec<ReviewCommentBody<'a>>,
}

#[derive(Debug, Serialize)]
struct ReviewCommentBody<'a> {
    path: &'a str,
    line: u32,
    side: &'a str,
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct ReviewResponse {
    id: u64,
}

/// Percent-encode a repository file path for the contents endpoint.
/// `/` stays literal as the segment separator; everything outside the
/// URL-unreserved set is escaped so paths with spaces, `#`, or `?`
/// do not corrupt the endpoint.
fn encode_repo_path(path: &str) -> String {
    let mut encoded = String::with_capacity(path.len());
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{:02X}", other)),
        }
    }
    encoded
}

/// [`SourceHost`] backed by the locally installed gh CLI.
#[derive(Debug, Default, Clone)]
pub struct GhCliHost;

impl GhCliHost {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SourceHost for GhCliHost {
    async fn fetch_diff(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
    ) -> Result<String, HostError> {
        debug!(owner, repo, pr_number, "fetching pull request diff");
        client::gh_command(vec![
            "pr".to_string(),
            "diff".to_string(),
            pr_number.to_string(),
            "-R".to_string(),
            format!("{}/{}", owner, repo),
        ])
        .await
    }

    async fn fetch_file_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        reference: &str,
    ) -> Result<String, HostError> {
        client::gh_command(vec![
            "api".to_string(),
            format!(
                "repos/{}/{}/contents/{}?ref={}",
                owner,
                repo,
                encode_repo_path(path),
                reference
            ),
            "-H".to_string(),
            "Accept: application/vnd.github.raw+json".to_string(),
        ])
        .await
    }

    async fn post_review(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
        submission: &ReviewSubmission,
    ) -> Result<PostedReview, HostError> {
        let body = ReviewRequestBody {
            commit_id: &submission.commit_sha,
            body: &submission.body,
            event: submission.disposition.as_str(),
            comments: submission
                .comments
                .iter()
                .map(|c| ReviewCommentBody {
                    path: &c.path,
                    line: c.line,
                    side: c.side.as_str(),
                    body: &c.body,
                })
                .collect(),
        };
        let payload = serde_json::to_string(&body)
            .map_err(|e| HostError::Unknown(format!("failed to encode review body: {}", e)))?;

        debug!(
            owner,
            repo,
            pr_number,
            comments = body.comments.len(),
            "posting review"
        );
        let output = client::gh_command_with_stdin(
            vec![
                "api".to_string(),
                "--method".to_string(),
                "POST".to_string(),
                format!("repos/{}/{}/pulls/{}/reviews", owner, repo, pr_number),
                "--input".to_string(),
                "-".to_string(),
            ],
            payload,
        )
        .await?;

        let response: ReviewResponse = serde_json::from_str(&output)
            .map_err(|e| HostError::Unknown(format!("unexpected review response: {}", e)))?;
        Ok(PostedReview {
            review_id: response.id,
            posted_count: submission.comments.len(),
        })
    }
}
