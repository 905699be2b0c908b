//! Review orchestration: one idempotent attempt per (repository, commit).
//!
//! The orchestrator sequences diff fetch, parsing, best-effort structural
//! enrichment, chunked analysis, finding mapping, posting, and persistence.
//! Enrichment failures degrade silently; analysis and diff failures abort
//! the attempt; a posting failure is logged but never fails the review.

pub mod store;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::context::{self, ReviewChunk};
use crate::diff::{self, ChangeKind};
use crate::findings::{self, MappedReviewComment, ReviewFinding, Side, UnmappedFinding};
use crate::structure::{AstFileContext, StructureExtractor};
use self::store::{ReviewStatus, ReviewStore, StoredComment};

/// Review-level verdict posted alongside inline comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Comment,
    RequestChanges,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Comment => "COMMENT",
            Disposition::RequestChanges => "REQUEST_CHANGES",
        }
    }
}

/// One inline comment in a review submission.
#[derive(Debug, Clone)]
pub struct DraftComment {
    pub path: String,
    pub line: u32,
    pub side: Side,
    pub body: String,
}

/// A complete review to post to the source-hosting service.
#[derive(Debug, Clone)]
pub struct ReviewSubmission {
    pub commit_sha: String,
    pub body: String,
    pub disposition: Disposition,
    pub comments: Vec<DraftComment>,
}

/// Acknowledgement of a posted review.
#[derive(Debug, Clone)]
pub struct PostedReview {
    pub review_id: u64,
    pub posted_count: usize,
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("authentication failed")]
    Auth,
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("rate limited")]
    RateLimited,
    #[error("host error: {0}")]
    Unknown(String),
}

/// Source-hosting service capability (GitHub or compatible).
#[async_trait]
pub trait SourceHost: Send + Sync {
    async fn fetch_diff(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
    ) -> Result<String, HostError>;

    async fn fetch_file_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        reference: &str,
    ) -> Result<String, HostError>;

    async fn post_review(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
        submission: &ReviewSubmission,
    ) -> Result<PostedReview, HostError>;
}

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("analysis credential missing")]
    MissingCredential,
    #[error("analysis rate limited")]
    RateLimited,
    #[error("analysis timed out")]
    Timeout,
    #[error("invalid analysis response: {0}")]
    InvalidResponse(String),
    #[error("chunk exceeds the analysis context window")]
    ContextTooLong,
    #[error("analysis error: {0}")]
    Unknown(String),
}

/// Token accounting reported by the analysis service, when available.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Result of analyzing one chunk.
#[derive(Debug, Clone)]
pub struct ChunkAnalysis {
    pub findings: Vec<ReviewFinding>,
    pub summary: String,
    pub token_usage: Option<TokenUsage>,
}

/// Text-analysis service capability.
#[async_trait]
pub trait ChunkAnalyzer: Send + Sync {
    async fn analyze(&self, chunk: &ReviewChunk) -> Result<ChunkAnalysis, AnalyzerError>;
}

/// Request to review one pull request head commit.
#[derive(Debug, Clone)]
pub struct ReviewRequest {
    pub repository_full_name: String,
    pub pull_request_number: u64,
    pub commit_sha: String,
}

/// Successful attempt outcome.
#[derive(Debug, Clone)]
pub struct ReviewSuccess {
    pub review_id: u64,
    pub issues_found: usize,
    pub processing_time_ms: u64,
    pub summary: String,
}

/// Classified attempt failures visible to callers. Internal causes go to
/// structured logs, not into these variants.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("a review already exists for this commit")]
    AlreadyExists,
    #[error("database error: {0}")]
    Db(String),
    #[error("failed to fetch diff: {0}")]
    DiffFetchFailed(String),
    #[error("failed to parse diff: {0}")]
    DiffParseFailed(String),
    #[error("analysis failed: {0}")]
    LlmFailed(String),
    /// Part of the outcome contract for callers that treat delivery as
    /// mandatory. [`ReviewOrchestrator::execute_review`] itself never
    /// returns it: a failed post is logged and the attempt completes.
    #[error("failed to post review: {0}")]
    PostFailed(String),
}

const SUMMARY_NO_REVIEWABLE_FILES: &str =
    "No reviewable files in this pull request; nothing to analyze.";
const SUMMARY_NO_REVIEWABLE_CONTENT: &str =
    "No reviewable content after filtering; nothing to analyze.";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_tokens_per_chunk: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_chunk: 30_000,
        }
    }
}

/// Sequences one review attempt end to end.
pub struct ReviewOrchestrator {
    host: Arc<dyn SourceHost>,
    analyzer: Arc<dyn ChunkAnalyzer>,
    store: Arc<dyn ReviewStore>,
    /// Process-wide extractor: one initialization, one grammar cache.
    extractor: tokio::sync::Mutex<StructureExtractor>,
    config: OrchestratorConfig,
}

impl ReviewOrchestrator {
    pub fn new(
        host: Arc<dyn SourceHost>,
        analyzer: Arc<dyn ChunkAnalyzer>,
        store: Arc<dyn ReviewStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            host,
            analyzer,
            store,
            extractor: tokio::sync::Mutex::new(StructureExtractor::new()),
            config,
        }
    }

    /// Execute one review attempt. At most one non-`AlreadyExists` outcome
    /// ever exists per (repository, commit SHA).
    pub async fn execute_review(
        &self,
        request: ReviewRequest,
    ) -> Result<ReviewSuccess, ReviewError> {
        let started = Instant::now();

        // Malformed repository identity is a caller contract breach.
        let (owner, repo) = parse_full_name(&request.repository_full_name)
            .ok_or_else(|| {
                ReviewError::Db(format!(
                    "malformed repository name: {}",
                    request.repository_full_name
                ))
            })?;

        let repository = self
            .store
            .find_repository(&request.repository_full_name)
            .await
            .map_err(|e| ReviewError::Db(e.to_string()))?;
        match repository {
            Some(r) if r.enabled => {}
            Some(_) => {
                return Err(ReviewError::Db(format!(
                    "repository is disabled: {}",
                    request.repository_full_name
                )))
            }
            None => {
                return Err(ReviewError::Db(format!(
                    "repository not registered: {}",
                    request.repository_full_name
                )))
            }
        }

        // Idempotency: an existing record for this commit aborts the whole
        // attempt with no side effects.
        let existing = self
            .store
            .find_by_commit(&request.repository_full_name, &request.commit_sha)
            .await
            .map_err(|e| ReviewError::Db(e.to_string()))?;
        if existing.is_some() {
            info!(
                repo = %request.repository_full_name,
                sha = %request.commit_sha,
                "review already exists, skipping"
            );
            return Err(ReviewError::AlreadyExists);
        }

        // A race past the lookup is caught by the store's uniqueness
        // constraint and surfaces as a DB error.
        let review_id = self
            .store
            .create(
                &request.repository_full_name,
                request.pull_request_number,
                &request.commit_sha,
            )
            .await
            .map_err(|e| ReviewError::Db(e.to_string()))?;
        self.store
            .update_status(review_id, ReviewStatus::Processing)
            .await
            .map_err(|e| ReviewError::Db(e.to_string()))?;

        let diff_text = match self
            .host
            .fetch_diff(&owner, &repo, request.pull_request_number)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                let reason = format!("diff fetch failed: {}", e);
                self.record_failure(review_id, &reason).await;
                return Err(ReviewError::DiffFetchFailed(e.to_string()));
            }
        };

        let parsed = match diff::parse(&diff_text) {
            Ok(parsed) => parsed,
            Err(e) => {
                let reason = format!("diff parse failed: {}", e);
                self.record_failure(review_id, &reason).await;
                return Err(ReviewError::DiffParseFailed(e.to_string()));
            }
        };

        if parsed.files.is_empty() {
            return self
                .complete_empty(review_id, SUMMARY_NO_REVIEWABLE_FILES, started)
                .await;
        }

        let contents = self
            .fetch_contents(&owner, &repo, &request.commit_sha, &parsed)
            .await;
        let structures = self.extract_structures(&contents).await;

        let chunks = match context::build(
            &parsed,
            &structures,
            &contents_by_path(&contents),
            self.config.max_tokens_per_chunk,
        ) {
            Ok(chunks) => chunks,
            Err(context::ContextError::NoReviewableFiles) => {
                return self
                    .complete_empty(review_id, SUMMARY_NO_REVIEWABLE_CONTENT, started)
                    .await;
            }
        };

        // All-or-nothing: the first chunk failure aborts the remaining
        // chunks so a partially analyzed diff is never posted.
        let mut all_findings: Vec<ReviewFinding> = Vec::new();
        let mut chunk_summaries: Vec<String> = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            match self.analyzer.analyze(chunk).await {
                Ok(analysis) => {
                    debug!(
                        chunk = i,
                        findings = analysis.findings.len(),
                        "chunk analyzed"
                    );
                    all_findings.extend(analysis.findings);
                    if !analysis.summary.trim().is_empty() {
                        chunk_summaries.push(analysis.summary);
                    }
                }
                Err(e) => {
                    let reason = format!("analysis failed on chunk {}: {}", i + 1, e);
                    self.record_failure(review_id, &reason).await;
                    return Err(ReviewError::LlmFailed(e.to_string()));
                }
            }
        }

        let outcome = findings::map_findings(all_findings, &parsed);
        let summary = findings::build_summary(
            &chunk_summaries.join("\n\n"),
            &outcome.mapped,
            &outcome.unmapped,
        );
        let issues_found = outcome.mapped.len() + outcome.unmapped.len();

        let disposition = if outcome
            .mapped
            .iter()
            .map(|c| &c.finding)
            .chain(outcome.unmapped.iter().map(|u| &u.finding))
            .any(|f| f.is_critical())
        {
            Disposition::RequestChanges
        } else {
            Disposition::Comment
        };

        let submission = ReviewSubmission {
            commit_sha: request.commit_sha.clone(),
            body: summary.clone(),
            disposition,
            comments: outcome
                .mapped
                .iter()
                .map(|c| DraftComment {
                    path: c.path.clone(),
                    line: c.line,
                    side: c.side,
                    body: c.body.clone(),
                })
                .collect(),
        };

        // Posting is best-effort: findings are still persisted so the
        // record reflects what was found even if delivery failed.
        match self
            .host
            .post_review(&owner, &repo, request.pull_request_number, &submission)
            .await
        {
            Ok(posted) => info!(
                review_id = posted.review_id,
                posted = posted.posted_count,
                "review posted"
            ),
            Err(e) => warn!("failed to post review: {}", e),
        }

        let stored = stored_comments(&outcome.mapped, &outcome.unmapped);
        if let Err(e) = self.store.insert_comments(review_id, &stored).await {
            warn!("failed to persist review comments: {}", e);
        }

        let processing_time_ms = started.elapsed().as_millis() as u64;
        self.store
            .complete(review_id, &summary, issues_found, processing_time_ms)
            .await
            .map_err(|e| ReviewError::Db(e.to_string()))?;

        Ok(ReviewSuccess {
            review_id,
            issues_found,
            processing_time_ms,
            summary,
        })
    }

    /// Concurrent head-content fetch for every non-binary, non-deleted
    /// file. Per-file failures are logged and excluded; siblings proceed.
    async fn fetch_contents(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
        parsed: &diff::ParsedDiff,
    ) -> Vec<(String, String)> {
        let mut set = JoinSet::new();
        for file in &parsed.files {
            if file.is_binary || file.change_kind == ChangeKind::Deleted {
                continue;
            }
            let host = Arc::clone(&self.host);
            let owner = owner.to_string();
            let repo = repo.to_string();
            let reference = reference.to_string();
            let path = file.path.clone();
            set.spawn(async move {
                let result = host
                    .fetch_file_content(&owner, &repo, &path, &reference)
                    .await;
                (path, result)
            });
        }

        let mut contents = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((path, Ok(text))) => contents.push((path, text)),
                Ok((path, Err(e))) => {
                    warn!(path = %path, "content fetch failed, skipping enrichment: {}", e)
                }
                Err(e) => warn!("content fetch task panicked: {}", e),
            }
        }
        contents
    }

    /// Best-effort structure extraction over fetched contents. Failures
    /// degrade enrichment only; the review proceeds on diff-level data.
    async fn extract_structures(
        &self,
        contents: &[(String, String)],
    ) -> HashMap<String, AstFileContext> {
        let mut extractor = self.extractor.lock().await;
        if let Err(e) = extractor.ensure_initialized() {
            warn!("syntax backend initialization failed, skipping enrichment: {}", e);
            return HashMap::new();
        }

        let mut structures = HashMap::new();
        for (path, text) in contents {
            let Some(language) = diff::Language::from_path(path) else {
                continue;
            };
            match extractor.extract(text, language, path) {
                Ok(ctx) => {
                    structures.insert(path.clone(), ctx);
                }
                Err(e) => warn!(path = %path, "structure extraction failed: {}", e),
            }
        }
        structures
    }

    /// An empty-but-valid diff completes successfully with zero issues.
    async fn complete_empty(
        &self,
        review_id: u64,
        summary: &str,
        started: Instant,
    ) -> Result<ReviewSuccess, ReviewError> {
        let processing_time_ms = started.elapsed().as_millis() as u64;
        self.store
            .complete(review_id, summary, 0, processing_time_ms)
            .await
            .map_err(|e| ReviewError::Db(e.to_string()))?;
        Ok(ReviewSuccess {
            review_id,
            issues_found: 0,
            processing_time_ms,
            summary: summary.to_string(),
        })
    }

    async fn record_failure(&self, review_id: u64, reason: &str) {
        warn!(review_id, "{}", reason);
        if let Err(e) = self.store.fail(review_id, reason).await {
            warn!("failed to record failure status: {}", e);
        }
    }
}

/// Split "owner/repo" into its halves; both must be non-empty and the
/// remainder must not contain further slashes.
fn parse_full_name(full_name: &str) -> Option<(String, String)> {
    let (owner, repo) = full_name.split_once('/')?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

fn contents_by_path(contents: &[(String, String)]) -> HashMap<String, String> {
    contents.iter().cloned().collect()
}

fn stored_comments(
    mapped: &[MappedReviewComment],
    unmapped: &[UnmappedFinding],
) -> Vec<StoredComment> {
    let mut stored = Vec::with_capacity(mapped.len() + unmapped.len());
    for comment in mapped {
        stored.push(StoredComment {
            path: comment.finding.path.clone(),
            line: comment.finding.line,
            category: comment.finding.category.clone(),
            severity: comment.finding.severity.clone(),
            message: comment.finding.message.clone(),
            suggestion: comment.finding.suggestion.clone(),
            placed_inline: true,
            unmapped_reason: None,
        });
    }
    for item in unmapped {
        stored.push(StoredComment {
            path: item.finding.path.clone(),
            line: item.finding.line,
            category: item.finding.category.clone(),
            severity: item.finding.severity.clone(),
            message: item.finding.message.clone(),
            suggestion: item.finding.suggestion.clone(),
            placed_inline: false,
            unmapped_reason: Some(item.reason.clone()),
        });
    }
    stored
}

#[cfg(test)]
mod tests {
    use super::store::MemoryStore;
    use super::*;
    use std::sync::Mutex;

    const DIFF: &str = "\
diff --git a/src/auth.ts b/src/auth.ts
--- a/src/auth.ts
+++ b/src/auth.ts
@@ -1,2 +1,3 @@
 const session = load();
+const token = input;
 export { session };
";

    struct MockHost {
        diff: Result<String, HostError>,
        content: Option<String>,
        post_result: Result<PostedReview, HostError>,
        posted: Mutex<Vec<ReviewSubmission>>,
    }

    impl MockHost {
        fn with_diff(diff: &str) -> Self {
            Self {
                diff: Ok(diff.to_string()),
                content: Some("const session = load();\nconst token = input;\nexport { session };\n".to_string()),
                post_result: Ok(PostedReview {
                    review_id: 42,
                    posted_count: 0,
                }),
                posted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SourceHost for MockHost {
        async fn fetch_diff(&self, _: &str, _: &str, _: u64) -> Result<String, HostError> {
            match &self.diff {
                Ok(text) => Ok(text.clone()),
                Err(_) => Err(HostError::NotFound),
            }
        }

        async fn fetch_file_content(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<String, HostError> {
            self.content.clone().ok_or(HostError::NotFound)
        }

        async fn post_review(
            &self,
            _: &str,
            _: &str,
            _: u64,
            submission: &ReviewSubmission,
        ) -> Result<PostedReview, HostError> {
            self.posted.lock().unwrap().push(submission.clone());
            match &self.post_result {
                Ok(posted) => Ok(posted.clone()),
                Err(_) => Err(HostError::RateLimited),
            }
        }
    }

    struct MockAnalyzer {
        findings: Vec<ReviewFinding>,
        fail: bool,
    }

    impl MockAnalyzer {
        fn with_findings(findings: Vec<ReviewFinding>) -> Self {
            Self {
                findings,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl ChunkAnalyzer for MockAnalyzer {
        async fn analyze(&self, _: &ReviewChunk) -> Result<ChunkAnalysis, AnalyzerError> {
            if self.fail {
                return Err(AnalyzerError::Timeout);
            }
            Ok(ChunkAnalysis {
                findings: self.findings.clone(),
                summary: "Reviewed the change.".to_string(),
                token_usage: None,
            })
        }
    }

    fn finding(line: u32, severity: &str) -> ReviewFinding {
        ReviewFinding {
            path: "src/auth.ts".to_string(),
            line,
            category: "security".to_string(),
            severity: severity.to_string(),
            message: "unvalidated input".to_string(),
            suggestion: None,
            confidence: 0.9,
        }
    }

    fn orchestrator(
        host: MockHost,
        analyzer: MockAnalyzer,
        store: Arc<MemoryStore>,
    ) -> ReviewOrchestrator {
        ReviewOrchestrator::new(
            Arc::new(host),
            Arc::new(analyzer),
            store,
            OrchestratorConfig::default(),
        )
    }

    fn request() -> ReviewRequest {
        ReviewRequest {
            repository_full_name: "octo/widgets".to_string(),
            pull_request_number: 12,
            commit_sha: "abc123".to_string(),
        }
    }

    fn registered_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.register_repository("octo/widgets", true);
        store
    }

    #[tokio::test]
    async fn successful_review_completes_and_persists() {
        let store = registered_store();
        let orch = orchestrator(
            MockHost::with_diff(DIFF),
            MockAnalyzer::with_findings(vec![finding(2, "warning")]),
            Arc::clone(&store),
        );

        let success = orch.execute_review(request()).await.unwrap();
        assert_eq!(success.issues_found, 1);

        let record = store.review(success.review_id).unwrap();
        assert_eq!(record.status, ReviewStatus::Completed);
        assert_eq!(record.issues_found, 1);

        let comments = store.comments(success.review_id);
        assert_eq!(comments.len(), 1);
        assert!(comments[0].placed_inline);
    }

    #[tokio::test]
    async fn second_attempt_returns_already_exists() {
        let store = registered_store();
        let orch = orchestrator(
            MockHost::with_diff(DIFF),
            MockAnalyzer::with_findings(vec![]),
            Arc::clone(&store),
        );

        orch.execute_review(request()).await.unwrap();
        let second = orch.execute_review(request()).await;
        assert!(matches!(second, Err(ReviewError::AlreadyExists)));
        assert_eq!(store.review_count(), 1);
    }

    #[tokio::test]
    async fn malformed_repository_name_is_db_error() {
        let store = registered_store();
        let orch = orchestrator(
            MockHost::with_diff(DIFF),
            MockAnalyzer::with_findings(vec![]),
            Arc::clone(&store),
        );

        let mut req = request();
        req.repository_full_name = "no-slash-here".to_string();
        assert!(matches!(
            orch.execute_review(req).await,
            Err(ReviewError::Db(_))
        ));
        // No record was created.
        assert_eq!(store.review_count(), 0);
    }

    #[tokio::test]
    async fn unregistered_repository_is_db_error() {
        let store = Arc::new(MemoryStore::new());
        let orch = orchestrator(
            MockHost::with_diff(DIFF),
            MockAnalyzer::with_findings(vec![]),
            Arc::clone(&store),
        );
        assert!(matches!(
            orch.execute_review(request()).await,
            Err(ReviewError::Db(_))
        ));
    }

    #[tokio::test]
    async fn disabled_repository_is_db_error() {
        let store = Arc::new(MemoryStore::new());
        store.register_repository("octo/widgets", false);
        let orch = orchestrator(
            MockHost::with_diff(DIFF),
            MockAnalyzer::with_findings(vec![]),
            Arc::clone(&store),
        );
        assert!(matches!(
            orch.execute_review(request()).await,
            Err(ReviewError::Db(_))
        ));
        assert_eq!(store.review_count(), 0);
    }

    #[tokio::test]
    async fn content_fetch_failure_degrades_to_diff_only() {
        let store = registered_store();
        let mut host = MockHost::with_diff(DIFF);
        host.content = None;
        let orch = orchestrator(
            host,
            MockAnalyzer::with_findings(vec![finding(2, "warning")]),
            Arc::clone(&store),
        );

        // No file content means no structural enrichment, but the attempt
        // still completes on diff-level data.
        let success = orch.execute_review(request()).await.unwrap();
        assert_eq!(success.issues_found, 1);

        let record = store.review(success.review_id).unwrap();
        assert_eq!(record.status, ReviewStatus::Completed);
        assert!(store.comments(success.review_id)[0].placed_inline);
    }

    #[tokio::test]
    async fn diff_fetch_failure_marks_review_failed() {
        let store = registered_store();
        let mut host = MockHost::with_diff(DIFF);
        host.diff = Err(HostError::NotFound);
        let orch = orchestrator(
            host,
            MockAnalyzer::with_findings(vec![]),
            Arc::clone(&store),
        );

        let result = orch.execute_review(request()).await;
        assert!(matches!(result, Err(ReviewError::DiffFetchFailed(_))));

        let record = store.review(1).unwrap();
        assert_eq!(record.status, ReviewStatus::Failed);
        assert!(record.failure_reason.unwrap().contains("diff fetch failed"));
    }

    #[tokio::test]
    async fn binary_only_diff_completes_with_no_content_summary() {
        let store = registered_store();
        let binary = "\
diff --git a/x.png b/x.png
Binary files a/x.png and b/x.png differ
";
        let orch = orchestrator(
            MockHost::with_diff(binary),
            MockAnalyzer::with_findings(vec![]),
            Arc::clone(&store),
        );

        let success = orch.execute_review(request()).await.unwrap();
        assert_eq!(success.issues_found, 0);
        assert_eq!(success.summary, SUMMARY_NO_REVIEWABLE_CONTENT);
        let record = store.review(success.review_id).unwrap();
        assert_eq!(record.status, ReviewStatus::Completed);
    }

    #[tokio::test]
    async fn analyzer_failure_fails_the_attempt() {
        let store = registered_store();
        let mut analyzer = MockAnalyzer::with_findings(vec![]);
        analyzer.fail = true;
        let orch = orchestrator(MockHost::with_diff(DIFF), analyzer, Arc::clone(&store));

        let result = orch.execute_review(request()).await;
        assert!(matches!(result, Err(ReviewError::LlmFailed(_))));
        let record = store.review(1).unwrap();
        assert_eq!(record.status, ReviewStatus::Failed);
    }

    #[tokio::test]
    async fn post_failure_does_not_fail_the_review() {
        let store = registered_store();
        let mut host = MockHost::with_diff(DIFF);
        host.post_result = Err(HostError::RateLimited);
        let orch = orchestrator(
            host,
            MockAnalyzer::with_findings(vec![finding(2, "warning")]),
            Arc::clone(&store),
        );

        let success = orch.execute_review(request()).await.unwrap();
        let record = store.review(success.review_id).unwrap();
        assert_eq!(record.status, ReviewStatus::Completed);
        // Findings persisted despite the failed post.
        assert_eq!(store.comments(success.review_id).len(), 1);
    }

    #[tokio::test]
    async fn critical_finding_requests_changes() {
        let store = registered_store();
        let host = Arc::new(MockHost::with_diff(DIFF));
        let orch = ReviewOrchestrator::new(
            Arc::clone(&host) as Arc<dyn SourceHost>,
            Arc::new(MockAnalyzer::with_findings(vec![finding(2, "critical")])),
            Arc::clone(&store) as Arc<dyn ReviewStore>,
            OrchestratorConfig::default(),
        );

        orch.execute_review(request()).await.unwrap();

        let posted = host.posted.lock().unwrap();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].disposition, Disposition::RequestChanges);
        assert_eq!(posted[0].comments.len(), 1);
        assert_eq!(posted[0].comments[0].side, Side::Right);
        assert_eq!(posted[0].comments[0].line, 2);
    }

    #[tokio::test]
    async fn non_critical_findings_post_as_comment() {
        let store = registered_store();
        let host = Arc::new(MockHost::with_diff(DIFF));
        let orch = ReviewOrchestrator::new(
            Arc::clone(&host) as Arc<dyn SourceHost>,
            Arc::new(MockAnalyzer::with_findings(vec![finding(2, "warning")])),
            Arc::clone(&store) as Arc<dyn ReviewStore>,
            OrchestratorConfig::default(),
        );

        orch.execute_review(request()).await.unwrap();

        let posted = host.posted.lock().unwrap();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].disposition, Disposition::Comment);
        assert_eq!(posted[0].commit_sha, "abc123");
    }

    #[tokio::test]
    async fn unmappable_finding_lands_in_summary() {
        let store = registered_store();
        let orch = orchestrator(
            MockHost::with_diff(DIFF),
            MockAnalyzer::with_findings(vec![finding(500, "warning")]),
            Arc::clone(&store),
        );

        let success = orch.execute_review(request()).await.unwrap();
        assert_eq!(success.issues_found, 1);
        assert!(success.summary.contains("Additional findings"));
        let comments = store.comments(success.review_id);
        assert_eq!(comments.len(), 1);
        assert!(!comments[0].placed_inline);
        assert!(comments[0]
            .unmapped_reason
            .as_deref()
            .unwrap()
            .contains("not within the diff context"));
    }

    #[test]
    fn parse_full_name_validation() {
        assert_eq!(
            parse_full_name("octo/widgets"),
            Some(("octo".to_string(), "widgets".to_string()))
        );
        assert_eq!(parse_full_name("octowidgets"), None);
        assert_eq!(parse_full_name("/widgets"), None);
        assert_eq!(parse_full_name("octo/"), None);
        assert_eq!(parse_full_name("a/b/c"), None);
    }
}
