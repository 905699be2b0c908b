//! Review persistence interface and an in-process implementation.
//!
//! The store owns the review lifecycle records and the (repository, commit
//! SHA) uniqueness constraint that backs the orchestrator's idempotency
//! guarantee: even when two concurrent attempts pass the lookup, the second
//! insert fails here.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Lifecycle state of one review attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A registered repository the service is allowed to review.
#[derive(Debug, Clone)]
pub struct RepositoryRecord {
    pub full_name: String,
    pub enabled: bool,
}

/// One persisted review attempt.
#[derive(Debug, Clone)]
pub struct ReviewRecord {
    pub id: u64,
    pub repository: String,
    pub pull_request_number: u64,
    pub commit_sha: String,
    pub status: ReviewStatus,
    pub summary: Option<String>,
    pub issues_found: usize,
    pub failure_reason: Option<String>,
    pub processing_time_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// One persisted finding, mapped or summary-only.
#[derive(Debug, Clone)]
pub struct StoredComment {
    pub path: String,
    pub line: u32,
    pub category: String,
    pub severity: String,
    pub message: String,
    pub suggestion: Option<String>,
    pub placed_inline: bool,
    /// Reason the finding stayed summary-only, when it did.
    pub unmapped_reason: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("review record not found: {0}")]
    NotFound(u64),
    #[error("review already exists for {0}@{1}")]
    Duplicate(String, String),
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Review lifecycle CRUD plus the idempotency lookup.
#[async_trait]
pub trait ReviewStore: Send + Sync {
    async fn find_repository(
        &self,
        full_name: &str,
    ) -> Result<Option<RepositoryRecord>, StoreError>;

    /// Idempotency lookup by (repository, commit SHA).
    async fn find_by_commit(
        &self,
        repository: &str,
        commit_sha: &str,
    ) -> Result<Option<ReviewRecord>, StoreError>;

    /// Create a PENDING record. Enforces the (repository, commit SHA)
    /// uniqueness constraint.
    async fn create(
        &self,
        repository: &str,
        pull_request_number: u64,
        commit_sha: &str,
    ) -> Result<u64, StoreError>;

    async fn update_status(&self, id: u64, status: ReviewStatus) -> Result<(), StoreError>;

    async fn complete(
        &self,
        id: u64,
        summary: &str,
        issues_found: usize,
        processing_time_ms: u64,
    ) -> Result<(), StoreError>;

    async fn fail(&self, id: u64, reason: &str) -> Result<(), StoreError>;

    /// Bulk insert of the attempt's findings.
    async fn insert_comments(
        &self,
        review_id: u64,
        comments: &[StoredComment],
    ) -> Result<(), StoreError>;
}

#[derive(Default)]
struct MemoryStoreInner {
    next_id: u64,
    repositories: HashMap<String, RepositoryRecord>,
    reviews: Vec<ReviewRecord>,
    comments: HashMap<u64, Vec<StoredComment>>,
}

/// In-process store backing single-shot CLI runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a repository as reviewable.
    pub fn register_repository(&self, full_name: &str, enabled: bool) {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.repositories.insert(
            full_name.to_string(),
            RepositoryRecord {
                full_name: full_name.to_string(),
                enabled,
            },
        );
    }

    pub fn review(&self, id: u64) -> Option<ReviewRecord> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        inner.reviews.iter().find(|r| r.id == id).cloned()
    }

    pub fn comments(&self, review_id: u64) -> Vec<StoredComment> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        inner.comments.get(&review_id).cloned().unwrap_or_default()
    }

    pub fn review_count(&self) -> usize {
        let inner = self.inner.lock().expect("store mutex poisoned");
        inner.reviews.len()
    }
}

#[async_trait]
impl ReviewStore for MemoryStore {
    async fn find_repository(
        &self,
        full_name: &str,
    ) -> Result<Option<RepositoryRecord>, StoreError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.repositories.get(full_name).cloned())
    }

    async fn find_by_commit(
        &self,
        repository: &str,
        commit_sha: &str,
    ) -> Result<Option<ReviewRecord>, StoreError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner
            .reviews
            .iter()
            .find(|r| r.repository == repository && r.commit_sha == commit_sha)
            .cloned())
    }

    async fn create(
        &self,
        repository: &str,
        pull_request_number: u64,
        commit_sha: &str,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        if inner
            .reviews
            .iter()
            .any(|r| r.repository == repository && r.commit_sha == commit_sha)
        {
            return Err(StoreError::Duplicate(
                repository.to_string(),
                commit_sha.to_string(),
            ));
        }
        inner.next_id += 1;
        let id = inner.next_id;
        inner.reviews.push(ReviewRecord {
            id,
            repository: repository.to_string(),
            pull_request_number,
            commit_sha: commit_sha.to_string(),
            status: ReviewStatus::Pending,
            summary: None,
            issues_found: 0,
            failure_reason: None,
            processing_time_ms: None,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn update_status(&self, id: u64, status: ReviewStatus) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let review = inner
            .reviews
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        review.status = status;
        Ok(())
    }

    async fn complete(
        &self,
        id: u64,
        summary: &str,
        issues_found: usize,
        processing_time_ms: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let review = inner
            .reviews
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        review.status = ReviewStatus::Completed;
        review.summary = Some(summary.to_string());
        review.issues_found = issues_found;
        review.processing_time_ms = Some(processing_time_ms);
        Ok(())
    }

    async fn fail(&self, id: u64, reason: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let review = inner
            .reviews
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        review.status = ReviewStatus::Failed;
        review.failure_reason = Some(reason.to_string());
        Ok(())
    }

    async fn insert_comments(
        &self,
        review_id: u64,
        comments: &[StoredComment],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        if !inner.reviews.iter().any(|r| r.id == review_id) {
            return Err(StoreError::NotFound(review_id));
        }
        inner
            .comments
            .entry(review_id)
            .or_default()
            .extend_from_slice(comments);
        Ok(())
    }
}
