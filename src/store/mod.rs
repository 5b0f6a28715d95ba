//! Persistence seam for notification history and failed notifications.
//!
//! Durable storage is an external capability; the dispatcher and the retry
//! sweeper only see the `NotificationStore` trait, and every call is
//! best-effort from their perspective. An in-memory implementation backs
//! tests and single-node deployments.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::notification::{NotificationOutcome, NotificationRequest};

/// Errors from storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend is unreachable or rejected the operation
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A notification that failed terminally and awaits out-of-band retry.
#[derive(Debug, Clone, Serialize)]
pub struct FailedRecord {
    /// Request identifier
    pub id: Uuid,
    /// The original request, replayable as-is
    pub request: NotificationRequest,
    /// Last observed error message
    pub error: String,
    /// Number of out-of-band retry attempts so far
    pub retry_count: u32,
    /// When the record was first persisted
    pub created_at: DateTime<Utc>,
}

/// Storage seam used by the dispatcher and the retry sweeper.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Append a history record for a terminal dispatch.
    async fn append_history(&self, outcome: &NotificationOutcome) -> Result<(), StoreError>;

    /// Persist (or update) a failed-notification record.
    ///
    /// A record that already exists for the request id keeps its retry count
    /// and gets the new error message.
    async fn save_failed(
        &self,
        request: &NotificationRequest,
        error: &str,
    ) -> Result<(), StoreError>;

    /// Fetch up to `limit` failed records with fewer than `max_attempts`
    /// retries.
    async fn failed_batch(
        &self,
        max_attempts: u32,
        limit: usize,
    ) -> Result<Vec<FailedRecord>, StoreError>;

    /// Increment the retry counter of a failed record.
    async fn mark_retry_attempt(&self, id: Uuid) -> Result<(), StoreError>;

    /// Remove a failed record (after successful re-enqueue).
    async fn delete_failed(&self, id: Uuid) -> Result<(), StoreError>;

    /// Remove failed records whose retry counter reached `max_attempts`.
    ///
    /// Returns the number of records removed.
    async fn purge_exhausted(&self, max_attempts: u32) -> Result<usize, StoreError>;
}

/// In-memory store for tests and single-node deployments.
pub struct InMemoryStore {
    history: Mutex<Vec<NotificationOutcome>>,
    failed: DashMap<Uuid, FailedRecord>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(Vec::new()),
            failed: DashMap::new(),
        }
    }

    /// Snapshot of all history records (test helper)
    pub fn history(&self) -> Vec<NotificationOutcome> {
        self.history.lock().unwrap().clone()
    }

    /// Number of failed records currently held
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Fetch one failed record by id
    pub fn failed_record(&self, id: Uuid) -> Option<FailedRecord> {
        self.failed.get(&id).map(|r| r.clone())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationStore for InMemoryStore {
    async fn append_history(&self, outcome: &NotificationOutcome) -> Result<(), StoreError> {
        self.history.lock().unwrap().push(outcome.clone());
        Ok(())
    }

    async fn save_failed(
        &self,
        request: &NotificationRequest,
        error: &str,
    ) -> Result<(), StoreError> {
        self.failed
            .entry(request.id)
            .and_modify(|record| {
                record.error = error.to_string();
            })
            .or_insert_with(|| FailedRecord {
                id: request.id,
                request: request.clone(),
                error: error.to_string(),
                retry_count: 0,
                created_at: Utc::now(),
            });

        tracing::debug!(id = %request.id, error = %error, "Saved failed notification");
        Ok(())
    }

    async fn failed_batch(
        &self,
        max_attempts: u32,
        limit: usize,
    ) -> Result<Vec<FailedRecord>, StoreError> {
        let batch = self
            .failed
            .iter()
            .filter(|r| r.retry_count < max_attempts)
            .take(limit)
            .map(|r| r.clone())
            .collect();
        Ok(batch)
    }

    async fn mark_retry_attempt(&self, id: Uuid) -> Result<(), StoreError> {
        if let Some(mut record) = self.failed.get_mut(&id) {
            record.retry_count += 1;
        }
        Ok(())
    }

    async fn delete_failed(&self, id: Uuid) -> Result<(), StoreError> {
        self.failed.remove(&id);
        Ok(())
    }

    async fn purge_exhausted(&self, max_attempts: u32) -> Result<usize, StoreError> {
        let before = self.failed.len();
        self.failed.retain(|_, record| record.retry_count < max_attempts);
        Ok(before - self.failed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::Channel;

    fn test_request() -> NotificationRequest {
        NotificationRequest::builder(Channel::Email, "a@b.c")
            .subject("s")
            .content("body")
            .build()
    }

    #[tokio::test]
    async fn test_append_history() {
        let store = InMemoryStore::new();
        let request = test_request();

        store
            .append_history(&NotificationOutcome::success_for(&request, "ok"))
            .await
            .unwrap();
        store
            .append_history(&NotificationOutcome::failure_for(&request, "bad"))
            .await
            .unwrap();

        let history = store.history();
        assert_eq!(history.len(), 2);
        assert!(history[0].success);
        assert!(!history[1].success);
    }

    #[tokio::test]
    async fn test_save_failed_keeps_one_record_per_id() {
        let store = InMemoryStore::new();
        let request = test_request();

        store.save_failed(&request, "first error").await.unwrap();
        store.save_failed(&request, "second error").await.unwrap();

        assert_eq!(store.failed_count(), 1);
        let record = store.failed_record(request.id).unwrap();
        assert_eq!(record.error, "second error");
        assert_eq!(record.retry_count, 0);
    }

    #[tokio::test]
    async fn test_failed_batch_respects_attempt_ceiling() {
        let store = InMemoryStore::new();
        let a = test_request();
        let b = test_request();

        store.save_failed(&a, "err").await.unwrap();
        store.save_failed(&b, "err").await.unwrap();

        store.mark_retry_attempt(a.id).await.unwrap();
        store.mark_retry_attempt(a.id).await.unwrap();
        store.mark_retry_attempt(a.id).await.unwrap();

        let batch = store.failed_batch(3, 10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, b.id);
    }

    #[tokio::test]
    async fn test_purge_exhausted() {
        let store = InMemoryStore::new();
        let a = test_request();
        let b = test_request();

        store.save_failed(&a, "err").await.unwrap();
        store.save_failed(&b, "err").await.unwrap();
        store.mark_retry_attempt(a.id).await.unwrap();
        store.mark_retry_attempt(a.id).await.unwrap();

        let purged = store.purge_exhausted(2).await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.failed_count(), 1);
        assert!(store.failed_record(b.id).is_some());
    }

    #[tokio::test]
    async fn test_delete_failed() {
        let store = InMemoryStore::new();
        let request = test_request();
        store.save_failed(&request, "err").await.unwrap();

        store.delete_failed(request.id).await.unwrap();
        assert_eq!(store.failed_count(), 0);
    }
}
