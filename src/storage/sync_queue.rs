use chrono::Utc;

use super::schema::Database;
use super::types::{Collection, NewStory, QueuedSubmission, StorageError};
use crate::sync::{SyncTrigger, SYNC_TAG};

/// Length of the random part of a submission id.
const ID_SUFFIX_LEN: usize = 7;

/// `<unix millis>-<random>`: sorts roughly by time, unique thanks to the suffix.
pub(crate) fn generate_submission_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}",
        Utc::now().timestamp_millis(),
        &suffix[..ID_SUFFIX_LEN]
    )
}

impl Database {
    // ========================================================================
    // Sync Queue Operations
    // ========================================================================

    /// Persist a story for later delivery and return its generated id.
    ///
    /// `token` is the bearer token current at the time of the call; drains use
    /// this snapshot rather than re-reading configuration. After the record is
    /// durable, `trigger` (if any) is asked to schedule a drain. A failed
    /// registration never fails the enqueue: connectivity-regained and startup
    /// drains pick the item up anyway.
    pub async fn enqueue_story(
        &self,
        story: &NewStory,
        token: Option<String>,
        trigger: Option<&SyncTrigger>,
    ) -> Result<String, StorageError> {
        let id = generate_submission_id();
        let item = QueuedSubmission::new(id.clone(), story, token, Utc::now().timestamp_millis());

        self.put(Collection::SyncQueue, &item).await?;
        tracing::info!(
            id = %id,
            photo_bytes = story.photo.len(),
            "Queued story for background sync"
        );

        if let Some(trigger) = trigger {
            if let Err(e) = trigger.register(SYNC_TAG) {
                tracing::debug!(error = %e, "Deferred sync registration failed, relying on connectivity events");
            }
        }

        Ok(id)
    }

    /// Every readable pending submission in enqueue order.
    ///
    /// A record that cannot be decoded stays in the table untouched but is
    /// left out, so it never holds up the submissions behind it.
    pub async fn get_all_queued(&self) -> Result<Vec<QueuedSubmission>, StorageError> {
        self.get_all_lossy(Collection::SyncQueue).await
    }

    pub async fn get_queued(&self, id: &str) -> Result<Option<QueuedSubmission>, StorageError> {
        self.get(Collection::SyncQueue, id).await
    }

    /// Remove a submission. Idempotent: another drain may already have
    /// removed it.
    pub async fn remove_queued(&self, id: &str) -> Result<(), StorageError> {
        let removed = self.delete(Collection::SyncQueue, id).await?;
        if !removed {
            tracing::debug!(id = %id, "Queued story already removed");
        }
        Ok(())
    }

    pub async fn queued_count(&self) -> Result<i64, StorageError> {
        self.count(Collection::SyncQueue).await
    }
}
