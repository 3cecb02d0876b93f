use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use super::trigger::SyncTrigger;
use crate::api::ApiClient;
use crate::storage::{Database, NewStory, StorageError};

/// Largest photo the API accepts.
pub const DEFAULT_MAX_PHOTO_BYTES: usize = 1024 * 1024; // 1MB

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Description must not be empty")]
    EmptyDescription,
    #[error("A photo is required")]
    MissingPhoto,
    #[error("Photo is {size} bytes, the limit is {max} bytes")]
    PhotoTooLarge { size: usize, max: usize },
    #[error("Invalid location ({lat}, {lon}): latitude must be within ±90 and longitude within ±180")]
    InvalidLocation { lat: f64, lon: f64 },
}

/// Check a submission before it goes anywhere.
pub fn validate_story(story: &NewStory, max_photo_bytes: usize) -> Result<(), ValidationError> {
    if story.description.trim().is_empty() {
        return Err(ValidationError::EmptyDescription);
    }
    if story.photo.is_empty() {
        return Err(ValidationError::MissingPhoto);
    }
    if story.photo.len() > max_photo_bytes {
        return Err(ValidationError::PhotoTooLarge {
            size: story.photo.len(),
            max: max_photo_bytes,
        });
    }
    if let Some(point) = story.location {
        let valid = point.lat.is_finite()
            && point.lon.is_finite()
            && (-90.0..=90.0).contains(&point.lat)
            && (-180.0..=180.0).contains(&point.lon);
        if !valid {
            return Err(ValidationError::InvalidLocation {
                lat: point.lat,
                lon: point.lon,
            });
        }
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The story could be neither published nor queued.
    #[error("Could not queue story: {0}")]
    Storage(#[from] StorageError),
}

/// Why a story went to the queue instead of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueReason {
    Offline,
    NetworkFailure,
    ServerRejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Published { message: String },
    Queued { id: String, reason: QueueReason },
}

impl SubmitOutcome {
    pub fn user_message(&self) -> String {
        match self {
            SubmitOutcome::Published { message } if !message.is_empty() => {
                format!("Story published: {message}")
            }
            SubmitOutcome::Published { .. } => "Story published".to_string(),
            SubmitOutcome::Queued { reason, .. } => match reason {
                QueueReason::Offline => {
                    "You are offline. Story saved and will be sent when the connection returns"
                        .to_string()
                }
                QueueReason::NetworkFailure => {
                    "Upload failed. Story saved and will be sent automatically later".to_string()
                }
                QueueReason::ServerRejected => {
                    "Server did not accept the story. It was saved and will be retried later"
                        .to_string()
                }
            },
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, SubmitOutcome::Queued { .. })
    }
}

/// Publishes new stories, falling back to the sync queue.
pub struct StoryPublisher {
    db: Database,
    api: ApiClient,
    trigger: Option<SyncTrigger>,
    max_photo_bytes: usize,
}

impl StoryPublisher {
    pub fn new(db: Database, api: ApiClient) -> Self {
        Self {
            db,
            api,
            trigger: None,
            max_photo_bytes: DEFAULT_MAX_PHOTO_BYTES,
        }
    }

    /// Schedule a deferred drain whenever a story is queued.
    pub fn with_trigger(mut self, trigger: SyncTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn with_max_photo_bytes(mut self, max_photo_bytes: usize) -> Self {
        self.max_photo_bytes = max_photo_bytes;
        self
    }

    /// Publish `story` now, or queue it for later.
    ///
    /// `online` is the caller's current view of connectivity; when false the
    /// network is not tried at all. The token is captured into the queue
    /// record as-is.
    pub async fn publish(
        &self,
        story: &NewStory,
        token: Option<&SecretString>,
        online: bool,
    ) -> Result<SubmitOutcome, SubmitError> {
        validate_story(story, self.max_photo_bytes)?;

        if !online {
            return self.queue(story, token, QueueReason::Offline).await;
        }

        match self.api.submit_story(story.into(), token).await {
            Ok(message) => {
                tracing::info!(photo_bytes = story.photo.len(), "Story published");
                Ok(SubmitOutcome::Published { message })
            }
            Err(e) => {
                let reason = if e.is_server_rejection() {
                    QueueReason::ServerRejected
                } else {
                    QueueReason::NetworkFailure
                };
                tracing::warn!(error = %e, "Direct submission failed, queueing story");
                self.queue(story, token, reason).await
            }
        }
    }

    async fn queue(
        &self,
        story: &NewStory,
        token: Option<&SecretString>,
        reason: QueueReason,
    ) -> Result<SubmitOutcome, SubmitError> {
        let token = token.map(|t| t.expose_secret().to_string());
        let id = self
            .db
            .enqueue_story(story, token, self.trigger.as_ref())
            .await?;
        Ok(SubmitOutcome::Queued { id, reason })
    }
}
