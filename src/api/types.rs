use serde::Deserialize;
use thiserror::Error;

use crate::storage::{GeoPoint, NewStory, QueuedSubmission, StoryRecord};

/// Errors from the remote story API.
///
/// `Timeout` and `Network` mean the request never completed (offline,
/// DNS, TLS, reset). `Rejected` means the server answered with a non-2xx
/// status. Submissions treat both the same way: the story is queued.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Server rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Invalid API base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("Insecure API base URL: HTTPS required (except localhost for testing)")]
    InsecureBaseUrl,
    #[error("{0}")]
    Validation(String),
}

impl ApiError {
    /// The request did not complete: treat as offline.
    pub fn is_network_failure(&self) -> bool {
        matches!(self, ApiError::Timeout | ApiError::Network(_))
    }

    /// The server answered, but not with success.
    pub fn is_server_rejection(&self) -> bool {
        matches!(self, ApiError::Rejected { .. })
    }

    /// HTTP 401: the bearer token is missing, expired or revoked.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Rejected { status: 401, .. })
    }
}

/// Borrowed view of the fields sent in a story upload.
#[derive(Clone, Copy)]
pub struct StoryUpload<'a> {
    pub description: &'a str,
    pub photo: &'a [u8],
    pub location: Option<GeoPoint>,
}

impl<'a> From<&'a NewStory> for StoryUpload<'a> {
    fn from(story: &'a NewStory) -> Self {
        Self {
            description: &story.description,
            photo: &story.photo,
            location: story.location,
        }
    }
}

impl<'a> From<&'a QueuedSubmission> for StoryUpload<'a> {
    fn from(item: &'a QueuedSubmission) -> Self {
        Self {
            description: item.description(),
            photo: item.photo(),
            location: item.location(),
        }
    }
}

/// Credentials returned by `POST /login`.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResult {
    pub user_id: String,
    pub name: String,
    pub token: String,
}

impl std::fmt::Debug for LoginResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginResult")
            .field("user_id", &self.user_id)
            .field("name", &self.name)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// Response envelopes
// ============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct MessageResponse {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoriesResponse {
    #[serde(default)]
    pub list_story: Vec<StoryRecord>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StoryResponse {
    pub story: StoryRecord,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoginResponse {
    pub login_result: LoginResult,
}
