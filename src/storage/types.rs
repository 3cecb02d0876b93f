use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Local storage errors.
///
/// `Unavailable` is the catch-all for "the durable store cannot be used right
/// now" (file missing, disk full, locked, table gone). Read paths convert it
/// into empty results; write paths report it.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying SQLite database could not be used
    #[error("Local storage unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),

    /// Schema creation or upgrade failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A stored record could not be encoded or decoded
    #[error("Corrupt record in {collection}: {source}")]
    Codec {
        collection: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

// ============================================================================
// Collections
// ============================================================================

/// Named durable collections.
///
/// Each collection is its own table keyed by a unique string. The schema
/// version a collection first appeared in decides when it gets created during
/// an upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// User bookmarks, keyed by story id
    SavedStories,
    /// Last successful story-list fetch, keyed by story id
    CachedStories,
    /// Pending story submissions, keyed by generated submission id
    SyncQueue,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::SyncQueue,
        Collection::SavedStories,
        Collection::CachedStories,
    ];

    /// Table name backing this collection.
    pub fn table(self) -> &'static str {
        match self {
            Collection::SavedStories => "saved_stories",
            Collection::CachedStories => "cached_stories",
            Collection::SyncQueue => "sync_queue",
        }
    }

    /// Schema version that introduced this collection.
    pub(crate) fn introduced_in(self) -> i64 {
        match self {
            Collection::SyncQueue => 1,
            Collection::SavedStories | Collection::CachedStories => 2,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A story as returned by the remote API.
///
/// Identity is `id`. Cached and bookmarked copies are separate snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryRecord {
    pub id: String,
    /// Author display name
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub photo_url: String,
    /// Creation timestamp as sent by the server (ISO 8601)
    #[serde(default)]
    pub created_at: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl StoryRecord {
    /// Coordinates, when both halves are present.
    pub fn location(&self) -> Option<GeoPoint> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some(GeoPoint { lat, lon }),
            _ => None,
        }
    }
}

/// Story snapshot stored in the offline cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedStory {
    #[serde(flatten)]
    pub story: StoryRecord,
    pub cached_at: DateTime<Utc>,
}

/// Latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// A story the user wants to publish.
#[derive(Clone, PartialEq)]
pub struct NewStory {
    pub description: String,
    /// Raw image bytes (uploaded as `photo.jpg`)
    pub photo: Vec<u8>,
    pub location: Option<GeoPoint>,
}

impl fmt::Debug for NewStory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewStory")
            .field("description", &self.description)
            .field("photo_bytes", &self.photo.len())
            .field("location", &self.location)
            .finish()
    }
}

/// A story submission waiting in the sync queue.
///
/// Immutable once enqueued: it is either delivered and removed, or left
/// untouched for the next drain. The bearer token is the one that was current
/// when the user submitted, not whatever is configured at drain time.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedSubmission {
    id: String,
    description: String,
    #[serde(with = "photo_base64")]
    photo: Vec<u8>,
    lat: Option<f64>,
    lon: Option<f64>,
    token: Option<String>,
    /// Milliseconds since the Unix epoch
    enqueued_at: i64,
}

impl QueuedSubmission {
    pub(crate) fn new(id: String, story: &NewStory, token: Option<String>, enqueued_at: i64) -> Self {
        Self {
            id,
            description: story.description.clone(),
            photo: story.photo.clone(),
            lat: story.location.map(|p| p.lat),
            lon: story.location.map(|p| p.lon),
            token,
            enqueued_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn photo(&self) -> &[u8] {
        &self.photo
    }

    pub fn location(&self) -> Option<GeoPoint> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some(GeoPoint { lat, lon }),
            _ => None,
        }
    }

    /// Bearer token captured at enqueue time.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn enqueued_at(&self) -> i64 {
        self.enqueued_at
    }
}

/// Keeps the captured token out of logs and photo bytes out of debug dumps.
impl fmt::Debug for QueuedSubmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedSubmission")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("photo_bytes", &self.photo.len())
            .field("lat", &self.lat)
            .field("lon", &self.lon)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("enqueued_at", &self.enqueued_at)
            .finish()
    }
}

/// Photo bytes are stored base64 encoded inside the JSON record.
mod photo_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
