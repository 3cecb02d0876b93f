mod bookmarks;
mod schema;
mod store;
mod story_cache;
mod sync_queue;
mod types;

pub use schema::{Database, SCHEMA_VERSION};
pub use store::{Record, StoreTransaction};
pub use types::{
    CachedStory, Collection, GeoPoint, NewStory, QueuedSubmission, StorageError, StoryRecord,
};
