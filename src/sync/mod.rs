//! Background delivery of stories written while offline.
//!
//! - [`StoryPublisher`] validates a new story and either publishes it or
//!   queues it.
//! - [`SyncCoordinator`] drains the queue, oldest first, on startup, on
//!   connectivity regained and on deferred-sync requests.
//! - [`ConnectivityMonitor`] probes the API host and publishes the online flag.
//! - [`SyncTrigger`] lets an enqueue ask for a drain without waiting for one.

mod connectivity;
mod coordinator;
mod submit;
mod trigger;

pub use connectivity::ConnectivityMonitor;
pub use coordinator::{DrainReport, SyncCoordinator};
pub use submit::{
    validate_story, QueueReason, StoryPublisher, SubmitError, SubmitOutcome, ValidationError,
    DEFAULT_MAX_PHOTO_BYTES,
};
pub use trigger::{trigger_channel, SyncRequest, SyncTrigger, TriggerError, SYNC_TAG};
