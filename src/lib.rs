//! Offline-first client core for a story sharing service.
//!
//! Stories written without a connection are persisted in a durable queue and
//! delivered later; the last fetched story list and the user's bookmarks stay
//! readable offline.

pub mod api;
pub mod config;
pub mod feed;
pub mod storage;
pub mod sync;
