//! Client for the remote story REST API.
//!
//! The API is the only way the rest of the crate reaches the network. Every
//! call is stateless: the bearer token is passed per request, which lets the
//! sync queue replay the token captured when a story was queued.

mod client;
mod types;

pub use client::{ApiClient, DEFAULT_BASE_URL};
pub use types::{ApiError, LoginResult, StoryUpload};
