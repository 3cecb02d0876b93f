//! Story list and detail loading with offline fallback.
//!
//! A fresh, non-empty story list replaces the offline cache. When the network
//! is unreachable the last cached list (or a bookmarked copy, for detail
//! views) is served instead.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use thiserror::Error;

use crate::api::{ApiClient, ApiError};
use crate::storage::{Database, StoryRecord};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("No connection and no cached stories")]
    NoConnectionNoCache,
    #[error("Story {0} is not available offline")]
    NotAvailableOffline(String),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Where a story list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedSource {
    Live,
    /// Served from the offline cache, written at `cached_at`
    Cached { cached_at: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub struct FeedPage {
    pub stories: Vec<StoryRecord>,
    pub source: FeedSource,
}

/// Where a single story came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorySource {
    Live,
    Saved,
    Cached,
}

#[derive(Debug, Clone)]
pub struct StoryView {
    pub story: StoryRecord,
    pub source: StorySource,
}

pub struct StoryFeed {
    db: Database,
    api: ApiClient,
}

impl StoryFeed {
    pub fn new(db: Database, api: ApiClient) -> Self {
        Self { db, api }
    }

    /// Fetch the story list, caching it on success.
    ///
    /// Only network failures fall back to the cache. A server rejection
    /// (expired token, maintenance) is returned as-is and leaves the cache
    /// untouched.
    pub async fn load_feed(&self, token: Option<&SecretString>) -> Result<FeedPage, FeedError> {
        match self.api.fetch_all_stories(token).await {
            Ok(stories) => {
                if stories.is_empty() {
                    tracing::debug!("Server returned no stories, keeping existing cache");
                } else {
                    self.db.cache_stories(&stories).await;
                }
                Ok(FeedPage {
                    stories,
                    source: FeedSource::Live,
                })
            }
            Err(e) if e.is_network_failure() => {
                tracing::warn!(error = %e, "Story fetch failed, serving cached stories");
                self.load_cached().await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The cached story list, without touching the network.
    pub async fn load_cached(&self) -> Result<FeedPage, FeedError> {
        let cached = self.db.get_cached_stories().await;
        let Some(cached_at) = cached.iter().map(|entry| entry.cached_at).max() else {
            return Err(FeedError::NoConnectionNoCache);
        };

        Ok(FeedPage {
            stories: cached.into_iter().map(|entry| entry.story).collect(),
            source: FeedSource::Cached { cached_at },
        })
    }

    /// Fetch one story; offline, fall back to the bookmark, then the cache.
    pub async fn load_story(
        &self,
        id: &str,
        token: Option<&SecretString>,
    ) -> Result<StoryView, FeedError> {
        match self.api.get_story(id, token).await {
            Ok(story) => Ok(StoryView {
                story,
                source: StorySource::Live,
            }),
            Err(e) if e.is_network_failure() => {
                tracing::warn!(id = %id, error = %e, "Story fetch failed, trying offline copies");

                match self.db.get_saved_story(id).await {
                    Ok(Some(story)) => {
                        return Ok(StoryView {
                            story,
                            source: StorySource::Saved,
                        })
                    }
                    Ok(None) => {}
                    Err(e) => tracing::error!(id = %id, error = %e, "Failed to read saved story"),
                }

                self.db
                    .get_cached_story(id)
                    .await
                    .map(|entry| StoryView {
                        story: entry.story,
                        source: StorySource::Cached,
                    })
                    .ok_or_else(|| FeedError::NotAvailableOffline(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record(id: &str) -> StoryRecord {
        StoryRecord {
            id: id.to_string(),
            name: "Dimas".to_string(),
            description: format!("story {id}"),
            photo_url: format!("https://example.com/{id}.jpg"),
            created_at: "2024-01-01T00:00:00.000Z".to_string(),
            lat: None,
            lon: None,
        }
    }

    fn list_body(ids: &[&str]) -> serde_json::Value {
        serde_json::json!({
            "error": false,
            "message": "Stories fetched successfully",
            "listStory": ids.iter().map(|id| serde_json::to_value(record(id)).unwrap()).collect::<Vec<_>>(),
        })
    }

    async fn feed_for(base_url: &str) -> (Database, StoryFeed) {
        let db = Database::open(":memory:").await.unwrap();
        let api = ApiClient::new(base_url, Duration::from_secs(1)).unwrap();
        (db.clone(), StoryFeed::new(db, api))
    }

    #[tokio::test]
    async fn test_live_fetch_replaces_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stories"))
            .respond_with(ResponseTemplate::new(200).set_body_json(list_body(&["a", "b"])))
            .mount(&server)
            .await;
        let (db, feed) = feed_for(&server.uri()).await;
        db.cache_stories(&[record("old")]).await;

        let page = feed.load_feed(None).await.unwrap();
        assert_eq!(page.source, FeedSource::Live);
        assert_eq!(page.stories.len(), 2);

        let cached: Vec<String> = db
            .get_cached_stories()
            .await
            .iter()
            .map(|c| c.id().to_string())
            .collect();
        assert_eq!(cached, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_empty_fetch_keeps_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stories"))
            .respond_with(ResponseTemplate::new(200).set_body_json(list_body(&[])))
            .mount(&server)
            .await;
        let (db, feed) = feed_for(&server.uri()).await;
        db.cache_stories(&[record("kept")]).await;

        let page = feed.load_feed(None).await.unwrap();
        assert_eq!(page.source, FeedSource::Live);
        assert!(page.stories.is_empty());
        assert_eq!(db.get_cached_stories().await.len(), 1);
    }

    #[tokio::test]
    async fn test_network_failure_serves_cache() {
        let (db, feed) = feed_for("http://127.0.0.1:1").await;
        db.cache_stories(&[record("x"), record("y")]).await;

        let page = feed.load_feed(None).await.unwrap();
        assert!(matches!(page.source, FeedSource::Cached { .. }));
        assert_eq!(page.stories, vec![record("x"), record("y")]);
    }

    #[tokio::test]
    async fn test_network_failure_without_cache() {
        let (_db, feed) = feed_for("http://127.0.0.1:1").await;
        let err = feed.load_feed(None).await.unwrap_err();
        assert!(matches!(err, FeedError::NoConnectionNoCache));
    }

    #[tokio::test]
    async fn test_rejection_is_surfaced_and_cache_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stories"))
            .respond_with(ResponseTemplate::new(401).set_body_json(
                serde_json::json!({"error": true, "message": "Missing authentication"}),
            ))
            .mount(&server)
            .await;
        let (db, feed) = feed_for(&server.uri()).await;
        db.cache_stories(&[record("cached")]).await;

        let err = feed.load_feed(None).await.unwrap_err();
        assert!(matches!(err, FeedError::Api(ref e) if e.is_unauthorized()));
        assert_eq!(db.get_cached_stories().await.len(), 1);
    }

    #[tokio::test]
    async fn test_story_detail_offline_prefers_bookmark() {
        let (db, feed) = feed_for("http://127.0.0.1:1").await;
        let mut bookmarked = record("s1");
        bookmarked.description = "bookmarked copy".to_string();
        db.cache_stories(&[record("s1"), record("s2")]).await;
        db.save_story(&bookmarked).await.unwrap();

        let view = feed.load_story("s1", None).await.unwrap();
        assert_eq!(view.source, StorySource::Saved);
        assert_eq!(view.story.description, "bookmarked copy");

        let view = feed.load_story("s2", None).await.unwrap();
        assert_eq!(view.source, StorySource::Cached);

        let err = feed.load_story("missing", None).await.unwrap_err();
        assert!(matches!(err, FeedError::NotAvailableOffline(id) if id == "missing"));
    }

    #[tokio::test]
    async fn test_story_detail_live() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stories/s1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": false,
                "message": "Story fetched successfully",
                "story": record("s1"),
            })))
            .mount(&server)
            .await;
        let (_db, feed) = feed_for(&server.uri()).await;

        let view = feed.load_story("s1", None).await.unwrap();
        assert_eq!(view.source, StorySource::Live);
        assert_eq!(view.story, record("s1"));
    }
}
