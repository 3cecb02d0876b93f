use chrono::Utc;

use super::schema::Database;
use super::store::Record;
use super::types::{CachedStory, Collection, StorageError, StoryRecord};

impl Database {
    // ========================================================================
    // Story Cache Operations
    // ========================================================================

    /// Replace the cached story list with `stories`.
    ///
    /// The old contents are cleared and the new list written in one
    /// transaction, so readers never see a mix of the two. Every entry is
    /// stamped with the same `cached_at`.
    ///
    /// Callers should only pass the result of a successful, non-empty fetch.
    /// Errors are logged and reported as `false` so rendering never blocks on
    /// the cache.
    pub async fn cache_stories(&self, stories: &[StoryRecord]) -> bool {
        match self.replace_cached_stories(stories).await {
            Ok(()) => {
                tracing::debug!(count = stories.len(), "Cached story list");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to cache stories");
                false
            }
        }
    }

    async fn replace_cached_stories(&self, stories: &[StoryRecord]) -> Result<(), StorageError> {
        let cached_at = Utc::now();
        let mut tx = self.begin().await?;

        tx.clear(Collection::CachedStories).await?;
        for story in stories {
            let entry = CachedStory {
                story: story.clone(),
                cached_at,
            };
            tx.put(Collection::CachedStories, &entry).await?;
        }

        tx.commit().await
    }

    /// Every cached story, or an empty list when there is no cache or the
    /// store cannot be read.
    pub async fn get_cached_stories(&self) -> Vec<CachedStory> {
        match self.get_all(Collection::CachedStories).await {
            Ok(stories) => stories,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read cached stories");
                Vec::new()
            }
        }
    }

    /// A single cached story by id (detail view fallback).
    pub async fn get_cached_story(&self, id: &str) -> Option<CachedStory> {
        match self.get(Collection::CachedStories, id).await {
            Ok(story) => story,
            Err(e) => {
                tracing::error!(id = %id, error = %e, "Failed to read cached story");
                None
            }
        }
    }

    /// Whether any stories are cached. Store errors count as "no".
    pub async fn has_cached_stories(&self) -> bool {
        match self.count(Collection::CachedStories).await {
            Ok(count) => count > 0,
            Err(e) => {
                tracing::error!(error = %e, "Failed to count cached stories");
                false
            }
        }
    }

    /// Drop the whole cache.
    pub async fn clear_cached_stories(&self) -> bool {
        match self.clear(Collection::CachedStories).await {
            Ok(removed) => {
                tracing::debug!(removed = removed, "Cleared story cache");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to clear story cache");
                false
            }
        }
    }
}

impl CachedStory {
    /// Id of the cached story.
    pub fn id(&self) -> &str {
        self.key()
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, StoryRecord};
    use std::collections::HashSet;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn test_story(id: &str) -> StoryRecord {
        StoryRecord {
            id: id.to_string(),
            name: "Cache Tester".to_string(),
            description: format!("Story {id}"),
            photo_url: format!("https://example.com/{id}.jpg"),
            created_at: "2024-01-01T00:00:00.000Z".to_string(),
            lat: Some(-6.2),
            lon: Some(106.8),
        }
    }

    fn ids(stories: &[crate::storage::CachedStory]) -> HashSet<String> {
        stories.iter().map(|s| s.id().to_string()).collect()
    }

    #[tokio::test]
    async fn test_cache_stories_and_get() {
        let db = test_db().await;
        assert!(db.cache_stories(&[test_story("1"), test_story("2")]).await);

        let cached = db.get_cached_stories().await;
        assert_eq!(cached.len(), 2);
        assert_eq!(cached[0].story, test_story("1"));
        assert_eq!(cached[1].story, test_story("2"));
    }

    #[tokio::test]
    async fn test_refresh_replaces_previous_list() {
        let db = test_db().await;
        db.cache_stories(&[test_story("1"), test_story("2")]).await;
        db.cache_stories(&[test_story("3")]).await;

        let cached = db.get_cached_stories().await;
        assert_eq!(ids(&cached), HashSet::from(["3".to_string()]));
    }

    #[tokio::test]
    async fn test_entries_share_cached_at() {
        let db = test_db().await;
        db.cache_stories(&[test_story("1"), test_story("2"), test_story("3")])
            .await;

        let cached = db.get_cached_stories().await;
        assert!(cached.iter().all(|c| c.cached_at == cached[0].cached_at));
    }

    #[tokio::test]
    async fn test_has_and_clear() {
        let db = test_db().await;
        assert!(!db.has_cached_stories().await);

        db.cache_stories(&[test_story("1")]).await;
        assert!(db.has_cached_stories().await);

        assert!(db.clear_cached_stories().await);
        assert!(!db.has_cached_stories().await);
        assert!(db.get_cached_stories().await.is_empty());
    }

    #[tokio::test]
    async fn test_get_cached_story_by_id() {
        let db = test_db().await;
        db.cache_stories(&[test_story("1"), test_story("2")]).await;

        assert_eq!(db.get_cached_story("2").await.unwrap().story.id, "2");
        assert!(db.get_cached_story("9").await.is_none());
    }

    #[tokio::test]
    async fn test_cache_does_not_touch_bookmarks() {
        let db = test_db().await;
        db.save_story(&test_story("1")).await.unwrap();
        db.cache_stories(&[test_story("2")]).await;
        db.clear_cached_stories().await;

        assert!(db.is_saved("1").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_errors_degrade_to_empty() {
        let db = test_db().await;
        db.cache_stories(&[test_story("1")]).await;

        sqlx::query("DROP TABLE cached_stories")
            .execute(&db.pool)
            .await
            .unwrap();

        assert!(db.get_cached_stories().await.is_empty());
        assert!(!db.has_cached_stories().await);
        assert!(db.get_cached_story("1").await.is_none());
        assert!(!db.cache_stories(&[test_story("2")]).await);
        assert!(!db.clear_cached_stories().await);
    }

    #[tokio::test]
    async fn test_failed_replace_keeps_old_cache() {
        let db = test_db().await;
        db.cache_stories(&[test_story("1")]).await;

        // A trigger that rejects one id makes the second put fail mid-transaction.
        sqlx::query(
            r#"
            CREATE TRIGGER reject_bad BEFORE INSERT ON cached_stories
            WHEN new.key = 'bad' BEGIN SELECT RAISE(ABORT, 'rejected'); END
        "#,
        )
        .execute(&db.pool)
        .await
        .unwrap();

        assert!(!db.cache_stories(&[test_story("2"), test_story("bad")]).await);

        let cached = db.get_cached_stories().await;
        assert_eq!(ids(&cached), HashSet::from(["1".to_string()]));
    }
}
