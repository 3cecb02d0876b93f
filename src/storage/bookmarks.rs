use super::schema::Database;
use super::types::{Collection, StorageError, StoryRecord};

impl Database {
    // ========================================================================
    // Bookmark Operations
    // ========================================================================

    /// Save (or overwrite) a bookmarked story.
    pub async fn save_story(&self, story: &StoryRecord) -> Result<(), StorageError> {
        self.put(Collection::SavedStories, story).await
    }

    /// Remove a bookmark. Removing an id that was never saved is a no-op.
    pub async fn remove_story(&self, id: &str) -> Result<(), StorageError> {
        self.delete(Collection::SavedStories, id).await?;
        Ok(())
    }

    pub async fn get_saved_story(&self, id: &str) -> Result<Option<StoryRecord>, StorageError> {
        self.get(Collection::SavedStories, id).await
    }

    /// All bookmarks in the order they were saved.
    pub async fn get_all_saved(&self) -> Result<Vec<StoryRecord>, StorageError> {
        self.get_all(Collection::SavedStories).await
    }

    pub async fn is_saved(&self, id: &str) -> Result<bool, StorageError> {
        self.contains(Collection::SavedStories, id).await
    }

    /// Save the story if it is not bookmarked yet, otherwise remove it.
    ///
    /// Returns the new bookmarked state.
    pub async fn toggle_saved(&self, story: &StoryRecord) -> Result<bool, StorageError> {
        if self.is_saved(&story.id).await? {
            self.remove_story(&story.id).await?;
            Ok(false)
        } else {
            self.save_story(story).await?;
            Ok(true)
        }
    }
}
