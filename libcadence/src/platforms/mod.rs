//! Social-platform publish adapters
//!
//! The planner (immediate mode) and the publisher both go through the
//! `Platform` trait; implementations handle authentication and the
//! platform-specific publish call. Replies and quotes carry their target
//! in `Post::target_id`.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Post;

pub mod mastodon;
pub mod mock;

#[async_trait]
pub trait Platform: Send + Sync {
    /// Verify credentials before first use.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Authentication` when credentials are
    /// invalid or the instance rejects them.
    async fn authenticate(&mut self) -> Result<()>;

    /// Publish one post and return the platform-assigned id.
    ///
    /// Reply and quote posts use `post.target_id` as the item they
    /// respond to.
    ///
    /// # Errors
    ///
    /// - `PlatformError::Validation` when the content fails platform rules
    /// - `PlatformError::Publish` when the publish call itself fails
    /// - `PlatformError::RateLimit` / `PlatformError::Network` for the
    ///   transient cases
    async fn publish(&self, post: &Post) -> Result<String>;

    /// Check content against platform rules without publishing.
    fn validate_content(&self, content: &str) -> Result<()>;

    /// Lowercase platform identifier (e.g. "mastodon").
    fn name(&self) -> &str;

    /// Maximum post length, or None when the platform has no hard limit.
    fn character_limit(&self) -> Option<usize>;
}
