//! Scheduled post publisher
//!
//! Drains due scheduled posts in ascending `scheduled_at` order. Every
//! outcome is committed before the next post is attempted, so a crash
//! never loses or repeats a publish. A failed post stays `failed` until
//! a user retries it; there is no automatic retry.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::Database;
use crate::error::{CadenceError, Result};
use crate::platforms::Platform;
use crate::types::{Post, PostStatus};

/// What one publishing pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    pub attempted: usize,
    pub published: usize,
    pub failed: usize,
}

pub struct Publisher {
    db: Database,
    platform: Arc<dyn Platform>,
}

impl Publisher {
    pub fn new(db: Database, platform: Arc<dyn Platform>) -> Self {
        Self { db, platform }
    }

    /// Publish every post whose `scheduled_at` has passed, oldest first.
    ///
    /// A failure marks that post `failed` and moves on; it never aborts
    /// the pass. Takes an optional `should_stop` check so the caller can
    /// cut the pass short at a deadline with all completed work intact.
    pub async fn publish_due(
        &self,
        now: DateTime<Utc>,
        mut should_stop: impl FnMut() -> bool,
    ) -> Result<PublishOutcome> {
        let due = self.db.due_scheduled_posts(now.timestamp()).await?;
        let mut outcome = PublishOutcome::default();

        for mut post in due {
            if should_stop() {
                info!(
                    remaining = outcome.attempted,
                    "Deadline reached, leaving remaining posts for the next pass"
                );
                break;
            }
            outcome.attempted += 1;
            match self.publish_one(&mut post, now).await {
                Ok(()) => outcome.published += 1,
                Err(e) => {
                    warn!(post_id = %post.id, account = %post.account, error = %e,
                        "Publish failed");
                    outcome.failed += 1;
                }
            }
        }

        Ok(outcome)
    }

    /// Re-attempt a failed post right now. User-triggered only.
    pub async fn retry(&self, post_id: &str, now: DateTime<Utc>) -> Result<Post> {
        let mut post = self
            .db
            .get_post(post_id)
            .await?
            .ok_or_else(|| CadenceError::InvalidInput(format!("No post with id {}", post_id)))?;

        if post.status != PostStatus::Failed {
            return Err(CadenceError::InvalidInput(format!(
                "Post {} is {}, only failed posts can be retried",
                post_id,
                post.status.as_str()
            )));
        }

        self.publish_one(&mut post, now).await?;
        Ok(post)
    }

    /// Publish one post and commit the outcome, success or failure.
    async fn publish_one(&self, post: &mut Post, now: DateTime<Utc>) -> Result<()> {
        if let Err(e) = self.platform.validate_content(&post.content) {
            post.mark_failed(e.to_string());
            self.db.update_post_outcome(post).await?;
            return Err(e);
        }

        match self.platform.publish(post).await {
            Ok(external_id) => {
                info!(post_id = %post.id, account = %post.account, %external_id, "Published");
                post.mark_posted(external_id, now.timestamp());
                self.db.update_post_outcome(post).await?;
                Ok(())
            }
            Err(e) => {
                post.mark_failed(e.to_string());
                self.db.update_post_outcome(post).await?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::MockPlatform;
    use crate::types::ContentKind;
    use chrono::TimeZone;
    use tempfile::TempDir;

    async fn test_db() -> (Database, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cadence.db");
        let db = Database::new(path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    async fn scheduled_post(db: &Database, content: &str, scheduled_at: i64) -> Post {
        let mut post = Post::new(
            "a@example.social".to_string(),
            content.to_string(),
            ContentKind::New,
            PostStatus::Scheduled,
        );
        post.scheduled_at = Some(scheduled_at);
        db.create_post(&post).await.unwrap();
        post
    }

    fn at(ts: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(ts, 0).unwrap()
    }

    #[tokio::test]
    async fn test_publishes_due_posts_oldest_first() {
        let (db, _dir) = test_db().await;
        scheduled_post(&db, "second", 2000).await;
        scheduled_post(&db, "first", 1000).await;
        scheduled_post(&db, "not yet", 9000).await;

        let platform = Arc::new(MockPlatform::success());
        let publisher = Publisher::new(db.clone(), platform.clone());

        let outcome = publisher.publish_due(at(5000), || false).await.unwrap();
        assert_eq!(outcome.published, 2);
        assert_eq!(outcome.failed, 0);
        assert_eq!(platform.published_contents(), vec!["first", "second"]);

        let remaining = db
            .list_posts_by_status(PostStatus::Scheduled, 10)
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].content, "not yet");
    }

    #[tokio::test]
    async fn test_failure_is_committed_and_pass_continues() {
        let (db, _dir) = test_db().await;
        scheduled_post(&db, "fine one", 1000).await;
        scheduled_post(&db, "the bad apple", 2000).await;
        scheduled_post(&db, "fine two", 3000).await;

        let platform = Arc::new(MockPlatform::failing_on("bad apple", "rejected"));
        let publisher = Publisher::new(db.clone(), platform.clone());

        let outcome = publisher.publish_due(at(5000), || false).await.unwrap();
        assert_eq!(outcome.attempted, 3);
        assert_eq!(outcome.published, 2);
        assert_eq!(outcome.failed, 1);

        let failed = db.list_posts_by_status(PostStatus::Failed, 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].content, "the bad apple");
        assert!(failed[0].error_message.as_deref().unwrap().contains("rejected"));

        // Failed posts are not retried by a later pass.
        let outcome = publisher.publish_due(at(6000), || false).await.unwrap();
        assert_eq!(outcome.attempted, 0);
    }

    #[tokio::test]
    async fn test_retry_republishes_failed_post() {
        let (db, _dir) = test_db().await;
        let post = scheduled_post(&db, "flaky", 1000).await;

        let failing = Arc::new(MockPlatform::failure("down"));
        let publisher = Publisher::new(db.clone(), failing);
        publisher.publish_due(at(2000), || false).await.unwrap();

        let working = Arc::new(MockPlatform::success());
        let publisher = Publisher::new(db.clone(), working.clone());
        let retried = publisher.retry(&post.id, at(3000)).await.unwrap();
        assert_eq!(retried.status, PostStatus::Posted);
        assert!(retried.external_id.is_some());

        let stored = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Posted);
        assert_eq!(stored.posted_at, Some(3000));
    }

    #[tokio::test]
    async fn test_retry_rejects_non_failed_posts() {
        let (db, _dir) = test_db().await;
        let post = scheduled_post(&db, "waiting", 9000).await;

        let publisher = Publisher::new(db.clone(), Arc::new(MockPlatform::success()));
        let err = publisher.retry(&post.id, at(1000)).await.unwrap_err();
        assert!(err.to_string().contains("only failed posts"));

        let err = publisher.retry("no-such-id", at(1000)).await.unwrap_err();
        assert!(err.to_string().contains("No post"));
    }

    #[tokio::test]
    async fn test_deadline_stops_between_posts() {
        let (db, _dir) = test_db().await;
        scheduled_post(&db, "one", 1000).await;
        scheduled_post(&db, "two", 2000).await;
        scheduled_post(&db, "three", 3000).await;

        let platform = Arc::new(MockPlatform::success());
        let publisher = Publisher::new(db.clone(), platform.clone());

        // Stop after the first post has been committed.
        let mut calls = 0;
        let outcome = publisher
            .publish_due(at(5000), move || {
                calls += 1;
                calls > 1
            })
            .await
            .unwrap();
        assert_eq!(outcome.published, 1);

        let remaining = db
            .list_posts_by_status(PostStatus::Scheduled, 10)
            .await
            .unwrap();
        assert_eq!(remaining.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_content_fails_validation_before_publish() {
        let (db, _dir) = test_db().await;
        scheduled_post(&db, "   ", 1000).await;

        let platform = Arc::new(MockPlatform::success());
        let publisher = Publisher::new(db.clone(), platform.clone());

        let outcome = publisher.publish_due(at(2000), || false).await.unwrap();
        assert_eq!(outcome.failed, 1);
        assert_eq!(platform.calls(), 0);
    }
}
