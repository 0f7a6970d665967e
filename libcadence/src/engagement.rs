//! Engagement target discovery
//!
//! Reply and quote policies need an existing status to respond to. An
//! `EngagementSource` supplies candidate statuses from the account's
//! timeline; when none is available the planner skips the unit rather
//! than fabricating a target.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::{PlatformError, Result};
use crate::types::ContentKind;

/// A status another account posted that we can reply to or quote.
#[derive(Debug, Clone, PartialEq)]
pub struct EngagementTarget {
    /// Platform-side status id, used as `target_id` on the generated post.
    pub status_id: String,
    /// Author handle, for logging.
    pub author: String,
    /// Plain-text excerpt fed to the generator as context.
    pub excerpt: String,
}

#[async_trait]
pub trait EngagementSource: Send + Sync {
    /// Find a status for `account` to engage with. Returns `Ok(None)` when
    /// the timeline has nothing suitable right now.
    async fn find_target(&self, account: &str, kind: ContentKind)
        -> Result<Option<EngagementTarget>>;
}

/// Timeline-backed source using a Mastodon client.
pub struct TimelineEngagementSource {
    client: Box<dyn megalodon::Megalodon + Send + Sync>,
}

impl TimelineEngagementSource {
    pub fn new(client: Box<dyn megalodon::Megalodon + Send + Sync>) -> Self {
        Self { client }
    }

    pub fn from_config(config: &crate::config::MastodonConfig) -> Result<Self> {
        let instance_url = if config.base_url.starts_with("http://")
            || config.base_url.starts_with("https://")
        {
            config.base_url.clone()
        } else {
            format!("https://{}", config.base_url)
        };
        let client = megalodon::generator(
            megalodon::SNS::Mastodon,
            instance_url,
            Some(config.access_token.trim().to_string()),
            None,
        )
        .map_err(|e| {
            PlatformError::Authentication(format!("Failed to create Mastodon client: {:?}", e))
        })?;
        Ok(Self::new(client))
    }

    fn strip_html(html: &str) -> String {
        let mut out = String::with_capacity(html.len());
        let mut in_tag = false;
        for ch in html.chars() {
            match ch {
                '<' => in_tag = true,
                '>' => in_tag = false,
                c if !in_tag => out.push(c),
                _ => {}
            }
        }
        out.trim().to_string()
    }
}

#[async_trait]
impl EngagementSource for TimelineEngagementSource {
    async fn find_target(
        &self,
        _account: &str,
        _kind: ContentKind,
    ) -> Result<Option<EngagementTarget>> {
        let options = megalodon::megalodon::GetHomeTimelineInputOptions {
            limit: Some(20),
            ..Default::default()
        };
        let response = self
            .client
            .get_home_timeline(Some(&options))
            .await
            .map_err(|e| PlatformError::Network(format!("Timeline fetch failed: {}", e)))?;

        // Skip reblogs and our own statuses' boosts; take the first status
        // with actual text content.
        let target = response.json.into_iter().find_map(|status| {
            if status.reblog.is_some() {
                return None;
            }
            let excerpt = Self::strip_html(&status.content);
            if excerpt.is_empty() {
                return None;
            }
            Some(EngagementTarget {
                status_id: status.id,
                author: status.account.acct,
                excerpt,
            })
        });

        Ok(target)
    }
}

/// Test source returning pre-queued targets in order, then `None`.
pub struct MockEngagementSource {
    targets: Arc<Mutex<VecDeque<EngagementTarget>>>,
    pub call_count: Arc<Mutex<usize>>,
}

impl MockEngagementSource {
    pub fn new(targets: Vec<EngagementTarget>) -> Self {
        Self {
            targets: Arc::new(Mutex::new(targets.into())),
            call_count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn calls(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait]
impl EngagementSource for MockEngagementSource {
    async fn find_target(
        &self,
        _account: &str,
        _kind: ContentKind,
    ) -> Result<Option<EngagementTarget>> {
        *self.call_count.lock().unwrap() += 1;
        Ok(self.targets.lock().unwrap().pop_front())
    }
}
