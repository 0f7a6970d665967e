//! Mock platform for tests
//!
//! Configurable successes and failures so planner and publisher tests can
//! exercise partial-failure paths without credentials or a network.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::error::{PlatformError, Result};
use crate::platforms::Platform;
use crate::types::Post;

#[derive(Debug, Clone)]
pub struct MockPlatformConfig {
    pub name: String,
    pub publish_succeeds: bool,
    pub publish_error: Option<String>,
    /// Fail only posts whose content contains this substring.
    pub fail_on_substring: Option<String>,
    pub character_limit: Option<usize>,
}

impl Default for MockPlatformConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            publish_succeeds: true,
            publish_error: None,
            fail_on_substring: None,
            character_limit: None,
        }
    }
}

pub struct MockPlatform {
    config: MockPlatformConfig,
    pub publish_call_count: Arc<Mutex<usize>>,
    pub published: Arc<Mutex<Vec<Post>>>,
}

impl MockPlatform {
    pub fn new(config: MockPlatformConfig) -> Self {
        Self {
            config,
            publish_call_count: Arc::new(Mutex::new(0)),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn success() -> Self {
        Self::new(MockPlatformConfig::default())
    }

    pub fn failure(error: &str) -> Self {
        Self::new(MockPlatformConfig {
            publish_succeeds: false,
            publish_error: Some(error.to_string()),
            ..Default::default()
        })
    }

    /// Succeeds except for posts containing `needle`.
    pub fn failing_on(needle: &str, error: &str) -> Self {
        Self::new(MockPlatformConfig {
            fail_on_substring: Some(needle.to_string()),
            publish_error: Some(error.to_string()),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> usize {
        *self.publish_call_count.lock().unwrap()
    }

    pub fn published_contents(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.content.clone())
            .collect()
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn authenticate(&mut self) -> Result<()> {
        Ok(())
    }

    async fn publish(&self, post: &Post) -> Result<String> {
        let call_number = {
            let mut count = self.publish_call_count.lock().unwrap();
            *count += 1;
            *count
        };

        let should_fail = !self.config.publish_succeeds
            || self
                .config
                .fail_on_substring
                .as_ref()
                .is_some_and(|needle| post.content.contains(needle));

        if should_fail {
            let message = self
                .config
                .publish_error
                .clone()
                .unwrap_or_else(|| "mock publish failure".to_string());
            return Err(PlatformError::Publish(message).into());
        }

        self.published.lock().unwrap().push(post.clone());
        Ok(format!("{}-post-{}", self.config.name, call_number))
    }

    fn validate_content(&self, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(PlatformError::Validation("Content cannot be empty".to_string()).into());
        }
        if let Some(limit) = self.config.character_limit {
            let count = content.chars().count();
            if count > limit {
                return Err(PlatformError::Validation(format!(
                    "Content exceeds {} character limit (current: {})",
                    limit, count
                ))
                .into());
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn character_limit(&self) -> Option<usize> {
        self.config.character_limit
    }
}
