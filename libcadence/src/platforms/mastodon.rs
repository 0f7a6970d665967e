//! Mastodon publish adapter
//!
//! Uses the megalodon library, so any Fediverse instance implementing the
//! Mastodon API works. Replies map to `in_reply_to_id`, quotes to
//! `quote_id` (supported by instances that implement quoting).

use async_trait::async_trait;
use megalodon::megalodon::{PostStatusInputOptions, PostStatusOutput};
use megalodon::{Megalodon, SNS};

use crate::config::MastodonConfig;
use crate::error::{PlatformError, Result};
use crate::platforms::Platform;
use crate::types::{ContentKind, Post};

pub struct MastodonClient {
    client: Box<dyn Megalodon + Send + Sync>,
    character_limit: usize,
}

impl MastodonClient {
    pub fn new(instance_url: String, access_token: String) -> Result<Self> {
        let client = megalodon::generator(SNS::Mastodon, instance_url, Some(access_token), None)
            .map_err(|e| {
                PlatformError::Authentication(format!("Failed to create Mastodon client: {:?}", e))
            })?;

        Ok(Self {
            client,
            // Default until fetch_instance_info updates it.
            character_limit: 500,
        })
    }

    pub fn from_config(config: &MastodonConfig) -> Result<Self> {
        if config.access_token.trim().is_empty() {
            return Err(
                PlatformError::Authentication("Mastodon access token is empty".to_string()).into(),
            );
        }

        let instance_url = if config.base_url.starts_with("http://")
            || config.base_url.starts_with("https://")
        {
            config.base_url.clone()
        } else {
            format!("https://{}", config.base_url)
        };

        Self::new(instance_url, config.access_token.trim().to_string())
    }

    /// Query the instance for its actual character limit.
    pub async fn fetch_instance_info(&mut self) -> Result<()> {
        let response = self
            .client
            .get_instance()
            .await
            .map_err(|e| map_megalodon_error(e, "fetch instance info"))?;

        self.character_limit = response.json.configuration.statuses.max_characters as usize;
        Ok(())
    }
}

#[async_trait]
impl Platform for MastodonClient {
    async fn authenticate(&mut self) -> Result<()> {
        self.client
            .verify_account_credentials()
            .await
            .map_err(|e| map_megalodon_error(e, "authenticate"))?;
        Ok(())
    }

    async fn publish(&self, post: &Post) -> Result<String> {
        self.validate_content(&post.content)?;

        let options = match post.kind {
            ContentKind::New => None,
            ContentKind::Reply => Some(PostStatusInputOptions {
                in_reply_to_id: post.target_id.clone(),
                ..Default::default()
            }),
            ContentKind::Quote => Some(PostStatusInputOptions {
                quote_id: post.target_id.clone(),
                ..Default::default()
            }),
        };

        let response = self
            .client
            .post_status(post.content.clone(), options.as_ref())
            .await
            .map_err(|e| map_megalodon_error(e, "post status"))?;

        let external_id = match response.json {
            PostStatusOutput::Status(status) => status.id,
            PostStatusOutput::ScheduledStatus(scheduled) => scheduled.id,
        };

        Ok(external_id)
    }

    fn validate_content(&self, content: &str) -> Result<()> {
        let char_count = content.chars().count();

        if char_count > self.character_limit {
            return Err(PlatformError::Validation(format!(
                "Content exceeds Mastodon's {} character limit (current: {} characters)",
                self.character_limit, char_count
            ))
            .into());
        }

        if content.trim().is_empty() {
            return Err(PlatformError::Validation("Content cannot be empty".to_string()).into());
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "mastodon"
    }

    fn character_limit(&self) -> Option<usize> {
        Some(self.character_limit)
    }
}

/// Map megalodon errors onto the unified PlatformError taxonomy.
fn map_megalodon_error(error: megalodon::error::Error, context: &str) -> PlatformError {
    let error_str = error.to_string();
    let status_code = extract_http_status(&error_str);

    match status_code {
        Some(401) | Some(403) => PlatformError::Authentication(format!(
            "Mastodon authentication failed ({}): {}",
            context, error_str
        )),
        Some(422) => PlatformError::Validation(format!(
            "Mastodon rejected the content ({}): {}",
            context, error_str
        )),
        Some(429) => PlatformError::RateLimit(format!(
            "Mastodon rate limit exceeded ({}): {}",
            context, error_str
        )),
        Some(500..=599) => PlatformError::Network(format!(
            "Mastodon server error ({}): {}",
            context, error_str
        )),
        _ => PlatformError::Publish(format!(
            "Mastodon publish failed ({}): {}",
            context, error_str
        )),
    }
}

/// Pull an HTTP status code out of a megalodon error message, if any.
fn extract_http_status(message: &str) -> Option<u16> {
    message
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| s.len() == 3)
        .filter_map(|s| s.parse::<u16>().ok())
        .find(|code| (100..=599).contains(code))
}
