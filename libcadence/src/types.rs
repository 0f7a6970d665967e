//! Core types for Cadence

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of content a policy or post produces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    New,
    Reply,
    Quote,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Reply => "reply",
            Self::Quote => "quote",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "reply" => Some(Self::Reply),
            "quote" => Some(Self::Quote),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How generated posts leave the planner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleMode {
    /// Queue with a scheduled_at; the publisher ships it later.
    Scheduled,
    /// Publish synchronously during the planner run.
    Immediate,
    /// Persist as a draft awaiting manual action.
    Draft,
}

impl ScheduleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Immediate => "immediate",
            Self::Draft => "draft",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "immediate" => Some(Self::Immediate),
            "draft" => Some(Self::Draft),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Posted,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Posted => "posted",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "scheduled" => Some(Self::Scheduled),
            "posted" => Some(Self::Posted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub account: String,
    pub content: String,
    pub kind: ContentKind,
    /// External item a reply or quote targets.
    pub target_id: Option<String>,
    pub status: PostStatus,
    pub created_at: i64,
    pub scheduled_at: Option<i64>,
    pub posted_at: Option<i64>,
    /// Platform-assigned id once published.
    pub external_id: Option<String>,
    pub error_message: Option<String>,
    pub theme_category: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
}

impl Post {
    pub fn new(account: String, content: String, kind: ContentKind, status: PostStatus) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            account,
            content,
            kind,
            target_id: None,
            status,
            created_at: chrono::Utc::now().timestamp(),
            scheduled_at: None,
            posted_at: None,
            external_id: None,
            error_message: None,
            theme_category: None,
            provider: None,
            model: None,
        }
    }

    /// Record a successful publish.
    pub fn mark_posted(&mut self, external_id: String, posted_at: i64) {
        self.status = PostStatus::Posted;
        self.external_id = Some(external_id);
        self.posted_at = Some(posted_at);
        self.error_message = None;
    }

    /// Record a failed publish attempt.
    pub fn mark_failed(&mut self, error_message: String) {
        self.status = PostStatus::Failed;
        self.error_message = Some(error_message);
    }
}

/// One paid external call, append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Option<i64>,
    pub provider: String,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_read_tokens: i64,
    pub cache_write_tokens: i64,
    pub batch: bool,
    /// Computed cost in the budget currency.
    pub cost: f64,
    pub recorded_at: i64,
}

/// Monthly budget configuration. Singleton row in storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSettings {
    pub monthly_budget: f64,
    /// Stop generation entirely once the budget is fully consumed.
    pub pause_on_exhausted: bool,
    pub prefer_batch: bool,
    pub prefer_caching: bool,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            monthly_budget: 0.0,
            pause_on_exhausted: true,
            prefer_batch: false,
            prefer_caching: true,
        }
    }
}

/// Alert tier derived from percent of monthly budget consumed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AlertTier {
    None,
    Info,
    Warning,
    Danger,
    Critical,
}

impl AlertTier {
    /// Thresholds are fixed at 50/80/95/100 percent.
    pub fn from_percent(used_percent: f64) -> Self {
        if used_percent >= 100.0 {
            Self::Critical
        } else if used_percent >= 95.0 {
            Self::Danger
        } else if used_percent >= 80.0 {
            Self::Warning
        } else if used_percent >= 50.0 {
            Self::Info
        } else {
            Self::None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Danger => "danger",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-account content category for theme rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemeCategory {
    pub id: Option<i64>,
    pub account: String,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub sort_order: i64,
}

/// Outcome of one planner or publisher run for one policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Durable record of a run outcome, for diagnosis only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub id: Option<i64>,
    pub account: String,
    pub kind: ContentKind,
    pub generated: i64,
    pub scheduled: i64,
    pub posted: i64,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub created_at: i64,
}

impl ExecutionLogEntry {
    pub fn new(account: String, kind: ContentKind) -> Self {
        Self {
            id: None,
            account,
            kind,
            generated: 0,
            scheduled: 0,
            posted: 0,
            status: RunStatus::Success,
            error_message: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_new_defaults() {
        let post = Post::new(
            "acct".to_string(),
            "Hello".to_string(),
            ContentKind::New,
            PostStatus::Draft,
        );

        assert!(uuid::Uuid::parse_str(&post.id).is_ok());
        assert_eq!(post.account, "acct");
        assert_eq!(post.status, PostStatus::Draft);
        assert_eq!(post.scheduled_at, None);
        assert_eq!(post.posted_at, None);
        assert_eq!(post.external_id, None);
        assert!(post.created_at > 1_600_000_000);
    }

    #[test]
    fn test_post_unique_ids() {
        let a = Post::new("a".into(), "1".into(), ContentKind::New, PostStatus::Draft);
        let b = Post::new("a".into(), "2".into(), ContentKind::New, PostStatus::Draft);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_post_mark_posted() {
        let mut post = Post::new(
            "acct".into(),
            "x".into(),
            ContentKind::New,
            PostStatus::Scheduled,
        );
        post.error_message = Some("old failure".into());

        post.mark_posted("ext-123".to_string(), 1_700_000_000);

        assert_eq!(post.status, PostStatus::Posted);
        assert_eq!(post.external_id, Some("ext-123".to_string()));
        assert_eq!(post.posted_at, Some(1_700_000_000));
        assert_eq!(post.error_message, None);
    }

    #[test]
    fn test_post_mark_failed() {
        let mut post = Post::new(
            "acct".into(),
            "x".into(),
            ContentKind::Reply,
            PostStatus::Scheduled,
        );

        post.mark_failed("rate limited".to_string());

        assert_eq!(post.status, PostStatus::Failed);
        assert_eq!(post.error_message, Some("rate limited".to_string()));
        assert_eq!(post.external_id, None);
    }

    #[test]
    fn test_content_kind_round_trip() {
        for kind in [ContentKind::New, ContentKind::Reply, ContentKind::Quote] {
            assert_eq!(ContentKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ContentKind::parse("retweet"), None);
    }

    #[test]
    fn test_post_status_round_trip() {
        for status in [
            PostStatus::Draft,
            PostStatus::Scheduled,
            PostStatus::Posted,
            PostStatus::Failed,
        ] {
            assert_eq!(PostStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PostStatus::parse("pending"), None);
    }

    #[test]
    fn test_schedule_mode_round_trip() {
        for mode in [
            ScheduleMode::Scheduled,
            ScheduleMode::Immediate,
            ScheduleMode::Draft,
        ] {
            assert_eq!(ScheduleMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(ScheduleMode::parse("now"), None);
    }

    #[test]
    fn test_alert_tier_thresholds() {
        assert_eq!(AlertTier::from_percent(0.0), AlertTier::None);
        assert_eq!(AlertTier::from_percent(49.9), AlertTier::None);
        assert_eq!(AlertTier::from_percent(50.0), AlertTier::Info);
        assert_eq!(AlertTier::from_percent(79.9), AlertTier::Info);
        assert_eq!(AlertTier::from_percent(80.0), AlertTier::Warning);
        assert_eq!(AlertTier::from_percent(94.9), AlertTier::Warning);
        assert_eq!(AlertTier::from_percent(95.0), AlertTier::Danger);
        assert_eq!(AlertTier::from_percent(99.9), AlertTier::Danger);
        assert_eq!(AlertTier::from_percent(100.0), AlertTier::Critical);
        assert_eq!(AlertTier::from_percent(140.0), AlertTier::Critical);
    }

    #[test]
    fn test_alert_tier_ordering() {
        assert!(AlertTier::None < AlertTier::Info);
        assert!(AlertTier::Warning < AlertTier::Danger);
        assert!(AlertTier::Danger < AlertTier::Critical);
    }

    #[test]
    fn test_run_status_round_trip() {
        for status in [RunStatus::Success, RunStatus::Partial, RunStatus::Failed] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::parse("ok"), None);
    }

    #[test]
    fn test_execution_log_entry_new() {
        let entry = ExecutionLogEntry::new("acct".to_string(), ContentKind::Quote);
        assert_eq!(entry.generated, 0);
        assert_eq!(entry.status, RunStatus::Success);
        assert!(entry.created_at > 1_600_000_000);
    }

    #[test]
    fn test_post_serialization_round_trip() {
        let post = Post {
            id: "test-id".to_string(),
            account: "acct".to_string(),
            content: "Test content".to_string(),
            kind: ContentKind::Quote,
            target_id: Some("item-9".to_string()),
            status: PostStatus::Scheduled,
            created_at: 1234567890,
            scheduled_at: Some(1234567900),
            posted_at: None,
            external_id: None,
            error_message: None,
            theme_category: Some("tips".to_string()),
            provider: Some("openai".to_string()),
            model: Some("gpt-4o-mini".to_string()),
        };

        let json = serde_json::to_string(&post).unwrap();
        let back: Post = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id, post.id);
        assert_eq!(back.kind, post.kind);
        assert_eq!(back.target_id, post.target_id);
        assert_eq!(back.scheduled_at, post.scheduled_at);
        assert_eq!(back.theme_category, post.theme_category);
    }

    #[test]
    fn test_budget_settings_default() {
        let settings = BudgetSettings::default();
        assert_eq!(settings.monthly_budget, 0.0);
        assert!(settings.pause_on_exhausted);
        assert!(!settings.prefer_batch);
    }
}
