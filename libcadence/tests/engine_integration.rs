//! End-to-end engine tests
//!
//! These tests drive the tick pipeline over simulated days and verify:
//! - Daily quota landing exactly, across slots and ticks
//! - Generated posts flowing through to publication as their time comes
//! - Budget exhaustion pausing generation while publishing continues
//! - Failed publishes staying failed until a user retries them
//! - Theme categories rotating without repeats

use anyhow::Result;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use libcadence::config::PricingConfig;
use libcadence::db::Database;
use libcadence::engagement::EngagementSource;
use libcadence::generator::{Generator, MockGenerator};
use libcadence::ledger::UsageLedger;
use libcadence::planner::AutoPostPlanner;
use libcadence::platforms::mock::MockPlatform;
use libcadence::platforms::Platform;
use libcadence::policy::{SchedulePolicy, SlotRunState};
use libcadence::publisher::Publisher;
use libcadence::tick::TickDriver;
use libcadence::types::{
    BudgetSettings, ContentKind, PostStatus, RunStatus, ScheduleMode, ThemeCategory,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Helper to create a test database
async fn create_test_db() -> Result<(TempDir, Database)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let db = Database::new(&db_path.to_string_lossy()).await?;
    Ok((temp_dir, db))
}

fn offset() -> FixedOffset {
    FixedOffset::east_opt(0).unwrap()
}

fn planner(
    db: &Database,
    generator: Arc<dyn Generator>,
    platform: Option<Arc<dyn Platform>>,
    engagement: Option<Arc<dyn EngagementSource>>,
    pricing: PricingConfig,
) -> AutoPostPlanner {
    AutoPostPlanner::new(
        db.clone(),
        UsageLedger::new(db.clone(), offset()),
        generator,
        platform,
        engagement,
        offset(),
        pricing,
    )
}

fn driver(
    db: &Database,
    generator: Arc<dyn Generator>,
    platform: Arc<MockPlatform>,
    pricing: PricingConfig,
) -> TickDriver {
    TickDriver::new(
        db.clone(),
        planner(db, generator, Some(platform.clone()), None, pricing),
        Some(Publisher::new(db.clone(), platform)),
        Duration::from_secs(60),
        30,
    )
}

fn base_policy(account: &str, per_day: i64, slots: &[&str]) -> SchedulePolicy {
    SchedulePolicy {
        id: None,
        account: account.to_string(),
        kind: ContentKind::New,
        enabled: true,
        posts_per_day: per_day,
        slots: slots.iter().map(|s| s.to_string()).collect(),
        mode: ScheduleMode::Scheduled,
        themes: vec!["databases".to_string(), "editors".to_string()],
        style_hints: Some("dry humor".to_string()),
        theme_cursor: 0,
        run_state: SlotRunState::default(),
    }
}

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

#[tokio::test]
async fn test_full_day_produces_and_publishes_exact_quota() -> Result<()> {
    let (_tmp, db) = create_test_db().await?;
    db.save_policy(&base_policy("a@example.social", 3, &["09:00", "18:00"]))
        .await?;

    let generator = Arc::new(MockGenerator::success("queued thought"));
    let platform = Arc::new(MockPlatform::success());
    let driver = driver(&db, generator.clone(), platform.clone(), PricingConfig::default());

    // Morning tick: first slot fires with ceil(3/2) = 2 units.
    let outcome = driver.handle_tick(at(2025, 6, 10, 9, 1)).await?;
    assert_eq!(outcome.planner.as_ref().unwrap().posts_generated, 2);

    // Evening tick: second slot contributes the remaining unit, and the
    // morning posts (spread before 18:00) are now due and go out.
    let outcome = driver.handle_tick(at(2025, 6, 10, 18, 1)).await?;
    assert_eq!(outcome.planner.as_ref().unwrap().posts_generated, 1);
    assert_eq!(outcome.publish.as_ref().unwrap().published, 2);

    // Next morning: the evening post has passed its scheduled time.
    let outcome = driver.handle_tick(at(2025, 6, 11, 0, 30)).await?;
    assert_eq!(outcome.planner.as_ref().unwrap().posts_generated, 0);
    assert_eq!(outcome.publish.as_ref().unwrap().published, 1);

    // Exactly 3 posts for the day, all posted, none left queued.
    assert_eq!(generator.calls(), 3);
    assert_eq!(platform.calls(), 3);
    assert!(db
        .list_posts_by_status(PostStatus::Scheduled, 10)
        .await?
        .is_empty());
    assert_eq!(db.list_posts_by_status(PostStatus::Posted, 10).await?.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_budget_exhaustion_pauses_generation_mid_slot() -> Result<()> {
    let (_tmp, db) = create_test_db().await?;
    db.save_policy(&base_policy("a@example.social", 3, &["09:00"]))
        .await?;
    // Each mock call costs (100 * 3 + 40 * 15) / 1e6 = $0.0009; the
    // budget fits exactly one call.
    db.save_budget_settings(&BudgetSettings {
        monthly_budget: 0.0008,
        pause_on_exhausted: true,
        ..Default::default()
    })
    .await?;

    let pricing = PricingConfig {
        input_per_mtok: 3.0,
        output_per_mtok: 15.0,
        ..Default::default()
    };
    let generator = Arc::new(MockGenerator::success("pricey"));
    let platform = Arc::new(MockPlatform::success());
    let driver = driver(&db, generator.clone(), platform, pricing);

    let outcome = driver.handle_tick(at(2025, 6, 10, 9, 1)).await?;
    let planned = outcome.planner.as_ref().unwrap();
    assert_eq!(planned.posts_generated, 1);
    assert!(planned.budget_paused);
    assert_eq!(generator.calls(), 1);

    let entries = db.list_execution_log(10).await?;
    // One unit landed before the stop, so the run is partial and the
    // entry still carries the count.
    assert_eq!(entries[0].status, RunStatus::Partial);
    assert_eq!(entries[0].generated, 1);
    assert_eq!(
        entries[0].error_message.as_deref(),
        Some("Monthly budget exhausted")
    );

    // Later ticks the same month stay paused and produce nothing.
    let outcome = driver.handle_tick(at(2025, 6, 20, 9, 1)).await?;
    assert!(outcome.planner.as_ref().unwrap().budget_paused);
    assert_eq!(generator.calls(), 1);

    // A new month resets the window and generation resumes.
    let outcome = driver.handle_tick(at(2025, 7, 1, 9, 1)).await?;
    let planned = outcome.planner.as_ref().unwrap();
    assert!(planned.posts_generated > 0);
    Ok(())
}

#[tokio::test]
async fn test_publishing_continues_while_generation_is_paused() -> Result<()> {
    let (_tmp, db) = create_test_db().await?;
    db.save_policy(&base_policy("a@example.social", 1, &["09:00"]))
        .await?;
    db.save_budget_settings(&BudgetSettings {
        monthly_budget: 1.0,
        pause_on_exhausted: true,
        ..Default::default()
    })
    .await?;
    // Already over budget before any tick.
    db.append_usage(&libcadence::types::UsageRecord {
        id: None,
        provider: "mock".to_string(),
        model: "mock-model".to_string(),
        input_tokens: 0,
        output_tokens: 0,
        cache_read_tokens: 0,
        cache_write_tokens: 0,
        batch: false,
        cost: 1.5,
        recorded_at: at(2025, 6, 1, 0, 0).timestamp(),
    })
    .await?;
    // A due post from before the exhaustion.
    let mut post = libcadence::types::Post::new(
        "a@example.social".to_string(),
        "still goes out".to_string(),
        ContentKind::New,
        PostStatus::Scheduled,
    );
    post.scheduled_at = Some(at(2025, 6, 9, 12, 0).timestamp());
    db.create_post(&post).await?;

    let generator = Arc::new(MockGenerator::success("never happens"));
    let platform = Arc::new(MockPlatform::success());
    let driver = driver(&db, generator.clone(), platform.clone(), PricingConfig::default());

    let outcome = driver.handle_tick(at(2025, 6, 10, 9, 1)).await?;
    assert!(outcome.planner.as_ref().unwrap().budget_paused);
    assert_eq!(generator.calls(), 0);
    // The budget gates generation only; the queue still drains.
    assert_eq!(outcome.publish.as_ref().unwrap().published, 1);
    assert_eq!(platform.published_contents(), vec!["still goes out"]);
    Ok(())
}

#[tokio::test]
async fn test_failed_publish_stays_failed_until_user_retries() -> Result<()> {
    let (_tmp, db) = create_test_db().await?;
    db.save_policy(&base_policy("a@example.social", 2, &["09:00"]))
        .await?;

    // The platform rejects everything on the first day.
    let generator = Arc::new(MockGenerator::success("flaky content"));
    let broken = Arc::new(MockPlatform::failure("instance down"));
    let driver_broken = driver(&db, generator.clone(), broken, PricingConfig::default());

    driver_broken.handle_tick(at(2025, 6, 10, 9, 1)).await?;
    // Posts were scheduled into the future; tick again after their time.
    driver_broken.handle_tick(at(2025, 6, 11, 0, 30)).await?;

    let failed = db.list_posts_by_status(PostStatus::Failed, 10).await?;
    assert_eq!(failed.len(), 2);

    // Subsequent ticks never touch failed posts.
    let working = Arc::new(MockPlatform::success());
    let driver_working = driver(&db, generator, working.clone(), PricingConfig::default());
    let outcome = driver_working.handle_tick(at(2025, 6, 11, 1, 0)).await?;
    assert_eq!(outcome.publish.as_ref().unwrap().attempted, 0);
    assert_eq!(working.calls(), 0);

    // A user-triggered retry republishes.
    let publisher = Publisher::new(db.clone(), working.clone());
    let retried = publisher.retry(&failed[0].id, at(2025, 6, 11, 2, 0)).await?;
    assert_eq!(retried.status, PostStatus::Posted);
    assert_eq!(working.calls(), 1);
    assert_eq!(db.list_posts_by_status(PostStatus::Failed, 10).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_theme_categories_rotate_without_repeats() -> Result<()> {
    let (_tmp, db) = create_test_db().await?;
    let mut policy = base_policy("a@example.social", 1, &["09:00"]);
    policy.themes = vec![];
    db.save_policy(&policy).await?;

    for (i, code) in ["alpha", "beta", "gamma", "delta"].iter().enumerate() {
        db.save_category(&ThemeCategory {
            id: None,
            account: "a@example.social".to_string(),
            code: code.to_string(),
            name: format!("Topic {}", code),
            description: None,
            enabled: true,
            sort_order: i as i64,
        })
        .await?;
    }

    let generator = Arc::new(MockGenerator::success("themed"));
    let platform = Arc::new(MockPlatform::success());
    let driver = driver(&db, generator, platform, PricingConfig::default());

    // One post per day for five days.
    for day in 10..15 {
        driver.handle_tick(at(2025, 6, day, 9, 1)).await?;
    }

    let mut posts: Vec<_> = db
        .list_posts_by_status(PostStatus::Scheduled, 10)
        .await?
        .into_iter()
        .chain(db.list_posts_by_status(PostStatus::Posted, 10).await?)
        .collect();
    posts.sort_by_key(|p| p.created_at);

    let used: Vec<_> = posts
        .iter()
        .map(|p| p.theme_category.clone().unwrap())
        .collect();
    assert_eq!(used, vec!["alpha", "beta", "gamma", "delta", "alpha"]);
    Ok(())
}

#[tokio::test]
async fn test_two_accounts_keep_independent_schedules() -> Result<()> {
    let (_tmp, db) = create_test_db().await?;
    db.save_policy(&base_policy("a@example.social", 1, &["09:00"]))
        .await?;
    db.save_policy(&base_policy("b@example.social", 2, &["12:00"]))
        .await?;

    let generator = Arc::new(MockGenerator::success("per account"));
    let platform = Arc::new(MockPlatform::success());
    let driver = driver(&db, generator, platform, PricingConfig::default());

    let outcome = driver.handle_tick(at(2025, 6, 10, 9, 30)).await?;
    assert_eq!(outcome.planner.as_ref().unwrap().posts_generated, 1);

    let outcome = driver.handle_tick(at(2025, 6, 10, 12, 30)).await?;
    assert_eq!(outcome.planner.as_ref().unwrap().posts_generated, 2);

    let scheduled = db.list_posts_by_status(PostStatus::Scheduled, 10).await?;
    let by_a = scheduled.iter().filter(|p| p.account == "a@example.social").count();
    let by_b = scheduled.iter().filter(|p| p.account == "b@example.social").count();
    assert_eq!((by_a, by_b), (1, 2));
    Ok(())
}
