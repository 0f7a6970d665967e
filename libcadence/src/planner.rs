//! Auto-post planner
//!
//! Walks every enabled schedule policy once per tick. A slot whose time
//! has arrived in the configured local calendar fires at most once per
//! local day; firing is committed to the policy's run state before any
//! generation happens, so a crash mid-run cannot double-produce.
//!
//! Daily quota is split across slots front-loaded: with N posts per day
//! and k slots, each slot gets ceil(N/k) units until N is exhausted, so
//! the per-day total is exactly N.

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Timelike, Utc};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::PricingConfig;
use crate::db::Database;
use crate::engagement::EngagementSource;
use crate::error::{CadenceError, Result};
use crate::generator::{compute_cost, GenerationRequest, Generator};
use crate::ledger::UsageLedger;
use crate::platforms::Platform;
use crate::policy::{units_for_slot, SchedulePolicy, Slot};
use crate::themes::next_theme;
use crate::types::{
    AlertTier, BudgetSettings, ContentKind, ExecutionLogEntry, Post, PostStatus, RunStatus,
    ScheduleMode, UsageRecord,
};

/// What one tick of the planner produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlannerOutcome {
    pub policies_run: usize,
    pub policies_failed: usize,
    pub posts_generated: usize,
    pub posts_scheduled: usize,
    pub posts_posted: usize,
    pub units_skipped: usize,
    /// Generation was blocked for at least one policy because the
    /// monthly budget is exhausted.
    pub budget_paused: bool,
}

pub struct AutoPostPlanner {
    db: Database,
    ledger: UsageLedger,
    generator: Arc<dyn Generator>,
    platform: Option<Arc<dyn Platform>>,
    engagement: Option<Arc<dyn EngagementSource>>,
    offset: FixedOffset,
    pricing: PricingConfig,
}

impl AutoPostPlanner {
    pub fn new(
        db: Database,
        ledger: UsageLedger,
        generator: Arc<dyn Generator>,
        platform: Option<Arc<dyn Platform>>,
        engagement: Option<Arc<dyn EngagementSource>>,
        offset: FixedOffset,
        pricing: PricingConfig,
    ) -> Self {
        Self {
            db,
            ledger,
            generator,
            platform,
            engagement,
            offset,
            pricing,
        }
    }

    /// Run one planning pass at `now`.
    ///
    /// Policies are isolated: one policy's failure is logged and recorded
    /// in the execution log, then the next policy still runs. Budget
    /// exhaustion blocks generation for the affected policy and gets its
    /// own log entry, but the remaining policies are still visited so
    /// every account's stop is recorded.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> Result<PlannerOutcome> {
        let local = now.with_timezone(&self.offset);
        let today = local.date_naive();
        let now_minutes = local.hour() * 60 + local.minute();

        let status = self.ledger.monthly_status(now).await?;
        match status.tier {
            AlertTier::None => {}
            AlertTier::Info => info!(
                used_percent = status.used_percent,
                "Monthly budget half consumed"
            ),
            AlertTier::Warning | AlertTier::Danger => warn!(
                used_percent = status.used_percent,
                "Monthly budget nearly consumed"
            ),
            AlertTier::Critical => warn!(
                used_percent = status.used_percent,
                "Monthly budget exhausted"
            ),
        }

        let settings = self
            .db
            .get_budget_settings()
            .await?
            .unwrap_or_default();

        let mut outcome = PlannerOutcome::default();
        let policies = self.db.list_enabled_policies().await?;

        for policy in policies {
            outcome.policies_run += 1;
            let mut entry = ExecutionLogEntry::new(policy.account.clone(), policy.kind);

            match self
                .run_policy(policy, now, today, now_minutes, &settings, &mut entry)
                .await
            {
                Ok(summary) => {
                    outcome.posts_generated += summary.generated;
                    outcome.posts_scheduled += summary.scheduled;
                    outcome.posts_posted += summary.posted;
                    outcome.units_skipped += summary.skipped;
                    if summary.paused {
                        outcome.budget_paused = true;
                    }
                    if entry.status == RunStatus::Failed {
                        outcome.policies_failed += 1;
                    }
                    self.db.append_execution_log(&entry).await?;
                }
                Err(e) => {
                    error!(account = %entry.account, kind = entry.kind.as_str(), error = %e,
                        "Policy run failed");
                    outcome.policies_failed += 1;
                    entry.status = RunStatus::Failed;
                    entry.error_message = Some(e.to_string());
                    self.db.append_execution_log(&entry).await?;
                }
            }
        }

        Ok(outcome)
    }

    async fn run_policy(
        &self,
        mut policy: SchedulePolicy,
        now: DateTime<Utc>,
        today: NaiveDate,
        now_minutes: u32,
        settings: &BudgetSettings,
        entry: &mut ExecutionLogEntry,
    ) -> Result<PolicySummary> {
        let policy_id = policy
            .id
            .ok_or_else(|| CadenceError::InvalidInput("Policy has no id".to_string()))?;
        let slots = policy.sorted_slots()?;
        let mut summary = PolicySummary::default();

        for (index, slot) in slots.iter().enumerate() {
            if slot.minutes_of_day() > now_minutes {
                break;
            }
            // Committing the fired marker before generating keeps reruns
            // of the same tick from producing duplicates.
            if !policy.run_state.mark(today, slot) {
                continue;
            }
            self.db
                .update_run_state(policy_id, &policy.run_state)
                .await?;

            let units = units_for_slot(policy.posts_per_day, slots.len(), index);
            if units == 0 {
                continue;
            }
            debug!(account = %policy.account, kind = policy.kind.as_str(),
                slot = %slot, units, "Slot fired");

            let window = self.slot_window(now, today, &slots, index)?;

            for unit in 0..units {
                if self.ledger.should_pause_generation(now).await? {
                    warn!(account = %policy.account,
                        "Monthly budget exhausted, pausing generation");
                    summary.paused = true;
                    entry.error_message = Some("Monthly budget exhausted".to_string());
                    return Ok(self.finish_entry(summary, entry));
                }

                // One unit's failure must not take down the rest of the
                // slot; record it and move on.
                match self
                    .produce_unit(&mut policy, now, settings, window, units, unit, entry)
                    .await
                {
                    Ok(UnitResult::Generated) => summary.generated += 1,
                    Ok(UnitResult::Scheduled) => {
                        summary.generated += 1;
                        summary.scheduled += 1;
                    }
                    Ok(UnitResult::Posted) => {
                        summary.generated += 1;
                        summary.posted += 1;
                    }
                    Ok(UnitResult::PublishFailed) => {
                        summary.generated += 1;
                        summary.failed += 1;
                    }
                    Ok(UnitResult::Skipped) => summary.skipped += 1,
                    Err(e) => {
                        warn!(account = %policy.account, kind = policy.kind.as_str(),
                            error = %e, "Generation unit failed");
                        summary.failed += 1;
                        if entry.error_message.is_none() {
                            entry.error_message = Some(e.to_string());
                        }
                    }
                }
            }
        }

        Ok(self.finish_entry(summary, entry))
    }

    /// Copy the summary's counts into the log entry and derive its status
    /// from the actual unit outcomes.
    fn finish_entry(&self, summary: PolicySummary, entry: &mut ExecutionLogEntry) -> PolicySummary {
        entry.generated = summary.generated as i64;
        entry.scheduled = summary.scheduled as i64;
        entry.posted = summary.posted as i64;
        if summary.failed > 0 || summary.paused {
            entry.status = if summary.generated > 0 {
                RunStatus::Partial
            } else {
                RunStatus::Failed
            };
        }
        summary
    }

    #[allow(clippy::too_many_arguments)]
    async fn produce_unit(
        &self,
        policy: &mut SchedulePolicy,
        now: DateTime<Utc>,
        settings: &BudgetSettings,
        window: (i64, i64),
        units: i64,
        unit: i64,
        entry: &mut ExecutionLogEntry,
    ) -> Result<UnitResult> {
        let policy_id = policy.id.unwrap_or_default();

        let (theme, category_code) = match policy.kind {
            ContentKind::New => {
                let categories = self.db.list_enabled_categories(&policy.account).await?;
                let recent = self.db.recent_theme_codes(&policy.account, 3).await?;
                match next_theme(policy, &categories, &recent) {
                    Some(pick) => {
                        if let Some(cursor) = pick.next_cursor {
                            policy.theme_cursor = cursor;
                            self.db.update_theme_cursor(policy_id, cursor).await?;
                        }
                        (pick.prompt_theme, pick.category_code)
                    }
                    None => (String::new(), None),
                }
            }
            ContentKind::Reply | ContentKind::Quote => (String::new(), None),
        };

        let target = match policy.kind {
            ContentKind::New => None,
            ContentKind::Reply | ContentKind::Quote => {
                let Some(source) = &self.engagement else {
                    debug!(account = %policy.account, kind = policy.kind.as_str(),
                        "No engagement source configured, skipping unit");
                    return Ok(UnitResult::Skipped);
                };
                match source.find_target(&policy.account, policy.kind).await? {
                    Some(target) => Some(target),
                    None => {
                        debug!(account = %policy.account, kind = policy.kind.as_str(),
                            "No engagement target available, skipping unit");
                        return Ok(UnitResult::Skipped);
                    }
                }
            }
        };

        let batch = settings.prefer_batch && policy.mode != ScheduleMode::Immediate;
        let request = GenerationRequest {
            theme,
            kind: policy.kind,
            style_hints: policy.style_hints.clone(),
            target_excerpt: target.as_ref().map(|t| t.excerpt.clone()),
            batch,
            use_caching: settings.prefer_caching,
        };

        let generation = self.generator.generate(&request).await?;

        let cost = compute_cost(generation.usage, batch, &self.pricing);
        self.ledger
            .record(&UsageRecord {
                id: None,
                provider: self.generator.name().to_string(),
                model: self.generator.model().to_string(),
                input_tokens: generation.usage.input_tokens,
                output_tokens: generation.usage.output_tokens,
                cache_read_tokens: generation.usage.cache_read_tokens,
                cache_write_tokens: generation.usage.cache_write_tokens,
                batch,
                cost,
                recorded_at: now.timestamp(),
            })
            .await?;

        let mut post = Post::new(
            policy.account.clone(),
            generation.text,
            policy.kind,
            PostStatus::Scheduled,
        );
        // Stamp with the tick's clock, not wall time.
        post.created_at = now.timestamp();
        post.target_id = target.map(|t| t.status_id);
        post.theme_category = category_code;
        post.provider = Some(self.generator.name().to_string());
        post.model = Some(self.generator.model().to_string());

        match policy.mode {
            ScheduleMode::Draft => {
                post.status = PostStatus::Draft;
                self.db.create_post(&post).await?;
                Ok(UnitResult::Generated)
            }
            ScheduleMode::Scheduled => {
                post.scheduled_at = Some(spread_time(window, units, unit));
                self.db.create_post(&post).await?;
                Ok(UnitResult::Scheduled)
            }
            ScheduleMode::Immediate => {
                let Some(platform) = &self.platform else {
                    return Err(CadenceError::InvalidInput(
                        "Immediate mode requires a configured platform".to_string(),
                    ));
                };
                self.db.create_post(&post).await?;
                match platform.publish(&post).await {
                    Ok(external_id) => {
                        post.mark_posted(external_id, now.timestamp());
                        self.db.update_post_outcome(&post).await?;
                        Ok(UnitResult::Posted)
                    }
                    Err(e) => {
                        warn!(post_id = %post.id, error = %e, "Immediate publish failed");
                        post.mark_failed(e.to_string());
                        self.db.update_post_outcome(&post).await?;
                        if entry.error_message.is_none() {
                            entry.error_message = Some(e.to_string());
                        }
                        Ok(UnitResult::PublishFailed)
                    }
                }
            }
        }
    }

    /// Unix-second window `[now, next slot)` for spacing out this slot's
    /// units. Falls back to one minute per unit when the tick arrives
    /// after the next slot has already started.
    fn slot_window(
        &self,
        now: DateTime<Utc>,
        today: NaiveDate,
        slots: &[Slot],
        index: usize,
    ) -> Result<(i64, i64)> {
        let start = now.timestamp();
        let end_minutes = slots
            .get(index + 1)
            .map(|s| s.minutes_of_day())
            .unwrap_or(24 * 60);

        let end = today
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| self.offset.from_local_datetime(&midnight).single())
            .map(|local_midnight| local_midnight.timestamp() + i64::from(end_minutes) * 60)
            .ok_or_else(|| {
                CadenceError::InvalidInput("Calendar offset produced no valid midnight".to_string())
            })?;

        Ok((start, end.max(start + 60)))
    }
}

#[derive(Debug, Default)]
struct PolicySummary {
    generated: usize,
    scheduled: usize,
    posted: usize,
    skipped: usize,
    failed: usize,
    paused: bool,
}

enum UnitResult {
    Generated,
    Scheduled,
    Posted,
    PublishFailed,
    Skipped,
}

/// Evenly spread unit `unit` of `units` across `[start, end)`, with a
/// little jitter so posts do not land on exact clock boundaries. The
/// first unit sits at least a minute out, so the tick that planned a
/// post never also publishes it.
fn spread_time((start, end): (i64, i64), units: i64, unit: i64) -> i64 {
    let span = (end - start).max(units);
    let step = span / units;
    let jitter = if step > 4 {
        rand::thread_rng().gen_range(0..step / 4)
    } else {
        0
    };
    (start + 60 + step * unit + jitter).min(end - 1)
}
