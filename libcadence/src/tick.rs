//! Tick driver
//!
//! One entry point per timer or HTTP trigger: prune old execution log
//! entries, run the planner, then drain due scheduled posts, all under a
//! cooperative deadline. Stages never block each other; a planner error
//! is logged and the publisher still runs.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::db::Database;
use crate::error::Result;
use crate::planner::{AutoPostPlanner, PlannerOutcome};
use crate::publisher::{PublishOutcome, Publisher};

/// Soft deadline checked between units of work, never mid-publish.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    pub fn exceeded(&self) -> bool {
        Instant::now() >= self.at
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub log_entries_removed: u64,
    pub planner: Option<PlannerOutcome>,
    pub publish: Option<PublishOutcome>,
    pub deadline_hit: bool,
}

pub struct TickDriver {
    db: Database,
    planner: AutoPostPlanner,
    publisher: Option<Publisher>,
    tick_deadline: Duration,
    log_retention_days: i64,
}

impl TickDriver {
    pub fn new(
        db: Database,
        planner: AutoPostPlanner,
        publisher: Option<Publisher>,
        tick_deadline: Duration,
        log_retention_days: i64,
    ) -> Self {
        Self {
            db,
            planner,
            publisher,
            tick_deadline,
            log_retention_days,
        }
    }

    pub async fn handle_tick(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        let deadline = Deadline::after(self.tick_deadline);
        let mut outcome = TickOutcome::default();

        // Cleanup is best-effort housekeeping.
        let cutoff = now.timestamp() - self.log_retention_days * 86_400;
        match self.db.cleanup_execution_log(cutoff).await {
            Ok(removed) => outcome.log_entries_removed = removed,
            Err(e) => warn!(error = %e, "Execution log cleanup failed"),
        }

        if deadline.exceeded() {
            outcome.deadline_hit = true;
            warn!("Deadline reached before planning, skipping planner and publisher");
            return Ok(outcome);
        }

        match self.planner.run_tick(now).await {
            Ok(planned) => outcome.planner = Some(planned),
            Err(e) => error!(error = %e, "Planner pass failed"),
        }

        if let Some(publisher) = &self.publisher {
            if deadline.exceeded() {
                outcome.deadline_hit = true;
                warn!("Deadline reached before publishing, leaving due posts queued");
            } else {
                let published = publisher.publish_due(now, || deadline.exceeded()).await?;
                outcome.publish = Some(published);
            }
        }

        if deadline.exceeded() {
            outcome.deadline_hit = true;
        }

        info!(
            removed = outcome.log_entries_removed,
            generated = outcome.planner.as_ref().map(|p| p.posts_generated),
            published = outcome.publish.as_ref().map(|p| p.published),
            deadline_hit = outcome.deadline_hit,
            "Tick complete"
        );
        Ok(outcome)
    }
}
