//! Cadence - budget-gated auto-posting engine for the decentralized social web
//!
//! This library provides the scheduling core: per-account schedule
//! policies with daily posting quotas, theme rotation, LLM generation
//! gated by a monthly budget, and a publisher that drains due posts to
//! the configured platform.

pub mod config;
pub mod db;
pub mod engagement;
pub mod error;
pub mod generator;
pub mod ledger;
pub mod logging;
pub mod planner;
pub mod platforms;
pub mod policy;
pub mod publisher;
pub mod themes;
pub mod tick;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{CadenceError, Result};
pub use ledger::{MonthlyStatus, UsageLedger};
pub use planner::{AutoPostPlanner, PlannerOutcome};
pub use policy::{SchedulePolicy, Slot, SlotRunState};
pub use publisher::{PublishOutcome, Publisher};
pub use tick::{TickDriver, TickOutcome};
pub use types::{AlertTier, ContentKind, Post, PostStatus, ScheduleMode};
