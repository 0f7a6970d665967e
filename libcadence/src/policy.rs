//! Schedule policies and per-policy run-state bookkeeping
//!
//! A policy describes the auto-posting configuration for one
//! (account, content-kind) pair: how many posts per day, at which
//! time-of-day slots, and how generated posts leave the planner.
//! Slot strings are validated at the store boundary so the planner
//! never sees a malformed time.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{CadenceError, Result};
use crate::types::{ContentKind, ScheduleMode};

/// A time-of-day slot, minute granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Slot {
    pub hour: u8,
    pub minute: u8,
}

impl Slot {
    /// Parse a "HH:MM" string. Accepts 00:00 through 23:59.
    pub fn parse(s: &str) -> Result<Self> {
        let (h, m) = s
            .split_once(':')
            .ok_or_else(|| CadenceError::InvalidInput(format!("Invalid slot time: {}", s)))?;
        if h.len() != 2 || m.len() != 2 {
            return Err(CadenceError::InvalidInput(format!(
                "Slot time must be HH:MM: {}",
                s
            )));
        }
        let hour: u8 = h
            .parse()
            .map_err(|_| CadenceError::InvalidInput(format!("Invalid slot hour: {}", s)))?;
        let minute: u8 = m
            .parse()
            .map_err(|_| CadenceError::InvalidInput(format!("Invalid slot minute: {}", s)))?;
        if hour > 23 || minute > 59 {
            return Err(CadenceError::InvalidInput(format!(
                "Slot time out of range: {}",
                s
            )));
        }
        Ok(Self { hour, minute })
    }

    pub fn minutes_of_day(&self) -> u32 {
        self.hour as u32 * 60 + self.minute as u32
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Which slots already fired on a given calendar day.
///
/// Stored as JSON on the policy row. Marking is idempotent: marking the
/// same (date, slot) twice has no effect beyond the first, which is what
/// makes tick re-invocation safe.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SlotRunState {
    /// Local calendar date the `fired` list applies to.
    pub date: Option<NaiveDate>,
    /// Slot strings ("HH:MM") that already ran on `date`.
    pub fired: Vec<String>,
}

impl SlotRunState {
    pub fn has_fired(&self, date: NaiveDate, slot: &Slot) -> bool {
        self.date == Some(date) && self.fired.iter().any(|s| s == &slot.to_string())
    }

    /// Record that `slot` fired on `date`. Returns true if this call was
    /// the first to record it. A date change resets the fired list.
    pub fn mark(&mut self, date: NaiveDate, slot: &Slot) -> bool {
        if self.date != Some(date) {
            self.date = Some(date);
            self.fired.clear();
        }
        let key = slot.to_string();
        if self.fired.contains(&key) {
            false
        } else {
            self.fired.push(key);
            true
        }
    }
}

/// Per (account, content-kind) auto-posting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulePolicy {
    pub id: Option<i64>,
    pub account: String,
    pub kind: ContentKind,
    pub enabled: bool,
    pub posts_per_day: i64,
    /// Ordered "HH:MM" slot strings, validated on save.
    pub slots: Vec<String>,
    pub mode: ScheduleMode,
    /// Free-text themes, rotated by cursor when no categories exist.
    pub themes: Vec<String>,
    pub style_hints: Option<String>,
    pub theme_cursor: i64,
    pub run_state: SlotRunState,
}

impl SchedulePolicy {
    /// Validate invariants the store enforces before saving.
    pub fn validate(&self) -> Result<()> {
        if self.account.is_empty() {
            return Err(CadenceError::InvalidInput(
                "Policy account cannot be empty".to_string(),
            ));
        }
        if self.posts_per_day < 1 {
            return Err(CadenceError::InvalidInput(format!(
                "posts_per_day must be positive, got {}",
                self.posts_per_day
            )));
        }
        if self.slots.is_empty() {
            return Err(CadenceError::InvalidInput(
                "Policy must have at least one slot".to_string(),
            ));
        }
        for slot in &self.slots {
            Slot::parse(slot)?;
        }
        Ok(())
    }

    /// Parsed slots in ascending time-of-day order.
    pub fn sorted_slots(&self) -> Result<Vec<Slot>> {
        let mut parsed = self
            .slots
            .iter()
            .map(|s| Slot::parse(s))
            .collect::<Result<Vec<_>>>()?;
        parsed.sort();
        parsed.dedup();
        Ok(parsed)
    }
}

/// Number of units to generate when firing slot `index` (0-based within
/// the day's sorted slots). Ceiling-distributed: every slot takes
/// `ceil(per_day / slots)` until the daily quota is exhausted, so the
/// day's total is exactly `per_day`, never more.
pub fn units_for_slot(posts_per_day: i64, slot_count: usize, index: usize) -> i64 {
    if posts_per_day <= 0 || slot_count == 0 || index >= slot_count {
        return 0;
    }
    let k = slot_count as i64;
    let base = (posts_per_day + k - 1) / k;
    let consumed = base * index as i64;
    (posts_per_day - consumed).clamp(0, base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_parse_valid() {
        let slot = Slot::parse("09:30").unwrap();
        assert_eq!(slot.hour, 9);
        assert_eq!(slot.minute, 30);
        assert_eq!(slot.to_string(), "09:30");

        assert!(Slot::parse("00:00").is_ok());
        assert!(Slot::parse("23:59").is_ok());
    }

    #[test]
    fn test_slot_parse_rejects_malformed() {
        for bad in ["24:00", "12:60", "9:30", "09:3", "0930", "ab:cd", "", "12:30:00"] {
            assert!(Slot::parse(bad).is_err(), "expected rejection for {:?}", bad);
        }
    }

    #[test]
    fn test_slot_ordering() {
        let a = Slot::parse("08:00").unwrap();
        let b = Slot::parse("08:01").unwrap();
        let c = Slot::parse("21:30").unwrap();
        assert!(a < b);
        assert!(b < c);
        assert_eq!(c.minutes_of_day(), 21 * 60 + 30);
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_run_state_mark_idempotent() {
        let mut state = SlotRunState::default();
        let slot = Slot::parse("09:00").unwrap();
        let today = date("2025-03-14");

        assert!(!state.has_fired(today, &slot));
        assert!(state.mark(today, &slot));
        assert!(state.has_fired(today, &slot));
        // Second mark for the same (date, slot) is a no-op.
        assert!(!state.mark(today, &slot));
        assert_eq!(state.fired.len(), 1);
    }

    #[test]
    fn test_run_state_resets_on_date_change() {
        let mut state = SlotRunState::default();
        let slot = Slot::parse("09:00").unwrap();

        assert!(state.mark(date("2025-03-14"), &slot));
        assert!(state.has_fired(date("2025-03-14"), &slot));

        // Next day: the same slot may fire again.
        assert!(!state.has_fired(date("2025-03-15"), &slot));
        assert!(state.mark(date("2025-03-15"), &slot));
        assert_eq!(state.date, Some(date("2025-03-15")));
        assert_eq!(state.fired, vec!["09:00".to_string()]);
    }

    #[test]
    fn test_run_state_json_round_trip() {
        let mut state = SlotRunState::default();
        state.mark(date("2025-03-14"), &Slot::parse("09:00").unwrap());
        state.mark(date("2025-03-14"), &Slot::parse("18:30").unwrap());

        let json = serde_json::to_string(&state).unwrap();
        let back: SlotRunState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    fn policy() -> SchedulePolicy {
        SchedulePolicy {
            id: None,
            account: "acct".to_string(),
            kind: ContentKind::New,
            enabled: true,
            posts_per_day: 3,
            slots: vec!["09:00".to_string(), "18:00".to_string()],
            mode: ScheduleMode::Scheduled,
            themes: vec!["tips".to_string()],
            style_hints: None,
            theme_cursor: 0,
            run_state: SlotRunState::default(),
        }
    }

    #[test]
    fn test_policy_validate_ok() {
        assert!(policy().validate().is_ok());
    }

    #[test]
    fn test_policy_validate_rejects_bad_slot() {
        let mut p = policy();
        p.slots = vec!["9am".to_string()];
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_policy_validate_rejects_zero_quota() {
        let mut p = policy();
        p.posts_per_day = 0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_policy_validate_rejects_empty_slots() {
        let mut p = policy();
        p.slots.clear();
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_sorted_slots_orders_and_dedups() {
        let mut p = policy();
        p.slots = vec![
            "18:00".to_string(),
            "09:00".to_string(),
            "09:00".to_string(),
        ];
        let sorted = p.sorted_slots().unwrap();
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[0].to_string(), "09:00");
        assert_eq!(sorted[1].to_string(), "18:00");
    }

    #[test]
    fn test_units_for_slot_exact_daily_total() {
        // The sum across all slots must equal posts_per_day exactly.
        for per_day in 1..=10_i64 {
            for slots in 1..=6_usize {
                let total: i64 = (0..slots)
                    .map(|i| units_for_slot(per_day, slots, i))
                    .sum();
                assert_eq!(
                    total, per_day,
                    "per_day={} slots={} distributed {:?}",
                    per_day,
                    slots,
                    (0..slots)
                        .map(|i| units_for_slot(per_day, slots, i))
                        .collect::<Vec<_>>()
                );
            }
        }
    }

    #[test]
    fn test_units_for_slot_front_loads_ceiling() {
        // 5 posts over 2 slots: ceil(5/2)=3 then the remainder.
        assert_eq!(units_for_slot(5, 2, 0), 3);
        assert_eq!(units_for_slot(5, 2, 1), 2);

        // 1 post over 3 slots: only the first slot generates.
        assert_eq!(units_for_slot(1, 3, 0), 1);
        assert_eq!(units_for_slot(1, 3, 1), 0);
        assert_eq!(units_for_slot(1, 3, 2), 0);

        // 4 posts over 3 slots: 2, 2, 0.
        assert_eq!(units_for_slot(4, 3, 0), 2);
        assert_eq!(units_for_slot(4, 3, 1), 2);
        assert_eq!(units_for_slot(4, 3, 2), 0);
    }

    #[test]
    fn test_units_for_slot_degenerate() {
        assert_eq!(units_for_slot(0, 3, 0), 0);
        assert_eq!(units_for_slot(3, 0, 0), 0);
        assert_eq!(units_for_slot(3, 2, 5), 0);
    }
}
