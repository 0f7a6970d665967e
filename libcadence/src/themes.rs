//! Theme rotation for generated content
//!
//! Structured categories rotate round-robin with an anti-repeat window:
//! the last three categories used by an account are excluded, and when
//! every category sits inside the window (fewer than four enabled), the
//! least-recently-used one is chosen instead. Accounts without categories
//! rotate through their free-text theme list by a stable cursor.

use crate::policy::SchedulePolicy;
use crate::types::ThemeCategory;

/// Categories used this recently are not repeated.
pub const RECENT_WINDOW: usize = 3;

/// The selector's output: text for prompt construction plus what to
/// persist on the resulting post.
#[derive(Debug, Clone, PartialEq)]
pub struct ThemePick {
    /// Theme text handed to the generation prompt.
    pub prompt_theme: String,
    /// Category code persisted on the post, when structured.
    pub category_code: Option<String>,
    /// Updated free-text cursor, when rotating by sequence.
    pub next_cursor: Option<i64>,
}

/// Pick the next theme for a policy.
///
/// `categories` are the account's enabled categories in display order;
/// `recent` is the account's recently-used category codes, newest first.
/// Returns None when the policy has neither categories nor free-text
/// themes to draw from.
pub fn next_theme(
    policy: &SchedulePolicy,
    categories: &[ThemeCategory],
    recent: &[String],
) -> Option<ThemePick> {
    if !categories.is_empty() {
        let category = pick_category(categories, recent)?;
        let mut prompt_theme = category.name.clone();
        if let Some(description) = &category.description {
            if !description.is_empty() {
                prompt_theme = format!("{}: {}", category.name, description);
            }
        }
        return Some(ThemePick {
            prompt_theme,
            category_code: Some(category.code.clone()),
            next_cursor: None,
        });
    }

    if policy.themes.is_empty() {
        return None;
    }

    let len = policy.themes.len() as i64;
    let index = policy.theme_cursor.rem_euclid(len);
    Some(ThemePick {
        prompt_theme: policy.themes[index as usize].clone(),
        category_code: None,
        next_cursor: Some((index + 1) % len),
    })
}

fn pick_category<'a>(
    categories: &'a [ThemeCategory],
    recent: &[String],
) -> Option<&'a ThemeCategory> {
    let window: Vec<&String> = recent.iter().take(RECENT_WINDOW).collect();

    // Round-robin: continue after the most recently used category.
    let start = window
        .first()
        .and_then(|last| categories.iter().position(|c| &&c.code == last))
        .map(|i| i + 1)
        .unwrap_or(0);

    for offset in 0..categories.len() {
        let candidate = &categories[(start + offset) % categories.len()];
        if !window.iter().any(|code| **code == candidate.code) {
            return Some(candidate);
        }
    }

    // Everything is inside the window: take the least recently used.
    categories.iter().max_by_key(|c| {
        window
            .iter()
            .position(|code| **code == c.code)
            .unwrap_or(usize::MAX)
    })
}
