//! cadence-queue - Manage the post queue and budget
//!
//! Unix-style tool for inspecting and operating the Cadence queue.

use chrono::Utc;
use clap::{Parser, Subcommand};
use libcadence::logging::{LogFormat, LoggingConfig};
use libcadence::publisher::Publisher;
use libcadence::types::PostStatus;
use libcadence::{CadenceError, Config, Database, Result, UsageLedger};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "cadence-queue")]
#[command(version)]
#[command(about = "Manage the Cadence post queue and budget")]
#[command(long_about = "\
cadence-queue - Manage the post queue and budget

DESCRIPTION:
    cadence-queue is a Unix-style tool for inspecting and operating the
    Cadence queue. Use it to list queued posts, cancel a scheduled post,
    retry a failed one, and check queue statistics or monthly AI spend.

COMMANDS:
    list      List posts by status (default: scheduled)
    cancel    Pull a scheduled post back to draft
    retry     Re-attempt a failed post right now
    stats     Show post counts by status
    usage     Show monthly spend against the budget

USAGE EXAMPLES:
    # List scheduled posts
    cadence-queue list

    # List failed posts in JSON format
    cadence-queue list --status failed --format json

    # Cancel a specific post
    cadence-queue cancel <POST_ID>

    # Retry a failed post
    cadence-queue retry <POST_ID>

    # Monthly budget status
    cadence-queue usage

CONFIGURATION:
    Configuration file: ~/.config/cadence/config.toml
    Database location: ~/.local/share/cadence/cadence.db

    Override with environment variables:
        CADENCE_CONFIG    - Path to config file

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Authentication error
    3 - Invalid input (bad post ID, unknown status, etc.)

For more information, visit: https://github.com/cadence-tools/cadence
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    #[arg(help = "Enable verbose logging to stderr (useful for debugging)")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List posts by status
    List {
        /// Status to list: draft, scheduled, posted, failed
        #[arg(short, long, default_value = "scheduled")]
        status: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Maximum number of posts to show
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },

    /// Pull a scheduled post back to draft
    Cancel {
        /// Post ID to cancel
        post_id: String,
    },

    /// Re-attempt a failed post right now
    Retry {
        /// Post ID to retry
        post_id: String,
    },

    /// Show post counts by status
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show monthly spend against the budget
    Usage {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::new(LogFormat::Text, "error".to_string(), cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;

    match cli.command {
        Commands::List {
            status,
            format,
            limit,
        } => {
            cmd_list(&db, &status, &format, limit).await?;
        }
        Commands::Cancel { post_id } => {
            cmd_cancel(&db, &post_id).await?;
        }
        Commands::Retry { post_id } => {
            cmd_retry(&db, &config, &post_id).await?;
        }
        Commands::Stats { format } => {
            cmd_stats(&db, &format).await?;
        }
        Commands::Usage { format } => {
            cmd_usage(&db, &config, &format).await?;
        }
    }

    Ok(())
}

fn validate_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(CadenceError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

/// List posts by status
async fn cmd_list(db: &Database, status: &str, format: &str, limit: i64) -> Result<()> {
    validate_format(format)?;

    let status = PostStatus::parse(status).ok_or_else(|| {
        CadenceError::InvalidInput(format!(
            "Invalid status '{}'. Must be draft, scheduled, posted, or failed",
            status
        ))
    })?;

    let posts = db.list_posts_by_status(status, limit).await?;

    if format == "json" {
        let json: Vec<serde_json::Value> = posts
            .iter()
            .map(|p| {
                serde_json::json!({
                    "id": p.id,
                    "account": p.account,
                    "content": p.content,
                    "kind": p.kind.as_str(),
                    "status": p.status.as_str(),
                    "scheduled_at": p.scheduled_at,
                    "posted_at": p.posted_at,
                    "theme_category": p.theme_category,
                    "error_message": p.error_message,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json).unwrap());
    } else {
        let now = Utc::now().timestamp();
        for post in &posts {
            let preview = truncate_content(&post.content, 50);
            let when = match (status, post.scheduled_at) {
                (PostStatus::Scheduled, Some(ts)) => format_time_until(now, ts),
                _ => post
                    .posted_at
                    .or(post.scheduled_at)
                    .map(|ts| ts.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            };
            println!("{} | {} | {} | {}", post.id, post.account, preview, when);
        }
    }

    Ok(())
}

/// Truncate content to max length with ellipsis
fn truncate_content(content: &str, max_len: usize) -> String {
    if content.chars().count() <= max_len {
        content.to_string()
    } else {
        let truncated: String = content.chars().take(max_len).collect();
        format!("{}...", truncated)
    }
}

/// Format time until scheduled time in human-readable format
fn format_time_until(now: i64, scheduled_at: i64) -> String {
    let diff = scheduled_at - now;

    if diff < 0 {
        return "overdue".to_string();
    }

    let minutes = diff / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("in {} day{}", days, if days == 1 { "" } else { "s" })
    } else if hours > 0 {
        format!("in {} hour{}", hours, if hours == 1 { "" } else { "s" })
    } else if minutes > 0 {
        format!("in {} minute{}", minutes, if minutes == 1 { "" } else { "s" })
    } else {
        "in <1 minute".to_string()
    }
}

/// Pull a scheduled post back to draft
async fn cmd_cancel(db: &Database, post_id: &str) -> Result<()> {
    if db.cancel_post(post_id).await? {
        println!("Cancelled {}", post_id);
        Ok(())
    } else {
        Err(CadenceError::InvalidInput(format!(
            "No scheduled post with id {}",
            post_id
        )))
    }
}

/// Re-attempt a failed post
async fn cmd_retry(db: &Database, config: &Config, post_id: &str) -> Result<()> {
    use libcadence::platforms::mastodon::MastodonClient;

    let mastodon = config
        .mastodon
        .as_ref()
        .filter(|m| m.enabled)
        .ok_or_else(|| {
            CadenceError::InvalidInput("No platform configured, cannot retry".to_string())
        })?;

    let platform = Arc::new(MastodonClient::from_config(mastodon)?);
    let publisher = Publisher::new(db.clone(), platform);

    let post = publisher.retry(post_id, Utc::now()).await?;
    println!(
        "Posted {} (external id {})",
        post.id,
        post.external_id.as_deref().unwrap_or("-")
    );
    Ok(())
}

/// Show post counts by status
async fn cmd_stats(db: &Database, format: &str) -> Result<()> {
    validate_format(format)?;

    let counts = db.count_posts_by_status().await?;

    if format == "json" {
        let json: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(status, count)| (status.clone(), serde_json::json!(count)))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::Value::Object(json)).unwrap()
        );
    } else {
        let total: i64 = counts.iter().map(|(_, c)| c).sum();
        for (status, count) in &counts {
            println!("{:<12} {}", status, count);
        }
        println!("{:<12} {}", "total", total);
    }

    Ok(())
}

/// Show monthly spend against the budget
async fn cmd_usage(db: &Database, config: &Config, format: &str) -> Result<()> {
    validate_format(format)?;

    let offset = config.calendar.fixed_offset()?;
    let ledger = UsageLedger::new(db.clone(), offset);
    let status = ledger.monthly_status(Utc::now()).await?;

    if format == "json" {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "total_cost": status.total_cost,
                "monthly_budget": status.monthly_budget,
                "used_percent": status.used_percent,
                "tier": status.tier.as_str(),
                "month_start": status.month_start,
                "month_end": status.month_end,
            }))
            .unwrap()
        );
    } else {
        println!("Spent:  ${:.4}", status.total_cost);
        if status.monthly_budget > 0.0 {
            println!("Budget: ${:.2}", status.monthly_budget);
            println!("Used:   {:.1}% ({})", status.used_percent, status.tier.as_str());
        } else {
            println!("Budget: none configured");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_format() {
        assert!(validate_format("text").is_ok());
        assert!(validate_format("json").is_ok());
        assert!(validate_format("yaml").is_err());
    }

    #[test]
    fn test_truncate_content() {
        assert_eq!(truncate_content("short", 50), "short");
        let long = "x".repeat(60);
        let truncated = truncate_content(&long, 50);
        assert_eq!(truncated.len(), 53);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_format_time_until() {
        assert_eq!(format_time_until(100, 50), "overdue");
        assert_eq!(format_time_until(0, 30), "in <1 minute");
        assert_eq!(format_time_until(0, 120), "in 2 minutes");
        assert_eq!(format_time_until(0, 7200), "in 2 hours");
        assert_eq!(format_time_until(0, 86_400), "in 1 day");
    }
}
