//! cadence-server - HTTP trigger server for the auto-posting engine
//!
//! Exposes the tick sequence over HTTP so an external timer (cron,
//! systemd timer, uptime monitor) can drive planning and publishing.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use clap::Parser;
use libcadence::config::Config;
use libcadence::engagement::{EngagementSource, TimelineEngagementSource};
use libcadence::generator::HttpGenerator;
use libcadence::platforms::mastodon::MastodonClient;
use libcadence::platforms::Platform;
use libcadence::{AutoPostPlanner, Database, Publisher, Result, TickDriver, UsageLedger};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "cadence-server")]
#[command(version)]
#[command(about = "HTTP trigger server for the Cadence auto-posting engine")]
#[command(long_about = "\
cadence-server - HTTP trigger server for the Cadence auto-posting engine

DESCRIPTION:
    cadence-server exposes the planning and publishing pipeline over
    HTTP. An external timer (cron, a systemd timer, an uptime monitor)
    POSTs to the trigger endpoints; the server runs the pipeline under
    a cooperative deadline and reports what it did.

ENDPOINTS:
    POST /tick    Cleanup, then planning, then publishing of due posts
    POST /plan    Planning pass only
    GET  /health  Liveness probe

    When [server].trigger_secret is set, POST endpoints require
    'Authorization: Bearer <secret>'.

USAGE:
    # Run with the default config
    cadence-server

    # Bind somewhere else
    cadence-server --bind 0.0.0.0:8747

    # Trigger a tick
    curl -X POST -H 'Authorization: Bearer SECRET' http://127.0.0.1:8747/tick

CONFIGURATION:
    Configuration file: ~/.config/cadence/config.toml (or $CADENCE_CONFIG)
    Database location:  ~/.local/share/cadence/cadence.db

    [server]
    bind = \"127.0.0.1:8747\"
    trigger_secret = \"...\"      # omit to disable auth
    tick_deadline_secs = 50
    log_retention_days = 30

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Authentication error
    3 - Invalid input

For more information, visit: https://github.com/cadence-tools/cadence
")]
struct Cli {
    /// Bind address (overrides config)
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,
}

/// Shared state for all handlers.
struct AppState {
    driver: TickDriver,
    planner: AutoPostPlanner,
    trigger_secret: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    libcadence::logging::init_default();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;
    let offset = config.calendar.fixed_offset()?;

    let generator: Arc<dyn libcadence::generator::Generator> =
        Arc::new(HttpGenerator::new(&config.provider)?);

    let mut platform: Option<Arc<dyn Platform>> = None;
    let mut engagement: Option<Arc<dyn EngagementSource>> = None;
    if let Some(mastodon) = config.mastodon.as_ref().filter(|m| m.enabled) {
        let mut client = MastodonClient::from_config(mastodon)?;
        if let Err(e) = client.fetch_instance_info().await {
            warn!(error = %e, "Could not fetch instance info, using default character limit");
        }
        platform = Some(Arc::new(client));
        engagement = Some(Arc::new(TimelineEngagementSource::from_config(mastodon)?));
    } else {
        warn!("No platform configured; generated posts will queue but nothing can publish");
    }

    let planner = |db: &Database| {
        AutoPostPlanner::new(
            db.clone(),
            UsageLedger::new(db.clone(), offset),
            generator.clone(),
            platform.clone(),
            engagement.clone(),
            offset,
            config.provider.pricing.clone(),
        )
    };

    let driver = TickDriver::new(
        db.clone(),
        planner(&db),
        platform
            .clone()
            .map(|p| Publisher::new(db.clone(), p)),
        Duration::from_secs(config.server.tick_deadline_secs),
        config.server.log_retention_days,
    );

    let state = Arc::new(AppState {
        driver,
        planner: planner(&db),
        trigger_secret: config.server.trigger_secret.clone(),
    });

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/tick", post(tick_handler))
        .route("/plan", post(plan_handler))
        .with_state(state);

    let bind = cli.bind.unwrap_or_else(|| config.server.bind.clone());
    info!(%bind, "cadence-server starting");

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|e| libcadence::CadenceError::InvalidInput(format!("Cannot bind {}: {}", bind, e)))?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| libcadence::CadenceError::InvalidInput(format!("Server error: {}", e)))?;

    info!("cadence-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received shutdown signal, stopping gracefully...");
}

/// GET /health — liveness probe, returns server metadata.
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// POST /tick — run the full pipeline: cleanup, planner, publisher.
async fn tick_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> std::result::Result<Json<Value>, (StatusCode, Json<Value>)> {
    verify_bearer(&headers, state.trigger_secret.as_deref())?;

    let now = Utc::now();
    let outcome = state.driver.handle_tick(now).await.map_err(internal_error)?;

    Ok(Json(json!({
        "success": true,
        "timestamp": now.to_rfc3339(),
        "log_entries_removed": outcome.log_entries_removed,
        "generated": outcome.planner.as_ref().map(|p| p.posts_generated),
        "scheduled": outcome.planner.as_ref().map(|p| p.posts_scheduled),
        "published": outcome.publish.as_ref().map(|p| p.published),
        "publish_failed": outcome.publish.as_ref().map(|p| p.failed),
        "budget_paused": outcome.planner.as_ref().map(|p| p.budget_paused),
        "deadline_hit": outcome.deadline_hit,
    })))
}

/// POST /plan — planning pass only; nothing is published.
async fn plan_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> std::result::Result<Json<Value>, (StatusCode, Json<Value>)> {
    verify_bearer(&headers, state.trigger_secret.as_deref())?;

    let now = Utc::now();
    let outcome = state.planner.run_tick(now).await.map_err(internal_error)?;

    Ok(Json(json!({
        "success": true,
        "timestamp": now.to_rfc3339(),
        "policies_run": outcome.policies_run,
        "policies_failed": outcome.policies_failed,
        "generated": outcome.posts_generated,
        "scheduled": outcome.posts_scheduled,
        "posted": outcome.posts_posted,
        "skipped": outcome.units_skipped,
        "budget_paused": outcome.budget_paused,
    })))
}

/// Require `Authorization: Bearer <secret>` when a secret is configured.
fn verify_bearer(
    headers: &HeaderMap,
    secret: Option<&str>,
) -> std::result::Result<(), (StatusCode, Json<Value>)> {
    let Some(expected) = secret else {
        return Ok(());
    };

    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => Ok(()),
        Some(_) => {
            warn!("Trigger rejected: bearer token mismatch");
            Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "invalid bearer token"})),
            ))
        }
        None => {
            warn!("Trigger rejected: missing Authorization header");
            Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "missing Authorization header"})),
            ))
        }
    }
}

fn internal_error(e: libcadence::CadenceError) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"success": false, "error": e.to_string()})),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_map(value: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(v) = value {
            headers.insert("authorization", v.parse().unwrap());
        }
        headers
    }

    #[test]
    fn test_verify_bearer_no_secret_allows_all() {
        assert!(verify_bearer(&header_map(None), None).is_ok());
        assert!(verify_bearer(&header_map(Some("Bearer whatever")), None).is_ok());
    }

    #[test]
    fn test_verify_bearer_matching_token() {
        let headers = header_map(Some("Bearer s3cret"));
        assert!(verify_bearer(&headers, Some("s3cret")).is_ok());
    }

    #[test]
    fn test_verify_bearer_rejects_mismatch_and_missing() {
        let headers = header_map(Some("Bearer wrong"));
        let (status, _) = verify_bearer(&headers, Some("s3cret")).unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = verify_bearer(&header_map(None), Some("s3cret")).unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // Wrong scheme is rejected too.
        let headers = header_map(Some("Basic s3cret"));
        assert!(verify_bearer(&headers, Some("s3cret")).is_err());
    }
}
