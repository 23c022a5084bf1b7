//! commitscope-server - JSON API for GitHub commit analytics
//!
//! Serves the dashboard-facing endpoints under `/api/v1`: authors,
//! deviation outliers, day-of-week activity, word frequencies, and the
//! fetch-data trigger that drives the incremental fetch pipeline.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::Parser;
use commitscope_core::{
    AnalyticsEngine, BackoffPolicy, Config, Database, DateRange, FetchOrchestrator, FetchReport,
    GitHubClient, MetricType, RepoId,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "commitscope-server")]
#[command(about = "GitHub commit analytics API server")]
#[command(version)]
struct Args {
    /// Path to config file (defaults to XDG config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind the HTTP server to (overrides config)
    #[arg(long, env = "BIND_ADDRESS")]
    bind: Option<String>,

    /// Database file path (overrides XDG default)
    #[arg(long)]
    database: Option<PathBuf>,
}

#[derive(Clone)]
struct AppState {
    analytics: Arc<AnalyticsEngine>,
    orchestrator: Arc<FetchOrchestrator>,
    default_owner: String,
    default_name: String,
}

// ============================================
// Error mapping
// ============================================

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<commitscope_core::Error> for AppError {
    fn from(err: commitscope_core::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "status": "error",
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, AppError>;

// ============================================
// Request/response shapes
// ============================================

#[derive(Debug, Deserialize)]
struct RangeParams {
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    repo_owner: Option<String>,
    repo_name: Option<String>,
}

// Query structs spell out the shared range fields instead of nesting a
// flattened struct: serde_urlencoded cannot drive typed fields through
// `#[serde(flatten)]`.

#[derive(Debug, Deserialize)]
struct DayOfWeekParams {
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    repo_owner: Option<String>,
    repo_name: Option<String>,
    metric_type: String,
    author: Option<String>,
}

impl DayOfWeekParams {
    fn range_params(&self) -> RangeParams {
        RangeParams {
            start_date: self.start_date,
            end_date: self.end_date,
            repo_owner: self.repo_owner.clone(),
            repo_name: self.repo_name.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WordFrequencyParams {
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    repo_owner: Option<String>,
    repo_name: Option<String>,
    limit: Option<usize>,
}

impl WordFrequencyParams {
    fn range_params(&self) -> RangeParams {
        RangeParams {
            start_date: self.start_date,
            end_date: self.end_date,
            repo_owner: self.repo_owner.clone(),
            repo_name: self.repo_name.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FetchDataRequest {
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    repo_owner: Option<String>,
    repo_name: Option<String>,
    #[serde(default = "default_use_cache")]
    use_cache: bool,
}

fn default_use_cache() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct CommitDto {
    sha: String,
    author_name: String,
    message_title: String,
    author_date: DateTime<Utc>,
    additions: i64,
    deletions: i64,
    total_changes: i64,
    z_score: f64,
}

const DEFAULT_WORD_LIMIT: usize = 100;

impl AppState {
    /// Resolve request params into a repo and validated date range.
    ///
    /// Missing dates default to the last year up to yesterday, matching
    /// the dashboard's initial view. An inverted range is rejected here,
    /// before any side effects.
    fn resolve(&self, params: &RangeParams) -> ApiResult<(RepoId, DateRange)> {
        let today = Utc::now().date_naive();
        let start = params.start_date.unwrap_or(today - Duration::days(365));
        let end = params.end_date.unwrap_or(today - Duration::days(1));

        if start > end {
            return Err(AppError::bad_request(format!(
                "start_date {} is after end_date {}",
                start, end
            )));
        }

        let repo = RepoId::new(
            params
                .repo_owner
                .clone()
                .unwrap_or_else(|| self.default_owner.clone()),
            params
                .repo_name
                .clone()
                .unwrap_or_else(|| self.default_name.clone()),
        );

        Ok((repo, DateRange::new(start, end)))
    }
}

// ============================================
// Handlers
// ============================================

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok", "message": "API is running"}))
}

/// Unique commit authors within the date range.
async fn get_authors(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> ApiResult<Json<serde_json::Value>> {
    let (repo, range) = state.resolve(&params)?;
    let authors = state.analytics.authors(&repo, &range)?;

    Ok(Json(serde_json::json!({
        "authors": authors,
        "count": authors.len(),
    })))
}

/// Commits with significant size deviations (|z| above threshold).
async fn get_deviations(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> ApiResult<Json<serde_json::Value>> {
    let (repo, range) = state.resolve(&params)?;
    let outliers = state.analytics.outliers(&repo, &range)?;

    let commits: Vec<CommitDto> = outliers
        .into_iter()
        .map(|c| CommitDto {
            sha: c.sha,
            author_name: c.author_name,
            message_title: c.message_title,
            author_date: c.author_date,
            additions: c.additions,
            deletions: c.deletions,
            total_changes: c.total_changes,
            z_score: (c.z_score.unwrap_or(0.0) * 100.0).round() / 100.0,
        })
        .collect();

    Ok(Json(serde_json::json!({
        "commits": commits,
        "count": commits.len(),
    })))
}

/// Activity aggregated by day of week.
async fn get_day_of_week(
    State(state): State<AppState>,
    Query(params): Query<DayOfWeekParams>,
) -> ApiResult<Json<serde_json::Value>> {
    let (repo, range) = state.resolve(&params.range_params())?;

    let metric: MetricType = params
        .metric_type
        .parse()
        .map_err(AppError::bad_request)?;

    let activity =
        state
            .analytics
            .day_of_week_activity(&repo, &range, metric, params.author.as_deref())?;

    let mut day_activity = serde_json::Map::new();
    for (day, value) in activity {
        day_activity.insert(day.to_string(), serde_json::json!(value));
    }

    Ok(Json(serde_json::json!({
        "metric": metric.as_str(),
        "author": params.author,
        "day_activity": day_activity,
    })))
}

/// Word frequencies from commit messages, highest first.
async fn get_word_frequencies(
    State(state): State<AppState>,
    Query(params): Query<WordFrequencyParams>,
) -> ApiResult<Json<serde_json::Value>> {
    let (repo, range) = state.resolve(&params.range_params())?;
    let limit = params.limit.unwrap_or(DEFAULT_WORD_LIMIT);

    let frequencies = state.analytics.word_frequencies(&repo, &range, limit)?;

    // Insertion order survives serialization, so the object iterates
    // count-descending just like the engine produced it
    let mut word_frequencies = serde_json::Map::new();
    for entry in frequencies {
        word_frequencies.insert(entry.word, serde_json::json!(entry.frequency));
    }

    Ok(Json(serde_json::json!({
        "word_frequencies": word_frequencies,
    })))
}

/// Trigger the fetch pipeline for a range.
///
/// `use_cache = false` forces a full re-walk of the source pages.
/// Failures come back as `status: "error"` with a message rather than an
/// HTTP error, so clients can keep serving stale data and retry.
async fn fetch_data(
    State(state): State<AppState>,
    Json(request): Json<FetchDataRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let params = RangeParams {
        start_date: request.start_date,
        end_date: request.end_date,
        repo_owner: request.repo_owner,
        repo_name: request.repo_name,
    };
    let (repo, range) = state.resolve(&params)?;

    info!(repo = %repo, %range, use_cache = request.use_cache, "Fetch requested");

    let report: FetchReport = state
        .orchestrator
        .ensure_data(repo.clone(), range, !request.use_cache)
        .await;

    let status = if report.success { "success" } else { "error" };
    let mut body = serde_json::json!({
        "status": status,
        "message": report.message,
        "cache_used": report.cache_used,
        "repository": repo.full_name(),
        "start_date": range.start.to_string(),
        "end_date": range.end.to_string(),
        "commit_count": report.commit_count,
    });

    if let (Some(mean), Some(std)) = (report.mean_changes, report.std_changes) {
        body["statistics"] = serde_json::json!({
            "commit_count": report.commit_count,
            "mean_changes": mean,
            "std_changes": std,
        });
    }

    Ok(Json(body))
}

// ============================================
// App wiring
// ============================================

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_check))
        .route("/api/v1/authors", get(get_authors))
        .route("/api/v1/deviations", get(get_deviations))
        .route("/api/v1/day-of-week", get(get_day_of_week))
        .route("/api/v1/word-frequencies", get(get_word_frequencies))
        .route("/api/v1/fetch-data", post(fetch_data))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!(?err, "failed to listen for CTRL+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => tracing::warn!(?err, "failed to listen for TERM signal"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path).context("failed to load configuration")?,
        None => Config::load().context("failed to load configuration")?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_target(false)
        .init();

    let db_path = args.database.unwrap_or_else(Config::database_path);
    info!(path = %db_path.display(), "Opening database");
    let db = Arc::new(Database::open(&db_path).context("failed to open database")?);
    db.migrate().context("failed to run migrations")?;

    let client = Arc::new(GitHubClient::new(&config.github).context("failed to create GitHub client")?);
    let orchestrator = Arc::new(FetchOrchestrator::new(
        Arc::clone(&db),
        client,
        BackoffPolicy::from_config(&config.fetch),
    ));
    let analytics = Arc::new(AnalyticsEngine::new(Arc::clone(&db)));

    let state = AppState {
        analytics,
        orchestrator,
        default_owner: config.github.default_owner.clone(),
        default_name: config.github.default_name.clone(),
    };

    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let bind_addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", bind))?;

    let app = build_router(state);

    let listener = TcpListener::bind(bind_addr)
        .await
        .context("failed to bind TCP listener")?;

    info!(%bind_addr, "server starting");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown")?;

    Ok(())
}
