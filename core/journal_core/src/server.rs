use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::calendar::{self, MonthGrid};
use crate::codec::{self, CodecError, ExportError};
use crate::estimator::GainEstimator;
use crate::journal::{Journal, NewEntry};
use crate::model::{AttributeSet, Entry, StatLevel};

#[derive(Clone)]
pub struct AppState {
    journal: Arc<Mutex<Journal>>,
    estimator: GainEstimator,
    export_dir: PathBuf,
    submitting: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(journal: Journal, estimator: GainEstimator, export_dir: PathBuf) -> Self {
        Self {
            journal: Arc::new(Mutex::new(journal)),
            estimator,
            export_dir,
            submitting: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[derive(Serialize)]
struct OkResponse<T: Serialize> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

#[derive(Serialize)]
struct ErrResponse {
    ok: bool,
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

fn ok<T: Serialize>(data: T) -> Response {
    Json(OkResponse {
        ok: true,
        data: Some(data),
    })
    .into_response()
}

fn fail(status: StatusCode, error: &'static str) -> Response {
    (
        status,
        Json(ErrResponse {
            ok: false,
            error,
            detail: None,
        }),
    )
        .into_response()
}

fn fail_with(status: StatusCode, error: &'static str, detail: String) -> Response {
    (
        status,
        Json(ErrResponse {
            ok: false,
            error,
            detail: Some(detail),
        }),
    )
        .into_response()
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/stats", get(get_stats))
        .route(
            "/entries",
            get(get_entries).post(post_entry).options(options_ok),
        )
        .route("/entries/day", get(get_entries_day))
        .route("/calendar", get(get_calendar))
        .route(
            "/export",
            get(get_export).post(post_export).options(options_ok),
        )
        .route(
            "/import",
            post(post_import)
                .options(options_ok)
                .layer(DefaultBodyLimit::disable()),
        )
        .with_state(state)
        .layer(cors)
}

async fn options_ok() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Serialize)]
struct HealthInfo {
    service: &'static str,
    version: &'static str,
}

async fn health() -> Response {
    ok(HealthInfo {
        service: "journal_core",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct StatsView {
    stats: AttributeSet,
    levels: Vec<StatLevel>,
}

impl StatsView {
    fn of(stats: &AttributeSet) -> Self {
        Self {
            stats: *stats,
            levels: stats.levels(),
        }
    }
}

async fn get_stats(State(state): State<AppState>) -> Response {
    let journal = state.journal.lock().await;
    ok(StatsView::of(journal.stats()))
}

async fn get_entries(State(state): State<AppState>) -> Response {
    let journal = state.journal.lock().await;
    ok(journal.entries())
}

#[derive(Deserialize)]
struct DayQuery {
    /// Date in YYYY-MM-DD.
    date: String,
}

fn parse_day(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

async fn get_entries_day(State(state): State<AppState>, Query(q): Query<DayQuery>) -> Response {
    let Some(date) = parse_day(&q.date) else {
        return fail(StatusCode::BAD_REQUEST, "invalid_date");
    };
    let journal = state.journal.lock().await;
    ok(calendar::entries_on(date, journal.entries()))
}

#[derive(Deserialize)]
struct EntryRequest {
    #[serde(default)]
    activity: String,
    #[serde(default)]
    feeling: String,
}

#[derive(Serialize)]
struct EntryCreated {
    entry: Entry,
    #[serde(flatten)]
    stats: StatsView,
}

/// Clears the in-flight flag when the submission ends, however it ends.
struct SubmissionGuard(Arc<AtomicBool>);

impl SubmissionGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for SubmissionGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn post_entry(State(state): State<AppState>, Json(req): Json<EntryRequest>) -> Response {
    let input = match NewEntry::validated(&req.activity, &req.feeling) {
        Ok(v) => v,
        Err(err) => return fail_with(StatusCode::BAD_REQUEST, "invalid_input", err.to_string()),
    };

    let Some(guard) = SubmissionGuard::acquire(&state.submitting) else {
        return fail(StatusCode::CONFLICT, "submission_in_progress");
    };

    // Runs detached so a client hanging up mid-estimate cannot cancel the save.
    let task = tokio::spawn(save_entry(state, input, guard));
    match task.await {
        Ok(created) => ok(created),
        Err(err) => {
            error!("save entry task failed: {err}");
            fail(StatusCode::INTERNAL_SERVER_ERROR, "save_failed")
        }
    }
}

async fn save_entry(state: AppState, input: NewEntry, _guard: SubmissionGuard) -> EntryCreated {
    // The model call may back off for a while; keep the journal readable meanwhile.
    let gains = state
        .estimator
        .estimate_or_zero(&input.activity, &input.feeling)
        .await;
    let entry = input.into_entry(gains, OffsetDateTime::now_utc(), Local::now().date_naive());

    let mut journal = state.journal.lock().await;
    journal.record(entry.clone());
    info!("entry {} saved for {}", entry.id, entry.date);
    EntryCreated {
        entry,
        stats: StatsView::of(journal.stats()),
    }
}

#[derive(Deserialize)]
struct CalendarQuery {
    year: Option<i32>,
    month: Option<u32>,
}

#[derive(Serialize)]
struct CalendarView {
    #[serde(flatten)]
    grid: MonthGrid,
    prev: (i32, u32),
    next: (i32, u32),
}

async fn get_calendar(State(state): State<AppState>, Query(q): Query<CalendarQuery>) -> Response {
    let today = Local::now().date_naive();
    let year = q.year.unwrap_or_else(|| today.year());
    let month = q.month.unwrap_or_else(|| today.month());

    let marked = {
        let journal = state.journal.lock().await;
        calendar::entries_within(year, month, journal.entries())
    };
    match calendar::month_grid(year, month, today, &marked) {
        Ok(grid) => ok(CalendarView {
            grid,
            prev: calendar::prev_month(year, month),
            next: calendar::next_month(year, month),
        }),
        Err(_) => fail(StatusCode::BAD_REQUEST, "invalid_month"),
    }
}

async fn get_export(State(state): State<AppState>) -> Response {
    let doc = {
        let journal = state.journal.lock().await;
        journal.export_document(OffsetDateTime::now_utc())
    };
    let body = match codec::encode_export(&doc) {
        Ok(b) => b,
        Err(err) => {
            error!("encode export failed: {err}");
            return fail(StatusCode::INTERNAL_SERVER_ERROR, "export_failed");
        }
    };
    let disposition = format!(
        "attachment; filename=\"{}\"",
        codec::export_file_name(Local::now().date_naive())
    );
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/json; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response()
}

#[derive(Serialize)]
struct ExportWritten {
    path: String,
    entries: usize,
}

async fn post_export(State(state): State<AppState>) -> Response {
    let doc = {
        let journal = state.journal.lock().await;
        journal.export_document(OffsetDateTime::now_utc())
    };
    match codec::write_export(&state.export_dir, Local::now().date_naive(), &doc) {
        Ok(path) => ok(ExportWritten {
            path: path.display().to_string(),
            entries: doc.all_entries.len(),
        }),
        Err(err @ ExportError::PermissionDenied { .. }) => {
            warn!("{err}");
            fail_with(StatusCode::FORBIDDEN, "export_permission_denied", err.to_string())
        }
        Err(err @ ExportError::Failed { .. }) => {
            error!("{err}");
            fail_with(StatusCode::INTERNAL_SERVER_ERROR, "export_failed", err.to_string())
        }
    }
}

async fn post_import(State(state): State<AppState>, body: String) -> Response {
    let mut journal = state.journal.lock().await;
    match journal.import(&body) {
        Ok(summary) => ok(summary),
        Err(err @ CodecError::Parse(_)) => {
            warn!("import rejected: {err}");
            fail_with(StatusCode::BAD_REQUEST, "import_parse_error", err.to_string())
        }
        Err(err @ CodecError::Format(_)) => {
            warn!("import rejected: {err}");
            fail_with(StatusCode::BAD_REQUEST, "import_format_error", err.to_string())
        }
    }
}
