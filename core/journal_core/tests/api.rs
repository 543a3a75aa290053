use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Local};
use serde_json::{json, Value};
use tokio::sync::Notify;

use journal_core::estimator::{BackendResponse, EstimateError, GainBackend, GainEstimator, RetryPolicy};
use journal_core::journal::Journal;
use journal_core::model::{AttributeSet, Entry, ExportDocument, GainDelta};
use journal_core::server::{router, AppState};
use journal_core::store::{MemoryStore, SqliteStore};

const GAINS: &str = r#"{"diligence":1,"knowledge":4,"courage":0,"understanding":0,"expression":0}"#;

fn candidate_body() -> String {
    json!({ "candidates": [ { "content": { "parts": [ { "text": GAINS } ] } } ] }).to_string()
}

/// Answers every call with the same gains. When `gate` is set, each call
/// signals `entered` and then waits for `gate` before answering. `delay`
/// holds every answer back for a fixed time.
#[derive(Default)]
struct StubBackend {
    calls: AtomicUsize,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
    delay: Option<Duration>,
}

#[async_trait]
impl GainBackend for StubBackend {
    async fn generate(&self, _body: &Value) -> Result<BackendResponse, EstimateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((entered, gate)) = &self.gate {
            entered.notify_one();
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(BackendResponse {
            status: 200,
            body: candidate_body(),
        })
    }
}

struct TestServer {
    base: String,
    client: reqwest::Client,
}

impl TestServer {
    async fn start(journal: Journal, backend: Arc<StubBackend>, export_dir: &Path) -> Self {
        let estimator = GainEstimator::new(backend, RetryPolicy::default());
        let app = router(AppState::new(journal, estimator, export_dir.to_path_buf()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
        }
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let res = self.client.get(format!("{}{path}", self.base)).send().await.unwrap();
        let status = res.status().as_u16();
        (status, res.json().await.unwrap())
    }

    async fn post_json(&self, path: &str, body: Value) -> (u16, Value) {
        let res = self
            .client
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status().as_u16();
        (status, res.json().await.unwrap())
    }

    async fn post_raw(&self, path: &str, body: String) -> (u16, Value) {
        let res = self
            .client
            .post(format!("{}{path}", self.base))
            .body(body)
            .send()
            .await
            .unwrap();
        let status = res.status().as_u16();
        (status, res.json().await.unwrap())
    }
}

fn memory_journal() -> Journal {
    Journal::open(Box::new(MemoryStore::new()))
}

#[tokio::test]
async fn saving_an_entry_updates_stats_and_calendar() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(StubBackend::default());
    let server = TestServer::start(memory_journal(), backend.clone(), dir.path()).await;

    let (status, body) = server
        .post_json(
            "/entries",
            json!({ "activity": "read a book", "feeling": "learned a lot" }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["stats"]["knowledge"], 4);
    assert_eq!(body["data"]["stats"]["diligence"], 1);
    assert_eq!(body["data"]["stats"]["courage"], 0);
    let date = body["data"]["entry"]["date"].as_str().unwrap().to_string();
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

    let (_, entries) = server.get("/entries").await;
    assert_eq!(entries["data"].as_array().unwrap().len(), 1);

    let (_, day) = server.get(&format!("/entries/day?date={date}")).await;
    assert_eq!(day["data"][0]["activity"], "read a book");

    let today = Local::now().date_naive();
    let (_, cal) = server
        .get(&format!("/calendar?year={}&month={}", today.year(), today.month()))
        .await;
    let marked: Vec<&Value> = cal["data"]["cells"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|c| c["has_entry"] == true)
        .collect();
    assert_eq!(marked.len(), 1);
    assert_eq!(marked[0]["date"], date.as_str());
}

#[tokio::test]
async fn blank_activity_is_rejected_before_estimation() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(StubBackend::default());
    let server = TestServer::start(memory_journal(), backend.clone(), dir.path()).await;

    let (status, body) = server
        .post_json("/entries", json!({ "activity": "", "feeling": "something" }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "invalid_input");
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);

    let (_, entries) = server.get("/entries").await;
    assert!(entries["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn second_submission_while_estimating_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(StubBackend {
        gate: Some((entered.clone(), gate.clone())),
        ..Default::default()
    });
    let server = Arc::new(TestServer::start(memory_journal(), backend, dir.path()).await);

    let first = {
        let server = server.clone();
        tokio::spawn(async move {
            server
                .post_json("/entries", json!({ "activity": "a", "feeling": "b" }))
                .await
        })
    };
    entered.notified().await;

    let (status, body) = server
        .post_json("/entries", json!({ "activity": "c", "feeling": "d" }))
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["error"], "submission_in_progress");

    gate.notify_one();
    let (status, _) = first.await.unwrap();
    assert_eq!(status, 200);

    let (_, stats) = server.get("/stats").await;
    assert_eq!(stats["data"]["stats"]["knowledge"], 4);
}

#[tokio::test]
async fn export_file_imports_into_a_fresh_journal() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("journal.db");
    let exports = dir.path().join("exports");

    let source = TestServer::start(
        Journal::open(Box::new(SqliteStore::open(&db).unwrap())),
        Arc::new(StubBackend::default()),
        &exports,
    )
    .await;
    for (activity, feeling) in [("ran", "tired"), ("wrote", "proud")] {
        let (status, _) = source
            .post_json("/entries", json!({ "activity": activity, "feeling": feeling }))
            .await;
        assert_eq!(status, 200);
    }

    let (status, written) = source.post_json("/export", json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(written["data"]["entries"], 2);
    let path = written["data"]["path"].as_str().unwrap().to_string();
    assert!(path.contains("persona_data_"));
    let raw = std::fs::read_to_string(&path).unwrap();

    let target = TestServer::start(memory_journal(), Arc::new(StubBackend::default()), &exports).await;
    let (status, summary) = target.post_raw("/import", raw).await;
    assert_eq!(status, 200);
    assert_eq!(summary["data"]["entries"], 2);

    let (_, a) = source.get("/entries").await;
    let (_, b) = target.get("/entries").await;
    assert_eq!(a["data"], b["data"]);
    let (_, a) = source.get("/stats").await;
    let (_, b) = target.get("/stats").await;
    assert_eq!(a["data"], b["data"]);
    assert_eq!(b["data"]["stats"]["knowledge"], 8);
}

#[tokio::test]
async fn download_export_has_attachment_name() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(memory_journal(), Arc::new(StubBackend::default()), dir.path()).await;

    let res = server
        .client
        .get(format!("{}/export", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);
    let disposition = res
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains("persona_data_"));
    let doc: Value = res.json().await.unwrap();
    assert!(doc["allEntries"].as_array().unwrap().is_empty());
    assert!(doc["exportDate"].is_string());
}

#[tokio::test]
async fn bad_import_leaves_state_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(memory_journal(), Arc::new(StubBackend::default()), dir.path()).await;
    server
        .post_json("/entries", json!({ "activity": "a", "feeling": "b" }))
        .await;

    let (status, body) = server
        .post_raw("/import", r#"{"allEntries": []}"#.to_string())
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "import_format_error");

    let (status, body) = server.post_raw("/import", "not json".to_string()).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "import_parse_error");

    let (_, entries) = server.get("/entries").await;
    assert_eq!(entries["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_queries_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(memory_journal(), Arc::new(StubBackend::default()), dir.path()).await;

    let (status, body) = server.get("/entries/day?date=2026-02-30").await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "invalid_date");

    let (status, body) = server.get("/calendar?year=2026&month=13").await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "invalid_month");

    let (status, body) = server.get("/entries/day?date=2026-02-14").await;
    assert_eq!(status, 200);
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn entry_is_saved_even_if_the_client_hangs_up() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(StubBackend {
        delay: Some(Duration::from_millis(500)),
        ..Default::default()
    });
    let server = TestServer::start(memory_journal(), backend.clone(), dir.path()).await;

    let impatient = reqwest::Client::builder()
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let sent = impatient
        .post(format!("{}/entries", server.base))
        .json(&json!({ "activity": "ran", "feeling": "tired" }))
        .send()
        .await;
    assert!(sent.is_err(), "request should time out before the estimate");

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    let (_, entries) = server.get("/entries").await;
    assert_eq!(entries["data"].as_array().unwrap().len(), 1);
    let (_, stats) = server.get("/stats").await;
    assert_eq!(stats["data"]["stats"]["knowledge"], 4);

    // The guard is released once the detached save finishes.
    let (status, _) = server
        .post_json("/entries", json!({ "activity": "a", "feeling": "b" }))
        .await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn large_import_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(memory_journal(), Arc::new(StubBackend::default()), dir.path()).await;

    let day = chrono::NaiveDate::from_ymd_opt(2026, 2, 15).unwrap();
    let all_entries: Vec<Entry> = (0..12_000)
        .map(|i| Entry {
            id: format!("{:013}-{:08x}", 1_771_200_000_000_i64 + i as i64, i),
            date: day,
            activity: format!("practiced scales for the recital, session number {i}"),
            feeling: "fingers are sore but the runs are getting cleaner".to_string(),
            gains: GainDelta {
                diligence: 1,
                ..Default::default()
            },
            created_at: Some("2026-02-15T09:30:00Z".to_string()),
        })
        .collect();
    let doc = ExportDocument {
        all_entries,
        player_stats: AttributeSet {
            diligence: 12_000,
            ..Default::default()
        },
        export_date: "2026-02-16T10:00:00Z".to_string(),
    };
    let raw = serde_json::to_string_pretty(&doc).unwrap();
    assert!(raw.len() > 2 * 1024 * 1024, "document is {} bytes", raw.len());

    let (status, summary) = server.post_raw("/import", raw).await;
    assert_eq!(status, 200);
    assert_eq!(summary["data"]["entries"], 12_000);

    let (_, stats) = server.get("/stats").await;
    assert_eq!(stats["data"]["stats"]["diligence"], 12_000);
}
