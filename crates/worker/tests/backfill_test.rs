//! Integration tests for the historical weather collector
//!
//! The history API is served by wiremock; documents and checkpoints live in
//! memory unless a test needs them on disk.
//!
//! Run with: cargo test -p climate-worker --test backfill_test

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde_json::{json, Value};
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use climate_durable::prelude::*;
use climate_worker::historical_weather::{
    utc_midnight_millis, BackfillCursor, HistoricalWeatherCollector, HistoricalWeatherFields,
    TokenPool,
};
use climate_worker::{HistoricalWeatherConfig, HttpHistoryApi};

const MODULE: &str = HistoricalWeatherConfig::MODULE;
const HISTORY_PATH: &str = r"^/api/[^/]+/history_\d{8}/lang:EN/q/zmw:[^/]+\.json$";

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Pinned "today"; backfill starts two days earlier
fn today() -> NaiveDate {
    date(2024, 3, 10)
}

fn measured_day() -> Value {
    json!({
        "history": {
            "observations": [{"tempm": "21"}],
            "dailysummary": [{"meantempm": "21", "fog": "0", "rain": "1"}]
        }
    })
}

fn unmeasured_day() -> Value {
    json!({"history": {"observations": [], "dailysummary": []}})
}

async fn mock_history(server: &MockServer, body: Value, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path_regex(HISTORY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(expected_calls)
        .mount(server)
        .await;
}

struct Harness {
    server: MockServer,
    documents: Arc<InMemoryDocumentStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: HistoricalWeatherConfig,
}

impl Harness {
    async fn new(tokens: &[&str]) -> Self {
        Self::with_checkpoints(tokens, Arc::new(InMemoryCheckpointStore::new())).await
    }

    async fn with_checkpoints(tokens: &[&str], checkpoints: Arc<dyn CheckpointStore>) -> Self {
        let server = MockServer::start().await;
        let config = HistoricalWeatherConfig {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            base_url: format!(
                "{}/api/{{TOKEN}}/history_{{DATE}}/lang:{{LANG}}/q/zmw:{{LOC_ID}}.json",
                server.uri()
            ),
            // Every run is due, so consecutive runs can be chained
            update_frequency_fast: TimeDelta::seconds(0),
            ..Default::default()
        };
        Self {
            server,
            documents: Arc::new(InMemoryDocumentStore::new()),
            checkpoints,
            config,
        }
    }

    async fn add_location(&self, id: i64, source_id: Option<&str>) {
        let mut location = json!({"_id": id, "name": format!("location {id}")});
        if let Some(source_id) = source_id {
            location["wunderground_loc_id"] = json!(source_id);
        }
        let Value::Object(document) = location else {
            unreachable!()
        };
        self.documents
            .upsert("locations", NaturalKey::new().with("_id", id), document)
            .await
            .expect("should store location");
    }

    async fn add_history(&self, location_id: i64, day: NaiveDate) {
        let date_utc = utc_midnight_millis(day);
        let mut document = Document::new();
        document.insert("history".into(), measured_day()["history"].clone());
        self.documents
            .upsert(
                &self.config.collection,
                NaturalKey::new()
                    .with("location_id", location_id)
                    .with("date_utc", date_utc),
                document,
            )
            .await
            .expect("should store history");
    }

    /// Start in backfill mode with `pending` queued
    async fn queue(&self, pending: &[i64], tokens: TokenPool) {
        let fields = HistoricalWeatherFields {
            missing_data_check: false,
            cursor: BackfillCursor {
                pending_location_ids: pending.iter().copied().collect(),
                ..Default::default()
            },
            tokens,
        };
        let checkpoint = Checkpoint::new(TimeDelta::seconds(0), fields);
        self.checkpoints
            .write(MODULE, &serde_json::to_value(&checkpoint).expect("should serialize"))
            .await
            .expect("should seed checkpoint");
    }

    fn collector(&self) -> HistoricalWeatherCollector {
        let api = HttpHistoryApi::new(
            self.config.base_url.clone(),
            CallTimeout::new(Duration::from_secs(5)),
        );
        HistoricalWeatherCollector::new(self.config.clone(), self.documents.clone(), Arc::new(api))
            .with_today(today())
    }

    async fn run(&self) -> RunSummary {
        let mut runner = LifecycleRunner::new(self.collector(), Arc::clone(&self.checkpoints));
        runner.run().await
    }

    async fn checkpoint(&self) -> Checkpoint<HistoricalWeatherFields> {
        let raw = self
            .checkpoints
            .read(MODULE)
            .await
            .expect("should read checkpoint")
            .expect("checkpoint should exist");
        serde_json::from_value(raw).expect("checkpoint should deserialize")
    }

    fn history_len(&self) -> usize {
        self.documents.len(&self.config.collection)
    }
}

// =============================================================================
// Backfill
// =============================================================================

#[test_log::test(tokio::test)]
async fn test_backfill_walks_back_until_quota_is_used() {
    let mut harness = Harness::new(&["tok-a"]).await;
    harness.config.max_daily_requests_per_token = 10;
    harness.add_location(1, Some("00000.1.08221")).await;
    harness.queue(&[1], TokenPool::new(&harness.config.tokens)).await;
    mock_history(&harness.server, measured_day(), 10).await;

    let summary = harness.run().await;

    assert_eq!(summary.final_state, ExecutionState::Finished);
    assert_eq!(summary.verification, Some(Verification::Success));
    assert_eq!(summary.data_elements, Some(10));
    assert_eq!(summary.inserted_elements, Some(10));
    assert_eq!(harness.history_len(), 10);

    let checkpoint = harness.checkpoint().await;
    assert_eq!(checkpoint.fields.cursor.current_date, Some(date(2024, 2, 27)));
    assert_eq!(checkpoint.fields.cursor.pending_location_ids, VecDeque::from([1]));
    assert_eq!(checkpoint.fields.cursor.consecutive_unmeasured_days, 0);
    assert_eq!(checkpoint.update_frequency, harness.config.update_frequency_slow);
    let token = checkpoint.fields.tokens.get("tok-a").expect("token should be tracked");
    assert_eq!(token.daily_requests, 10);
    assert!(!token.usable);
}

#[tokio::test]
async fn test_backfill_stays_fast_while_quota_remains() {
    let harness = Harness::new(&["tok-a"]).await;
    assert_eq!(harness.config.max_daily_requests_per_token, 500);
    harness.add_location(1, Some("00000.1.08221")).await;
    harness.queue(&[1], TokenPool::new(&harness.config.tokens)).await;
    mock_history(&harness.server, measured_day(), 10).await;

    let summary = harness.run().await;

    assert_eq!(summary.verification, Some(Verification::Success));
    assert_eq!(summary.data_elements, Some(10));
    assert_eq!(summary.inserted_elements, Some(10));

    let checkpoint = harness.checkpoint().await;
    assert_eq!(checkpoint.fields.cursor.current_date, Some(date(2024, 2, 27)));
    assert_eq!(checkpoint.fields.cursor.pending_location_ids, VecDeque::from([1]));
    // The minute cap stopped this run, not the daily quota
    assert_eq!(checkpoint.update_frequency, harness.config.update_frequency_fast);
    let token = checkpoint.fields.tokens.get("tok-a").expect("token should be tracked");
    assert_eq!(token.daily_requests, 10);
    assert!(token.usable);
}

#[tokio::test]
async fn test_every_token_is_used_up_to_its_quota() {
    let tokens: Vec<String> = (0..10).map(|i| format!("tok-{i}")).collect();
    let token_refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
    let mut harness = Harness::new(&token_refs).await;
    harness.config.max_daily_requests_per_token = 1;
    harness.add_location(1, Some("00000.1.08221")).await;
    harness.queue(&[1], TokenPool::new(&harness.config.tokens)).await;
    mock_history(&harness.server, measured_day(), 10).await;

    let summary = harness.run().await;

    assert!(summary.successful());
    assert_eq!(summary.data_elements, Some(10));

    let checkpoint = harness.checkpoint().await;
    assert_eq!(checkpoint.update_frequency, harness.config.update_frequency_slow);
    assert!(checkpoint
        .fields
        .tokens
        .iter()
        .all(|(_, state)| state.daily_requests == 1 && !state.usable));
}

#[test_log::test(tokio::test)]
async fn test_history_boundary_finishes_location() {
    let mut harness = Harness::new(&["tok-a"]).await;
    harness.config.max_day_count = 3;
    harness.add_location(1, Some("00000.1.08221")).await;
    harness.add_location(2, Some("00000.1.08222")).await;
    harness.queue(&[1, 2], TokenPool::new(&harness.config.tokens)).await;
    mock_history(&harness.server, unmeasured_day(), 3).await;

    let summary = harness.run().await;

    assert_eq!(summary.verification, Some(Verification::AdvisedlyEmpty));
    assert_eq!(summary.data_elements, Some(0));
    assert_eq!(summary.inserted_elements, Some(0));

    let checkpoint = harness.checkpoint().await;
    assert_eq!(checkpoint.fields.cursor.pending_location_ids, VecDeque::from([2]));
    assert!(checkpoint.fields.cursor.is_idle());
    assert_eq!(checkpoint.fields.cursor.consecutive_unmeasured_days, 0);
    assert!(!checkpoint.fields.missing_data_check);
    assert_eq!(checkpoint.update_frequency, harness.config.update_frequency_fast);
}

#[tokio::test]
async fn test_stored_history_moves_on_to_next_location() {
    let mut harness = Harness::new(&["tok-a"]).await;
    harness.config.max_requests_per_minute_per_token = 3;
    harness.config.existing_data_limit = 2;
    harness.add_location(1, Some("00000.1.08221")).await;
    harness.add_history(1, date(2024, 3, 8)).await;
    harness.add_history(1, date(2024, 3, 7)).await;
    harness.queue(&[1], TokenPool::new(&harness.config.tokens)).await;
    mock_history(&harness.server, measured_day(), 3).await;

    let summary = harness.run().await;

    assert!(summary.successful());
    assert_eq!(summary.data_elements, Some(3));
    assert_eq!(summary.inserted_elements, Some(3));
    assert_eq!(harness.history_len(), 3);

    let checkpoint = harness.checkpoint().await;
    assert!(checkpoint.fields.cursor.pending_location_ids.is_empty());
    assert!(checkpoint.fields.cursor.is_idle());
    assert!(checkpoint.fields.missing_data_check);
    assert_eq!(checkpoint.update_frequency, harness.config.update_frequency_slow);
}

#[tokio::test]
async fn test_exhausted_tokens_start_a_new_quota_day() {
    let mut harness = Harness::new(&["tok-a"]).await;
    harness.config.max_daily_requests_per_token = 1;
    harness.add_location(1, Some("00000.1.08221")).await;
    let mut tokens = TokenPool::new(&harness.config.tokens);
    tokens.record_request("tok-a");
    harness.queue(&[1], tokens).await;
    mock_history(&harness.server, measured_day(), 1).await;

    let summary = harness.run().await;

    assert_eq!(summary.data_elements, Some(1));
    let checkpoint = harness.checkpoint().await;
    assert_eq!(
        checkpoint.fields.tokens.get("tok-a").map(|t| t.daily_requests),
        Some(1)
    );
}

#[tokio::test]
async fn test_location_without_source_id_is_dropped() {
    let harness = Harness::new(&["tok-a"]).await;
    harness.add_location(1, None).await;
    harness.add_location(2, Some("00000.1.08222")).await;
    harness.queue(&[1, 2], TokenPool::new(&harness.config.tokens)).await;
    mock_history(&harness.server, measured_day(), 0).await;

    let summary = harness.run().await;

    assert_eq!(summary.verification, Some(Verification::AdvisedlyEmpty));
    let checkpoint = harness.checkpoint().await;
    assert_eq!(checkpoint.fields.cursor.pending_location_ids, VecDeque::from([2]));
}

#[tokio::test]
async fn test_unparseable_responses_count_as_unmeasured() {
    let mut harness = Harness::new(&["tok-a"]).await;
    harness.config.max_requests_per_minute_per_token = 2;
    harness.add_location(1, Some("00000.1.08221")).await;
    harness.queue(&[1], TokenPool::new(&harness.config.tokens)).await;
    Mock::given(method("GET"))
        .and(path_regex(HISTORY_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("try later"))
        .expect(2)
        .mount(&harness.server)
        .await;

    let summary = harness.run().await;

    assert_eq!(summary.verification, Some(Verification::AdvisedlyEmpty));
    let checkpoint = harness.checkpoint().await;
    assert_eq!(checkpoint.fields.cursor.consecutive_unmeasured_days, 2);
    assert_eq!(checkpoint.fields.cursor.current_date, Some(date(2024, 3, 6)));
}

// =============================================================================
// Gap scan
// =============================================================================

#[tokio::test]
async fn test_gap_scan_without_locations_slows_down() {
    let harness = Harness::new(&["tok-a"]).await;
    mock_history(&harness.server, measured_day(), 0).await;

    let summary = harness.run().await;

    assert_eq!(summary.verification, Some(Verification::AdvisedlyEmpty));
    let checkpoint = harness.checkpoint().await;
    assert!(checkpoint.fields.missing_data_check);
    assert!(checkpoint.fields.cursor.is_idle());
    assert_eq!(checkpoint.update_frequency, harness.config.update_frequency_slow);
}

#[tokio::test]
async fn test_gap_scan_queues_locations_without_history() {
    let harness = Harness::new(&["tok-a"]).await;
    harness.add_location(3, Some("00000.1.08223")).await;
    harness.add_location(1, Some("00000.1.08221")).await;
    harness.add_location(2, None).await;
    harness.add_location(4, Some("00000.1.08224")).await;
    harness.add_history(4, date(2024, 3, 8)).await;

    let summary = harness.run().await;

    assert_eq!(summary.verification, Some(Verification::AdvisedlyEmpty));
    let checkpoint = harness.checkpoint().await;
    assert!(!checkpoint.fields.missing_data_check);
    assert_eq!(checkpoint.fields.cursor.pending_location_ids, VecDeque::from([1, 3]));
    assert_eq!(checkpoint.update_frequency, harness.config.update_frequency_fast);
}

#[tokio::test]
async fn test_gap_scan_queues_stale_locations() {
    let harness = Harness::new(&["tok-a"]).await;
    harness.add_location(5, Some("00000.1.08225")).await;
    harness.add_location(6, Some("00000.1.08226")).await;
    harness.add_history(5, date(2024, 2, 20)).await;
    harness.add_history(5, date(2024, 3, 1)).await;
    harness.add_history(6, date(2024, 3, 8)).await;

    harness.run().await;

    let checkpoint = harness.checkpoint().await;
    assert_eq!(checkpoint.fields.cursor.pending_location_ids, VecDeque::from([5]));
    assert!(!checkpoint.fields.missing_data_check);
}

#[tokio::test]
async fn test_gap_scan_then_backfill_resumes_from_disk() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(FileCheckpointStore::new(dir.path()));
    let mut harness = Harness::with_checkpoints(&["tok-a"], checkpoints).await;
    harness.config.max_daily_requests_per_token = 2;
    harness.add_location(1, Some("00000.1.08221")).await;
    mock_history(&harness.server, measured_day(), 2).await;

    let scan = harness.run().await;
    assert_eq!(scan.data_elements, Some(0));
    assert_eq!(
        harness.checkpoint().await.fields.cursor.pending_location_ids,
        VecDeque::from([1])
    );

    let backfill = harness.run().await;
    assert_eq!(backfill.data_elements, Some(2));
    assert_eq!(backfill.inserted_elements, Some(2));

    let checkpoint = harness.checkpoint().await;
    assert_eq!(checkpoint.fields.cursor.current_date, Some(date(2024, 3, 6)));
    assert!(dir.path().join(format!("{MODULE}.state")).exists());
}
