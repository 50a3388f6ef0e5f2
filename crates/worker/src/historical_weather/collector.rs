//! Historical weather collector
//!
//! The collector alternates between two modes, persisted as
//! `missing_data_check` in its checkpoint:
//!
//! - **Gap scan**: find locations with no stored history, or whose newest
//!   record has fallen out of the retention window, and queue them
//! - **Backfill**: walk the head location backwards one day per request,
//!   rotating over the configured tokens, until the source returns
//!   `max_day_count` consecutive days without measurements
//!
//! A backfill run ends early when every token has used its daily quota; the
//! module then slows down to the daily frequency and resets the quotas when
//! it next has work.

use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::cursor::{yyyymmdd, BackfillCursor};
use super::tokens::TokenPool;
use super::utc_midnight_millis;
use crate::config::HistoricalWeatherConfig;
use crate::http::{HistoryApi, HistoryRequest, HistoryResponse};
use climate_durable::persistence::compare;
use climate_durable::prelude::*;

/// Checkpoint fields of the collector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoricalWeatherFields {
    /// Gap-scan mode (`true`) or backfill mode (`false`)
    pub missing_data_check: bool,
    #[serde(flatten)]
    pub cursor: BackfillCursor,
    pub tokens: TokenPool,
}

impl Default for HistoricalWeatherFields {
    fn default() -> Self {
        Self {
            missing_data_check: true,
            cursor: BackfillCursor::default(),
            tokens: TokenPool::default(),
        }
    }
}

/// Backfills daily weather history for every known location
pub struct HistoricalWeatherCollector {
    config: HistoricalWeatherConfig,
    documents: Arc<dyn DocumentStore>,
    api: Arc<dyn HistoryApi>,
    today: Option<NaiveDate>,
    data: Vec<(NaturalKey, Document)>,
    /// The head location was finished during this run's fetch
    location_changed: bool,
}

impl HistoricalWeatherCollector {
    pub fn new(
        config: HistoricalWeatherConfig,
        documents: Arc<dyn DocumentStore>,
        api: Arc<dyn HistoryApi>,
    ) -> Self {
        Self {
            config,
            documents,
            api,
            today: None,
            data: Vec::new(),
            location_changed: false,
        }
    }

    /// Pin the current date instead of reading the clock
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn config(&self) -> &HistoricalWeatherConfig {
        &self.config
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    fn days_before_today(&self, days: i64) -> NaiveDate {
        let today = self.today();
        u64::try_from(days)
            .ok()
            .and_then(|days| today.checked_sub_days(Days::new(days)))
            .unwrap_or(today)
    }

    // =========================================================================
    // Gap scan
    // =========================================================================

    async fn scan_for_gaps(
        &mut self,
        ctx: &mut RunContext<HistoricalWeatherFields>,
    ) -> Result<Outcome, ModuleError> {
        ctx.set_advisedly_no_data(true);
        ctx.fields_mut().cursor.clear();

        let locations = self
            .documents
            .count(&self.config.locations_collection, &Filter::All)
            .await?;
        if locations == 0 {
            info!("no locations are known yet, nothing to backfill");
            ctx.checkpoint.update_frequency = self.config.update_frequency_slow;
            return Ok(Outcome::Continue);
        }

        let mut ids = self.locations_without_history().await?;
        if ids.is_empty() {
            ids = self.locations_with_stale_history().await?;
        }

        if ids.is_empty() {
            info!(locations, "historical weather is up to date");
            ctx.checkpoint.update_frequency = self.config.update_frequency_slow;
        } else {
            info!(pending = ids.len(), "queued locations for backfill");
            let fields = ctx.fields_mut();
            fields.cursor.enqueue(ids);
            fields.missing_data_check = false;
            ctx.checkpoint.update_frequency = self.config.update_frequency_fast;
        }
        Ok(Outcome::Continue)
    }

    /// Locations with a source id and no stored history at all
    async fn locations_without_history(&self) -> Result<Vec<i64>, ModuleError> {
        let present = self
            .documents
            .distinct(&self.config.collection, "location_id", &Filter::All)
            .await?;
        let filter = Filter::And(vec![
            Filter::exists("wunderground_loc_id"),
            Filter::NotIn("_id".into(), present),
        ]);
        let missing = self
            .documents
            .distinct(&self.config.locations_collection, "_id", &filter)
            .await?;
        Ok(sorted_ids(missing.iter()))
    }

    /// Locations whose newest record is older than the retention window
    async fn locations_with_stale_history(&self) -> Result<Vec<i64>, ModuleError> {
        let horizon = self.days_before_today(
            self.config.retention_window_days + self.config.tolerance_days,
        );
        let horizon = Value::from(utc_midnight_millis(horizon));
        let newest = self
            .documents
            .max_by_group(&self.config.collection, "location_id", "date_utc")
            .await?;
        Ok(sorted_ids(
            newest
                .iter()
                .filter(|(_, newest)| {
                    matches!(
                        compare(newest, &horizon),
                        Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
                    )
                })
                .map(|(location, _)| location),
        ))
    }

    // =========================================================================
    // Backfill
    // =========================================================================

    async fn backfill(
        &mut self,
        ctx: &mut RunContext<HistoricalWeatherFields>,
    ) -> Result<Outcome, ModuleError> {
        let fast = self.config.update_frequency_fast;
        let slow = self.config.update_frequency_slow;
        let max_daily = self.config.max_daily_requests_per_token;

        let Some(location_id) = ctx.fields().cursor.head() else {
            info!("backfill queue is empty, switching to gap scan");
            ctx.fields_mut().missing_data_check = true;
            ctx.checkpoint.update_frequency = fast;
            ctx.set_advisedly_no_data(true);
            return Ok(Outcome::Continue);
        };

        let Some(source_id) = self.source_id(location_id).await? else {
            warn!(location_id, "location has no source id, dropping it from the queue");
            ctx.fields_mut().cursor.finish_location();
            ctx.checkpoint.update_frequency = fast;
            ctx.set_advisedly_no_data(true);
            return Ok(Outcome::Continue);
        };

        let start = self.days_before_today(self.config.tolerance_days);
        ctx.fields_mut().cursor.start_at(start);

        let configured = self.config.tokens.clone();
        let tokens = ctx.fields_mut().tokens.usable(&configured, max_daily);
        debug!(location_id, usable_tokens = tokens.len(), "backfilling location");

        let mut outcome = Outcome::Continue;
        'tokens: for token in &tokens {
            for _ in 0..self.config.max_requests_per_minute_per_token {
                if ctx.is_cancelled() {
                    info!(location_id, "cancellation requested, stopping backfill");
                    break 'tokens;
                }
                let fields = ctx.fields_mut();
                if !fields.tokens.refresh(token, max_daily) {
                    break;
                }
                let Some(date) = fields.cursor.current_date else {
                    break 'tokens;
                };
                fields.tokens.record_request(token);

                let day = date.format(yyyymmdd::FORMAT).to_string();
                let request = HistoryRequest {
                    token,
                    date: &day,
                    language: &self.config.language,
                    location: &source_id,
                };
                match self.api.daily_history(&request).await {
                    HistoryResponse::Data(document) => {
                        self.data.push(history_record(location_id, date, document));
                        ctx.fields_mut().cursor.record_measured();
                    }
                    HistoryResponse::Empty => {
                        debug!(location_id, date = %day, "no measurements for day");
                        ctx.fields_mut().cursor.record_unmeasured();
                    }
                    HistoryResponse::Unparseable(reason) => {
                        warn!(location_id, date = %day, %reason, "unusable history response");
                        ctx.fields_mut().cursor.record_unmeasured();
                    }
                }

                let cursor = &mut ctx.fields_mut().cursor;
                if cursor.boundary_reached(self.config.max_day_count) {
                    info!(
                        location_id,
                        oldest = %day,
                        "no older history available, location finished"
                    );
                    cursor.finish_location();
                    self.location_changed = true;
                    outcome = Outcome::BoundaryReached;
                    break 'tokens;
                }
                cursor.step_back();
            }
        }

        let no_data = self.data.is_empty();
        let fields = ctx.fields_mut();
        let any_usable = fields.tokens.refresh_all(max_daily) > 0;
        let unmeasured = fields.cursor.consecutive_unmeasured_days > 0;
        let queue_empty = fields.cursor.pending_location_ids.is_empty();
        if queue_empty {
            fields.cursor.clear();
            fields.missing_data_check = true;
        }

        if !any_usable {
            info!("every token has used its daily quota");
            ctx.set_advisedly_no_data(no_data);
        }
        if unmeasured || outcome == Outcome::BoundaryReached {
            ctx.set_advisedly_no_data(no_data);
        }
        if queue_empty || !any_usable {
            ctx.checkpoint.update_frequency = slow;
        } else {
            ctx.checkpoint.update_frequency = fast;
        }
        Ok(outcome)
    }

    /// Source identifier of a location, if it has one
    async fn source_id(&self, location_id: i64) -> Result<Option<String>, ModuleError> {
        let location = self
            .documents
            .find_one(
                &self.config.locations_collection,
                &Filter::eq("_id", location_id),
            )
            .await?;
        Ok(location.and_then(|location| match location.get("wunderground_loc_id") {
            Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
            Some(Value::Number(id)) => Some(id.to_string()),
            _ => None,
        }))
    }
}

#[async_trait]
impl DataModule for HistoricalWeatherCollector {
    type Fields = HistoricalWeatherFields;

    fn name(&self) -> &str {
        HistoricalWeatherConfig::MODULE
    }

    fn default_checkpoint(&self) -> Checkpoint<HistoricalWeatherFields> {
        Checkpoint::new(
            self.config.update_frequency_fast,
            HistoricalWeatherFields {
                tokens: TokenPool::new(&self.config.tokens),
                ..Default::default()
            },
        )
    }

    async fn restore_state(
        &mut self,
        ctx: &mut RunContext<HistoricalWeatherFields>,
    ) -> Result<Outcome, ModuleError> {
        ctx.fields_mut().tokens.reconcile(&self.config.tokens);
        Ok(Outcome::Continue)
    }

    async fn has_pending_work(
        &mut self,
        ctx: &mut RunContext<HistoricalWeatherFields>,
    ) -> Result<Outcome, ModuleError> {
        if !ctx.pending_work() {
            return Ok(Outcome::Continue);
        }
        let max_daily = self.config.max_daily_requests_per_token;
        let fields = ctx.fields_mut();
        if !fields.cursor.pending_location_ids.is_empty() && fields.tokens.refresh_all(max_daily) == 0
        {
            info!("starting a new quota day for every token");
            fields.tokens.reset();
        }
        ctx.checkpoint.update_frequency = self.config.update_frequency_fast;
        Ok(Outcome::Continue)
    }

    async fn fetch(
        &mut self,
        ctx: &mut RunContext<HistoricalWeatherFields>,
    ) -> Result<Outcome, ModuleError> {
        self.data.clear();
        self.location_changed = false;

        let outcome = if ctx.fields().missing_data_check {
            self.scan_for_gaps(ctx).await?
        } else {
            self.backfill(ctx).await?
        };

        ctx.checkpoint.data_elements = Some(self.data.len() as u64);
        Ok(outcome)
    }

    async fn save(
        &mut self,
        ctx: &mut RunContext<HistoricalWeatherFields>,
    ) -> Result<Outcome, ModuleError> {
        if self.data.is_empty() {
            ctx.checkpoint.inserted_elements = Some(0);
            return Ok(Outcome::Continue);
        }

        let records = std::mem::take(&mut self.data);
        let counts = self
            .documents
            .bulk_upsert(&self.config.collection, records)
            .await?;
        ctx.checkpoint.inserted_elements = Some(counts.total());
        info!(
            upserted = counts.upserted,
            matched = counts.matched,
            "saved historical weather records"
        );

        if counts.matched >= self.config.existing_data_limit {
            if self.location_changed {
                debug!(matched = counts.matched, "location already finished during fetch");
            } else {
                let fields = ctx.fields_mut();
                let finished = fields.cursor.finish_location();
                info!(
                    location_id = ?finished,
                    matched = counts.matched,
                    "location history already stored, moving on"
                );
                if fields.cursor.pending_location_ids.is_empty() {
                    fields.missing_data_check = true;
                    ctx.checkpoint.update_frequency = self.config.update_frequency_slow;
                }
            }
        }
        Ok(Outcome::Continue)
    }

    async fn clean_on_fetch(
        &mut self,
        _ctx: &mut RunContext<HistoricalWeatherFields>,
        cause: &ModuleError,
    ) -> Result<(), ModuleError> {
        warn!(error = %cause, discarded = self.data.len(), "dropping partially fetched history");
        self.data.clear();
        Ok(())
    }

    async fn clean_on_save(
        &mut self,
        _ctx: &mut RunContext<HistoricalWeatherFields>,
        cause: &ModuleError,
    ) -> Result<(), ModuleError> {
        warn!(error = %cause, "history was not saved, it will be fetched again");
        self.data.clear();
        Ok(())
    }
}

/// Raw history document tagged with its natural key
fn history_record(location_id: i64, requested: NaiveDate, document: Value) -> (NaturalKey, Document) {
    let date = observed_date(&document).unwrap_or(requested);
    let date_utc = utc_midnight_millis(date);
    let mut document = match document {
        Value::Object(map) => map,
        other => {
            let mut map = Document::new();
            map.insert("history".into(), other);
            map
        }
    };
    document.insert("location_id".into(), Value::from(location_id));
    document.insert("date_utc".into(), Value::from(date_utc));
    let key = NaturalKey::new()
        .with("location_id", location_id)
        .with("date_utc", date_utc);
    (key, document)
}

/// The date the source reports the history for (`history.date`)
fn observed_date(document: &Value) -> Option<NaiveDate> {
    let date = document.get("history")?.get("date")?;
    let part = |name: &str| -> Option<i64> {
        match date.get(name)? {
            Value::String(s) => s.trim().parse().ok(),
            other => other.as_i64(),
        }
    };
    NaiveDate::from_ymd_opt(
        i32::try_from(part("year")?).ok()?,
        u32::try_from(part("mon")?).ok()?,
        u32::try_from(part("mday")?).ok()?,
    )
}

fn sorted_ids<'a>(values: impl Iterator<Item = &'a Value>) -> Vec<i64> {
    let mut ids: Vec<i64> = values.filter_map(Value::as_i64).collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}
