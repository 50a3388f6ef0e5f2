//! Historical weather converter
//!
//! Pages through the raw documents stored by the collector, in insertion
//! order, and upserts one normalized observation per `(location_id, date)`.
//! The offset only moves forward; documents the collector adds later land
//! after it and are read by a following run.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::observation::HistoricalWeatherObservation;
use crate::config::HistoricalWeatherConverterConfig;
use climate_durable::prelude::*;

/// Checkpoint fields of the converter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterFields {
    /// Raw documents already converted
    pub next_offset: u64,
}

/// Converts raw history documents into observations
pub struct HistoricalWeatherConverter {
    config: HistoricalWeatherConverterConfig,
    documents: Arc<dyn DocumentStore>,
    data: Vec<HistoricalWeatherObservation>,
    page_len: u64,
}

impl HistoricalWeatherConverter {
    pub fn new(config: HistoricalWeatherConverterConfig, documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            config,
            documents,
            data: Vec::new(),
            page_len: 0,
        }
    }

    fn to_record(
        observation: &HistoricalWeatherObservation,
    ) -> Result<(NaturalKey, Document), ModuleError> {
        let key = NaturalKey::new()
            .with("location_id", observation.location_id)
            .with("date", observation.date.format("%Y-%m-%d").to_string());
        match serde_json::to_value(observation).map_err(StorageError::from)? {
            Value::Object(document) => Ok((key, document)),
            other => Err(ModuleError::InvalidData(format!(
                "observation serialized to a non-object: {other}"
            ))),
        }
    }
}

#[async_trait]
impl DataModule for HistoricalWeatherConverter {
    type Fields = ConverterFields;

    fn name(&self) -> &str {
        HistoricalWeatherConverterConfig::MODULE
    }

    fn default_checkpoint(&self) -> Checkpoint<ConverterFields> {
        Checkpoint::new(self.config.update_frequency, ConverterFields::default())
    }

    async fn fetch(&mut self, ctx: &mut RunContext<ConverterFields>) -> Result<Outcome, ModuleError> {
        self.data.clear();
        self.page_len = 0;

        let locations = self
            .documents
            .count(&self.config.locations_collection, &Filter::All)
            .await?;
        if locations == 0 {
            info!("no locations are stored yet, postponing conversion");
            ctx.checkpoint.update_frequency = self.config.dependencies_unsatisfied_frequency;
            ctx.set_advisedly_no_data(true);
            return Ok(Outcome::skip_to_checkpoint());
        }
        ctx.checkpoint.update_frequency = self.config.update_frequency;

        let offset = ctx.fields().next_offset;
        let page = self
            .documents
            .find(
                &self.config.source_collection,
                &Filter::All,
                Pagination::new(offset, self.config.page_size),
            )
            .await?;
        self.page_len = page.len() as u64;

        for raw in &page {
            match HistoricalWeatherObservation::from_raw(raw) {
                Ok(observation) => self.data.push(observation),
                Err(e) => warn!(
                    id = ?raw.get("_id").or_else(|| raw.get("location_id")),
                    error = %e,
                    "skipping history document that cannot be converted"
                ),
            }
        }

        if page.is_empty() {
            ctx.set_advisedly_no_data(true);
        }
        ctx.checkpoint.data_elements = Some(self.data.len() as u64);
        info!(offset, read = page.len(), converted = self.data.len(), "converted history page");
        Ok(Outcome::Continue)
    }

    async fn save(&mut self, ctx: &mut RunContext<ConverterFields>) -> Result<Outcome, ModuleError> {
        let records = self
            .data
            .iter()
            .map(Self::to_record)
            .collect::<Result<Vec<_>, _>>()?;

        let inserted = if records.is_empty() {
            0
        } else {
            self.documents
                .bulk_upsert(&self.config.target_collection, records)
                .await?
                .total()
        };
        ctx.checkpoint.inserted_elements = Some(inserted);
        self.data.clear();

        ctx.fields_mut().next_offset += self.page_len;
        Ok(Outcome::Continue)
    }

    async fn clean_on_fetch(
        &mut self,
        _ctx: &mut RunContext<ConverterFields>,
        cause: &ModuleError,
    ) -> Result<(), ModuleError> {
        warn!(error = %cause, "dropping partially converted page");
        self.data.clear();
        Ok(())
    }

    async fn clean_on_save(
        &mut self,
        _ctx: &mut RunContext<ConverterFields>,
        cause: &ModuleError,
    ) -> Result<(), ModuleError> {
        warn!(error = %cause, "page was not saved, it will be converted again");
        self.data.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_record_is_keyed_by_location_and_date() {
        let raw = serde_json::json!({
            "location_id": 2,
            "date_utc": 1_499_990_400_000i64,
            "history": {"dailysummary": [{"meantempm": "20"}]},
        });
        let raw = raw.as_object().cloned().expect("object");
        let observation = HistoricalWeatherObservation::from_raw(&raw).expect("should normalize");

        let (key, document) =
            HistoricalWeatherConverter::to_record(&observation).expect("should serialize");

        assert_eq!(key.to_string(), "{date=\"2017-07-14\", location_id=2}");
        assert_eq!(document["mean_temp"], serde_json::json!(20));
        assert_eq!(
            observation.date,
            NaiveDate::from_ymd_opt(2017, 7, 14).expect("valid date")
        );
    }
}
