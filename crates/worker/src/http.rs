// HTTP client for the daily history API
//
// Every failure mode of a history request (transport error, non-2xx status,
// malformed JSON, missing nested fields, timeout) is folded into a
// `HistoryResponse` so the backfill loop can count it as an unmeasured day.

use async_trait::async_trait;
use climate_durable::reliability::CallTimeout;
use serde_json::Value;
use tracing::{debug, warn};

/// One daily history request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest<'a> {
    pub token: &'a str,
    /// `YYYYMMDD`
    pub date: &'a str,
    pub language: &'a str,
    pub location: &'a str,
}

impl HistoryRequest<'_> {
    /// Substitute the request into a URL template
    pub fn render(&self, template: &str) -> String {
        template
            .replace("{TOKEN}", self.token)
            .replace("{DATE}", self.date)
            .replace("{YYYYMMDD}", self.date)
            .replace("{LANG}", self.language)
            .replace("{LOC_ID}", self.location)
    }
}

/// Classified history response
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryResponse {
    /// Document with non-empty observations and daily summary
    Data(Value),
    /// Well-formed document without measurements for that day
    Empty,
    /// Anything that could not be used
    Unparseable(String),
}

impl HistoryResponse {
    /// Classify a response body
    pub fn from_body(body: &str) -> Self {
        let document: Value = match serde_json::from_str(body) {
            Ok(document) => document,
            Err(e) => return Self::Unparseable(format!("invalid JSON: {e}")),
        };
        let non_empty = |field: &str| {
            document
                .get("history")
                .and_then(|h| h.get(field))
                .and_then(Value::as_array)
                .is_some_and(|items| !items.is_empty())
        };
        if non_empty("observations") && non_empty("dailysummary") {
            Self::Data(document)
        } else {
            Self::Empty
        }
    }
}

/// Source of daily history documents
#[async_trait]
pub trait HistoryApi: Send + Sync {
    async fn daily_history(&self, request: &HistoryRequest<'_>) -> HistoryResponse;
}

/// `reqwest` implementation of [`HistoryApi`]
pub struct HttpHistoryApi {
    http: reqwest::Client,
    url_template: String,
    timeout: CallTimeout,
}

impl HttpHistoryApi {
    pub fn new(url_template: impl Into<String>, timeout: CallTimeout) -> Self {
        Self {
            http: reqwest::Client::new(),
            url_template: url_template.into(),
            timeout,
        }
    }

    pub fn url_template(&self) -> &str {
        &self.url_template
    }

    async fn fetch_body(&self, url: &str) -> Result<String, String> {
        let response = self.http.get(url).send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP status {status}"));
        }
        response.text().await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl HistoryApi for HttpHistoryApi {
    async fn daily_history(&self, request: &HistoryRequest<'_>) -> HistoryResponse {
        let url = request.render(&self.url_template);
        debug!(date = request.date, location = request.location, "requesting daily history");

        match self.timeout.run(self.fetch_body(&url)).await {
            Ok(Ok(body)) => HistoryResponse::from_body(&body),
            Ok(Err(reason)) => {
                warn!(date = request.date, location = request.location, %reason, "history request failed");
                HistoryResponse::Unparseable(reason)
            }
            Err(e) => HistoryResponse::Unparseable(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_substitutes_every_placeholder() {
        let request = HistoryRequest {
            token: "t0k",
            date: "20240301",
            language: "EN",
            location: "00000.1.08221",
        };
        assert_eq!(
            request.render("http://h/{TOKEN}/history_{DATE}/lang:{LANG}/q/zmw:{LOC_ID}.json"),
            "http://h/t0k/history_20240301/lang:EN/q/zmw:00000.1.08221.json"
        );
    }

    #[test]
    fn test_classify_bodies() {
        let full = json!({"history": {"observations": [{}], "dailysummary": [{"fog": "0"}]}});
        assert!(matches!(
            HistoryResponse::from_body(&full.to_string()),
            HistoryResponse::Data(_)
        ));

        let empty = json!({"history": {"observations": [], "dailysummary": []}});
        assert_eq!(HistoryResponse::from_body(&empty.to_string()), HistoryResponse::Empty);

        let missing = json!({"response": {"error": "quota"}});
        assert_eq!(HistoryResponse::from_body(&missing.to_string()), HistoryResponse::Empty);

        assert!(matches!(
            HistoryResponse::from_body("<html>"),
            HistoryResponse::Unparseable(_)
        ));
    }
}
