//! API token pool
//!
//! Each token has its own daily quota. `usable` is derived from
//! `daily_requests`, and is recomputed before it is trusted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Usage of one API token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenState {
    pub daily_requests: u32,
    pub usable: bool,
}

impl Default for TokenState {
    fn default() -> Self {
        Self {
            daily_requests: 0,
            usable: true,
        }
    }
}

/// Token states keyed by token, persisted in the checkpoint
///
/// Rotation order is always the configured token order, not the map order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenPool {
    tokens: BTreeMap<String, TokenState>,
}

impl TokenPool {
    /// Fresh pool with every configured token unused
    pub fn new(configured: &[String]) -> Self {
        let mut pool = Self::default();
        pool.reconcile(configured);
        pool
    }

    /// Add configured tokens missing from the pool and drop the rest
    pub fn reconcile(&mut self, configured: &[String]) {
        let before = self.tokens.len();
        self.tokens.retain(|token, _| configured.contains(token));
        let removed = before - self.tokens.len();

        let mut added = 0;
        for token in configured {
            if !self.tokens.contains_key(token) {
                self.tokens.insert(token.clone(), TokenState::default());
                added += 1;
            }
        }

        if added > 0 || removed > 0 {
            info!(added, removed, tokens = self.tokens.len(), "token pool reconciled with configuration");
        }
    }

    pub fn get(&self, token: &str) -> Option<&TokenState> {
        self.tokens.get(token)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Recompute and return the usability of `token`
    pub fn refresh(&mut self, token: &str, max_daily: u32) -> bool {
        match self.tokens.get_mut(token) {
            Some(state) => {
                state.usable = state.daily_requests < max_daily;
                state.usable
            }
            None => false,
        }
    }

    /// Recompute every token, returning how many are usable
    pub fn refresh_all(&mut self, max_daily: u32) -> usize {
        self.tokens
            .values_mut()
            .map(|state| {
                state.usable = state.daily_requests < max_daily;
                state.usable
            })
            .filter(|usable| *usable)
            .count()
    }

    /// Usable tokens, in configured order
    pub fn usable(&mut self, configured: &[String], max_daily: u32) -> Vec<String> {
        configured
            .iter()
            .filter(|token| self.refresh(token, max_daily))
            .cloned()
            .collect()
    }

    pub fn record_request(&mut self, token: &str) {
        if let Some(state) = self.tokens.get_mut(token) {
            state.daily_requests += 1;
        }
    }

    /// Start a new quota day for every token
    pub fn reset(&mut self) {
        for (token, state) in self.tokens.iter_mut() {
            if state.daily_requests > 0 || !state.usable {
                info!(token = %token, "resetting daily requests for token");
            }
            *state = TokenState::default();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TokenState)> {
        self.tokens.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_reconcile_adds_and_drops() {
        let mut pool = TokenPool::new(&names(&["a", "b"]));
        pool.record_request("a");

        pool.reconcile(&names(&["a", "c"]));

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get("a").map(|s| s.daily_requests), Some(1));
        assert_eq!(pool.get("c"), Some(&TokenState::default()));
        assert!(pool.get("b").is_none());
    }

    #[test]
    fn test_usability_is_recomputed_from_requests() {
        let configured = names(&["a", "b"]);
        let mut pool = TokenPool::new(&configured);
        pool.record_request("a");
        pool.record_request("a");

        assert_eq!(pool.usable(&configured, 2), vec!["b"]);
        assert!(!pool.get("a").map(|s| s.usable).unwrap_or(true));

        // A raised cap makes the token usable again
        assert!(pool.refresh("a", 3));
        assert_eq!(pool.refresh_all(0), 0);
    }

    #[test]
    fn test_reset_starts_a_new_day() {
        let configured = names(&["a"]);
        let mut pool = TokenPool::new(&configured);
        pool.record_request("a");
        pool.refresh_all(1);

        pool.reset();

        assert_eq!(pool.get("a"), Some(&TokenState::default()));
    }

    #[test]
    fn test_serialized_as_map() {
        let pool = TokenPool::new(&names(&["a"]));
        let value = serde_json::to_value(&pool).expect("should serialize");
        assert_eq!(value, serde_json::json!({"a": {"daily_requests": 0, "usable": true}}));
    }
}
