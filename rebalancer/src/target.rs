//! Target book (target.json) loading and validation.
//!
//! Rows arrive pre-resolved: instrument ids, currencies, and exchange
//! codes were filled in upstream by the allocation pipeline.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use rebal_broker::ConId;

use crate::error::{Error, Result};

/// The target allocation book produced by the allocation pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetBook {
    pub timestamp: DateTime<Utc>,
    pub rows: Vec<TargetRow>,
}

/// One target holding.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetRow {
    pub ticker: String,
    #[serde(default)]
    pub name: String,
    /// Broker contract id; rows without one are reported but never
    /// ordered.
    #[serde(default)]
    pub conid: Option<ConId>,
    #[serde(default)]
    pub currency: Option<String>,
    /// MIC of the primary exchange.
    #[serde(default)]
    pub exchange: Option<String>,
    /// Signed USD amount to hold: negative means short.
    pub dollar_allocation: f64,
    #[serde(default)]
    pub is_option: bool,
    /// Venue price-increment rule ids, when resolved upstream.
    #[serde(default)]
    pub market_rule_ids: Vec<i32>,
}

impl TargetRow {
    /// Contract multiplier: option contracts cover 100 shares.
    pub fn multiplier(&self) -> i64 {
        if self.is_option { 100 } else { 1 }
    }

    /// Normalized MIC code, empty when unknown.
    pub fn exchange_code(&self) -> String {
        self.exchange
            .as_deref()
            .map(|m| m.trim().to_uppercase())
            .unwrap_or_default()
    }
}

impl TargetBook {
    /// Load and validate a target.json file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::TargetRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let book: TargetBook = serde_json::from_str(&contents)?;
        book.validate()?;
        Ok(book)
    }

    /// Parse from a JSON string (useful for testing).
    pub fn from_json(json: &str) -> Result<Self> {
        let book: TargetBook = serde_json::from_str(json)?;
        book.validate()?;
        Ok(book)
    }

    /// Validate the book.
    fn validate(&self) -> Result<()> {
        if self.rows.is_empty() {
            return Err(Error::Target("rows list is empty".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for row in &self.rows {
            if row.ticker.trim().is_empty() {
                return Err(Error::Target("empty ticker".into()));
            }
            if let Some(cid) = row.conid {
                if cid <= 0 {
                    return Err(Error::Target(format!(
                        "conid for {} must be positive",
                        row.ticker
                    )));
                }
                if !seen.insert(cid) {
                    return Err(Error::Target(format!("duplicate conid: {cid}")));
                }
            }
            if !row.dollar_allocation.is_finite() {
                return Err(Error::Target(format!(
                    "dollar_allocation for {} is not finite",
                    row.ticker
                )));
            }
        }
        Ok(())
    }

    /// Resolved contract ids in row order.
    pub fn conids(&self) -> Vec<ConId> {
        self.rows.iter().filter_map(|r| r.conid).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_json() -> &'static str {
        r#"{
            "timestamp": "2026-02-08T15:30:00Z",
            "rows": [
                { "ticker": "AAPL", "name": "Apple Inc", "conid": 265598,
                  "currency": "USD", "exchange": "XNAS",
                  "dollar_allocation": 40000.0 },
                { "ticker": "SAP", "name": "SAP SE", "conid": 14204,
                  "currency": "EUR", "exchange": "XETR",
                  "dollar_allocation": 15000.0,
                  "market_rule_ids": [2806] },
                { "ticker": "SPY", "conid": 756733,
                  "currency": "USD", "exchange": "ARCX",
                  "dollar_allocation": -10000.0 }
            ]
        }"#
    }

    #[test]
    fn parse_valid_book() {
        let book = TargetBook::from_json(valid_json()).unwrap();
        assert_eq!(book.rows.len(), 3);
        assert_eq!(book.rows[0].conid, Some(265598));
        assert_eq!(book.rows[2].dollar_allocation, -10000.0);
        assert_eq!(book.conids(), vec![265598, 14204, 756733]);
    }

    #[test]
    fn option_multiplier() {
        let mut book = TargetBook::from_json(valid_json()).unwrap();
        assert_eq!(book.rows[0].multiplier(), 1);
        book.rows[0].is_option = true;
        assert_eq!(book.rows[0].multiplier(), 100);
    }

    #[test]
    fn exchange_code_normalized() {
        let book = TargetBook::from_json(valid_json()).unwrap();
        let mut row = book.rows[0].clone();
        row.exchange = Some(" xnas ".into());
        assert_eq!(row.exchange_code(), "XNAS");
        row.exchange = None;
        assert_eq!(row.exchange_code(), "");
    }

    #[test]
    fn unresolved_row_is_allowed() {
        let json = r#"{
            "timestamp": "2026-01-01T00:00:00Z",
            "rows": [
                { "ticker": "MYST", "dollar_allocation": 1000.0 }
            ]
        }"#;
        let book = TargetBook::from_json(json).unwrap();
        assert_eq!(book.rows[0].conid, None);
        assert!(book.conids().is_empty());
    }

    #[test]
    fn reject_empty_rows() {
        let json = r#"{"timestamp":"2026-01-01T00:00:00Z","rows":[]}"#;
        assert!(TargetBook::from_json(json).is_err());
    }

    #[test]
    fn reject_duplicate_conids() {
        let json = r#"{
            "timestamp": "2026-01-01T00:00:00Z",
            "rows": [
                { "ticker": "AAPL", "conid": 1, "dollar_allocation": 100.0 },
                { "ticker": "AAPL2", "conid": 1, "dollar_allocation": 100.0 }
            ]
        }"#;
        assert!(TargetBook::from_json(json).is_err());
    }

    #[test]
    fn reject_empty_ticker() {
        let json = r#"{
            "timestamp": "2026-01-01T00:00:00Z",
            "rows": [ { "ticker": " ", "dollar_allocation": 100.0 } ]
        }"#;
        assert!(TargetBook::from_json(json).is_err());
    }
}
