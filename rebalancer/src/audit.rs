//! JSONL audit trail logging.
//!
//! Each run appends events to an audit.jsonl file, one JSON object per
//! line, so every cancel and placement decision survives the session.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::execution::Placement;
use crate::reconcile::ReconciledRow;

/// An audit event written to the JSONL trail.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event: &'static str,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub data: serde_json::Value,
}

/// Append-only audit logger.
pub struct AuditLog {
    writer: BufWriter<std::fs::File>,
}

impl AuditLog {
    /// Open (or create) the audit log file for appending.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Log an event with arbitrary JSON data.
    pub fn log(&mut self, event: &'static str, data: serde_json::Value) -> Result<()> {
        let entry = AuditEvent {
            event,
            ts: Utc::now(),
            data,
        };
        let json = serde_json::to_string(&entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(self.writer, "{json}")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Log a simple event with no additional data.
    pub fn log_simple(&mut self, event: &'static str) -> Result<()> {
        self.log(event, serde_json::json!({}))
    }
}

/// Convenience: log a run start event.
pub fn log_run_started(audit: &mut AuditLog, target_file: &str, account_id: &str) -> Result<()> {
    audit.log(
        "run_started",
        serde_json::json!({
            "target_file": target_file,
            "account": account_id,
        }),
    )
}

/// Convenience: log the reconciled row set.
pub fn log_rows_reconciled(audit: &mut AuditLog, rows: &[ReconciledRow]) -> Result<()> {
    let row_data: Vec<_> = rows
        .iter()
        .map(|r| {
            serde_json::json!({
                "ticker": r.ticker,
                "conid": r.conid,
                "exchange": r.exchange,
                "target_qty": r.target_qty,
                "existing_qty": r.existing_qty,
                "pending_qty": r.pending_qty,
                "net_quantity": r.net_quantity,
                "cancelled_orders": r.cancelled_orders,
                "skip_reason": r.skip_reason.as_ref().map(|s| s.to_string()),
            })
        })
        .collect();
    audit.log("rows_reconciled", serde_json::json!({ "rows": row_data }))
}

/// Convenience: log an order cancellation.
pub fn log_order_cancelled(audit: &mut AuditLog, order_id: i64, ticker: &str) -> Result<()> {
    audit.log(
        "order_cancelled",
        serde_json::json!({
            "order_id": order_id,
            "ticker": ticker,
        }),
    )
}

/// Convenience: log a placement.
pub fn log_order_placed(audit: &mut AuditLog, placement: &Placement) -> Result<()> {
    audit.log(
        "order_placed",
        serde_json::json!({
            "ticker": placement.ticker,
            "conid": placement.conid,
            "side": placement.side.to_string(),
            "quantity": placement.quantity,
            "limit_price": placement.limit_price,
            "order_id": placement.order_id,
        }),
    )
}

/// Convenience: log a deferred large order.
pub fn log_order_deferred(
    audit: &mut AuditLog,
    ticker: &str,
    usd_notional: f64,
    ceiling: f64,
) -> Result<()> {
    audit.log(
        "order_deferred",
        serde_json::json!({
            "ticker": ticker,
            "usd_notional": usd_notional,
            "ceiling": ceiling,
        }),
    )
}

/// Convenience: log run completion.
pub fn log_run_completed(
    audit: &mut AuditLog,
    placed: usize,
    cancelled: u32,
    quit_early: bool,
) -> Result<()> {
    audit.log(
        "run_completed",
        serde_json::json!({
            "orders_placed": placed,
            "orders_cancelled": cancelled,
            "quit_early": quit_early,
        }),
    )
}
