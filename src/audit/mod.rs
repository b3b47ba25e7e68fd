//! Append-only audit trail for payment processing.
//!
//! Entries land in a bounded in-process ring buffer, are echoed to tracing,
//! and are forwarded to a durable [`AuditSink`] collaborator. The buffer is
//! instance-local and exists for fast operational queries; the sink is the
//! source of truth for audits spanning more than one instance. Error and
//! Critical entries additionally fire the [`SecurityAlertHook`]
//! (rate limiting is the hook implementor's concern).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::gateway::taxonomy::Severity;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AuditLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditLevel::Info => "info",
            AuditLevel::Warning => "warning",
            AuditLevel::Error => "error",
            AuditLevel::Critical => "critical",
        }
    }
}

impl From<Severity> for AuditLevel {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Info => AuditLevel::Info,
            Severity::Warning => AuditLevel::Warning,
            Severity::Error => AuditLevel::Error,
            Severity::Critical => AuditLevel::Critical,
        }
    }
}

/// One immutable audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: AuditLevel,
    pub event: String,
    pub payment_id: Option<String>,
    pub transaction_id: Option<String>,
    pub user_id: Option<String>,
    pub amount: Option<Decimal>,
    pub status: Option<String>,
    pub metadata: JsonValue,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// Correlation and provenance details attached to an audit event.
#[derive(Debug, Clone, Default)]
pub struct AuditDetails {
    pub payment_id: Option<String>,
    pub transaction_id: Option<String>,
    pub user_id: Option<String>,
    pub amount: Option<Decimal>,
    pub status: Option<String>,
    pub metadata: Option<JsonValue>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl AuditDetails {
    pub fn for_payment(payment_id: impl Into<String>) -> Self {
        Self {
            payment_id: Some(payment_id.into()),
            ..Default::default()
        }
    }
}

/// Durable destination for audit entries. Cross-instance audits read from
/// here, not from the in-process buffer.
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: &AuditLogEntry);

    /// Called on teardown once the buffer has been drained.
    fn flush(&self) {}
}

/// Hook invoked for Error/Critical entries.
pub trait SecurityAlertHook: Send + Sync {
    fn raise(&self, entry: &AuditLogEntry);
}

/// Sink that relies on the tracing echo alone. Suitable for tests and for
/// deployments shipping logs through the tracing pipeline.
pub struct NullSink;

impl AuditSink for NullSink {
    fn append(&self, _entry: &AuditLogEntry) {}
}

pub struct NullAlertHook;

impl SecurityAlertHook for NullAlertHook {
    fn raise(&self, _entry: &AuditLogEntry) {}
}

/// Aggregated view of a date window, computed over the local buffer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditReport {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub total_transactions: u64,
    pub successes: u64,
    pub failures: u64,
    pub security_incidents: u64,
    pub average_amount: Option<Decimal>,
}

pub struct AuditLog {
    capacity: usize,
    buffer: RwLock<VecDeque<AuditLogEntry>>,
    sink: Arc<dyn AuditSink>,
    alert_hook: Arc<dyn SecurityAlertHook>,
}

impl AuditLog {
    pub fn new(
        capacity: usize,
        sink: Arc<dyn AuditSink>,
        alert_hook: Arc<dyn SecurityAlertHook>,
    ) -> Self {
        // A zero-capacity ring would never evict; a single slot is the floor.
        let capacity = capacity.max(1);
        Self {
            capacity,
            buffer: RwLock::new(VecDeque::with_capacity(capacity)),
            sink,
            alert_hook,
        }
    }

    /// Append an entry, echo it to tracing, forward it to the sink, and
    /// raise the alert hook for Error/Critical levels.
    pub fn log(&self, level: AuditLevel, event: &str, details: AuditDetails) -> AuditLogEntry {
        let entry = AuditLogEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level,
            event: event.to_string(),
            payment_id: details.payment_id,
            transaction_id: details.transaction_id,
            user_id: details.user_id,
            amount: details.amount,
            status: details.status,
            metadata: details.metadata.unwrap_or(JsonValue::Null),
            ip_address: details.ip_address,
            user_agent: details.user_agent,
            error_code: details.error_code,
            error_message: details.error_message,
        };

        match level {
            AuditLevel::Info => info!(
                event = %entry.event,
                payment_id = entry.payment_id.as_deref().unwrap_or("-"),
                transaction_id = entry.transaction_id.as_deref().unwrap_or("-"),
                "audit"
            ),
            AuditLevel::Warning => warn!(
                event = %entry.event,
                payment_id = entry.payment_id.as_deref().unwrap_or("-"),
                transaction_id = entry.transaction_id.as_deref().unwrap_or("-"),
                "audit"
            ),
            AuditLevel::Error | AuditLevel::Critical => error!(
                event = %entry.event,
                level = entry.level.as_str(),
                payment_id = entry.payment_id.as_deref().unwrap_or("-"),
                transaction_id = entry.transaction_id.as_deref().unwrap_or("-"),
                error_code = entry.error_code.as_deref().unwrap_or("-"),
                "audit"
            ),
        }

        self.sink.append(&entry);

        if level >= AuditLevel::Error {
            self.alert_hook.raise(&entry);
        }

        let mut buffer = self.buffer.write().expect("audit buffer lock poisoned");
        while buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(entry.clone());

        entry
    }

    /// The most recent `n` entries, newest first.
    pub fn recent(&self, n: usize) -> Vec<AuditLogEntry> {
        let buffer = self.buffer.read().expect("audit buffer lock poisoned");
        buffer.iter().rev().take(n).cloned().collect()
    }

    pub fn for_payment(&self, payment_id: &str) -> Vec<AuditLogEntry> {
        let buffer = self.buffer.read().expect("audit buffer lock poisoned");
        buffer
            .iter()
            .filter(|e| e.payment_id.as_deref() == Some(payment_id))
            .cloned()
            .collect()
    }

    pub fn errors_since(&self, since: DateTime<Utc>) -> Vec<AuditLogEntry> {
        let buffer = self.buffer.read().expect("audit buffer lock poisoned");
        buffer
            .iter()
            .filter(|e| e.level >= AuditLevel::Error && e.timestamp >= since)
            .cloned()
            .collect()
    }

    /// Aggregate the window `[start, end]` over the local buffer.
    pub fn report(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> AuditReport {
        let buffer = self.buffer.read().expect("audit buffer lock poisoned");
        let in_window: Vec<&AuditLogEntry> = buffer
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .collect();

        let amounts: Vec<Decimal> = in_window.iter().filter_map(|e| e.amount).collect();
        let total_transactions = amounts.len() as u64;
        let average_amount = if amounts.is_empty() {
            None
        } else {
            Some(amounts.iter().copied().sum::<Decimal>() / Decimal::from(amounts.len() as u64))
        };

        AuditReport {
            start,
            end,
            total_transactions,
            successes: in_window
                .iter()
                .filter(|e| e.status.as_deref() == Some("succeeded"))
                .count() as u64,
            failures: in_window
                .iter()
                .filter(|e| e.status.as_deref() == Some("failed"))
                .count() as u64,
            security_incidents: in_window
                .iter()
                .filter(|e| e.level == AuditLevel::Critical)
                .count() as u64,
            average_amount,
        }
    }

    /// CSV export of the window, timestamp plus metric columns.
    pub fn export_csv(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
        let buffer = self.buffer.read().expect("audit buffer lock poisoned");
        let mut out = String::from(
            "timestamp,level,event,payment_id,transaction_id,user_id,amount,status,error_code\n",
        );
        for entry in buffer
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
        {
            out.push_str(&format!(
                "{},{},{},{},{},{},{},{},{}\n",
                entry.timestamp.to_rfc3339(),
                entry.level.as_str(),
                csv_field(&entry.event),
                csv_field(entry.payment_id.as_deref().unwrap_or("")),
                csv_field(entry.transaction_id.as_deref().unwrap_or("")),
                csv_field(entry.user_id.as_deref().unwrap_or("")),
                entry
                    .amount
                    .map(|a| a.to_string())
                    .unwrap_or_default(),
                csv_field(entry.status.as_deref().unwrap_or("")),
                csv_field(entry.error_code.as_deref().unwrap_or("")),
            ));
        }
        out
    }

    /// Teardown: drain the buffer and flush the sink. Entries were already
    /// forwarded on append, so this only signals end-of-stream.
    pub fn flush(&self) {
        self.buffer
            .write()
            .expect("audit buffer lock poisoned")
            .clear();
        self.sink.flush();
    }
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
