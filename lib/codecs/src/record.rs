use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The facility used when a message carries no usable priority.
pub const DEFAULT_FACILITY: u32 = 1;

/// Host and app placeholder when the message does not name them.
pub const UNKNOWN: &str = "unknown";

/// Syslog severity, ordered from the most urgent to the least.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// System is unusable.
    Emergency,
    /// Action must be taken immediately.
    Alert,
    /// Critical conditions.
    Critical,
    /// Error conditions.
    Error,
    /// Warning conditions.
    Warning,
    /// Normal but significant condition.
    Notice,
    /// Informational messages.
    Info,
    /// Debug-level messages.
    Debug,
}

impl Severity {
    /// Every severity, indexed by its syslog code.
    pub const ALL: [Severity; 8] = [
        Severity::Emergency,
        Severity::Alert,
        Severity::Critical,
        Severity::Error,
        Severity::Warning,
        Severity::Notice,
        Severity::Info,
        Severity::Debug,
    ];

    /// Looks up the severity for a syslog code. Only the lowest three bits
    /// are significant, so any value maps to a valid entry.
    #[inline]
    pub const fn from_code(code: u32) -> Self {
        Self::ALL[(code & 0x07) as usize]
    }

    /// The syslog code of this severity, 0 for emergency up to 7 for debug.
    #[inline]
    pub const fn code(&self) -> u8 {
        *self as u8
    }

    /// Name as stored and sent to the dashboard.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Severity::Emergency => "emergency",
            Severity::Alert => "alert",
            Severity::Critical => "critical",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Notice => "notice",
            Severity::Info => "info",
            Severity::Debug => "debug",
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names none of the eight severities.
#[derive(Debug, thiserror::Error)]
#[error("unknown severity \"{0}\"")]
pub struct ParseSeverityError(String);

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::ALL
            .into_iter()
            .find(|severity| severity.as_str() == s)
            .ok_or_else(|| ParseSeverityError(s.to_owned()))
    }
}

/// The canonical unit produced by ingestion.
///
/// A record is built once per inbound message and never mutated afterwards.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct LogRecord {
    /// Unique for the lifetime of the process and of the store.
    pub id: Uuid,

    /// When the message was received, the embedded header time is never used.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// Originating host, `unknown` when it cannot be parsed.
    pub host: String,

    /// Originating application, `unknown` when it cannot be parsed.
    pub app: String,

    /// `priority / 8`.
    pub facility: u32,

    /// `priority % 8`, by name.
    pub severity: Severity,

    /// Free text payload.
    #[serde(rename = "msg")]
    pub message: String,

    /// The raw RFC5424 structured-data block, kept opaque. It is neither
    /// stored nor published.
    #[serde(skip)]
    pub structured_data: Option<String>,
}

impl LogRecord {
    /// Creates a record with a fresh id, stamped with the current time.
    pub fn new(
        host: impl Into<String>,
        app: impl Into<String>,
        facility: u32,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            host: host.into(),
            app: app.into(),
            facility,
            severity,
            message: message.into(),
            structured_data: None,
        }
    }
}
