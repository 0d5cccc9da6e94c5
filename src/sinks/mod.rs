mod alert;
mod dispatcher;
mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codecs::LogRecord;

pub use alert::{AlertNotification, AlertRule, AlertRules};
pub use dispatcher::{DispatchError, Dispatcher, Workers};
pub use memory::MemorySink;
pub use postgres::PostgresSink;

/// Channel carrying every stored record.
pub const LOG_CHANNEL: &str = "new_log";

/// Channel carrying alert rule matches.
pub const ALERT_CHANNEL: &str = "new_alert";

/// A record as it was written to the store.
#[derive(Clone, Debug, PartialEq)]
pub struct PersistedRecord {
    pub record: LogRecord,

    /// Assigned by the store.
    pub received_at: DateTime<Utc>,
}

impl PersistedRecord {
    /// The JSON published on `new_log`: `id`, `ts`, `host`, `app`,
    /// `facility`, `severity` and `msg`, nothing else.
    pub fn payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.record)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error, {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialize record failed, {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("sink is closed")]
    Closed,

    #[error("{0}")]
    Rejected(String),
}

/// Durable storage of log records, plus the change notifications that
/// follow a successful write.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Writes the record, all or nothing. No notification is sent.
    async fn store(&self, record: &LogRecord) -> Result<PersistedRecord, StoreError>;

    /// Publishes the persisted record, and the alert rules it matches.
    ///
    /// Delivery is best-effort, failures are logged and never undo the store.
    async fn notify(&self, record: &PersistedRecord);

    /// Releases connections, nothing can be stored afterwards.
    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use codecs::normalize;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn log_payload_has_the_dashboard_shape() {
        let record = normalize(
            br#"<165>1 2023-05-14T12:00:00Z host1 appX 123 ID47 [exampleSDID@32473 iut="3"] test message"#,
        );
        assert!(record.structured_data.is_some());

        let persisted = PersistedRecord {
            record,
            received_at: Utc::now(),
        };
        let payload = persisted.payload().unwrap();
        let value = serde_json::from_str::<serde_json::Value>(&payload).unwrap();

        let mut keys = value.as_object().unwrap().keys().cloned().collect::<Vec<_>>();
        keys.sort();
        assert_eq!(
            keys,
            ["app", "facility", "host", "id", "msg", "severity", "ts"]
        );
        assert_eq!(value["id"], persisted.record.id.to_string());
        assert_eq!(value["host"], "host1");
        assert_eq!(value["facility"], 20);
        assert_eq!(value["severity"], "notice");
        assert_eq!(value["msg"], "test message");
    }
}
