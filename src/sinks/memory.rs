use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use codecs::LogRecord;
use parking_lot::Mutex;

use super::{AlertNotification, AlertRule, PersistedRecord, Sink, StoreError};
use crate::stats::IngestStats;

/// Keeps everything in process memory.
///
/// Used when the database is disabled, and by tests to observe what the
/// dispatcher stores and publishes.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<PersistedRecord>>,
    notified: Mutex<Vec<PersistedRecord>>,
    alerts: Mutex<Vec<AlertNotification>>,
    rules: Vec<AlertRule>,
    retention: Option<usize>,

    store_calls: AtomicUsize,
    fail_next: AtomicUsize,
    closed: AtomicBool,

    stats: Option<Arc<IngestStats>>,
}

impl MemorySink {
    pub fn new(stats: Arc<IngestStats>) -> Self {
        Self {
            stats: Some(stats),
            ..Default::default()
        }
    }

    pub fn with_rules(mut self, rules: Vec<AlertRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Keeps only the newest `retention` stored records, older ones are
    /// forgotten. Published records are not kept at all.
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Makes the next `count` stores fail.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Number of `store` calls, failed ones included.
    pub fn store_calls(&self) -> usize {
        self.store_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stored records, in store order.
    pub fn records(&self) -> Vec<PersistedRecord> {
        self.records.lock().clone()
    }

    pub fn notified(&self) -> Vec<PersistedRecord> {
        self.notified.lock().clone()
    }

    pub fn alerts(&self) -> Vec<AlertNotification> {
        self.alerts.lock().clone()
    }

    fn take_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn store(&self, record: &LogRecord) -> Result<PersistedRecord, StoreError> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);

        if self.is_closed() {
            return Err(StoreError::Closed);
        }

        if self.take_failure() {
            return Err(StoreError::Rejected("injected failure".to_string()));
        }

        let persisted = PersistedRecord {
            record: record.clone(),
            received_at: Utc::now(),
        };
        let mut records = self.records.lock();
        records.push(persisted.clone());
        if let Some(retention) = self.retention
            && records.len() > retention
        {
            let excess = records.len() - retention;
            records.drain(..excess);
        }
        drop(records);

        Ok(persisted)
    }

    async fn notify(&self, record: &PersistedRecord) {
        debug!(
            message = "Record stored",
            id = %record.record.id,
            host = %record.record.host,
            app = %record.record.app,
            severity = %record.record.severity,
        );

        if self.retention.is_none() {
            self.notified.lock().push(record.clone());
        }

        for rule in self.rules.iter().filter(|rule| rule.matches(&record.record)) {
            info!(
                message = "Alert triggered",
                alert_id = rule.id,
                alert_name = %rule.name,
                log_id = %record.record.id,
            );

            if let Some(stats) = &self.stats {
                stats.alert_triggered();
            }
            self.alerts
                .lock()
                .push(AlertNotification::new(rule, &record.record));
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use codecs::Severity;

    use super::*;

    #[tokio::test]
    async fn injected_failures() {
        let sink = MemorySink::default();
        sink.fail_next(2);

        let record = LogRecord::new("h", "a", 1, Severity::Info, "m");
        assert!(sink.store(&record).await.is_err());
        assert!(sink.store(&record).await.is_err());
        let persisted = sink.store(&record).await.unwrap();

        assert_eq!(persisted.record, record);
        assert_eq!(sink.store_calls(), 3);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn notify_evaluates_rules() {
        let stats = Arc::new(IngestStats::default());
        let sink = MemorySink::new(Arc::clone(&stats)).with_rules(vec![AlertRule {
            id: 3,
            name: "oom".to_string(),
            severity: "critical".to_string(),
            query: "Out of memory".to_string(),
            is_active: true,
        }]);

        for message in ["Out of memory: killed process 42", "all good"] {
            let record = LogRecord::new("h", "kernel", 0, Severity::Critical, message);
            let persisted = sink.store(&record).await.unwrap();
            sink.notify(&persisted).await;
        }

        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_id, 3);
        assert_eq!(alerts[0].log_id, sink.records()[0].record.id);
        assert_eq!(sink.notified().len(), 2);
        assert_eq!(stats.snapshot().alerts_triggered, 1);
    }

    #[tokio::test]
    async fn retention_keeps_newest() {
        let sink = MemorySink::default().with_retention(2);

        for message in ["one", "two", "three"] {
            let record = LogRecord::new("h", "a", 1, Severity::Info, message);
            let persisted = sink.store(&record).await.unwrap();
            sink.notify(&persisted).await;
        }

        let messages = sink
            .records()
            .into_iter()
            .map(|persisted| persisted.record.message)
            .collect::<Vec<_>>();
        assert_eq!(messages, ["two", "three"]);
        assert_eq!(sink.store_calls(), 3);
        assert!(sink.notified().is_empty());
    }

    #[tokio::test]
    async fn closed_rejects() {
        let sink = MemorySink::default();
        sink.close().await;

        let record = LogRecord::new("h", "a", 1, Severity::Info, "m");
        assert!(matches!(
            sink.store(&record).await,
            Err(StoreError::Closed)
        ));
    }
}
