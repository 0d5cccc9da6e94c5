use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use codecs::LogRecord;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::StoreError;

/// A row of the `alerts` table, maintained by the dashboard.
#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct AlertRule {
    pub id: i32,
    pub name: String,
    /// Compared verbatim with the record severity name.
    pub severity: String,
    /// Case-sensitive substring of the message.
    pub query: String,
    pub is_active: bool,
}

impl AlertRule {
    pub fn matches(&self, record: &LogRecord) -> bool {
        self.is_active
            && self.severity == record.severity.as_str()
            && record.message.contains(&self.query)
    }
}

/// Payload published on the alert channel.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlertNotification {
    pub alert_id: i32,
    pub alert_name: String,
    pub severity: String,
    pub log_id: Uuid,
    pub triggered_at: DateTime<Utc>,
}

impl AlertNotification {
    pub fn new(rule: &AlertRule, record: &LogRecord) -> Self {
        Self {
            alert_id: rule.id,
            alert_name: rule.name.clone(),
            severity: rule.severity.clone(),
            log_id: record.id,
            triggered_at: Utc::now(),
        }
    }
}

/// Cached alert rules, reloaded at most once per refresh interval.
pub struct AlertRules {
    rules: RwLock<Arc<Vec<AlertRule>>>,

    refresh_interval: Duration,
    last_refresh: Mutex<Option<Instant>>,
}

impl AlertRules {
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            rules: RwLock::new(Arc::new(Vec::new())),
            refresh_interval,
            last_refresh: Mutex::new(None),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn replace(&self, rules: Vec<AlertRule>) {
        *self.rules.write() = Arc::new(rules);
    }

    /// Every active rule the record satisfies.
    pub fn matching(&self, record: &LogRecord) -> Vec<AlertRule> {
        let rules = Arc::clone(&self.rules.read());

        rules
            .iter()
            .filter(|rule| rule.matches(record))
            .cloned()
            .collect()
    }

    /// Calls `load` when the cache is older than the refresh interval. On
    /// failure the previous rules stay in effect until the next interval.
    pub async fn refresh_if_stale<F, Fut>(&self, load: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<AlertRule>, StoreError>>,
    {
        // another worker is loading already
        let Ok(mut last_refresh) = self.last_refresh.try_lock() else {
            return;
        };

        if let Some(at) = *last_refresh
            && at.elapsed() < self.refresh_interval
        {
            return;
        }

        match load().await {
            Ok(rules) => {
                debug!(message = "Alert rules loaded", count = rules.len());

                self.replace(rules);
            }
            Err(err) => {
                warn!(
                    message = "Load alert rules failed, keep using the previous ones",
                    %err
                );
            }
        }

        *last_refresh = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use codecs::Severity;

    use super::*;

    fn rule(id: i32, severity: &str, query: &str, is_active: bool) -> AlertRule {
        AlertRule {
            id,
            name: format!("rule-{id}"),
            severity: severity.to_string(),
            query: query.to_string(),
            is_active,
        }
    }

    #[test]
    fn matches() {
        let record = LogRecord::new("db1", "postgres", 3, Severity::Error, "disk full on /var");

        assert!(rule(1, "error", "disk full", true).matches(&record));
        assert!(rule(2, "error", "", true).matches(&record));
        assert!(!rule(3, "error", "disk full", false).matches(&record));
        assert!(!rule(4, "critical", "disk full", true).matches(&record));
        assert!(!rule(5, "error", "Disk Full", true).matches(&record));
        assert!(!rule(6, "ERROR", "disk full", true).matches(&record));
    }

    #[test]
    fn matching_returns_every_hit() {
        let rules = AlertRules::new(Duration::from_secs(30));
        rules.replace(vec![
            rule(1, "warning", "timeout", true),
            rule(2, "warning", "upstream", true),
            rule(3, "warning", "timeout", false),
            rule(4, "info", "timeout", true),
        ]);

        let record = LogRecord::new("lb", "haproxy", 1, Severity::Warning, "upstream timeout");
        let ids = rules
            .matching(&record)
            .into_iter()
            .map(|rule| rule.id)
            .collect::<Vec<_>>();

        assert_eq!(ids, [1, 2]);
    }

    #[test]
    fn notification_shape() {
        let record = LogRecord::new("h", "a", 1, Severity::Critical, "boom");
        let notification = AlertNotification::new(&rule(7, "critical", "boom", true), &record);

        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["alert_id"], 7);
        assert_eq!(value["alert_name"], "rule-7");
        assert_eq!(value["severity"], "critical");
        assert_eq!(value["log_id"], record.id.to_string());
        assert!(value["triggered_at"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_once_per_interval() {
        let rules = AlertRules::new(Duration::from_secs(30));
        let counter = AtomicUsize::new(0);
        let loads = &counter;
        let load = move || async move {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok::<_, StoreError>(vec![rule(1, "error", "x", true)])
        };

        rules.refresh_if_stale(load).await;
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(rules.len(), 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        rules.refresh_if_stale(load).await;
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(21)).await;
        rules.refresh_if_stale(load).await;
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_previous_rules() {
        let rules = AlertRules::new(Duration::from_secs(30));
        rules
            .refresh_if_stale(|| async { Ok::<_, StoreError>(vec![rule(1, "error", "x", true)]) })
            .await;

        tokio::time::advance(Duration::from_secs(31)).await;
        rules
            .refresh_if_stale(|| async {
                Err::<Vec<AlertRule>, _>(StoreError::Rejected(
                    "relation \"alerts\" does not exist".into(),
                ))
            })
            .await;

        assert_eq!(rules.len(), 1);
    }
}
