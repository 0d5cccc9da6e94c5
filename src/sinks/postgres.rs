use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codecs::LogRecord;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use super::{
    ALERT_CHANNEL, AlertNotification, AlertRule, AlertRules, LOG_CHANNEL, PersistedRecord, Sink,
    StoreError,
};
use crate::config::DatabaseConfig;
use crate::stats::IngestStats;

const CREATE_LOGS_TABLE: &str = "CREATE TABLE IF NOT EXISTS logs (
    id UUID PRIMARY KEY,
    ts TIMESTAMPTZ NOT NULL,
    host TEXT NOT NULL,
    app TEXT NOT NULL,
    severity TEXT NOT NULL,
    msg TEXT NOT NULL
)";

// the dashboard created the table before facility was stored
const ADD_FACILITY_COLUMN: &str = "ALTER TABLE logs ADD COLUMN IF NOT EXISTS facility INTEGER";

const INSERT_LOG: &str = "INSERT INTO logs (id, ts, host, app, facility, severity, msg)
VALUES ($1, $2, $3, $4, $5, $6, $7)
RETURNING NOW()";

const SELECT_ALERTS: &str =
    "SELECT id, name, severity, query, is_active FROM alerts WHERE is_active = TRUE";

const TOUCH_ALERT: &str = "UPDATE alerts SET last_triggered = NOW() WHERE id = $1";

const NOTIFY: &str = "SELECT pg_notify($1, $2)";

/// Writes records to the `logs` table and publishes them with
/// `LISTEN/NOTIFY`.
pub struct PostgresSink {
    pool: PgPool,
    rules: AlertRules,
    stats: Arc<IngestStats>,
}

impl PostgresSink {
    /// Builds the pool and checks the database once.
    ///
    /// The service starts even if the database is unreachable, stores fail
    /// and are retried until it comes back.
    pub async fn connect(config: &DatabaseConfig, stats: Arc<IngestStats>) -> Self {
        let options = connect_options(config);
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_lazy_with(options);

        match sqlx::query_scalar::<_, DateTime<Utc>>("SELECT NOW()")
            .fetch_one(&pool)
            .await
        {
            Ok(now) => info!(
                message = "Connected to database",
                host = %config.host,
                port = config.port,
                database = %config.name,
                %now,
            ),
            Err(err) => warn!(
                message = "Database is not reachable, stores will be retried",
                host = %config.host,
                port = config.port,
                database = %config.name,
                %err,
            ),
        }

        if let Err(err) = ensure_schema(&pool).await {
            warn!(message = "Prepare logs table failed", %err);
        }

        let sink = PostgresSink {
            pool,
            rules: AlertRules::new(config.alert_refresh_interval),
            stats,
        };
        sink.rules.refresh_if_stale(|| load_rules(&sink.pool)).await;

        sink
    }

    async fn publish(&self, channel: &'static str, payload: String) {
        if let Err(err) = sqlx::query(NOTIFY)
            .bind(channel)
            .bind(payload)
            .execute(&self.pool)
            .await
        {
            warn!(message = "Publish notification failed", channel, %err);
        }
    }

    async fn trigger(&self, rule: &AlertRule, record: &LogRecord) {
        self.stats.alert_triggered();

        info!(
            message = "Alert triggered",
            alert_id = rule.id,
            alert_name = %rule.name,
            log_id = %record.id,
        );

        if let Err(err) = sqlx::query(TOUCH_ALERT)
            .bind(rule.id)
            .execute(&self.pool)
            .await
        {
            warn!(message = "Update alert trigger time failed", alert_id = rule.id, %err);
        }

        match serde_json::to_string(&AlertNotification::new(rule, record)) {
            Ok(payload) => self.publish(ALERT_CHANNEL, payload).await,
            Err(err) => warn!(message = "Encode alert notification failed", %err),
        }
    }
}

fn connect_options(config: &DatabaseConfig) -> PgConnectOptions {
    let options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .database(&config.name)
        .application_name("logforge");

    match &config.password {
        Some(password) => options.password(password),
        None => options,
    }
}

async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query(CREATE_LOGS_TABLE).execute(pool).await?;
    sqlx::query(ADD_FACILITY_COLUMN).execute(pool).await?;

    Ok(())
}

async fn load_rules(pool: &PgPool) -> Result<Vec<AlertRule>, StoreError> {
    let rules = sqlx::query_as::<_, AlertRule>(SELECT_ALERTS)
        .fetch_all(pool)
        .await?;

    Ok(rules)
}

#[async_trait]
impl Sink for PostgresSink {
    async fn store(&self, record: &LogRecord) -> Result<PersistedRecord, StoreError> {
        let facility = i32::try_from(record.facility).unwrap_or(i32::MAX);

        let received_at = sqlx::query_scalar::<_, DateTime<Utc>>(INSERT_LOG)
            .bind(record.id)
            .bind(record.timestamp)
            .bind(&record.host)
            .bind(&record.app)
            .bind(facility)
            .bind(record.severity.as_str())
            .bind(&record.message)
            .fetch_one(&self.pool)
            .await?;

        Ok(PersistedRecord {
            record: record.clone(),
            received_at,
        })
    }

    async fn notify(&self, record: &PersistedRecord) {
        match record.payload() {
            Ok(payload) => self.publish(LOG_CHANNEL, payload).await,
            Err(err) => warn!(message = "Encode record failed", id = %record.record.id, %err),
        }

        self.rules.refresh_if_stale(|| load_rules(&self.pool)).await;
        for rule in self.rules.matching(&record.record) {
            self.trigger(&rule, &record.record).await;
        }
    }

    async fn close(&self) {
        self.pool.close().await;

        info!(message = "Database pool closed");
    }
}

#[cfg(all(test, feature = "postgres-integration-tests"))]
mod integration_tests {
    use std::time::Duration;

    use codecs::{Severity, normalize};
    use sqlx::postgres::PgListener;

    use super::*;
    use crate::config::Config;

    const CREATE_ALERTS_TABLE: &str = "CREATE TABLE IF NOT EXISTS alerts (
    id SERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    severity TEXT NOT NULL,
    query TEXT NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    last_triggered TIMESTAMPTZ
)";

    // The database comes from DB_HOST, DB_PORT, DB_USER, DB_PASSWORD and DB_NAME
    async fn setup() -> (DatabaseConfig, PgPool) {
        let config = Config::load(None).unwrap().database;
        let pool = PgPool::connect_with(connect_options(&config)).await.unwrap();
        sqlx::query(CREATE_ALERTS_TABLE)
            .execute(&pool)
            .await
            .unwrap();

        (config, pool)
    }

    async fn next_payload(listener: &mut PgListener, channel: &str, id: &str) -> serde_json::Value {
        loop {
            let notification = tokio::time::timeout(Duration::from_secs(5), listener.recv())
                .await
                .unwrap()
                .unwrap();
            if notification.channel() != channel {
                continue;
            }

            let value = serde_json::from_str::<serde_json::Value>(notification.payload()).unwrap();
            let matched = match channel {
                LOG_CHANNEL => value["id"] == id,
                _ => value["log_id"] == id,
            };
            if matched {
                return value;
            }
        }
    }

    #[tokio::test]
    async fn store_notify_and_alert() {
        let (config, pool) = setup().await;

        let token = uuid::Uuid::new_v4().simple().to_string();
        let alert_id = sqlx::query_scalar::<_, i32>(
            "INSERT INTO alerts (name, severity, query, is_active) VALUES ($1, 'error', $2, TRUE) RETURNING id",
        )
        .bind(format!("disk-{token}"))
        .bind(&token)
        .fetch_one(&pool)
        .await
        .unwrap();

        let mut listener = PgListener::connect_with(&pool).await.unwrap();
        listener
            .listen_all([LOG_CHANNEL, ALERT_CHANNEL])
            .await
            .unwrap();

        let stats = Arc::new(IngestStats::default());
        let sink = PostgresSink::connect(&config, Arc::clone(&stats)).await;

        let raw = format!("<11>Feb 10 12:43:05 db1 postgres[7]: {token} disk full");
        let record = normalize(raw.as_bytes());
        assert_eq!(record.severity, Severity::Error);

        let persisted = sink.store(&record).await.unwrap();
        assert_eq!(persisted.record, record);

        let (host, app, facility, severity, msg) =
            sqlx::query_as::<_, (String, String, i32, String, String)>(
                "SELECT host, app, facility, severity, msg FROM logs WHERE id = $1",
            )
            .bind(record.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(host, "db1");
        assert_eq!(app, "postgres");
        assert_eq!(facility, 1);
        assert_eq!(severity, "error");
        assert_eq!(msg, format!("{token} disk full"));

        sink.notify(&persisted).await;

        let id = record.id.to_string();
        let log = next_payload(&mut listener, LOG_CHANNEL, &id).await;
        assert_eq!(log.as_object().unwrap().len(), 7);
        assert_eq!(log["host"], "db1");
        assert_eq!(log["severity"], "error");

        let alert = next_payload(&mut listener, ALERT_CHANNEL, &id).await;
        assert_eq!(alert["alert_id"], alert_id);
        assert_eq!(alert["alert_name"], format!("disk-{token}"));
        assert_eq!(stats.snapshot().alerts_triggered, 1);

        let last_triggered = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "SELECT last_triggered FROM alerts WHERE id = $1",
        )
        .bind(alert_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(last_triggered.is_some());

        sqlx::query("DELETE FROM alerts WHERE id = $1")
            .bind(alert_id)
            .execute(&pool)
            .await
            .unwrap();

        sink.close().await;
        assert!(sink.store(&normalize(b"<14>after close")).await.is_err());
    }

    #[tokio::test]
    async fn schema_is_ensured_on_connect() {
        let (config, pool) = setup().await;
        let sink = PostgresSink::connect(&config, Arc::new(IngestStats::default())).await;

        let columns = sqlx::query_scalar::<_, String>(
            "SELECT column_name::TEXT FROM information_schema.columns WHERE table_name = 'logs' ORDER BY column_name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        for column in ["app", "facility", "host", "id", "msg", "severity", "ts"] {
            assert!(columns.iter().any(|c| c == column), "{column} in {columns:?}");
        }

        // running it again is harmless
        ensure_schema(&sink.pool).await.unwrap();
        sink.close().await;
    }
}
