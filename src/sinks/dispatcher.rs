//! Moves normalized records from the listeners to the sink.
//!
//! Records are spread over a fixed set of workers, each one owning a bounded
//! queue. A TCP connection sticks to one worker for its whole life, so its
//! records are stored in the order they were received. UDP peers are spread
//! by address.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use backoff::ExponentialBackoff;
use codecs::LogRecord;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use super::Sink;
use crate::config::{DispatcherConfig, WhenFull};
use crate::stats::IngestStats;

const RETRY_BASE_MILLIS: u64 = 2;
const RETRY_FACTOR: u64 = 50;
const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatcher is closed")]
    Closed,
}

/// Cheap to clone, every listener and connection holds one.
#[derive(Clone)]
pub struct Dispatcher {
    shards: Arc<[mpsc::Sender<LogRecord>]>,
    when_full: WhenFull,
    next_key: Arc<AtomicU64>,
    stats: Arc<IngestStats>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("shards", &self.shards.len())
            .field("when_full", &self.when_full)
            .finish()
    }
}

impl Dispatcher {
    /// Spawns the workers, they run until every `Dispatcher` clone is dropped
    /// and their queues are empty.
    pub fn start(
        config: &DispatcherConfig,
        sink: Arc<dyn Sink>,
        stats: Arc<IngestStats>,
    ) -> (Dispatcher, Workers) {
        let workers = config.workers.max(1);
        let capacity = config.shard_capacity();

        let (shards, handles): (Vec<_>, Vec<_>) = (0..workers)
            .map(|id| {
                let (tx, rx) = mpsc::channel(capacity);
                let worker = Worker {
                    id,
                    rx,
                    sink: Arc::clone(&sink),
                    stats: Arc::clone(&stats),
                    max_retries: config.max_retries,
                };

                (tx, tokio::spawn(worker.run()))
            })
            .unzip();

        debug!(message = "Dispatcher started", workers, capacity);

        let dispatcher = Dispatcher {
            shards: shards.into(),
            when_full: config.when_full,
            next_key: Arc::new(AtomicU64::new(0)),
            stats,
        };

        (dispatcher, Workers { handles })
    }

    /// A key for a new TCP connection, used for all its records.
    #[inline]
    pub fn allocate_key(&self) -> u64 {
        self.next_key.fetch_add(1, Ordering::Relaxed)
    }

    /// Datagrams from the same peer share a worker.
    pub fn key_for_peer(peer: &SocketAddr) -> u64 {
        let mut hasher = DefaultHasher::new();
        peer.hash(&mut hasher);
        hasher.finish()
    }

    /// Queues the record on the worker picked by `key`.
    ///
    /// Depending on `when_full` this waits for free space, or drops the record
    /// and returns immediately.
    pub async fn dispatch(&self, record: LogRecord, key: u64) -> Result<(), DispatchError> {
        let shard = &self.shards[(key % self.shards.len() as u64) as usize];

        match self.when_full {
            WhenFull::Block => shard.send(record).await.map_err(|_| DispatchError::Closed),
            WhenFull::DropNewest => match shard.try_send(record) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(record)) => {
                    self.stats.record_dropped();

                    warn!(
                        message = "Dispatcher queue is full, dropping record",
                        id = %record.id,
                        host = %record.host,
                        app = %record.app,
                    );

                    Ok(())
                }
                Err(TrySendError::Closed(_)) => Err(DispatchError::Closed),
            },
        }
    }
}

/// Handles of the spawned workers.
pub struct Workers {
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    /// Waits for the workers to drain their queues. Returns false when the
    /// deadline passed first, the remaining records are dropped.
    ///
    /// Every `Dispatcher` should be dropped before calling this, otherwise
    /// the workers only stop at the deadline.
    pub async fn shutdown(self, timeout: Duration) -> bool {
        let mut handles = self.handles;
        let drained = tokio::time::timeout(timeout, async {
            for handle in handles.iter_mut() {
                if let Err(err) = handle.await
                    && err.is_panic()
                {
                    error!(message = "Dispatcher worker panicked", %err);
                }
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(
                message = "Dispatcher did not drain before the deadline, dropping queued records",
                ?timeout
            );

            handles.iter().for_each(JoinHandle::abort);
        }

        drained
    }
}

struct Worker {
    id: usize,
    rx: mpsc::Receiver<LogRecord>,
    sink: Arc<dyn Sink>,
    stats: Arc<IngestStats>,
    max_retries: usize,
}

impl Worker {
    async fn run(mut self) {
        while let Some(record) = self.rx.recv().await {
            self.deliver(record).await;
        }

        debug!(message = "Dispatcher worker finished", worker = self.id);
    }

    /// Stores the record, retrying with backoff, then publishes it.
    async fn deliver(&self, record: LogRecord) {
        let mut backoff = ExponentialBackoff::from_millis(RETRY_BASE_MILLIS)
            .factor(RETRY_FACTOR)
            .max_delay(RETRY_MAX_DELAY)
            .max_retries(self.max_retries);

        let persisted = loop {
            match self.sink.store(&record).await {
                Ok(persisted) => break persisted,
                Err(err) => match backoff.next_delay() {
                    Some(delay) => {
                        self.stats.store_retried();

                        warn!(
                            message = "Store record failed, retrying",
                            id = %record.id,
                            attempt = backoff.attempts(),
                            ?delay,
                            %err,
                        );

                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        self.stats.store_failed();

                        error!(
                            message = "Store record failed, dropping it",
                            id = %record.id,
                            host = %record.host,
                            app = %record.app,
                            severity = %record.severity,
                            %err,
                        );

                        return;
                    }
                },
            }
        };

        self.stats.record_stored();
        self.sink.notify(&persisted).await;
    }
}
