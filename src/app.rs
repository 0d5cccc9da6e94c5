use std::sync::Arc;
use std::time::Duration;

use exitcode::ExitCode;
use futures::{Stream, StreamExt};
use tokio::task::{JoinHandle, JoinSet};
use tripwire::Trigger;

use crate::config::Config;
use crate::shutdown::ShutdownSignal;
use crate::signal::SignalTo;
use crate::sinks::{Dispatcher, MemorySink, PostgresSink, Sink, Workers};
use crate::sources::{TcpConfig, UdpConfig, tcp, udp};
use crate::stats::{IngestStats, StatsSnapshot, report};

/// Records kept by the in-memory sink when the database is disabled.
const MEMORY_RETENTION: usize = 1024;

/// The running listeners, dispatcher and sink.
pub struct Ingester {
    trigger: Trigger,
    listeners: JoinSet<Result<(), ()>>,
    reporter: Option<JoinHandle<()>>,
    workers: Workers,
    sink: Arc<dyn Sink>,
    stats: Arc<IngestStats>,
    shutdown_timeout: Duration,
}

impl Ingester {
    /// Spawns the UDP and TCP listeners on the configured address, both
    /// feeding one dispatcher.
    pub fn start(config: &Config, sink: Arc<dyn Sink>, stats: Arc<IngestStats>) -> Ingester {
        let (trigger, shutdown) = ShutdownSignal::new_wired();
        let (dispatcher, workers) =
            Dispatcher::start(&config.dispatcher, Arc::clone(&sink), Arc::clone(&stats));

        let mut listeners = JoinSet::new();
        listeners.spawn(udp(
            UdpConfig::from(&config.listen),
            dispatcher.clone(),
            Arc::clone(&stats),
            shutdown.clone(),
        ));
        listeners.spawn(tcp(
            TcpConfig::from(config),
            dispatcher,
            Arc::clone(&stats),
            shutdown.clone(),
        ));

        let reporter = (!config.stats_interval.is_zero()).then(|| {
            tokio::spawn(report(
                Arc::clone(&stats),
                config.stats_interval,
                shutdown,
            ))
        });

        info!(
            message = "Ingester started",
            address = %config.listen.socket_addr(),
            workers = config.dispatcher.workers,
            queue_size = config.dispatcher.queue_size,
        );

        Ingester {
            trigger,
            listeners,
            reporter,
            workers,
            sink,
            stats,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// True while at least one listener is running.
    pub fn is_listening(&self) -> bool {
        !self.listeners.is_empty()
    }

    /// Resolves when a listener stops on its own, e.g. it failed to bind.
    /// Pending forever when no listener is left.
    pub async fn listener_exited(&mut self) -> Result<(), ()> {
        match self.listeners.join_next().await {
            Some(result) => flatten(result),
            None => futures::future::pending().await,
        }
    }

    /// Stops the listeners, drains the dispatcher within the shutdown
    /// timeout and closes the sink. Returns the final counters.
    pub async fn shutdown(mut self) -> StatsSnapshot {
        self.trigger.cancel();

        while let Some(result) = self.listeners.join_next().await {
            let _ = flatten(result);
        }

        if !self.workers.shutdown(self.shutdown_timeout).await {
            warn!(
                message = "Queued records abandoned",
                timeout = ?self.shutdown_timeout
            );
        }

        self.sink.close().await;

        if let Some(reporter) = self.reporter
            && let Err(err) = reporter.await
        {
            warn!(message = "Stats reporter failed", %err);
        }

        let snapshot = self.stats.snapshot();
        snapshot.log("Final ingest stats");

        snapshot
    }
}

fn flatten(result: Result<Result<(), ()>, tokio::task::JoinError>) -> Result<(), ()> {
    result.unwrap_or_else(|err| {
        error!(message = "Listener panicked", %err);
        Err(())
    })
}

enum Event {
    Signal(SignalTo),
    ListenerExited,
}

/// Runs until a signal arrives, or until no listener is left.
pub async fn run(config: Config, mut signals: impl Stream<Item = SignalTo> + Unpin) -> ExitCode {
    let stats = Arc::new(IngestStats::default());
    let sink: Arc<dyn Sink> = if config.database.enabled {
        Arc::new(PostgresSink::connect(&config.database, Arc::clone(&stats)).await)
    } else {
        warn!(message = "Database is disabled, records are only kept in memory");

        Arc::new(MemorySink::new(Arc::clone(&stats)).with_retention(MEMORY_RETENTION))
    };

    let mut ingester = Ingester::start(&config, sink, stats);

    let signal = loop {
        let event = tokio::select! {
            signal = signals.next() => Event::Signal(signal.unwrap_or(SignalTo::Shutdown)),
            _ = ingester.listener_exited(), if ingester.is_listening() => Event::ListenerExited,
        };

        match event {
            Event::Signal(signal) => break signal,
            Event::ListenerExited if !ingester.is_listening() => {
                error!(message = "No listener is running, shutting down");

                ingester.shutdown().await;
                return exitcode::UNAVAILABLE;
            }
            // the other transport keeps serving
            Event::ListenerExited => {}
        }
    };

    match signal {
        SignalTo::Shutdown => {
            info!(message = "Shutdown signal received, draining");

            tokio::select! {
                _ = ingester.shutdown() => info!(message = "Shutdown finished"),
                Some(_) = signals.next() => {
                    warn!(message = "Second signal received, exiting immediately");
                }
            }
        }
        SignalTo::Quit => {
            info!(message = "Quit signal received, queued records are lost");

            drop(ingester);
        }
    }

    exitcode::OK
}
