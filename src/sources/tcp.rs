use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use codecs::decoding::FramingConfig;
use codecs::normalize;
use futures::future::{BoxFuture, Shared};
use futures::{FutureExt, StreamExt};
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::codec::FramedRead;

use super::Source;
use crate::config::{Config, ListenConfig};
use crate::shutdown::ShutdownSignal;
use crate::sinks::Dispatcher;
use crate::stats::IngestStats;

/// Pause after a failed accept, e.g. when the process ran out of file
/// descriptors.
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct TcpConfig {
    pub address: SocketAddr,

    pub framing: FramingConfig,

    /// Newline framed messages longer than this are discarded.
    pub max_length: usize,

    pub keepalive: Option<Duration>,

    /// Configures the receive buffer size using the "SO_RCVBUF" option on the socket.
    pub receive_buffer_bytes: Option<usize>,

    /// Accepting pauses while this many connections are open.
    pub connection_limit: Option<usize>,

    /// Connections still open this long after shutdown began are reset.
    pub shutdown_timeout: Duration,
}

impl TcpConfig {
    pub fn new(listen: &ListenConfig, shutdown_timeout: Duration) -> Self {
        Self {
            address: listen.socket_addr(),
            framing: listen.framing,
            max_length: listen.max_length,
            keepalive: listen.keepalive,
            receive_buffer_bytes: listen.receive_buffer_bytes,
            connection_limit: listen.connection_limit,
            shutdown_timeout,
        }
    }
}

impl From<&Config> for TcpConfig {
    fn from(config: &Config) -> Self {
        TcpConfig::new(&config.listen, config.shutdown_timeout)
    }
}

/// Everything a connection task needs besides its stream.
struct Connection {
    peer: SocketAddr,
    key: u64,
    framing: FramingConfig,
    max_length: usize,
    dispatcher: Dispatcher,
    stats: Arc<IngestStats>,
    shutdown: ShutdownSignal,
    tripwire: BoxFuture<'static, ()>,
}

/// Accepts connections until shutdown, each one is read by its own task.
///
/// The returned future completes once every connection is finished. On
/// shutdown the write half of each connection is closed so peers know to
/// stop, and connections still open after `shutdown_timeout` are reset.
pub fn tcp(
    config: TcpConfig,
    dispatcher: Dispatcher,
    stats: Arc<IngestStats>,
    mut shutdown: ShutdownSignal,
) -> Source {
    Box::pin(async move {
        let listener = TcpListener::bind(config.address).await.map_err(|err| {
            error!(
                message = "Failed to bind to TCP listener socket",
                address = %config.address,
                %err
            );
        })?;

        let address = listener.local_addr().unwrap_or(config.address);
        info!(
            message = "Listening",
            %address,
            r#type = "tcp",
            framing = ?config.framing
        );

        let shutdown_timeout = config.shutdown_timeout;
        let tripwire: Shared<BoxFuture<'static, ()>> = {
            let shutdown = shutdown.clone();

            async move {
                shutdown.await;
                sleep(shutdown_timeout).await
            }
            .boxed()
            .shared()
        };

        let limit = config.connection_limit.map(|n| Arc::new(Semaphore::new(n)));
        let mut connections = JoinSet::new();

        loop {
            while let Some(result) = connections.try_join_next() {
                reap(result);
            }

            let permit: Option<OwnedSemaphorePermit> = match &limit {
                Some(limit) => tokio::select! {
                    biased;

                    _ = &mut shutdown => break,
                    permit = Arc::clone(limit).acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    },
                },
                None => None,
            };

            let (stream, peer) = tokio::select! {
                biased;

                _ = &mut shutdown => break,
                result = listener.accept() => match result {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        error!(
                            message = "Failed to accept socket",
                            %err
                        );

                        sleep(ACCEPT_ERROR_DELAY).await;
                        continue;
                    }
                }
            };

            configure(&stream, &config);
            stats.connection_opened();

            let key = dispatcher.allocate_key();
            debug!(
                message = "Accepted a new connection",
                %peer,
                key
            );

            let connection = Connection {
                peer,
                key,
                framing: config.framing,
                max_length: config.max_length,
                dispatcher: dispatcher.clone(),
                stats: Arc::clone(&stats),
                shutdown: shutdown.clone(),
                tripwire: tripwire
                    .clone()
                    .map(move |()| {
                        info!(
                            message = "Resetting connection (still open)",
                            %peer,
                            after = ?shutdown_timeout
                        );
                    })
                    .boxed(),
            };

            connections.spawn(handle_stream(stream, connection).map(move |()| drop(permit)));
        }

        // no new connections from here on
        drop(listener);
        drop(dispatcher);

        if !connections.is_empty() {
            debug!(
                message = "Waiting for open connections",
                count = connections.len()
            );
        }
        while let Some(result) = connections.join_next().await {
            reap(result);
        }

        info!(
            message = "Listener stopped",
            %address,
            r#type = "tcp"
        );

        Ok(())
    })
}

fn reap(result: Result<(), tokio::task::JoinError>) {
    if let Err(err) = result
        && err.is_panic()
    {
        error!(message = "Connection task panicked", %err);
    }
}

fn configure(stream: &TcpStream, config: &TcpConfig) {
    let socket = SockRef::from(stream);

    if let Some(keepalive) = config.keepalive
        && let Err(err) = socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(keepalive))
    {
        warn!(
            message = "Failed configuring TCP keepalive",
            %err
        );
    }

    if let Some(receive_buffer_bytes) = config.receive_buffer_bytes
        && let Err(err) = socket.set_recv_buffer_size(receive_buffer_bytes)
    {
        warn!(
            message = "Failed configuring receive buffer size on TCP socket",
            %err
        );
    }
}

async fn handle_stream(stream: TcpStream, connection: Connection) {
    let Connection {
        peer,
        key,
        framing,
        max_length,
        dispatcher,
        stats,
        mut shutdown,
        mut tripwire,
    } = connection;

    let mut reader = FramedRead::new(stream, framing.build(max_length));
    let mut closing = false;

    loop {
        tokio::select! {
            biased;

            _ = &mut tripwire => break,
            _ = &mut shutdown, if !closing => {
                debug!(message = "Start graceful shutdown", %peer);
                closing = true;

                // Close our write half so the peer stops writing and closes
                // the connection.
                if let Err(err) = SockRef::from(reader.get_ref()).shutdown(Shutdown::Write) {
                    warn!(
                        message = "Failed in signalling to the other side to close the TCP channel",
                        %peer,
                        %err
                    );
                }
            },
            frame = reader.next() => match frame {
                Some(Ok(frame)) => {
                    stats.frame_received(frame.len());
                    let record = normalize(&frame);
                    trace!(
                        message = "Frame received",
                        %peer,
                        size = frame.len(),
                        id = %record.id
                    );

                    let dispatched = tokio::select! {
                        biased;

                        result = dispatcher.dispatch(record, key) => result,
                        _ = &mut tripwire => break,
                    };

                    if let Err(err) = dispatched {
                        error!(message = "Stop reading connection", %peer, %err);
                        break;
                    }
                }
                Some(Err(err)) => {
                    warn!(
                        message = "Failed to read data from TCP source",
                        %peer,
                        %err
                    );
                    break;
                }
                None => {
                    debug!(message = "Connection closed", %peer);
                    break;
                }
            }
        }
    }

    stats.connection_closed();
}
