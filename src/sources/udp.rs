use std::net::SocketAddr;
use std::sync::Arc;

use codecs::normalize;
use socket2::SockRef;
use tokio::net::UdpSocket;

use super::Source;
use crate::config::ListenConfig;
use crate::shutdown::ShutdownSignal;
use crate::sinks::Dispatcher;
use crate::stats::IngestStats;

/// Largest payload a UDP datagram can carry.
const MAX_DATAGRAM_SIZE: usize = u16::MAX as usize;

#[derive(Clone, Debug)]
pub struct UdpConfig {
    pub address: SocketAddr,

    /// Configures the receive buffer size using the "SO_RCVBUF" option on the socket.
    pub receive_buffer_bytes: Option<usize>,
}

impl From<&ListenConfig> for UdpConfig {
    fn from(config: &ListenConfig) -> Self {
        Self {
            address: config.socket_addr(),
            receive_buffer_bytes: config.receive_buffer_bytes,
        }
    }
}

/// Every datagram is one message, its content is never rejected.
pub fn udp(
    config: UdpConfig,
    dispatcher: Dispatcher,
    stats: Arc<IngestStats>,
    mut shutdown: ShutdownSignal,
) -> Source {
    Box::pin(async move {
        let socket = UdpSocket::bind(config.address).await.map_err(|err| {
            error!(
                message = "Failed to bind to UDP listener socket",
                address = %config.address,
                %err
            );
        })?;

        if let Some(receive_buffer_bytes) = config.receive_buffer_bytes
            && let Err(err) = SockRef::from(&socket).set_recv_buffer_size(receive_buffer_bytes)
        {
            warn!(
                message = "Failed configure receive buffer size on UDP socket",
                %err
            );
        }

        let address = socket.local_addr().unwrap_or(config.address);
        info!(
            message = "Listening",
            %address,
            r#type = "udp"
        );

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (size, peer) = tokio::select! {
                biased;

                _ = &mut shutdown => break,
                result = socket.recv_from(&mut buf) => match result {
                    Ok(received) => received,
                    Err(err) => {
                        // e.g. ICMP port unreachable surfacing on some platforms
                        warn!(
                            message = "Error reading datagram",
                            %err
                        );

                        continue;
                    }
                }
            };

            stats.datagram_received(size);
            let record = normalize(&buf[..size]);
            trace!(
                message = "Datagram received",
                %peer,
                size,
                id = %record.id
            );

            let key = Dispatcher::key_for_peer(&peer);
            tokio::select! {
                biased;

                result = dispatcher.dispatch(record, key) => {
                    if let Err(err) = result {
                        error!(message = "Stop receiving datagrams", %err);
                        break;
                    }
                }
                _ = &mut shutdown => break,
            }
        }

        info!(
            message = "Listener stopped",
            %address,
            r#type = "udp"
        );

        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use codecs::Severity;

    use super::*;
    use crate::config::DispatcherConfig;
    use crate::sinks::MemorySink;

    #[tokio::test]
    async fn every_datagram_is_a_record() {
        let address = testify::next_addr();
        let sink = Arc::new(MemorySink::default());
        let stats = Arc::new(IngestStats::default());
        let (dispatcher, workers) = Dispatcher::start(
            &DispatcherConfig::default(),
            sink.clone(),
            Arc::clone(&stats),
        );
        let (trigger, shutdown) = ShutdownSignal::new_wired();

        let source = tokio::spawn(udp(
            UdpConfig {
                address,
                receive_buffer_bytes: Some(64 * 1024),
            },
            dispatcher,
            Arc::clone(&stats),
            shutdown,
        ));

        // the socket is bound once the first datagram gets through
        testify::wait::wait_for(async || {
            testify::send_datagrams(address, [b"ping".to_vec()])
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            stats.snapshot().received_udp > 0
        })
        .await;

        let payloads = vec![
            b"<34>Feb 10 12:43:05 server1 nginx[123]: GET /index.html 200".to_vec(),
            Vec::new(),
            b"\xff\xfe\x00garbage".to_vec(),
        ];
        testify::send_datagrams(address, payloads).await.unwrap();

        let received = || {
            sink.records()
                .into_iter()
                .filter(|persisted| persisted.record.message != "ping")
                .collect::<Vec<_>>()
        };
        testify::wait::wait_for(async || received().len() == 3).await;

        trigger.cancel();
        source.await.unwrap().unwrap();
        assert!(workers.shutdown(Duration::from_secs(5)).await);

        // one peer, so one worker and arrival order
        let records = received();
        assert_eq!(records[0].record.host, "server1");
        assert_eq!(records[0].record.app, "nginx");
        assert_eq!(records[0].record.severity, Severity::Critical);
        assert_eq!(records[1].record.message, "");
        assert_eq!(records[1].record.host, "unknown");
        assert_eq!(records[2].record.severity, Severity::Error);
    }

    #[tokio::test]
    async fn bind_failure() {
        let occupied = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let address = occupied.local_addr().unwrap();

        let (dispatcher, _workers) = Dispatcher::start(
            &DispatcherConfig::default(),
            Arc::new(MemorySink::default()),
            Arc::new(IngestStats::default()),
        );
        let (_trigger, shutdown) = ShutdownSignal::new_wired();

        let result = udp(
            UdpConfig {
                address,
                receive_buffer_bytes: None,
            },
            dispatcher,
            Arc::new(IngestStats::default()),
            shutdown,
        )
        .await;

        assert!(result.is_err());
    }
}
