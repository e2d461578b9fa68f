// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! logd server implementation for receiving envelopes.
//!
//! This module receives datagrams over UDP, decodes them and routes each
//! envelope: log lines go to the [`LogBuffer`] to be stored by the flusher,
//! counters and timers go to the stats service. Delivery is at most once and
//! unordered across senders; a malformed datagram is dropped on its own and
//! never stops the loop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::buffer::LogBuffer;
use crate::config::ServerConfig;
use crate::envelope::{decode, Envelope};
use crate::errors::DecodeError;
use crate::stats::{Stat, StatsHandle};
use crate::store::IncomingLog;

// Largest payload a UDP datagram can carry over IPv4.
const BUFFER_SIZE: usize = 65_507;

// BufferReader abstracts where datagrams come from.
enum BufferReader {
    /// UDP socket reader
    UdpSocket(UdpSocket),

    /// Mirror reader for testing - replays a fixed buffer
    #[allow(dead_code)]
    MirrorTest(Vec<u8>, SocketAddr),
}

impl BufferReader {
    async fn read(&self) -> std::io::Result<(Vec<u8>, SocketAddr)> {
        match self {
            BufferReader::UdpSocket(socket) => {
                let mut buf = vec![0; BUFFER_SIZE];
                let (amt, src) = socket.recv_from(&mut buf).await?;
                buf.truncate(amt);
                Ok((buf, src))
            }
            BufferReader::MirrorTest(data, src) => Ok((data.clone(), *src)),
        }
    }
}

/// Server receiving envelopes and routing them to storage and stats.
pub struct LogdServer {
    cancel_token: CancellationToken,
    buffer: Arc<LogBuffer>,
    stats: StatsHandle,
    reader: BufferReader,
    received: Arc<AtomicU64>,
}

impl LogdServer {
    /// Binds the UDP socket described by the config.
    pub async fn new(
        config: &ServerConfig,
        buffer: Arc<LogBuffer>,
        stats: StatsHandle,
        cancel_token: CancellationToken,
    ) -> std::io::Result<LogdServer> {
        let socket = UdpSocket::bind(config.bind_address()).await?;
        Ok(LogdServer {
            cancel_token,
            buffer,
            stats,
            reader: BufferReader::UdpSocket(socket),
            received: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        match &self.reader {
            BufferReader::UdpSocket(socket) => socket.local_addr(),
            BufferReader::MirrorTest(_, src) => Ok(*src),
        }
    }

    /// Running count of log lines received.
    pub fn received(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.received)
    }

    /// Main event loop, runs until the cancel token fires.
    pub async fn spin(self) {
        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                _ = self.consume_datagram() => {}
            }
        }
        debug!("logd server stopped");
    }

    /// Receive one datagram and route the envelope it carries.
    async fn consume_datagram(&self) {
        let (buf, src) = match self.reader.read().await {
            Ok(read) => read,
            Err(e) => {
                error!("Failed to receive datagram: {}", e);
                return;
            }
        };

        match decode(&buf) {
            Ok(envelope) => {
                trace!("Received {:?} from {}", envelope, src);
                self.route(envelope, src);
            }
            Err(DecodeError::UnknownKind(kind)) => {
                debug!("Dropping envelope of unknown kind {} from {}", kind, src)
            }
            Err(e) => error!("Failed to decode datagram from {}: {}", src, e),
        }
    }

    fn route(&self, envelope: Envelope, src: SocketAddr) {
        let stat = match envelope {
            Envelope::Log(log) => {
                self.received.fetch_add(1, Ordering::Relaxed);
                self.buffer.push(IncomingLog {
                    log,
                    ip: Some(src.ip().to_string()),
                });
                return;
            }
            Envelope::Counter(counter) => Stat::Counter(counter),
            Envelope::Timer(timer) => Stat::Timer(timer),
        };
        if let Err(e) = self.stats.record(vec![stat]) {
            error!("Failed to send stats to the stats service: {}", e);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::envelope::{encode, CounterDelta, Level, LogMessage, TimerSample};
    use crate::stats::{StatsService, StatsSnapshot};
    use std::net::{IpAddr, Ipv4Addr};
    use tracing_test::traced_test;

    async fn setup_and_consume(datagram: Vec<u8>) -> (Arc<LogBuffer>, StatsSnapshot, u64) {
        let (service, handle) = StatsService::new();
        let service_task = tokio::spawn(service.run());
        let buffer = Arc::new(LogBuffer::new());

        let server = LogdServer {
            cancel_token: CancellationToken::new(),
            buffer: Arc::clone(&buffer),
            stats: handle.clone(),
            reader: BufferReader::MirrorTest(
                datagram,
                SocketAddr::new(IpAddr::V4(Ipv4Addr::new(111, 112, 113, 114)), 0),
            ),
            received: Arc::new(AtomicU64::new(0)),
        };
        server.consume_datagram().await;
        let received = server.received().load(Ordering::Relaxed);

        let snapshot = handle.snapshot().await.expect("Failed to snapshot");
        handle.shutdown().expect("Failed to shutdown");
        service_task.await.expect("Service task failed");

        (buffer, snapshot, received)
    }

    #[tokio::test]
    async fn test_log_goes_to_buffer_with_source_ip() {
        let log = LogMessage::new("web.log", "app", Level::INFO, "hello");
        let (buffer, snapshot, received) =
            setup_and_consume(encode(&Envelope::Log(log.clone())).unwrap()).await;

        assert_eq!(received, 1);
        assert!(snapshot.is_empty());
        let pending = buffer.swap();
        assert_eq!(
            pending["web.log"],
            vec![IncomingLog {
                log,
                ip: Some("111.112.113.114".to_string())
            }]
        );
    }

    #[tokio::test]
    async fn test_counter_and_timer_go_to_stats() {
        let counter = Envelope::Counter(CounterDelta {
            key: "hits".to_string(),
            value: 3,
            rate: 1.0,
        });
        let (buffer, snapshot, _) = setup_and_consume(encode(&counter).unwrap()).await;
        assert_eq!(snapshot.counters["hits"], 3.0);
        assert_eq!(buffer.pending(), 0);

        let timer = Envelope::Timer(TimerSample {
            key: "render".to_string(),
            value: 4.5,
            rate: 1.0,
        });
        let (_, snapshot, _) = setup_and_consume(encode(&timer).unwrap()).await;
        assert_eq!(snapshot.timers["render"], vec![4.5]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_malformed_datagram_is_dropped() {
        let (buffer, snapshot, received) = setup_and_consume(b"not msgpack".to_vec()).await;

        assert!(logs_contain("Failed to decode datagram"));
        assert_eq!(received, 0);
        assert_eq!(buffer.pending(), 0);
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_spin_stops_on_cancel() {
        let (_service, handle) = StatsService::new();
        let cancel_token = CancellationToken::new();
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        };
        let server = LogdServer::new(
            &config,
            Arc::new(LogBuffer::new()),
            handle,
            cancel_token.clone(),
        )
        .await
        .expect("failed to bind");
        assert_ne!(server.local_addr().unwrap().port(), 0);

        let task = tokio::spawn(server.spin());
        cancel_token.cancel();
        task.await.expect("server task failed");
    }
}
