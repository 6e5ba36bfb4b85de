//! Metric sink: statsd gauges over UDP.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::connection::StatsdConnection;

/// Errors raised while emitting metrics.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to resolve statsd address {address}: {reason}")]
    Resolve { address: String, reason: String },

    #[error("Failed to send to statsd: {0}")]
    Io(#[from] io::Error),
}

/// Something that accepts named metric values.
pub trait MetricSink: Send + Sync {
    /// Emit one value. Each emission is independent; re-emitting is harmless.
    fn emit(&self, name: &str, value: f64) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// Format a statsd gauge line.
pub fn gauge_line(name: &str, value: f64) -> String {
    format!("{}:{}|g", name, value)
}

/// Sends each metric as a `name:value|g` datagram.
#[derive(Debug)]
pub struct StatsdSink {
    socket: UdpSocket,
    target: SocketAddr,
}

impl StatsdSink {
    /// Resolve the statsd address and connect a UDP socket to it.
    pub async fn connect(connection: &StatsdConnection) -> Result<Self, SinkError> {
        let address = connection.address();

        let target = tokio::net::lookup_host(&address)
            .await
            .map_err(|e| SinkError::Resolve {
                address: address.clone(),
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| SinkError::Resolve {
                address: address.clone(),
                reason: "no addresses found".to_string(),
            })?;

        let local: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(target).await?;

        tracing::info!(statsd = %address, target = %target, "Statsd sink ready");

        Ok(Self { socket, target })
    }

    /// Resolved destination address.
    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl MetricSink for StatsdSink {
    async fn emit(&self, name: &str, value: f64) -> Result<(), SinkError> {
        let line = gauge_line(name, value);
        tracing::trace!(metric = %line, "Emitting");
        self.socket.send(line.as_bytes()).await?;
        Ok(())
    }
}
