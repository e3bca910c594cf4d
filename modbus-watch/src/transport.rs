//! Transport abstraction and the Modbus TCP implementation.
//!
//! The supervisor and poller only see [`Connector`] and [`Transport`], so
//! tests drive them with in-memory stubs.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio_modbus::client::{Context, Reader};
use tokio_modbus::prelude::*;
use tracing::debug;

/// Error type for transport operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Device exception: {0}")]
    Exception(String),
}

/// Opens transport sessions to a target.
pub trait Connector: Send {
    /// The session type produced by a successful connect.
    type Transport: Transport;

    /// Attempt to open a session.
    fn connect(
        &mut self,
        target: SocketAddr,
    ) -> impl Future<Output = Result<Self::Transport, TransportError>> + Send;
}

/// An open register-reading session.
pub trait Transport: Send {
    /// Whether the underlying connection is still usable.
    fn is_open(&self) -> bool;

    /// Read `count` input registers starting at `start` from `unit_id`.
    fn read_input_registers(
        &mut self,
        start: u16,
        count: u16,
        unit_id: u8,
    ) -> impl Future<Output = Result<Vec<u16>, TransportError>> + Send;
}

/// Connects to Modbus TCP servers with `tokio-modbus`.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    unit_id: u8,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl TcpConnector {
    pub fn new(unit_id: u8, connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            unit_id,
            connect_timeout,
            read_timeout,
        }
    }
}

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    async fn connect(&mut self, target: SocketAddr) -> Result<TcpTransport, TransportError> {
        let ctx = tokio::time::timeout(
            self.connect_timeout,
            tcp::connect_slave(target, Slave(self.unit_id)),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.connect_timeout))?
        .map_err(|e| TransportError::Connect(e.to_string()))?;

        debug!(addr = %target, "TCP session established");

        Ok(TcpTransport {
            ctx,
            open: true,
            read_timeout: self.read_timeout,
        })
    }
}

/// A Modbus TCP session.
///
/// `tokio-modbus` does not expose socket state, so the session counts as
/// open until a read fails below the Modbus layer or times out.
pub struct TcpTransport {
    ctx: Context,
    open: bool,
    read_timeout: Duration,
}

impl Transport for TcpTransport {
    fn is_open(&self) -> bool {
        self.open
    }

    async fn read_input_registers(
        &mut self,
        start: u16,
        count: u16,
        unit_id: u8,
    ) -> Result<Vec<u16>, TransportError> {
        self.ctx.set_slave(Slave(unit_id));

        let response =
            tokio::time::timeout(self.read_timeout, self.ctx.read_input_registers(start, count))
                .await;

        match response {
            Ok(Ok(Ok(words))) => Ok(words),
            Ok(Ok(Err(exception))) => {
                Err(TransportError::Exception(format!("{:?}", exception)))
            }
            Ok(Err(e)) => {
                self.open = false;
                Err(TransportError::Io(e.to_string()))
            }
            Err(_) => {
                self.open = false;
                Err(TransportError::Timeout(self.read_timeout))
            }
        }
    }
}
