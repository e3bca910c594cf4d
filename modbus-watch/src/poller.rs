//! Modbus device polling.
//!
//! The poller alternates between two states. In `Connecting` it blocks on
//! the supervisor until a session is open; in `Polling` it reads, decodes
//! and presents one register block per interval until the session closes.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, sleep_or_shutdown};
use crate::decoder::{DecodeError, RegisterDecoder};
use crate::display::DisplaySink;
use crate::supervisor::ConnectionSupervisor;
use crate::transport::{Connector, Transport, TransportError};

/// Error type for polling operations.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("Read failed: {0}")]
    Read(#[from] TransportError),
    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),
}

/// What each poll reads and how often.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub start_address: u16,
    pub register_count: u16,
    pub unit_id: u8,
    pub interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            start_address: 0,
            register_count: 25,
            unit_id: 1,
            interval: Duration::from_millis(500),
        }
    }
}

/// Poll loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Connecting,
    Polling,
}

enum SessionEnd {
    Lost,
    Shutdown,
}

/// A poller for a single Modbus device.
pub struct Poller<C, K, S> {
    supervisor: ConnectionSupervisor<C, K>,
    decoder: RegisterDecoder,
    sink: S,
    settings: PollSettings,
    state: PollState,
    sessions: u64,
}

impl<C, K, S> Poller<C, K, S>
where
    C: Connector,
    K: Clock,
    S: DisplaySink,
{
    pub fn new(
        supervisor: ConnectionSupervisor<C, K>,
        decoder: RegisterDecoder,
        sink: S,
        settings: PollSettings,
    ) -> Self {
        Self {
            supervisor,
            decoder,
            sink,
            settings,
            state: PollState::Connecting,
            sessions: 0,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Number of sessions acquired so far.
    pub fn sessions(&self) -> u64 {
        self.sessions
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor<C, K> {
        &self.supervisor
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Run the polling loop until shutdown or a fatal session error.
    ///
    /// Lost sessions are re-acquired transparently. Device read errors and
    /// short register blocks end the run.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), PollError> {
        let addr = self.supervisor.target();

        info!(
            %addr,
            count = self.settings.register_count,
            interval = ?self.settings.interval,
            "Starting Modbus poller"
        );

        loop {
            self.state = PollState::Connecting;
            let Some(mut transport) = self.supervisor.acquire(&mut shutdown).await else {
                info!(%addr, "Poller stopped");
                return Ok(());
            };

            self.state = PollState::Polling;
            self.sessions += 1;

            match self.poll_session(&mut transport, &mut shutdown).await {
                Ok(SessionEnd::Lost) => {
                    self.supervisor.mark_lost();
                }
                Ok(SessionEnd::Shutdown) => {
                    info!(%addr, "Poller stopped");
                    return Ok(());
                }
                Err(e) => {
                    error!(%addr, error = %e, "Polling failed");
                    return Err(e);
                }
            }
        }
    }

    async fn poll_session(
        &mut self,
        transport: &mut C::Transport,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, PollError> {
        let PollSettings {
            start_address,
            register_count,
            unit_id,
            interval,
        } = self.settings;

        while transport.is_open() {
            if *shutdown.borrow() {
                return Ok(SessionEnd::Shutdown);
            }

            match transport
                .read_input_registers(start_address, register_count, unit_id)
                .await
            {
                Ok(block) => {
                    let reading = self.decoder.decode(&block)?;
                    debug!(
                        id = %reading.id,
                        position = reading.position,
                        force = reading.force,
                        "Decoded reading"
                    );
                    self.sink.present(&reading);
                }
                Err(e) if !transport.is_open() => {
                    warn!(addr = %self.supervisor.target(), error = %e, "Session closed during read");
                    return Ok(SessionEnd::Lost);
                }
                Err(e) => return Err(PollError::Read(e)),
            }

            if !sleep_or_shutdown(self.supervisor.clock(), interval, shutdown).await {
                return Ok(SessionEnd::Shutdown);
            }
        }

        Ok(SessionEnd::Lost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = PollSettings::default();

        assert_eq!(settings.start_address, 0);
        assert_eq!(settings.register_count, 25);
        assert_eq!(settings.unit_id, 1);
        assert_eq!(settings.interval, Duration::from_millis(500));
    }

    #[test]
    fn test_error_messages() {
        let err = PollError::from(TransportError::Exception("IllegalDataAddress".to_string()));
        assert_eq!(err.to_string(), "Read failed: Device exception: IllegalDataAddress");

        let err = PollError::from(DecodeError::ShortBlock {
            len: 10,
            required: 22,
        });
        assert!(err.to_string().contains("got 10 registers"));
    }
}
