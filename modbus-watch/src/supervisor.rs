//! Connection acquisition with time-of-day dependent retry.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::clock::{Clock, sleep_or_shutdown};
use crate::transport::{Connector, Transport};

/// Connection lifecycle as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Backoff between failed connection attempts, chosen by local hour.
///
/// Night hours wrap around midnight when `night_start_hour` is after
/// `night_end_hour`; both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub day_backoff: Duration,
    pub night_backoff: Duration,
    pub night_start_hour: u32,
    pub night_end_hour: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            day_backoff: Duration::from_secs(10),
            night_backoff: Duration::from_secs(600),
            night_start_hour: 18,
            night_end_hour: 6,
        }
    }
}

impl RetryPolicy {
    /// Whether `hour` falls in the night window.
    pub fn is_night(&self, hour: u32) -> bool {
        if self.night_start_hour <= self.night_end_hour {
            (self.night_start_hour..=self.night_end_hour).contains(&hour)
        } else {
            hour >= self.night_start_hour || hour <= self.night_end_hour
        }
    }

    /// Backoff to wait after a failed attempt made at `hour`.
    pub fn backoff_for_hour(&self, hour: u32) -> Duration {
        if self.is_night(hour) {
            self.night_backoff
        } else {
            self.day_backoff
        }
    }
}

/// Owns the connect/retry loop for one target.
pub struct ConnectionSupervisor<C, K> {
    connector: C,
    target: SocketAddr,
    clock: K,
    policy: RetryPolicy,
    state: ConnectionState,
    failed_attempts: u64,
}

impl<C: Connector, K: Clock> ConnectionSupervisor<C, K> {
    pub fn new(connector: C, target: SocketAddr, clock: K, policy: RetryPolicy) -> Self {
        Self {
            connector,
            target,
            clock,
            policy,
            state: ConnectionState::Disconnected,
            failed_attempts: 0,
        }
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn clock(&self) -> &K {
        &self.clock
    }

    /// Failed attempts since the last successful connect.
    pub fn failed_attempts(&self) -> u64 {
        self.failed_attempts
    }

    /// Block until a session is open.
    ///
    /// Retries forever. Returns `None` only when shutdown is requested.
    pub async fn acquire(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<C::Transport> {
        loop {
            if *shutdown.borrow() {
                self.state = ConnectionState::Disconnected;
                return None;
            }

            self.state = ConnectionState::Connecting;
            info!(addr = %self.target, attempt = self.failed_attempts + 1, "Connecting");

            match self.connector.connect(self.target).await {
                Ok(transport) if transport.is_open() => {
                    info!(
                        addr = %self.target,
                        failed_attempts = self.failed_attempts,
                        "Connected"
                    );
                    self.state = ConnectionState::Connected;
                    self.failed_attempts = 0;
                    return Some(transport);
                }
                Ok(_) => {
                    warn!(addr = %self.target, "Target unreachable: connection closed immediately");
                }
                Err(e) => {
                    warn!(addr = %self.target, error = %e, "Target unreachable");
                }
            }

            self.state = ConnectionState::Disconnected;
            self.failed_attempts += 1;

            let hour = self.clock.local_hour();
            let backoff = self.policy.backoff_for_hour(hour);
            debug!(addr = %self.target, hour, ?backoff, "Waiting before next attempt");

            if !sleep_or_shutdown(&self.clock, backoff, shutdown).await {
                self.state = ConnectionState::Disconnected;
                return None;
            }
        }
    }

    /// Record that the session handed out by [`acquire`](Self::acquire) is gone.
    pub fn mark_lost(&mut self) {
        if self.state == ConnectionState::Connected {
            warn!(addr = %self.target, "Connection lost");
        }
        self.state = ConnectionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Copy)]
    enum Outcome {
        Refused,
        Closed,
        Open,
    }

    struct StubTransport {
        open: bool,
    }

    impl Transport for StubTransport {
        fn is_open(&self) -> bool {
            self.open
        }

        async fn read_input_registers(
            &mut self,
            _start: u16,
            count: u16,
            _unit_id: u8,
        ) -> Result<Vec<u16>, TransportError> {
            Ok(vec![0; usize::from(count)])
        }
    }

    struct StubConnector {
        outcomes: VecDeque<Outcome>,
        attempts: usize,
    }

    impl StubConnector {
        fn new(outcomes: &[Outcome]) -> Self {
            Self {
                outcomes: outcomes.iter().copied().collect(),
                attempts: 0,
            }
        }
    }

    impl Connector for StubConnector {
        type Transport = StubTransport;

        async fn connect(&mut self, _target: SocketAddr) -> Result<StubTransport, TransportError> {
            self.attempts += 1;
            match self.outcomes.pop_front().unwrap_or(Outcome::Open) {
                Outcome::Refused => Err(TransportError::Connect("refused".to_string())),
                Outcome::Closed => Ok(StubTransport { open: false }),
                Outcome::Open => Ok(StubTransport { open: true }),
            }
        }
    }

    #[derive(Clone)]
    struct FixedClock {
        hour: u32,
        sleeps: Arc<Mutex<Vec<Duration>>>,
    }

    impl FixedClock {
        fn at(hour: u32) -> Self {
            Self {
                hour,
                sleeps: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().unwrap().clone()
        }
    }

    impl Clock for FixedClock {
        fn local_hour(&self) -> u32 {
            self.hour
        }

        fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
            self.sleeps.lock().unwrap().push(duration);
            std::future::ready(())
        }
    }

    fn target() -> SocketAddr {
        "10.0.1.1:502".parse().unwrap()
    }

    #[test]
    fn test_backoff_by_hour() {
        let policy = RetryPolicy::default();

        for hour in [0, 1, 5, 6, 18, 19, 23] {
            assert_eq!(policy.backoff_for_hour(hour), Duration::from_secs(600), "hour {hour}");
        }
        for hour in [7, 8, 12, 17] {
            assert_eq!(policy.backoff_for_hour(hour), Duration::from_secs(10), "hour {hour}");
        }
    }

    #[test]
    fn test_night_window_without_wrap() {
        let policy = RetryPolicy {
            night_start_hour: 1,
            night_end_hour: 4,
            ..RetryPolicy::default()
        };

        assert!(!policy.is_night(0));
        assert!(policy.is_night(1));
        assert!(policy.is_night(4));
        assert!(!policy.is_night(5));
    }

    #[tokio::test]
    async fn test_acquire_retries_with_day_backoff() {
        let clock = FixedClock::at(12);
        let connector = StubConnector::new(&[Outcome::Refused, Outcome::Refused, Outcome::Open]);
        let mut supervisor =
            ConnectionSupervisor::new(connector, target(), clock.clone(), RetryPolicy::default());
        let (_tx, mut rx) = watch::channel(false);

        let transport = supervisor.acquire(&mut rx).await;

        assert!(transport.is_some_and(|t| t.is_open()));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(10); 2]);
        assert_eq!(supervisor.state(), ConnectionState::Connected);
        assert_eq!(supervisor.failed_attempts(), 0);
        assert_eq!(supervisor.connector.attempts, 3);
    }

    #[tokio::test]
    async fn test_acquire_retries_with_night_backoff() {
        let clock = FixedClock::at(22);
        let connector = StubConnector::new(&[Outcome::Refused, Outcome::Refused]);
        let mut supervisor =
            ConnectionSupervisor::new(connector, target(), clock.clone(), RetryPolicy::default());
        let (_tx, mut rx) = watch::channel(false);

        assert!(supervisor.acquire(&mut rx).await.is_some());
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(600); 2]);
    }

    #[tokio::test]
    async fn test_closed_handle_is_retried() {
        let clock = FixedClock::at(9);
        let connector = StubConnector::new(&[Outcome::Closed, Outcome::Open]);
        let mut supervisor =
            ConnectionSupervisor::new(connector, target(), clock.clone(), RetryPolicy::default());
        let (_tx, mut rx) = watch::channel(false);

        let transport = supervisor.acquire(&mut rx).await;

        assert!(transport.is_some_and(|t| t.is_open()));
        assert_eq!(clock.sleeps().len(), 1);
        assert_eq!(supervisor.connector.attempts, 2);
    }

    #[tokio::test]
    async fn test_acquire_returns_none_on_shutdown() {
        let clock = FixedClock::at(9);
        let connector = StubConnector::new(&[Outcome::Refused]);
        let mut supervisor =
            ConnectionSupervisor::new(connector, target(), clock.clone(), RetryPolicy::default());
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();

        assert!(supervisor.acquire(&mut rx).await.is_none());
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
        assert_eq!(supervisor.connector.attempts, 0);
    }

    #[tokio::test]
    async fn test_mark_lost() {
        let clock = FixedClock::at(9);
        let mut supervisor = ConnectionSupervisor::new(
            StubConnector::new(&[]),
            target(),
            clock,
            RetryPolicy::default(),
        );
        let (_tx, mut rx) = watch::channel(false);

        let _transport = supervisor.acquire(&mut rx).await;
        assert_eq!(supervisor.state(), ConnectionState::Connected);

        supervisor.mark_lost();
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
        assert_eq!(supervisor.state().to_string(), "disconnected");
    }
}
