use std::time::Duration;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_CLIENTS: usize = 1000;

// tokio intervals panic on a zero period
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Broker constants, fixed for the lifetime of one `Manager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
    heartbeat_interval: Duration,
    client_timeout: Duration,
    max_clients: usize,
}

impl BrokerConfig {
    pub fn new(heartbeat_interval: Duration, client_timeout: Duration, max_clients: usize) -> Self {
        Self {
            heartbeat_interval: heartbeat_interval.max(MIN_PERIOD),
            client_timeout: client_timeout.max(MIN_PERIOD),
            max_clients,
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn client_timeout(&self) -> Duration {
        self.client_timeout
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    /// Half the client timeout, so a stale client is caught within 1.5x the timeout.
    pub fn sweep_interval(&self) -> Duration {
        (self.client_timeout / 2).max(MIN_PERIOD)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_HEARTBEAT_INTERVAL,
            DEFAULT_CLIENT_TIMEOUT,
            DEFAULT_MAX_CLIENTS,
        )
    }
}
