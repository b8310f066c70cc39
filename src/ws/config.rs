use std::time::Duration;

use backoff::backoff::Constant;
use bon::Builder;

const DEFAULT_RETRY_DELAY_DURATION: Duration = Duration::from_secs(15);
const DEFAULT_RECONNECT_DELAY_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 10;

/// Configuration for WebSocket transport behavior.
///
/// ```
/// use std::time::Duration;
///
/// use signalr_ws_transport::ws::config::Config;
///
/// let config = Config::builder()
///     .retry_delay(Duration::from_millis(10))
///     .max_connect_attempts(3)
///     .build();
///
/// assert_eq!(config.reconnect_delay, Duration::from_secs(10));
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Pause after a failed connection attempt before trying again
    #[builder(default = DEFAULT_RETRY_DELAY_DURATION)]
    pub retry_delay: Duration,
    /// Pause after the receive loop observes a broken channel, before reconnecting
    #[builder(default = DEFAULT_RECONNECT_DELAY_DURATION)]
    pub reconnect_delay: Duration,
    /// Consecutive failed connection attempts tolerated before the transport gives up for good.
    /// Only a successful connect resets the count.
    #[builder(default = DEFAULT_MAX_CONNECT_ATTEMPTS)]
    pub max_connect_attempts: u32,
    /// Upper bound for a single WebSocket upgrade. `None` leaves it to the OS.
    pub connect_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Config {
    /// Fixed schedule applied between failed connection attempts.
    #[must_use]
    pub fn retry_backoff(&self) -> Constant {
        Constant::new(self.retry_delay)
    }

    /// Fixed schedule applied before re-establishing a broken channel.
    #[must_use]
    pub fn reconnect_backoff(&self) -> Constant {
        Constant::new(self.reconnect_delay)
    }
}
