//! Transport configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::key::{DestinationKey, KeyFn};
use crate::signal::{Signal, SignalHandler};
use crate::state::DestinationState;

/// Default User-Agent prefix added to outgoing requests
pub const DEFAULT_USER_AGENT: &str = "Cap/1.0";
/// Default starting concurrency per destination, 100
pub const DEFAULT_INITIAL_CONCURRENCY: usize = 100;
/// Default concurrency ceiling per destination, 100
pub const DEFAULT_MAX_CONCURRENCY: usize = 100;
/// Default concurrency floor per destination, 1
pub const DEFAULT_MIN_CONCURRENCY: usize = 1;
/// Default wait for a concurrency slot, 30 seconds
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
/// Default freshness window for destination state, 30 seconds
pub const DEFAULT_STATE_EXPIRY: Duration = Duration::from_secs(30);

/// Callback invoked for every decoded signal
pub type SignalCallback = Arc<dyn Fn(&DestinationKey, &Signal) + Send + Sync>;

/// Callback invoked whenever a destination's enforced concurrency changes
pub type StateCallback = Arc<dyn Fn(&DestinationKey, &DestinationState) + Send + Sync>;

/// Configuration for the capacity-aware [`Transport`](crate::Transport).
///
/// All fields are optional in the sense that zero numeric values and zero
/// durations are replaced with their defaults when the transport is built.
/// The empty string is a valid `user_agent` and disables injection.
#[derive(Clone)]
pub struct TransportConfig {
    /// Prefix prepended to the `User-Agent` of every request.
    /// Empty disables injection.
    pub user_agent: String,

    /// Starting concurrency limit per destination, before any capacity
    /// signal has been received
    pub initial_concurrency: usize,

    /// Absolute maximum concurrency per destination, regardless of what the
    /// server suggests
    pub max_concurrency: usize,

    /// Minimum concurrency per destination, even if the server suggests
    /// lower
    pub min_concurrency: usize,

    /// How long a request may wait for a concurrency slot
    pub acquire_timeout: Duration,

    /// How long cached capacity state counts as fresh; consulted by
    /// [`DestinationState::is_stale`] only
    pub state_expiry: Duration,

    /// Handlers run over every response, in ascending priority order.
    /// Empty means passthrough: the transport only bounds concurrency.
    pub signal_handlers: Vec<Arc<dyn SignalHandler>>,

    /// When true, handlers also see failed round-trips via
    /// [`SignalHandler::process_error`]
    pub goaway_handling: bool,

    /// The underlying HTTP client; `None` uses a default client
    pub http_client: Option<reqwest::Client>,

    /// Maps request URLs to destination keys; `None` uses
    /// [`host_key`](crate::key::host_key)
    pub key_fn: Option<KeyFn>,

    /// Invoked for every decoded signal
    pub on_signal: Option<SignalCallback>,

    /// Invoked after every enforced-concurrency change
    pub on_state_change: Option<StateCallback>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            initial_concurrency: DEFAULT_INITIAL_CONCURRENCY,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            min_concurrency: DEFAULT_MIN_CONCURRENCY,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            state_expiry: DEFAULT_STATE_EXPIRY,
            signal_handlers: Vec::new(),
            goaway_handling: false,
            http_client: None,
            key_fn: None,
            on_signal: None,
            on_state_change: None,
        }
    }
}

impl TransportConfig {
    /// Returns the configuration with defaults substituted for zero numeric
    /// values and zero durations. The user agent is left alone: empty is a
    /// deliberate "do not inject" setting.
    #[must_use]
    pub(crate) fn with_defaults(mut self) -> Self {
        if self.initial_concurrency == 0 {
            self.initial_concurrency = DEFAULT_INITIAL_CONCURRENCY;
        }
        if self.max_concurrency == 0 {
            self.max_concurrency = DEFAULT_MAX_CONCURRENCY;
        }
        if self.min_concurrency == 0 {
            self.min_concurrency = DEFAULT_MIN_CONCURRENCY;
        }
        if self.acquire_timeout.is_zero() {
            self.acquire_timeout = DEFAULT_ACQUIRE_TIMEOUT;
        }
        if self.state_expiry.is_zero() {
            self.state_expiry = DEFAULT_STATE_EXPIRY;
        }
        self
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("user_agent", &self.user_agent)
            .field("initial_concurrency", &self.initial_concurrency)
            .field("max_concurrency", &self.max_concurrency)
            .field("min_concurrency", &self.min_concurrency)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("state_expiry", &self.state_expiry)
            .field("signal_handlers", &self.signal_handlers)
            .field("goaway_handling", &self.goaway_handling)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.user_agent, "Cap/1.0");
        assert_eq!(config.initial_concurrency, 100);
        assert_eq!(config.max_concurrency, 100);
        assert_eq!(config.min_concurrency, 1);
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
        assert_eq!(config.state_expiry, Duration::from_secs(30));
        assert!(config.signal_handlers.is_empty());
        assert!(!config.goaway_handling);
    }

    #[test]
    fn test_zero_values_are_replaced() {
        let config = TransportConfig {
            initial_concurrency: 0,
            max_concurrency: 0,
            min_concurrency: 0,
            acquire_timeout: Duration::ZERO,
            state_expiry: Duration::ZERO,
            ..TransportConfig::default()
        }
        .with_defaults();

        assert_eq!(config.initial_concurrency, DEFAULT_INITIAL_CONCURRENCY);
        assert_eq!(config.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(config.min_concurrency, DEFAULT_MIN_CONCURRENCY);
        assert_eq!(config.acquire_timeout, DEFAULT_ACQUIRE_TIMEOUT);
        assert_eq!(config.state_expiry, DEFAULT_STATE_EXPIRY);
    }

    #[test]
    fn test_empty_user_agent_is_preserved() {
        let config = TransportConfig {
            user_agent: String::new(),
            ..TransportConfig::default()
        }
        .with_defaults();

        assert_eq!(config.user_agent, "");
    }

    #[test]
    fn test_explicit_values_survive() {
        let config = TransportConfig {
            initial_concurrency: 7,
            max_concurrency: 50,
            min_concurrency: 3,
            ..TransportConfig::default()
        }
        .with_defaults();

        assert_eq!(config.initial_concurrency, 7);
        assert_eq!(config.max_concurrency, 50);
        assert_eq!(config.min_concurrency, 3);
    }
}
