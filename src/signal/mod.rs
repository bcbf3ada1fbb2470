//! Back-pressure signal decoding.
//!
//! A [`SignalHandler`] examines one completed response (or one transport
//! error) and emits at most one normalized [`Signal`]. Handlers are
//! independent and side-effect-free: they never consult or mutate
//! destination state, which makes them individually testable and freely
//! composable. The transport runs every registered handler in ascending
//! priority order and fuses their outputs into a single action.
//!
//! # Built-in handlers
//!
//! | Handler | Priority | Vocabulary |
//! |---|---|---|
//! | [`GoAwayHandler`] | 5 | HTTP/2 GOAWAY, connection resets (error path) |
//! | [`HttpStatusHandler`] | 10 | 429 / 503 / 420 + `Retry-After` |
//! | [`RateLimitHandler`] | 20 | `X-RateLimit-*`, `RateLimit-*`, `CF-RateLimit-*` |
//! | [`CapacityHandler`] | 100 | `X-Capacity-*` |

mod capacity;
mod goaway;
pub(crate) mod headers;
mod http_status;
mod ratelimit;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

pub use capacity::CapacityHandler;
pub use goaway::GoAwayHandler;
pub use http_status::HttpStatusHandler;
pub use ratelimit::RateLimitHandler;
use reqwest::Response;

/// Classification of a decoded signal, from weakest to strongest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Informational capacity data; acted on only when nothing stronger
    /// proposed a concurrency first
    Capacity,
    /// The server is rate limiting (429, 420, quota nearly exhausted)
    RateLimit,
    /// The server is overloaded (503, GOAWAY, connection reset)
    Backoff,
    /// Requests should be held off entirely until the block window passes
    Block,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Capacity => "capacity",
            Self::RateLimit => "rate_limit",
            Self::Backoff => "backoff",
            Self::Block => "block",
        })
    }
}

/// A normalized back-pressure observation extracted from one response or
/// one transport error
#[derive(Debug, Clone)]
pub struct Signal {
    /// Where the signal came from (e.g. `"http"`, `"ratelimit"`,
    /// `"capacity"`, `"http2"`, `"connection"`)
    pub source: &'static str,

    /// How the signal classifies
    pub kind: SignalKind,

    /// Recommended concurrency; 0 means no suggestion
    pub suggested_concurrency: usize,

    /// When to retry; zero means no value
    pub retry_after: Duration,

    /// Absolute end of the block window, if any
    pub block_until: Option<SystemTime>,

    /// Remaining requests in the current window, from rate limit headers
    pub remaining: Option<i64>,

    /// Total limit of the current window, from rate limit headers
    pub limit: Option<i64>,

    /// Additional human-readable context
    pub message: String,

    /// Raw header values for diagnostics
    pub raw: HashMap<String, String>,
}

impl Signal {
    /// Create an empty signal with the given source and kind
    #[must_use]
    pub fn new(source: &'static str, kind: SignalKind) -> Self {
        Self {
            source,
            kind,
            suggested_concurrency: 0,
            retry_after: Duration::ZERO,
            block_until: None,
            remaining: None,
            limit: None,
            message: String::new(),
            raw: HashMap::new(),
        }
    }
}

/// Decoder of one back-pressure vocabulary.
///
/// Implementations must be pure with respect to their input: no external
/// state mutation, no retention of the response. The transport may in the
/// future memoize handler outputs by response fingerprint, which only works
/// if this contract holds.
pub trait SignalHandler: fmt::Debug + Send + Sync {
    /// Handler name for logging and debugging
    fn name(&self) -> &'static str;

    /// Handler priority; lower runs earlier
    fn priority(&self) -> u32;

    /// Examine the response and return any detected signal
    fn process(&self, response: &Response) -> Option<Signal>;

    /// Examine a failed round-trip and return any detected signal.
    ///
    /// Only consulted when the transport has connection-error handling
    /// enabled. The default implementation detects nothing.
    fn process_error(&self, _error: &reqwest::Error) -> Option<Signal> {
        None
    }
}

/// The default handler set: HTTP status codes, rate limit headers, and
/// capacity headers. Connection-error handling is opt-in via
/// [`GoAwayHandler`].
#[must_use]
pub fn default_handlers() -> Vec<Arc<dyn SignalHandler>> {
    vec![
        Arc::new(HttpStatusHandler),
        Arc::new(RateLimitHandler),
        Arc::new(CapacityHandler),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_handlers_sort_stably_by_priority() {
        let mut handlers = default_handlers();
        handlers.sort_by_key(|h| h.priority());

        let names: Vec<_> = handlers.iter().map(|h| h.name()).collect();
        assert_eq!(names, ["http_status", "ratelimit", "capacity"]);
    }

    #[test]
    fn test_signal_kind_display() {
        assert_eq!(SignalKind::Capacity.to_string(), "capacity");
        assert_eq!(SignalKind::RateLimit.to_string(), "rate_limit");
        assert_eq!(SignalKind::Backoff.to_string(), "backoff");
        assert_eq!(SignalKind::Block.to_string(), "block");
    }

    #[test]
    fn test_new_signal_is_empty() {
        let signal = Signal::new("http", SignalKind::RateLimit);
        assert_eq!(signal.suggested_concurrency, 0);
        assert_eq!(signal.retry_after, Duration::ZERO);
        assert!(signal.block_until.is_none());
        assert!(signal.raw.is_empty());
    }
}
