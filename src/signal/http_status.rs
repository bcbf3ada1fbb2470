use std::time::{Duration, SystemTime};

use http::header::RETRY_AFTER;
use reqwest::Response;

use super::headers::parse_retry_after;
use super::{Signal, SignalHandler, SignalKind};

/// Decodes HTTP status codes that indicate rate limiting or overload:
/// 429 Too Many Requests, 503 Service Unavailable, and 420 Enhance Your Calm
/// (used by Twitter and others), together with the `Retry-After` header.
///
/// When `Retry-After` is absent or unparseable, a conservative default wait
/// is assumed: 5 seconds for 429/420, 10 seconds for 503. A present
/// `Retry-After: 0` is respected as-is and opens no block window.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpStatusHandler;

impl SignalHandler for HttpStatusHandler {
    fn name(&self) -> &'static str {
        "http_status"
    }

    fn priority(&self) -> u32 {
        10
    }

    fn process(&self, response: &Response) -> Option<Signal> {
        let (kind, default_secs, message) = match response.status().as_u16() {
            429 => (SignalKind::RateLimit, 5, "Too Many Requests"),
            420 => (SignalKind::RateLimit, 5, "Enhance Your Calm"),
            503 => (SignalKind::Backoff, 10, "Service Unavailable"),
            _ => return None,
        };

        let mut signal = Signal::new("http", kind);
        signal.message = message.to_owned();

        let header = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok());

        match header {
            Some(value) => {
                signal.raw.insert("Retry-After".to_owned(), value.to_owned());
                signal.retry_after = parse_retry_after(value)
                    .unwrap_or(Duration::from_secs(default_secs));
            }
            None => signal.retry_after = Duration::from_secs(default_secs),
        }

        if signal.retry_after > Duration::ZERO {
            signal.block_until = Some(SystemTime::now() + signal.retry_after);
        }

        Some(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::response;

    #[test]
    fn test_ignores_ordinary_statuses() {
        let handler = HttpStatusHandler;
        assert!(handler.process(&response(200, &[])).is_none());
        assert!(handler.process(&response(404, &[])).is_none());
        assert!(handler.process(&response(500, &[])).is_none());
    }

    #[test]
    fn test_429_default_retry_after() {
        let signal = HttpStatusHandler.process(&response(429, &[])).unwrap();
        assert_eq!(signal.source, "http");
        assert_eq!(signal.kind, SignalKind::RateLimit);
        assert_eq!(signal.message, "Too Many Requests");
        assert_eq!(signal.retry_after, Duration::from_secs(5));
        assert!(signal.block_until.is_some());
    }

    #[test]
    fn test_420_default_retry_after() {
        let signal = HttpStatusHandler.process(&response(420, &[])).unwrap();
        assert_eq!(signal.kind, SignalKind::RateLimit);
        assert_eq!(signal.message, "Enhance Your Calm");
        assert_eq!(signal.retry_after, Duration::from_secs(5));
    }

    #[test]
    fn test_503_default_retry_after() {
        let signal = HttpStatusHandler.process(&response(503, &[])).unwrap();
        assert_eq!(signal.kind, SignalKind::Backoff);
        assert_eq!(signal.retry_after, Duration::from_secs(10));
    }

    #[test]
    fn test_retry_after_header_overrides_default() {
        let signal = HttpStatusHandler
            .process(&response(429, &[("Retry-After", "120")]))
            .unwrap();
        assert_eq!(signal.retry_after, Duration::from_secs(120));
        assert_eq!(signal.raw.get("Retry-After").map(String::as_str), Some("120"));

        let until = signal.block_until.unwrap();
        let expected = SystemTime::now() + Duration::from_secs(120);
        let drift = expected
            .duration_since(until)
            .unwrap_or_else(|_| until.duration_since(expected).unwrap());
        assert!(drift < Duration::from_secs(2));
    }

    #[test]
    fn test_retry_after_http_date() {
        let signal = HttpStatusHandler
            .process(&response(
                503,
                &[("Retry-After", "Fri, 15 May 4099 15:34:21 GMT")],
            ))
            .unwrap();
        assert!(signal.retry_after > Duration::from_secs(3600));
        assert!(signal.block_until.is_some());
    }

    #[test]
    fn test_retry_after_zero_opens_no_block_window() {
        let signal = HttpStatusHandler
            .process(&response(429, &[("Retry-After", "0")]))
            .unwrap();
        assert_eq!(signal.retry_after, Duration::ZERO);
        assert!(signal.block_until.is_none());
    }

    #[test]
    fn test_unparseable_retry_after_falls_back_to_default() {
        let signal = HttpStatusHandler
            .process(&response(429, &[("Retry-After", "soon")]))
            .unwrap();
        assert_eq!(signal.retry_after, Duration::from_secs(5));
    }
}
