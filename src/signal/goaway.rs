use std::error::Error as _;
use std::fmt::Write as _;
use std::time::{Duration, SystemTime};

use reqwest::Response;

use super::{Signal, SignalHandler, SignalKind};

/// Decodes connection-level overload signals: HTTP/2 GOAWAY frames and
/// connection resets. Both arrive as transport errors rather than responses,
/// so only [`SignalHandler::process_error`] produces anything here.
///
/// Detection matches substrings over the error chain's display output, since
/// the underlying client surfaces neither condition as a dedicated variant.
/// TODO: consume hyper's typed GOAWAY error once reqwest exposes it.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoAwayHandler;

impl SignalHandler for GoAwayHandler {
    fn name(&self) -> &'static str {
        "goaway"
    }

    fn priority(&self) -> u32 {
        5
    }

    fn process(&self, _response: &Response) -> Option<Signal> {
        None
    }

    fn process_error(&self, error: &reqwest::Error) -> Option<Signal> {
        classify(&error_chain_text(error))
    }
}

fn classify(text: &str) -> Option<Signal> {
    if text.contains("GOAWAY") {
        let mut signal = Signal::new("http2", SignalKind::Backoff);
        signal.message = "GOAWAY received".to_owned();
        signal.retry_after = Duration::from_secs(5);
        signal.block_until = Some(SystemTime::now() + signal.retry_after);
        return Some(signal);
    }

    if text.contains("connection reset") || text.contains("ECONNRESET") {
        let mut signal = Signal::new("connection", SignalKind::Backoff);
        signal.message = "Connection reset".to_owned();
        signal.retry_after = Duration::from_secs(2);
        return Some(signal);
    }

    None
}

/// Renders the error and every source below it, so markers buried in wrapped
/// hyper/io errors are still visible.
fn error_chain_text(error: &reqwest::Error) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(err) = source {
        let _ = write!(text, ": {err}");
        source = err.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::response;

    #[test]
    fn test_goaway_marker() {
        let signal = classify("error sending request: http2: server sent GOAWAY").unwrap();
        assert_eq!(signal.source, "http2");
        assert_eq!(signal.kind, SignalKind::Backoff);
        assert_eq!(signal.message, "GOAWAY received");
        assert_eq!(signal.retry_after, Duration::from_secs(5));
        assert!(signal.block_until.is_some());
    }

    #[test]
    fn test_connection_reset_marker() {
        let signal = classify("error: connection reset by peer").unwrap();
        assert_eq!(signal.source, "connection");
        assert_eq!(signal.kind, SignalKind::Backoff);
        assert_eq!(signal.retry_after, Duration::from_secs(2));
        assert!(signal.block_until.is_none());
    }

    #[test]
    fn test_econnreset_marker() {
        let signal = classify("io error: ECONNRESET").unwrap();
        assert_eq!(signal.source, "connection");
    }

    #[test]
    fn test_goaway_wins_over_reset_in_same_chain() {
        let signal = classify("GOAWAY: connection reset").unwrap();
        assert_eq!(signal.source, "http2");
    }

    #[test]
    fn test_unrelated_errors_produce_nothing() {
        assert!(classify("dns error: not found").is_none());
        assert!(classify("timed out").is_none());
    }

    #[test]
    fn test_process_never_signals_on_responses() {
        assert!(GoAwayHandler.process(&response(200, &[])).is_none());
        assert!(GoAwayHandler.process(&response(503, &[])).is_none());
    }
}
