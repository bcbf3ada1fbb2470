//! Parsing helpers for rate-limit style header values.
//! Covers `Retry-After` per
//! [RFC 7231 section 7.1.3](https://www.rfc-editor.org/rfc/rfc7231#section-7.1.3)
//! and the reset/limit conventions of the
//! [IETF draft](https://datatracker.ietf.org/doc/draft-ietf-httpapi-ratelimit-headers/).

use std::time::{Duration, SystemTime};

use http::HeaderMap;

/// Values above this are read as Unix epoch seconds rather than a
/// seconds-from-now delta.
const EPOCH_CUTOFF: i64 = 1_000_000_000;

/// Parse a `Retry-After` value: either delay-seconds or an HTTP-date.
///
/// An HTTP-date in the past yields `Duration::ZERO`. Returns `None` for
/// values that are neither.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    httpdate::parse_http_date(value).ok().map(|date| {
        date.duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
    })
}

/// Parse a reset value, which can be either a Unix timestamp
/// (e.g. `"1640000000"`) or seconds until reset (e.g. `"60"`).
///
/// Returns the absolute deadline together with the remaining wait, clamped
/// to zero for deadlines already in the past.
pub(crate) fn parse_reset(value: &str) -> Option<(SystemTime, Duration)> {
    let ts = value.parse::<i64>().ok().filter(|ts| *ts >= 0)?;

    if ts > EPOCH_CUTOFF {
        #[allow(clippy::cast_sign_loss)]
        let until = SystemTime::UNIX_EPOCH + Duration::from_secs(ts as u64);
        let retry_after = until
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);
        Some((until, retry_after))
    } else {
        #[allow(clippy::cast_sign_loss)]
        let retry_after = Duration::from_secs(ts as u64);
        Some((SystemTime::now() + retry_after, retry_after))
    }
}

/// Parse a limit value, which can be simple (`"100"`) or carry IETF draft
/// policy details (`"100, 100;window=60"`). Takes the first numeric run
/// before any comma, semicolon, or space.
pub(crate) fn parse_limit_value(value: &str) -> Option<i64> {
    let end = value
        .find([',', ';', ' '])
        .unwrap_or(value.len());
    value[..end].parse().ok()
}

/// Return the first non-empty header value from the list of names.
pub(crate) fn first_header<'a>(headers: &'a HeaderMap, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .filter_map(|name| headers.get(*name)?.to_str().ok())
        .find(|value| !value.is_empty())
}
