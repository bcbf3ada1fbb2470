use reqwest::Response;

use super::headers::{first_header, parse_limit_value, parse_reset};
use super::{Signal, SignalHandler, SignalKind};

/// Decodes the common rate limit header families. HTTP header lookups are
/// case-insensitive, so one handler covers:
///
/// - `X-RateLimit-Limit` / `-Remaining` / `-Reset` (GitHub, Twitter, many others)
/// - `RateLimit-Limit` / `-Remaining` / `-Reset` (IETF draft standard)
/// - `CF-RateLimit-*` (Cloudflare)
///
/// See:
/// - <https://datatracker.ietf.org/doc/draft-ietf-httpapi-ratelimit-headers/>
/// - <https://docs.github.com/en/rest/overview/resources-in-the-rest-api#rate-limiting>
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimitHandler;

const LIMIT_NAMES: [&str; 3] = ["X-RateLimit-Limit", "RateLimit-Limit", "CF-RateLimit-Limit"];
const REMAINING_NAMES: [&str; 3] = [
    "X-RateLimit-Remaining",
    "RateLimit-Remaining",
    "CF-RateLimit-Remaining",
];
const RESET_NAMES: [&str; 3] = ["X-RateLimit-Reset", "RateLimit-Reset", "CF-RateLimit-Reset"];

impl SignalHandler for RateLimitHandler {
    fn name(&self) -> &'static str {
        "ratelimit"
    }

    fn priority(&self) -> u32 {
        20
    }

    fn process(&self, response: &Response) -> Option<Signal> {
        let headers = response.headers();
        let mut signal = Signal::new("ratelimit", SignalKind::Capacity);

        if let Some(value) = first_header(headers, &LIMIT_NAMES) {
            signal.raw.insert("Limit".to_owned(), value.to_owned());
            signal.limit = parse_limit_value(value);
        }

        if let Some(value) = first_header(headers, &REMAINING_NAMES) {
            signal.raw.insert("Remaining".to_owned(), value.to_owned());
            signal.remaining = value.parse().ok();
        }

        if let Some(value) = first_header(headers, &RESET_NAMES) {
            signal.raw.insert("Reset".to_owned(), value.to_owned());
            if let Some((until, retry_after)) = parse_reset(value) {
                signal.block_until = Some(until);
                signal.retry_after = retry_after;
            }
        }

        // Informational only; captured for diagnostics.
        if let Some(value) = first_header(headers, &["X-RateLimit-Used"]) {
            signal.raw.insert("Used".to_owned(), value.to_owned());
        }
        if let Some(value) = first_header(headers, &["X-RateLimit-Resource"]) {
            signal.raw.insert("Resource".to_owned(), value.to_owned());
        }
        if let Some(value) = first_header(headers, &["RateLimit-Policy"]) {
            signal.raw.insert("Policy".to_owned(), value.to_owned());
        }

        if signal.raw.is_empty() {
            return None;
        }

        // An absent Remaining counts as exhausted when a limit was advertised.
        let limit = signal.limit.unwrap_or(0);
        let remaining = signal.remaining.unwrap_or(0);

        if remaining <= 0 && limit > 0 {
            signal.kind = SignalKind::Block;
            signal.message = "Rate limit exceeded".to_owned();
        } else if limit > 0 && remaining < limit / 10 {
            signal.kind = SignalKind::RateLimit;
            signal.message = "Rate limit approaching".to_owned();
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            {
                signal.suggested_concurrency = (remaining * 10 / limit).max(1) as usize;
            }
        }

        Some(signal)
    }
}
