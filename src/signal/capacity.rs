use reqwest::Response;

use super::{Signal, SignalHandler, SignalKind};
use crate::state::{CAPACITY_HEADERS, Status};

/// Decodes the application-level `X-Capacity-*` header family.
///
/// These headers carry fine-grained capacity signaling from backends that
/// know their own load: a suggested concurrency, task and worker gauges, and
/// an overall status. A status of `at_limit` upgrades the signal to a rate
/// limit, `degraded` to a backoff; everything else stays informational.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapacityHandler;

impl SignalHandler for CapacityHandler {
    fn name(&self) -> &'static str {
        "capacity"
    }

    fn priority(&self) -> u32 {
        100
    }

    fn process(&self, response: &Response) -> Option<Signal> {
        let headers = response.headers();
        let mut signal = Signal::new("capacity", SignalKind::Capacity);

        for name in CAPACITY_HEADERS {
            if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
                signal.raw.insert(name.to_owned(), value.to_owned());
            }
        }

        if signal.raw.is_empty() {
            return None;
        }

        if let Some(value) = signal.raw.get("X-Capacity-Suggested-Concurrency")
            && let Ok(suggested) = value.parse::<i64>()
            && let Ok(suggested) = usize::try_from(suggested)
        {
            signal.suggested_concurrency = suggested;
        }

        if let Some(status) = signal.raw.get("X-Capacity-Status") {
            signal.message = status.clone();
            match Status::from(status.as_str()) {
                Status::AtLimit => signal.kind = SignalKind::RateLimit,
                Status::Degraded => signal.kind = SignalKind::Backoff,
                _ => {}
            }
        }

        Some(signal)
    }
}
