//! The capacity-aware request interception layer.
//!
//! [`Transport`] keys each request to a destination, gates it through that
//! destination's semaphore, executes the underlying round-trip, runs the
//! signal-handler pipeline over the response, and applies the fused
//! [`SignalAction`] to the destination's state and semaphore.
//!
//! Per request the flow is:
//!
//! ```text
//! URL -> key -> gate(semaphore) -> round-trip -> handlers(response)
//!     -> action -> state/semaphore updates + callbacks -> response
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;
use http::HeaderValue;
use http::header::USER_AGENT;
use reqwest::{Request, Response};
use serde::Serialize;
use serde::ser::SerializeStruct;
use tokio::time::timeout;

use crate::config::TransportConfig;
use crate::error::{CapacityError, ErrorKind, Result};
use crate::key::{DestinationKey, host_key};
use crate::semaphore::Semaphore;
use crate::signal::Signal;
use crate::state::{DestinationState, Status};

/// A single destination's live record: the enforced capacity state and the
/// semaphore that gates its requests.
#[derive(Debug)]
struct Destination {
    state: RwLock<DestinationState>,
    semaphore: Semaphore,
}

/// The fused effect of all signals from one response on one destination
#[derive(Debug, Clone, Default)]
pub struct SignalAction {
    /// Concurrency should change
    pub adjust_concurrency: bool,
    /// The proposed new concurrency (unclamped)
    pub new_concurrency: usize,

    /// Requests should be blocked
    pub block: bool,
    /// Latest end of all contributing block windows
    pub block_until: Option<SystemTime>,
    /// Longest of all contributing retry waits
    pub retry_after: Duration,

    /// At least one signal asked for backoff
    pub backoff: bool,

    /// All signals that contributed, in priority order
    pub signals: Vec<Signal>,
}

/// Fold a priority-ordered signal list into one action.
///
/// Block windows combine by maximum; rate-limit and backoff suggestions by
/// minimum (most conservative wins); capacity suggestions are adopted only
/// when nothing proposed a concurrency earlier. A rate-limit or backoff
/// signal that carries a block window (a 429 or 503 with `Retry-After`)
/// contributes it the same way a block signal does.
pub(crate) fn aggregate(signals: Vec<Signal>) -> SignalAction {
    use crate::signal::SignalKind;

    let mut action = SignalAction::default();

    for signal in &signals {
        match signal.kind {
            SignalKind::Block => {
                action.block = true;
                merge_block_window(&mut action, signal);
            }
            SignalKind::RateLimit | SignalKind::Backoff => {
                if signal.suggested_concurrency > 0
                    && (!action.adjust_concurrency
                        || signal.suggested_concurrency < action.new_concurrency)
                {
                    action.adjust_concurrency = true;
                    action.new_concurrency = signal.suggested_concurrency;
                }
                if signal.kind == SignalKind::Backoff {
                    action.backoff = true;
                }
                if signal.block_until.is_some() {
                    action.block = true;
                    merge_block_window(&mut action, signal);
                }
            }
            SignalKind::Capacity => {
                if signal.suggested_concurrency > 0 && !action.adjust_concurrency {
                    action.adjust_concurrency = true;
                    action.new_concurrency = signal.suggested_concurrency;
                }
            }
        }
    }

    action.signals = signals;
    action
}

/// Widen the action's block window to cover the signal's: latest deadline
/// wins, longest retry wait wins.
fn merge_block_window(action: &mut SignalAction, signal: &Signal) {
    if let Some(until) = signal.block_until
        && action.block_until.is_none_or(|current| until > current)
    {
        action.block_until = Some(until);
    }
    if signal.retry_after > action.retry_after {
        action.retry_after = signal.retry_after;
    }
}

/// Point-in-time statistics for a single destination
#[derive(Debug, Clone)]
pub struct Stats {
    /// The concurrency limit currently enforced
    pub current_concurrency: usize,
    /// Slots currently claimed
    pub in_use: usize,
    /// Slots currently free
    pub available: usize,
    /// Requests currently waiting for a slot
    pub waiting: usize,
    /// Last server-reported status
    pub status: Status,
    /// When the server-reported state was last refreshed
    pub last_updated: Instant,
}

impl Serialize for Stats {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("Stats", 6)?;
        s.serialize_field("current_concurrency", &self.current_concurrency)?;
        s.serialize_field("in_use", &self.in_use)?;
        s.serialize_field("available", &self.available)?;
        s.serialize_field("waiting", &self.waiting)?;
        s.serialize_field("status", &self.status)?;
        s.serialize_field("last_updated_age_secs", &self.last_updated.elapsed().as_secs())?;
        s.end()
    }
}

/// The request interception layer enforcing per-destination concurrency.
///
/// Destinations are created lazily on first use and live for the transport's
/// lifetime. Safe for concurrent use from any number of tasks; parallelism
/// within one destination is bounded by its semaphore, parallelism across
/// destinations is independent.
#[derive(Debug)]
pub struct Transport {
    config: TransportConfig,
    http: reqwest::Client,
    destinations: DashMap<DestinationKey, Arc<Destination>>,
}

impl Transport {
    /// Create a new transport. Zero numeric configuration values are
    /// replaced with their defaults, and handlers are sorted by ascending
    /// priority once, here.
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        let mut config = config.with_defaults();
        config.signal_handlers.sort_by_key(|handler| handler.priority());

        let http = config.http_client.clone().unwrap_or_default();

        Self {
            config,
            http,
            destinations: DashMap::new(),
        }
    }

    /// Execute a request through the destination's concurrency gate.
    ///
    /// The slot is released as soon as the underlying call returns, before
    /// the response body is read. Back-pressure responses (429, 503) are not
    /// errors: the response is returned unchanged after state was updated.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::Capacity`] when no slot became free within the
    ///   configured acquire timeout
    /// - [`ErrorKind::Request`] with the underlying error, unchanged, when
    ///   the round-trip itself fails
    ///
    /// # Panics
    ///
    /// Panics if a destination's state lock is poisoned.
    pub async fn execute(&self, mut request: Request) -> Result<Response> {
        let key = self.key_for(request.url());
        let destination = self.destination(&key);

        self.inject_user_agent(&mut request);

        let permit = match timeout(self.config.acquire_timeout, destination.semaphore.acquire())
            .await
        {
            Ok(permit) => permit,
            Err(elapsed) => {
                return Err(ErrorKind::Capacity(Box::new(CapacityError {
                    op: "acquire",
                    key,
                    source: elapsed,
                    state: destination.state.read().unwrap().clone(),
                })));
            }
        };

        let result = self.http.execute(request).await;
        drop(permit);

        match result {
            Ok(response) => {
                self.observe(&key, &destination, &response);
                Ok(response)
            }
            Err(error) => {
                if self.config.goaway_handling {
                    self.observe_error(&key, &destination, &error);
                }
                Err(ErrorKind::Request(error))
            }
        }
    }

    /// Snapshot the capacity state for a destination, or `None` if no
    /// request has been keyed to it yet
    ///
    /// # Panics
    ///
    /// Panics if the destination's state lock is poisoned.
    #[must_use]
    pub fn state(&self, key: &DestinationKey) -> Option<DestinationState> {
        self.destinations
            .get(key)
            .map(|destination| destination.state.read().unwrap().clone())
    }

    /// Snapshot statistics for every known destination
    ///
    /// # Panics
    ///
    /// Panics if a destination's state lock is poisoned.
    #[must_use]
    pub fn stats(&self) -> HashMap<DestinationKey, Stats> {
        self.destinations
            .iter()
            .map(|entry| {
                let destination = entry.value();
                let state = destination.state.read().unwrap();
                let stats = Stats {
                    current_concurrency: state.current_concurrency,
                    in_use: destination.semaphore.in_use(),
                    available: destination.semaphore.available(),
                    waiting: destination.semaphore.waiting(),
                    status: state.status,
                    last_updated: state.last_updated,
                };
                (entry.key().clone(), stats)
            })
            .collect()
    }

    /// The configuration this transport runs with (defaults applied)
    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub(crate) fn key_for(&self, url: &url::Url) -> DestinationKey {
        match &self.config.key_fn {
            Some(key_fn) => key_fn(url),
            None => host_key(url),
        }
    }

    /// Look up or lazily create the record for a destination. The entry API
    /// resolves the race where two tasks create the same destination at
    /// once: exactly one record survives.
    fn destination(&self, key: &DestinationKey) -> Arc<Destination> {
        if let Some(existing) = self.destinations.get(key) {
            return existing.clone();
        }

        let mut initial = self.config.initial_concurrency;
        if initial < self.config.min_concurrency {
            initial = self.config.min_concurrency;
        }
        if initial > self.config.max_concurrency {
            initial = self.config.max_concurrency;
        }

        let destination = Arc::new(Destination {
            state: RwLock::new(DestinationState::new(initial)),
            semaphore: Semaphore::new(initial),
        });

        match self.destinations.entry(key.clone()) {
            // Another task created it first; use theirs.
            dashmap::mapref::entry::Entry::Occupied(entry) => entry.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(entry) => entry.insert(destination).clone(),
        }
    }

    /// Run the handler pipeline over a completed response and apply the
    /// fused action.
    fn observe(&self, key: &DestinationKey, destination: &Destination, response: &Response) {
        if self.config.signal_handlers.is_empty() {
            return;
        }

        let mut signals = Vec::new();
        for handler in &self.config.signal_handlers {
            if let Some(signal) = handler.process(response) {
                log::trace!(
                    "{} signal ({}) from handler {} for {key}",
                    signal.kind,
                    signal.source,
                    handler.name(),
                );
                if let Some(on_signal) = &self.config.on_signal {
                    on_signal(key, &signal);
                }
                signals.push(signal);
            }
        }

        // No signals: current limits are kept as-is.
        if signals.is_empty() {
            return;
        }

        let action = aggregate(signals);
        self.apply(key, destination, &action);

        destination
            .state
            .write()
            .unwrap()
            .update(response.headers());
    }

    /// Run the error-path handlers over a failed round-trip. The error is
    /// still returned to the caller unchanged; only block/backoff bookkeeping
    /// happens here.
    fn observe_error(&self, key: &DestinationKey, destination: &Destination, error: &reqwest::Error) {
        let mut signals = Vec::new();
        for handler in &self.config.signal_handlers {
            if let Some(signal) = handler.process_error(error) {
                log::debug!(
                    "{} signal ({}) from handler {} for {key} on transport error",
                    signal.kind,
                    signal.source,
                    handler.name(),
                );
                if let Some(on_signal) = &self.config.on_signal {
                    on_signal(key, &signal);
                }
                signals.push(signal);
            }
        }

        if signals.is_empty() {
            return;
        }

        let action = aggregate(signals);
        self.apply(key, destination, &action);
    }

    /// Apply a fused action: record the block window, then adjust the
    /// enforced concurrency within the configured bounds.
    fn apply(&self, key: &DestinationKey, destination: &Destination, action: &SignalAction) {
        if action.block {
            log::debug!("blocking {key} until {:?}", action.block_until);
            destination.state.write().unwrap().blocked_until = action.block_until;
        }

        if action.adjust_concurrency && action.new_concurrency > 0 {
            let clamped = action.new_concurrency < self.config.min_concurrency;
            let mut suggested = action.new_concurrency;
            if suggested < self.config.min_concurrency {
                suggested = self.config.min_concurrency;
            }
            if suggested > self.config.max_concurrency {
                suggested = self.config.max_concurrency;
            }

            let changed = {
                let mut state = destination.state.write().unwrap();
                state.clamped = clamped;
                if suggested == state.current_concurrency {
                    false
                } else {
                    state.current_concurrency = suggested;
                    true
                }
            };

            if changed {
                destination.semaphore.resize(suggested);
                log::debug!("adjusted {key} concurrency to {suggested}");

                if let Some(on_state_change) = &self.config.on_state_change {
                    let snapshot = destination.state.read().unwrap().clone();
                    on_state_change(key, &snapshot);
                }
            }
        }
    }

    /// Prepend the configured User-Agent to the request's existing one, or
    /// set it if absent. An empty configured agent disables injection.
    fn inject_user_agent(&self, request: &mut Request) {
        if self.config.user_agent.is_empty() {
            return;
        }

        let headers = request.headers_mut();
        let value = match headers.get(USER_AGENT).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{} {existing}", self.config.user_agent),
            None => self.config.user_agent.clone(),
        };

        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(USER_AGENT, value);
        }
    }
}
