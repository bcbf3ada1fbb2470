//! Per-destination capacity state.
//!
//! One [`DestinationState`] record exists per destination key. The transport
//! is the only writer of the client-side fields (`current_concurrency`,
//! `blocked_until`, `clamped`); the server-reported fields are refreshed in
//! bulk from `X-Capacity-*` response headers via [`DestinationState::update`].

use std::time::{Duration, Instant, SystemTime};

use http::HeaderMap;
use serde::Serialize;

/// The full set of recognized `X-Capacity-*` response headers.
pub(crate) const CAPACITY_HEADERS: [&str; 12] = [
    "X-Capacity-Status",
    "X-Capacity-Tasks-Running",
    "X-Capacity-Tasks-Desired",
    "X-Capacity-Tasks-Pending",
    "X-Capacity-Cluster-Max-Concurrency",
    "X-Capacity-Suggested-Concurrency",
    "X-Capacity-State-Age",
    "X-Capacity-Worker-Active",
    "X-Capacity-Worker-Available",
    "X-Capacity-Worker-Load-Factor",
    "X-Capacity-Latency-P99",
    "X-Capacity-Latency-Health",
];

/// The server's reported capacity status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// No status reported yet, or the reported value was not recognized
    #[default]
    Unknown,
    /// Normal operation
    Healthy,
    /// Elevated load, still accepting work
    Busy,
    /// The server is at its concurrency limit
    AtLimit,
    /// The server is shedding load
    Degraded,
    /// The backend is adding workers
    ScalingUp,
    /// The backend is removing workers
    ScalingDown,
}

impl Status {
    /// Returns true if the status indicates normal operation
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy | Self::ScalingUp | Self::ScalingDown)
    }

    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Busy => "busy",
            Self::AtLimit => "at_limit",
            Self::Degraded => "degraded",
            Self::ScalingUp => "scaling_up",
            Self::ScalingDown => "scaling_down",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Status {
    fn from(value: &str) -> Self {
        match value {
            "healthy" => Self::Healthy,
            "busy" => Self::Busy,
            "at_limit" => Self::AtLimit,
            "degraded" => Self::Degraded,
            "scaling_up" => Self::ScalingUp,
            "scaling_down" => Self::ScalingDown,
            _ => Self::Unknown,
        }
    }
}

/// Capacity state for a single destination.
///
/// Observers receive clones of this record; the live copy stays inside the
/// transport behind its lock.
#[derive(Debug, Clone)]
pub struct DestinationState {
    /// Server-reported capacity status
    pub status: Status,
    /// Tasks the backend currently runs
    pub tasks_running: i64,
    /// Tasks the backend wants to run
    pub tasks_desired: i64,
    /// Tasks queued behind the running set
    pub tasks_pending: i64,
    /// Cluster-wide concurrency ceiling reported by the server
    pub cluster_max_concurrency: i64,
    /// Concurrency the server last suggested; 0 means no suggestion
    pub suggested_concurrency: usize,
    /// Age of the server's own state snapshot, in seconds
    pub state_age: i64,
    /// Active workers reported by the server
    pub worker_active: i64,
    /// Available workers reported by the server
    pub worker_available: i64,
    /// Worker load factor reported by the server
    pub worker_load_factor: f64,
    /// 99th percentile latency reported by the server
    pub latency_p99: f64,
    /// Latency health score reported by the server
    pub latency_health: f64,

    /// When the server-reported fields were last refreshed
    pub last_updated: Instant,
    /// The concurrency limit the transport currently enforces
    pub current_concurrency: usize,
    /// Advisory block window; the gate does not enforce it
    pub blocked_until: Option<SystemTime>,
    /// True when the server's suggestion was below the configured floor and
    /// the floor was enforced instead. Lets users detect a backend asking
    /// for less concurrency than they are willing to grant.
    pub clamped: bool,
}

impl DestinationState {
    /// Create a new state with the given starting concurrency
    #[must_use]
    pub fn new(initial_concurrency: usize) -> Self {
        Self {
            status: Status::Unknown,
            tasks_running: 0,
            tasks_desired: 0,
            tasks_pending: 0,
            cluster_max_concurrency: 0,
            suggested_concurrency: 0,
            state_age: 0,
            worker_active: 0,
            worker_available: 0,
            worker_load_factor: 0.0,
            latency_p99: 0.0,
            latency_health: 0.0,
            last_updated: Instant::now(),
            current_concurrency: initial_concurrency,
            blocked_until: None,
            clamped: false,
        }
    }

    /// Refresh the server-reported fields from `X-Capacity-*` response
    /// headers.
    ///
    /// Malformed numeric values leave the corresponding field untouched, and
    /// a negative suggested concurrency is rejected. Does nothing (and keeps
    /// `last_updated`) when no capacity header is present.
    pub(crate) fn update(&mut self, headers: &HeaderMap) {
        if !CAPACITY_HEADERS
            .iter()
            .any(|name| headers.contains_key(*name))
        {
            return;
        }

        if let Some(status) = header_str(headers, "X-Capacity-Status") {
            self.status = Status::from(status);
        }
        if let Some(v) = header_int(headers, "X-Capacity-Tasks-Running") {
            self.tasks_running = v;
        }
        if let Some(v) = header_int(headers, "X-Capacity-Tasks-Desired") {
            self.tasks_desired = v;
        }
        if let Some(v) = header_int(headers, "X-Capacity-Tasks-Pending") {
            self.tasks_pending = v;
        }
        if let Some(v) = header_int(headers, "X-Capacity-Cluster-Max-Concurrency") {
            self.cluster_max_concurrency = v;
        }
        if let Some(v) = header_int(headers, "X-Capacity-Suggested-Concurrency")
            && let Ok(suggested) = usize::try_from(v)
        {
            self.suggested_concurrency = suggested;
        }
        if let Some(v) = header_int(headers, "X-Capacity-State-Age") {
            self.state_age = v;
        }
        if let Some(v) = header_int(headers, "X-Capacity-Worker-Active") {
            self.worker_active = v;
        }
        if let Some(v) = header_int(headers, "X-Capacity-Worker-Available") {
            self.worker_available = v;
        }
        if let Some(v) = header_float(headers, "X-Capacity-Worker-Load-Factor") {
            self.worker_load_factor = v;
        }
        if let Some(v) = header_float(headers, "X-Capacity-Latency-P99") {
            self.latency_p99 = v;
        }
        if let Some(v) = header_float(headers, "X-Capacity-Latency-Health") {
            self.latency_health = v;
        }

        self.last_updated = Instant::now();
    }

    /// Returns true while the advisory block window is open
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.blocked_until
            .is_some_and(|until| SystemTime::now() < until)
    }

    /// Returns true if the server-reported fields have not been refreshed
    /// within `expiry`
    #[must_use]
    pub fn is_stale(&self, expiry: Duration) -> bool {
        self.last_updated.elapsed() > expiry
    }

    /// The server's suggested concurrency clamped into `[min, max]`,
    /// falling back to the currently enforced value when the server has not
    /// suggested one
    #[must_use]
    pub fn suggested_concurrency_clamped(&self, min: usize, max: usize) -> usize {
        let mut suggested = self.suggested_concurrency;
        if suggested == 0 {
            suggested = self.current_concurrency;
        }
        if suggested < min {
            suggested = min;
        }
        if suggested > max {
            suggested = max;
        }
        suggested
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

fn header_int(headers: &HeaderMap, name: &str) -> Option<i64> {
    header_str(headers, name)?.parse().ok()
}

fn header_float(headers: &HeaderMap, name: &str) -> Option<f64> {
    header_str(headers, name)?.parse().ok()
}
