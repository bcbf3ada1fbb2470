//! `headroom` is a capacity-aware HTTP client library. It enforces
//! per-destination concurrency limits driven by the back-pressure signals
//! servers advertise in their responses: `RateLimit-*` header families,
//! `429`/`503`/`420` with `Retry-After`, and application-level
//! `X-Capacity-*` headers.
//!
//! "Hello world" example:
//!
//! ```no_run
//! use headroom::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!   let response = headroom::get("https://api.github.com/octocat").await?;
//!   println!("{}", response.status());
//!   Ok(())
//! }
//! ```
//!
//! For more specific use-cases you can build a client yourself, using the
//! `ClientBuilder` which grants full flexibility over the signal handlers,
//! concurrency bounds, and observer callbacks:
//!
//! ```no_run
//! use headroom::{ClientBuilder, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!   let client = ClientBuilder::new()
//!       .with_all()
//!       .with_concurrency(10, 1, 100)
//!       .on_state_change(|key, state| {
//!           eprintln!("{key} now at concurrency {}", state.current_concurrency);
//!       })
//!       .build();
//!
//!   let response = client.get("https://api.github.com/octocat").await?;
//!   assert!(response.status().is_success());
//!   Ok(())
//! }
//! ```
//!
//! Requests to distinct destinations never contend: each destination key
//! gets its own state record and its own concurrency pool, created lazily
//! on first use. The transport never retries and never queues beyond the
//! semaphore; a blocked or failed request surfaces immediately.
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_crate_dependencies,
    unused_extern_crates,
    variant_size_differences,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![deny(missing_docs)]
#![allow(clippy::module_name_repetitions)]

#[cfg(test)]
#[macro_use]
pub mod test_utils;

mod client;
mod config;
mod error;
mod semaphore;
mod state;
mod transport;

/// Destination keying: partitioning requests into independent pools
pub mod key;

/// Signal handlers: decoders of server back-pressure vocabularies
pub mod signal;

#[doc(inline)]
pub use crate::{
    // Constants get exposed so that callers can reference the same defaults
    client::{
        Client, ClientBuilder, get,
    },
    config::{
        DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_INITIAL_CONCURRENCY, DEFAULT_MAX_CONCURRENCY,
        DEFAULT_MIN_CONCURRENCY, DEFAULT_STATE_EXPIRY, DEFAULT_USER_AGENT, SignalCallback,
        StateCallback, TransportConfig,
    },
    error::{CapacityError, ErrorKind, Result},
    key::{DestinationKey, KeyFn},
    semaphore::{Semaphore, SemaphorePermit},
    signal::{Signal, SignalHandler, SignalKind, default_handlers},
    state::{DestinationState, Status},
    transport::{SignalAction, Stats, Transport},
};
