//! Destination keying: how requests are partitioned into independent
//! concurrency pools.
//!
//! Every request is mapped to a [`DestinationKey`] by a [`KeyFn`]. Requests
//! sharing a key share one state record and one semaphore; requests with
//! different keys are fully independent. The default, [`host_key`], groups by
//! `scheme://host[:port]`. [`path_prefix_key`] and [`exact_path_key`] offer
//! finer partitions for hosts that route path prefixes to separate backends.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use url::Url;

/// A type-safe destination identifier for concurrency grouping.
///
/// Keys are compared byte-for-byte; the URL parser already lowercases
/// hostnames, so keys produced by the built-in key functions are consistent
/// across differently-cased URLs.
///
/// # Examples
///
/// ```
/// use headroom::key::host_key;
/// use url::Url;
///
/// let url = Url::parse("https://api.github.com/repos/user/repo").unwrap();
/// assert_eq!(host_key(&url).as_str(), "https://api.github.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DestinationKey(String);

impl DestinationKey {
    /// Get the key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the key as an owned String
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DestinationKey {
    fn from(key: String) -> Self {
        DestinationKey(key)
    }
}

impl From<&str> for DestinationKey {
    fn from(key: &str) -> Self {
        DestinationKey(key.to_owned())
    }
}

/// A pluggable mapping from request URL to destination key
pub type KeyFn = Arc<dyn Fn(&Url) -> DestinationKey + Send + Sync>;

/// The default key function: groups by `scheme://host[:port]`.
///
/// All paths on the same authority share one concurrency pool. The port is
/// included only when it differs from the scheme default, mirroring how the
/// URL parser normalizes authorities.
#[must_use]
pub fn host_key(url: &Url) -> DestinationKey {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => DestinationKey(format!("{}://{host}:{port}", url.scheme())),
        None => DestinationKey(format!("{}://{host}", url.scheme())),
    }
}

/// Returns a [`KeyFn`] that groups requests by the first `n` path segments.
///
/// Useful when different path prefixes map to different backend deployments.
/// With `n = 1`:
///
/// - `api.example.com/admin/users` -> `https://api.example.com/admin`
/// - `api.example.com/admin/config` -> `https://api.example.com/admin`
/// - `api.example.com/sales/orders` -> `https://api.example.com/sales`
///
/// With `n = 0` this is equivalent to [`host_key`].
#[must_use]
pub fn path_prefix_key(n: usize) -> KeyFn {
    Arc::new(move |url: &Url| {
        let base = host_key(url);
        if n == 0 {
            return base;
        }

        let segments: Vec<&str> = url
            .path()
            .split('/')
            .filter(|segment| !segment.is_empty())
            .take(n)
            .collect();

        if segments.is_empty() {
            return base;
        }

        DestinationKey(format!("{base}/{}", segments.join("/")))
    })
}

/// Groups requests by the exact request path.
///
/// This gives the most granular control but may create many concurrency
/// pools on hosts with high path cardinality.
#[must_use]
pub fn exact_path_key(url: &Url) -> DestinationKey {
    DestinationKey(format!("{}{}", host_key(url), url.path()))
}
