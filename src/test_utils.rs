//! Helpers shared by the unit tests.

use http::HeaderName;

#[macro_export]
/// Creates a mock web server which responds to GET requests with a
/// predefined status. Further response template method calls can be chained
/// on, e.g. `mock_server!(200, insert_header("Retry-After", "2"))`.
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new($status);
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::method("GET")).respond_with(template).mount(&mock_server).await;
        mock_server
    }};
}

/// Builds a `reqwest::Response` with the given status and headers, for
/// exercising signal handlers without a server round-trip.
///
/// # Panics
///
/// Panics on invalid status codes or header values, so it should only be
/// used for testing.
pub(crate) fn response(status: u16, headers: &[(&str, &str)]) -> reqwest::Response {
    let mut builder = http::Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(HeaderName::try_from(*name).unwrap(), *value);
    }
    reqwest::Response::from(builder.body("").unwrap())
}
