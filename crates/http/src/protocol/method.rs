use http::Method;

/// The verbs a request may carry. Anything else is rejected during normalization.
pub const STANDARD_METHODS: [Method; 9] = [
    Method::GET,
    Method::HEAD,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::CONNECT,
    Method::OPTIONS,
    Method::TRACE,
    Method::PATCH,
];

/// Matches `raw` case-insensitively against [`STANDARD_METHODS`].
pub fn parse_method(raw: &str) -> Option<Method> {
    let raw = raw.trim();
    STANDARD_METHODS.iter().find(|method| method.as_str().eq_ignore_ascii_case(raw)).cloned()
}
