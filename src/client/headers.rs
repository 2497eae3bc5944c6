use regex::{Regex, RegexBuilder};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use thiserror::Error;

/// Headers that describe the inbound connection or the inbound body's framing. Outbound calls
/// carry a different body (a `$response` edge forwards the node output), so these are never
/// copied even when a pattern matches them.
const NEVER_PROPAGATED: &[&str] = &[
    "connection",
    "content-encoding",
    "content-length",
    "expect",
    "host",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_never_propagated(name: &HeaderName) -> bool {
    NEVER_PROPAGATED.contains(&name.as_str())
}

#[derive(Error, Debug)]
#[error("failed to compile header pattern '{pattern}': {source}")]
pub struct HeaderPatternError {
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

/// Selects which inbound headers are forwarded to every downstream call
#[derive(Debug, Clone, Default)]
pub struct HeaderPropagator {
    patterns: Vec<Regex>,
}

impl HeaderPropagator {
    /// Compile a comma separated list of patterns (case-insensitive).
    ///
    /// Valid patterns are kept even when others fail; the failures are returned alongside.
    pub fn from_list(list: &str) -> (Self, Vec<HeaderPatternError>) {
        let mut patterns = Vec::new();
        let mut errors = Vec::new();

        for pattern in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(re) => patterns.push(re),
                Err(source) => errors.push(HeaderPatternError {
                    pattern: pattern.to_string(),
                    source,
                }),
            }
        }

        (Self { patterns }, errors)
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Headers to attach to outbound calls. Every matching header name is copied once with all
    /// of its values; a JSON content type is added when the inbound request carried none.
    /// Connection and body-framing headers are always dropped.
    pub fn select(&self, inbound: &HeaderMap) -> HeaderMap {
        let mut outbound = HeaderMap::new();

        for name in inbound.keys() {
            if is_never_propagated(name) {
                continue;
            }
            if self.patterns.iter().any(|p| p.is_match(name.as_str())) {
                for value in inbound.get_all(name) {
                    outbound.append(name.clone(), value.clone());
                }
            }
        }

        if !outbound.contains_key(CONTENT_TYPE) {
            outbound.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        outbound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer token"));
        headers.insert("x-request-id", HeaderValue::from_static("abc"));
        headers.append("x-tenant", HeaderValue::from_static("one"));
        headers.append("x-tenant", HeaderValue::from_static("two"));
        headers.insert("cookie", HeaderValue::from_static("secret"));
        headers
    }

    #[test]
    fn test_no_patterns_only_content_type() {
        let (propagator, errors) = HeaderPropagator::from_list("");
        assert!(errors.is_empty());
        assert!(propagator.is_empty());

        let out = propagator.select(&inbound());
        assert_eq!(out.len(), 1);
        assert_eq!(out.get(CONTENT_TYPE).unwrap(), "application/json");
    }

    #[test]
    fn test_patterns_are_case_insensitive() {
        let (propagator, _) = HeaderPropagator::from_list("Authorization, X-Request-.*");
        let out = propagator.select(&inbound());

        assert_eq!(out.get("authorization").unwrap(), "Bearer token");
        assert_eq!(out.get("x-request-id").unwrap(), "abc");
        assert!(out.get("cookie").is_none());
    }

    #[test]
    fn test_overlapping_patterns_do_not_duplicate() {
        let (propagator, _) = HeaderPropagator::from_list("x-tenant,x-.*");
        let out = propagator.select(&inbound());

        let values: Vec<_> = out.get_all("x-tenant").iter().collect();
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_invalid_pattern_is_reported_and_skipped() {
        let (propagator, errors) = HeaderPropagator::from_list("authorization,x-(");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].pattern, "x-(");

        let out = propagator.select(&inbound());
        assert!(out.contains_key("authorization"));
    }

    #[test]
    fn test_inbound_content_type_is_kept() {
        let (propagator, _) = HeaderPropagator::from_list("content-type");
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/x-ndjson"));

        let out = propagator.select(&headers);
        assert_eq!(out.get(CONTENT_TYPE).unwrap(), "application/x-ndjson");
    }

    #[test]
    fn test_framing_headers_are_never_propagated() {
        let (propagator, _) = HeaderPropagator::from_list(".*");
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("7"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("host", HeaderValue::from_static("router.local"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("content-encoding", HeaderValue::from_static("gzip"));
        headers.insert("x-trace-id", HeaderValue::from_static("abc"));

        let out = propagator.select(&headers);
        assert_eq!(out.get("x-trace-id").unwrap(), "abc");
        assert_eq!(out.get(CONTENT_TYPE).unwrap(), "application/json");
        for name in ["content-length", "transfer-encoding", "host", "connection", "content-encoding"] {
            assert!(out.get(name).is_none(), "{} was forwarded", name);
        }
    }
}
