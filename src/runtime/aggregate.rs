use bytes::Bytes;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::graph::RouterType;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    #[error("response labeled '{label}' is not valid JSON: {message}")]
    InvalidJson { label: String, message: String },

    #[error("failed to serialize aggregated response: {0}")]
    Serialize(String),

    #[error("expected exactly one response, got {0}")]
    NotSingle(usize),
}

/// What to do with a payload that does not parse as JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregationPolicy {
    /// Embed the raw payload as a JSON string
    #[default]
    Tolerant,
    /// Fail the aggregation
    Strict,
}

// ============================================================================
// SBIO: Pure aggregation functions (no I/O)
// ============================================================================

/// Merge labeled payloads into one JSON object, one key per label.
///
/// Later entries overwrite earlier ones with the same label. Keys serialize in sorted order,
/// so the output does not depend on the order in which responses arrived.
pub fn aggregate<I>(labeled: I, policy: AggregationPolicy) -> Result<Bytes, AggregationError>
where
    I: IntoIterator<Item = (String, Bytes)>,
{
    let mut merged = Map::new();

    for (label, payload) in labeled {
        let value = match serde_json::from_slice::<Value>(&payload) {
            Ok(value) => value,
            Err(e) => match policy {
                AggregationPolicy::Tolerant => {
                    Value::String(String::from_utf8_lossy(&payload).into_owned())
                }
                AggregationPolicy::Strict => {
                    return Err(AggregationError::InvalidJson {
                        label,
                        message: e.to_string(),
                    })
                }
            },
        };
        merged.insert(label, value);
    }

    serde_json::to_vec(&Value::Object(merged))
        .map(Bytes::from)
        .map_err(|e| AggregationError::Serialize(e.to_string()))
}

/// Build a node's own output from its route responses.
///
/// Sequential, Splitter and Switch nodes make one call and pass its body through untouched;
/// Ensemble nodes wrap every response under its route label.
pub fn combine_route_responses(
    router_type: RouterType,
    responses: Vec<(String, Bytes)>,
    policy: AggregationPolicy,
) -> Result<Bytes, AggregationError> {
    match router_type {
        RouterType::Sequential | RouterType::Splitter | RouterType::Switch => {
            let count = responses.len();
            let mut responses = responses.into_iter();
            match (responses.next(), count) {
                (Some((_, body)), 1) => Ok(body),
                _ => Err(AggregationError::NotSingle(count)),
            }
        }
        RouterType::Ensemble => aggregate(responses, policy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labeled(pairs: &[(&str, &str)]) -> Vec<(String, Bytes)> {
        pairs
            .iter()
            .map(|(l, b)| (l.to_string(), Bytes::from(b.to_string())))
            .collect()
    }

    fn parse(bytes: &Bytes) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_aggregate_nests_under_labels() {
        let out = aggregate(
            labeled(&[("model1", r#"{"predictions":"1"}"#), ("model2", r#"{"predictions":"2"}"#)]),
            AggregationPolicy::Tolerant,
        )
        .unwrap();

        assert_eq!(
            parse(&out),
            serde_json::json!({
                "model1": {"predictions": "1"},
                "model2": {"predictions": "2"}
            })
        );
    }

    #[test]
    fn test_aggregate_is_order_independent() {
        let forward = aggregate(
            labeled(&[("a", "1"), ("b", "[2]"), ("c", r#"{"x":3}"#)]),
            AggregationPolicy::Tolerant,
        )
        .unwrap();
        let reverse = aggregate(
            labeled(&[("c", r#"{"x":3}"#), ("b", "[2]"), ("a", "1")]),
            AggregationPolicy::Tolerant,
        )
        .unwrap();

        assert_eq!(forward, reverse);
    }

    #[test]
    fn test_aggregate_last_label_wins() {
        let out = aggregate(
            labeled(&[("host", r#""first""#), ("host", r#""second""#)]),
            AggregationPolicy::Tolerant,
        )
        .unwrap();
        assert_eq!(parse(&out), serde_json::json!({"host": "second"}));
    }

    #[test]
    fn test_tolerant_embeds_raw_text() {
        let out = aggregate(labeled(&[("svc", "not json")]), AggregationPolicy::Tolerant).unwrap();
        assert_eq!(parse(&out), serde_json::json!({"svc": "not json"}));
    }

    #[test]
    fn test_strict_rejects_raw_text() {
        let err = aggregate(labeled(&[("svc", "not json")]), AggregationPolicy::Strict).unwrap_err();
        assert!(matches!(err, AggregationError::InvalidJson { ref label, .. } if label == "svc"));
    }

    #[test]
    fn test_empty_aggregate_is_empty_object() {
        let out = aggregate(Vec::new(), AggregationPolicy::Strict).unwrap();
        assert_eq!(&out[..], b"{}");
    }

    #[test]
    fn test_sequential_passes_through_bare() {
        let out = combine_route_responses(
            RouterType::Sequential,
            labeled(&[("model-a", r#"{"predictions":"1"}"#)]),
            AggregationPolicy::Strict,
        )
        .unwrap();
        assert_eq!(&out[..], br#"{"predictions":"1"}"#);
    }

    #[test]
    fn test_splitter_passes_through_non_json() {
        let out = combine_route_responses(
            RouterType::Splitter,
            labeled(&[("model-a", "plain text")]),
            AggregationPolicy::Strict,
        )
        .unwrap();
        assert_eq!(&out[..], b"plain text");
    }

    #[test]
    fn test_single_route_ensemble_is_wrapped() {
        let out = combine_route_responses(
            RouterType::Ensemble,
            labeled(&[("model-a", r#"{"predictions":"1"}"#)]),
            AggregationPolicy::Strict,
        )
        .unwrap();
        assert_eq!(parse(&out), serde_json::json!({"model-a": {"predictions": "1"}}));
    }

    #[test]
    fn test_sequential_requires_single_response() {
        let err = combine_route_responses(
            RouterType::Sequential,
            labeled(&[("a", "1"), ("b", "2")]),
            AggregationPolicy::Tolerant,
        )
        .unwrap_err();
        assert_eq!(err, AggregationError::NotSingle(2));
    }
}
