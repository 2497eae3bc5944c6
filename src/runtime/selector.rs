use rand::Rng;
use serde_json::Value;

use crate::graph::{Endpoint, Node, RouterType, TOTAL_ROUTE_WEIGHT};

/// Picks the single route a Splitter or Switch node calls.
///
/// Splitter traffic shaping is an input from whoever builds the graph; the engine only applies
/// it. Switch conditions are evaluated against the step input.
pub trait RouteSelector: Send + Sync {
    fn select<'a>(&self, node: &'a Node, input: &[u8]) -> Option<&'a Endpoint>;
}

/// Weighted random choice for Splitter nodes, first matching condition for Switch nodes
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSelector;

impl RouteSelector for DefaultSelector {
    fn select<'a>(&self, node: &'a Node, input: &[u8]) -> Option<&'a Endpoint> {
        match node.router_type {
            RouterType::Switch => pick_by_condition(&node.routes, input),
            _ => pick_random_weighted(&node.routes),
        }
    }
}

/// Random selection proportional to route weights; the first route when no weights are set
fn pick_random_weighted(routes: &[Endpoint]) -> Option<&Endpoint> {
    if routes.iter().all(|r| r.weight().is_none()) {
        return routes.first();
    }
    let point = rand::thread_rng().gen_range(0..TOTAL_ROUTE_WEIGHT);
    pick_weighted(routes, point)
}

/// First route whose cumulative weight exceeds `point`. Pure function - no randomness.
pub fn pick_weighted(routes: &[Endpoint], point: u32) -> Option<&Endpoint> {
    let mut end = 0u64;
    for route in routes {
        end += u64::from(route.weight().unwrap_or(0));
        if u64::from(point) < end {
            return Some(route);
        }
    }
    None
}

/// First route whose condition path exists in the JSON `input`.
///
/// Input that is not JSON matches nothing.
pub fn pick_by_condition<'a>(routes: &'a [Endpoint], input: &[u8]) -> Option<&'a Endpoint> {
    let value: Value = serde_json::from_slice(input).ok()?;
    routes
        .iter()
        .find(|r| r.condition().is_some_and(|c| condition_matches(&value, c)))
}

/// Whether `path` names an existing value (`null` included) inside `value`.
///
/// A path starting with `/` is a JSON pointer (RFC 6901). Anything else is a dotted path:
/// object keys and array indices separated by `.`, with `\.` for a literal dot in a key.
pub fn condition_matches(value: &Value, path: &str) -> bool {
    if path.starts_with('/') {
        return value.pointer(path).is_some();
    }
    if path.is_empty() {
        return false;
    }

    let mut current = value;
    for segment in dotted_segments(path) {
        let next = match current {
            Value::Object(map) => map.get(&segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return false,
        }
    }
    true
}

fn dotted_segments(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => current.push('\\'),
            },
            '.' => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);
    segments
}
