use std::collections::{HashMap, VecDeque};

use super::{GraphError, Node, NodeId, RouterType};

/// Total weight a Splitter's routes must add up to
pub const TOTAL_ROUTE_WEIGHT: u32 = 100;

// ============================================================================
// Pure structural checks (no I/O)
// ============================================================================

/// Reject graphs whose successor edges form a cycle.
///
/// Kahn's algorithm over arena indices. Edges to unknown nodes are ignored, they are
/// skipped at execution time anyway.
pub fn check_acyclic(nodes: &[Node], index: &HashMap<String, NodeId>) -> Result<(), GraphError> {
    let mut in_degree = vec![0usize; nodes.len()];
    let mut out_edges: Vec<Vec<NodeId>> = vec![Vec::new(); nodes.len()];

    for (id, node) in nodes.iter().enumerate() {
        for edge in &node.successors {
            if let Some(&target) = index.get(&edge.target) {
                out_edges[id].push(target);
                in_degree[target] += 1;
            }
        }
    }

    let mut queue: VecDeque<NodeId> = in_degree
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d == 0)
        .map(|(id, _)| id)
        .collect();
    let mut visited = 0;

    while let Some(id) = queue.pop_front() {
        visited += 1;
        for &next in &out_edges[id] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if visited == nodes.len() {
        return Ok(());
    }

    let mut involved: Vec<String> = in_degree
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d > 0)
        .map(|(id, _)| nodes[id].name.clone())
        .collect();
    involved.sort();
    Err(GraphError::Cycle(involved))
}

/// Weights are the external traffic-shaping input of a Splitter. Either no route has one, or
/// every route has a positive weight and together they sum to [`TOTAL_ROUTE_WEIGHT`].
pub fn check_route_weights(node: &Node) -> Result<(), GraphError> {
    let weighted = node.routes.iter().filter(|r| r.weight().is_some()).count();
    if weighted == 0 {
        return Ok(());
    }

    if node.router_type != RouterType::Splitter {
        return Err(GraphError::WeightOnNonSplitter(node.name.clone()));
    }

    let invalid = |reason: String| GraphError::InvalidWeights {
        node: node.name.clone(),
        reason,
    };

    if weighted != node.routes.len() {
        return Err(invalid(format!(
            "{} of {} routes have a weight",
            weighted,
            node.routes.len()
        )));
    }
    if node.routes.iter().any(|r| r.weight() == Some(0)) {
        return Err(invalid("weights must be positive".to_string()));
    }

    // Summed wide so oversized weights cannot wrap around to the expected total
    let total: u64 = node
        .routes
        .iter()
        .filter_map(|r| r.weight())
        .map(u64::from)
        .sum();
    if total != u64::from(TOTAL_ROUTE_WEIGHT) {
        return Err(invalid(format!(
            "weights sum to {}, expected {}",
            total, TOTAL_ROUTE_WEIGHT
        )));
    }

    Ok(())
}

/// Every route of a Switch carries a condition; no other router type may have one.
pub fn check_route_conditions(node: &Node) -> Result<(), GraphError> {
    if node.router_type != RouterType::Switch {
        if node.routes.iter().any(|r| r.condition().is_some()) {
            return Err(GraphError::ConditionOnNonSwitch(node.name.clone()));
        }
        return Ok(());
    }

    match node
        .routes
        .iter()
        .find(|r| r.condition().map_or(true, str::is_empty))
    {
        Some(route) => Err(GraphError::MissingCondition {
            node: node.name.clone(),
            route: route.to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DataMode, Edge, Endpoint, Graph};

    fn node(name: &str, successors: &[&str]) -> Node {
        let mut node = Node::new(name, RouterType::Sequential)
            .route(Endpoint::parse(&format!("http://{}", name)).unwrap());
        for s in successors {
            node = node.successor(Edge::new(*s, DataMode::ForwardAggregatedOutput));
        }
        node
    }

    fn splitter(weights: &[Option<u32>]) -> Node {
        let mut node = Node::new("split", RouterType::Splitter);
        for (i, w) in weights.iter().enumerate() {
            let mut ep = Endpoint::parse(&format!("http://model-{}", i)).unwrap();
            if let Some(w) = w {
                ep = ep.with_weight(*w);
            }
            node = node.route(ep);
        }
        node
    }

    #[test]
    fn test_diamond_is_acyclic() {
        let graph = Graph::builder()
            .node(node("root", &["left", "right"]))
            .node(node("left", &["join"]))
            .node(node("right", &["join"]))
            .node(node("join", &[]))
            .entry("root")
            .build();
        assert!(graph.is_ok());
    }

    #[test]
    fn test_detect_cycle() {
        let result = Graph::builder()
            .node(node("root", &["a"]))
            .node(node("a", &["b"]))
            .node(node("b", &["a"]))
            .entry("root")
            .build();
        assert_eq!(
            result.unwrap_err(),
            GraphError::Cycle(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_detect_self_loop() {
        let result = Graph::builder()
            .node(node("root", &["root"]))
            .entry("root")
            .build();
        assert!(matches!(result, Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_unknown_edge_does_not_count_as_cycle() {
        let nodes = vec![node("root", &["ghost"])];
        let index = HashMap::from([("root".to_string(), 0)]);
        assert!(check_acyclic(&nodes, &index).is_ok());
    }

    #[test]
    fn test_splitter_weights_valid() {
        assert!(check_route_weights(&splitter(&[Some(30), Some(70)])).is_ok());
        assert!(check_route_weights(&splitter(&[None, None])).is_ok());
    }

    #[test]
    fn test_splitter_weights_must_sum_to_total() {
        let err = check_route_weights(&splitter(&[Some(30), Some(30)])).unwrap_err();
        assert!(matches!(err, GraphError::InvalidWeights { .. }));
    }

    #[test]
    fn test_splitter_weights_all_or_nothing() {
        let err = check_route_weights(&splitter(&[Some(100), None])).unwrap_err();
        assert!(matches!(err, GraphError::InvalidWeights { .. }));
    }

    #[test]
    fn test_splitter_weights_positive() {
        let err = check_route_weights(&splitter(&[Some(100), Some(0)])).unwrap_err();
        assert!(matches!(err, GraphError::InvalidWeights { .. }));
    }

    #[test]
    fn test_splitter_weights_do_not_wrap() {
        // u32::MAX + 101 wraps to 100 in 32 bits
        let err = check_route_weights(&splitter(&[Some(u32::MAX), Some(101)])).unwrap_err();
        assert!(matches!(err, GraphError::InvalidWeights { .. }));
    }

    #[test]
    fn test_condition_rejected_outside_switch() {
        let node = Node::new("seq", RouterType::Sequential)
            .route(Endpoint::parse("http://a").unwrap().with_condition("instances"));
        assert_eq!(
            check_route_conditions(&node).unwrap_err(),
            GraphError::ConditionOnNonSwitch("seq".into())
        );
    }

    #[test]
    fn test_switch_conditions_valid() {
        let node = Node::new("switch", RouterType::Switch)
            .route(Endpoint::parse("http://a").unwrap().with_condition("image"))
            .route(Endpoint::parse("http://b").unwrap().with_condition("text"));
        assert!(check_route_conditions(&node).is_ok());
    }

    #[test]
    fn test_weight_rejected_outside_splitter() {
        let node = Node::new("ens", RouterType::Ensemble)
            .route(Endpoint::parse("http://a").unwrap().with_weight(100));
        assert_eq!(
            check_route_weights(&node).unwrap_err(),
            GraphError::WeightOnNonSplitter("ens".into())
        );
    }
}
