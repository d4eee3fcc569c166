use crate::error::QueryEvaluationError;
use crate::node::{NodeKind, QueryNode};
use datashare_model::Variable;
use std::sync::Arc;

/// Pushes projections towards the leaves of the tree, bottom-up.
///
/// - A projection of a projection keeps only the outer one.
/// - A projection of a union is applied to both branches, each restricted to the variables the
///   branch can bind.
///
/// The rewrite never changes the solutions of the tree.
pub fn push_down_projections(
    node: &Arc<QueryNode>,
) -> Result<Arc<QueryNode>, QueryEvaluationError> {
    let kind = match node.kind().map_children(push_down_projections)? {
        NodeKind::Project { inner, variables } => match inner.kind() {
            NodeKind::Project { inner: nested, .. } => NodeKind::Project {
                inner: Arc::clone(nested),
                variables,
            },
            NodeKind::Union { left, right } => NodeKind::Union {
                left: project_branch(left, &variables)?,
                right: project_branch(right, &variables)?,
            },
            _ => NodeKind::Project { inner, variables },
        },
        kind => kind,
    };
    Ok(Arc::new(QueryNode::try_new(kind)?))
}

fn project_branch(
    branch: &Arc<QueryNode>,
    variables: &[Variable],
) -> Result<Arc<QueryNode>, QueryEvaluationError> {
    let variables = variables
        .iter()
        .filter(|variable| branch.scope().contains(*variable))
        .cloned()
        .collect();
    let projection = QueryNode::try_new(NodeKind::Project {
        inner: Arc::clone(branch),
        variables,
    })?;
    push_down_projections(&Arc::new(projection))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GraphPattern;
    use datashare_model::TriplePattern;

    fn var(name: &str) -> Variable {
        Variable::new_unchecked(name)
    }

    fn bgp(s: &str, p: &str, o: &str) -> GraphPattern {
        GraphPattern::bgp([TriplePattern::parse(s, p, o).unwrap()])
    }

    fn optimize(pattern: &GraphPattern) -> Arc<QueryNode> {
        let node = Arc::new(QueryNode::try_from(pattern).unwrap());
        push_down_projections(&node).unwrap()
    }

    #[test]
    fn nested_projections_collapse() {
        let pattern = bgp("?x", "ex:p", "?y")
            .project([var("x"), var("y")])
            .project([var("x")]);
        let node = optimize(&pattern);

        let NodeKind::Project { inner, variables } = node.kind() else {
            panic!("expected a projection, got {node:?}");
        };
        assert_eq!(variables, &vec![var("x")]);
        assert!(matches!(inner.kind(), NodeKind::Bgp { .. }));
    }

    #[test]
    fn projection_is_pushed_into_union() {
        let pattern = bgp("?x", "ex:p", "?y")
            .union(bgp("?x", "ex:q", "?z"))
            .project([var("x"), var("z")]);
        let node = optimize(&pattern);

        let NodeKind::Union { left, right } = node.kind() else {
            panic!("expected a union, got {node:?}");
        };
        assert_eq!(left.scope().iter().collect::<Vec<_>>(), vec![&var("x")]);
        assert_eq!(
            right.scope().iter().collect::<Vec<_>>(),
            vec![&var("x"), &var("z")]
        );
        assert_eq!(node.scope().len(), 2);
    }

    #[test]
    fn other_nodes_are_unchanged() {
        let pattern = bgp("?x", "ex:p", "?y").join(bgp("?y", "ex:q", "?z"));
        let node = optimize(&pattern);
        assert_eq!(node.as_ref(), &QueryNode::try_from(&pattern).unwrap());
    }
}
