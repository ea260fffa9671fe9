use super::node::{Node, NodeKind};

/// Checks the arity invariants mandated by the grammar. The optimizer and
/// executor trust trees that pass this check and do not re-verify arity
/// themselves.
pub fn validate(node: &Node) -> Result<(), String> {
    match node.kind {
        NodeKind::Project => {
            if node.children.is_empty() {
                return Err("PROJECT requires a source child".into());
            }
            if node.value.as_op() == Some("*") && node.children.len() != 1 {
                return Err("PROJECT(*) must have exactly one child".into());
            }
        }
        NodeKind::Filter => {
            if node.children.len() != 2 {
                return Err(format!(
                    "FILTER requires exactly 2 children (source, condition), found {}",
                    node.children.len()
                ));
            }
        }
        NodeKind::Operator => match node.value.as_op() {
            Some("NOT") => {
                if node.children.len() != 1 {
                    return Err("OPERATOR(NOT) requires exactly 1 child".into());
                }
            }
            Some("AND") | Some("OR") => {
                if node.children.len() < 2 {
                    return Err("OPERATOR(AND|OR) requires at least 2 children".into());
                }
            }
            other => return Err(format!("unknown logical operator {:?}", other)),
        },
        NodeKind::Join => {
            let natural = node.value.as_op() == Some("NATURAL");
            let expected = if natural { 2 } else { 3 };
            if node.children.len() != expected {
                return Err(format!(
                    "JOIN requires {} children ({}), found {}",
                    expected,
                    if natural { "two relations" } else { "two relations and a condition" },
                    node.children.len()
                ));
            }
        }
        NodeKind::Sort => {
            if node.children.is_empty() {
                return Err("SORT requires a source child".into());
            }
        }
        NodeKind::Limit => {
            if node.children.len() != 1 {
                return Err("LIMIT requires exactly 1 child".into());
            }
        }
        NodeKind::BetweenExpr => {
            if node.children.len() != 3 {
                return Err("BETWEEN requires exactly 3 children (expr, low, high)".into());
            }
        }
        NodeKind::IsNullExpr | NodeKind::IsNotNullExpr => {
            if node.children.len() != 1 {
                return Err("IS [NOT] NULL requires exactly 1 child".into());
            }
        }
        NodeKind::Comparison | NodeKind::ArithExpr | NodeKind::LikeExpr => {
            if node.children.len() != 2 {
                return Err("binary expression requires exactly 2 children".into());
            }
        }
        _ => {}
    }
    for child in &node.children {
        validate(child)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{NodeValue};

    #[test]
    fn filter_requires_two_children() {
        let src = Node::leaf(NodeKind::Relation, NodeValue::Ident("t".into()));
        let bad = Node::new(NodeKind::Filter, NodeValue::None, vec![src]);
        assert!(validate(&bad).is_err());
    }

    #[test]
    fn and_requires_at_least_two_children() {
        let a = Node::leaf(NodeKind::Comparison, NodeValue::Op("=".into()));
        let bad = Node::new(NodeKind::Operator, NodeValue::Op("AND".into()), vec![a]);
        assert!(validate(&bad).is_err());
    }

    #[test]
    fn natural_join_has_two_children_others_need_three() {
        let a = Node::leaf(NodeKind::Relation, NodeValue::Ident("a".into()));
        let b = Node::leaf(NodeKind::Relation, NodeValue::Ident("b".into()));
        let natural = Node::new(NodeKind::Join, NodeValue::Op("NATURAL".into()), vec![a.clone(), b.clone()]);
        assert!(validate(&natural).is_ok());

        let inner_missing_cond = Node::new(NodeKind::Join, NodeValue::Op("INNER".into()), vec![a, b]);
        assert!(validate(&inner_missing_cond).is_err());
    }
}
