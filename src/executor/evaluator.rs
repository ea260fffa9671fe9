//! Expression evaluation: walks a lowered `tree::Node` expression against an
//! optional row binding (`None` for value-list contexts like `INSERT ...
//! VALUES`, where a column reference is always an error).

use crate::error::{DbError, Result};
use crate::tree::{Node, NodeKind};
use crate::types::Value;

/// One row's worth of named, qualified columns: one table's worth for a
/// plain scan, several concatenated for a join side.
#[derive(Debug, Clone)]
pub struct Tuple {
    /// `(table qualifier, column name)` pairs, same order as `values`.
    pub columns: Vec<(String, String)>,
    pub values: Vec<Value>,
}

impl Tuple {
    pub fn new(qualifier: &str, columns: &[&str], values: Vec<Value>) -> Self {
        Self { columns: columns.iter().map(|c| (qualifier.to_string(), c.to_string())).collect(), values }
    }

    /// Looks up a value by name, optionally qualified by table/alias. An
    /// unqualified lookup matches the first column with that name, good
    /// enough for the unambiguous common case; an ambiguous unqualified
    /// reference into two joined tables silently picks the left one.
    pub fn get(&self, table: Option<&str>, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|(q, n)| n.eq_ignore_ascii_case(name) && table.map(|t| q.eq_ignore_ascii_case(t)).unwrap_or(true))
            .map(|i| &self.values[i])
    }

    pub fn relabel(mut self, qualifier: &str) -> Tuple {
        for (q, _) in &mut self.columns {
            *q = qualifier.to_string();
        }
        self
    }

    pub fn concat(mut self, other: Tuple) -> Tuple {
        self.columns.extend(other.columns);
        self.values.extend(other.values);
        self
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(_, n)| n.clone()).collect()
    }
}

pub fn eval(node: &Node, tuple: Option<&Tuple>) -> Result<Value> {
    match node.kind {
        NodeKind::LiteralNumber | NodeKind::LiteralString | NodeKind::LiteralBoolean | NodeKind::LiteralNull => {
            Ok(node.value.to_value())
        }
        NodeKind::ColumnName => {
            let name = node.value.as_ident().ok_or_else(|| DbError::internal("column node missing a name"))?;
            lookup(tuple, None, name)
        }
        NodeKind::ColumnRef => {
            let table = node.value.as_ident().ok_or_else(|| DbError::internal("column ref missing a table name"))?;
            let name = node.children[0].value.as_ident().ok_or_else(|| DbError::internal("column ref missing a column name"))?;
            lookup(tuple, Some(table), name)
        }
        NodeKind::ArithExpr => eval_arith(node, tuple),
        NodeKind::Comparison => eval_comparison(node, tuple),
        NodeKind::Operator => eval_logic(node, tuple),
        NodeKind::IsNullExpr => Ok(Value::Boolean(eval(&node.children[0], tuple)?.is_null())),
        NodeKind::IsNotNullExpr => Ok(Value::Boolean(!eval(&node.children[0], tuple)?.is_null())),
        NodeKind::BetweenExpr => {
            let x = eval(&node.children[0], tuple)?;
            let low = eval(&node.children[1], tuple)?;
            let high = eval(&node.children[2], tuple)?;
            if x.is_null() || low.is_null() || high.is_null() {
                return Ok(Value::Boolean(false));
            }
            let ge_low = matches!(x.partial_cmp(&low), Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal));
            let le_high = matches!(x.partial_cmp(&high), Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal));
            Ok(Value::Boolean(ge_low && le_high))
        }
        NodeKind::InExpr => {
            let x = eval(&node.children[0], tuple)?;
            let mut found = false;
            for candidate in &node.children[1..] {
                if x == eval(candidate, tuple)? {
                    found = true;
                    break;
                }
            }
            Ok(Value::Boolean(found))
        }
        NodeKind::NotInExpr => {
            let x = eval(&node.children[0], tuple)?;
            let mut found = false;
            for candidate in &node.children[1..] {
                if x == eval(candidate, tuple)? {
                    found = true;
                    break;
                }
            }
            Ok(Value::Boolean(!found))
        }
        NodeKind::LikeExpr => {
            let target = eval(&node.children[0], tuple)?;
            let pattern = eval(&node.children[1], tuple)?;
            match pattern {
                Value::String(p) => Ok(Value::Boolean(target.like(&p))),
                _ => Err(DbError::predicate("LIKE pattern must be a string")),
            }
        }
        NodeKind::ExistsExpr | NodeKind::NotExistsExpr => {
            Err(DbError::predicate("EXISTS subqueries are not supported"))
        }
        other => Err(DbError::internal(format!("{:?} is not an evaluable expression", other))),
    }
}

fn lookup(tuple: Option<&Tuple>, table: Option<&str>, name: &str) -> Result<Value> {
    let tuple = tuple.ok_or_else(|| DbError::predicate(format!("column '{}' cannot be used in this context", name)))?;
    tuple.get(table, name).cloned().ok_or_else(|| DbError::unknown_column(name))
}

fn eval_arith(node: &Node, tuple: Option<&Tuple>) -> Result<Value> {
    let l = eval(&node.children[0], tuple)?;
    let r = eval(&node.children[1], tuple)?;
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    let (lf, rf) = (as_number(&l)?, as_number(&r)?);
    let op = node.value.as_op().unwrap_or("");
    let both_int = matches!((&l, &r), (Value::Integer(_), Value::Integer(_)));
    let result = match op {
        "+" => lf + rf,
        "-" => lf - rf,
        "*" => lf * rf,
        "/" => {
            if rf == 0.0 {
                return Err(DbError::predicate("division by zero"));
            }
            lf / rf
        }
        other => return Err(DbError::internal(format!("unknown arithmetic operator '{}'", other))),
    };
    if both_int && op != "/" {
        Ok(Value::Integer(result as i64))
    } else {
        Ok(Value::Float(result))
    }
}

fn as_number(v: &Value) -> Result<f64> {
    match v {
        Value::Integer(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        other => Err(DbError::predicate(format!("expected a numeric value, found {}", other.type_name()))),
    }
}

fn eval_comparison(node: &Node, tuple: Option<&Tuple>) -> Result<Value> {
    let l = eval(&node.children[0], tuple)?;
    let r = eval(&node.children[1], tuple)?;
    if l.is_null() || r.is_null() {
        return Ok(Value::Boolean(false));
    }
    let op = node.value.as_op().unwrap_or("");
    let result = match op {
        "=" => l == r,
        "<>" => !(l == r),
        "<" => matches!(l.partial_cmp(&r), Some(std::cmp::Ordering::Less)),
        "<=" => matches!(l.partial_cmp(&r), Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)),
        ">" => matches!(l.partial_cmp(&r), Some(std::cmp::Ordering::Greater)),
        ">=" => matches!(l.partial_cmp(&r), Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)),
        other => return Err(DbError::internal(format!("unknown comparison operator '{}'", other))),
    };
    Ok(Value::Boolean(result))
}

fn eval_logic(node: &Node, tuple: Option<&Tuple>) -> Result<Value> {
    match node.value.as_op().unwrap_or("") {
        "AND" => {
            for child in &node.children {
                if !eval(child, tuple)?.is_truthy() {
                    return Ok(Value::Boolean(false));
                }
            }
            Ok(Value::Boolean(true))
        }
        "OR" => {
            for child in &node.children {
                if eval(child, tuple)?.is_truthy() {
                    return Ok(Value::Boolean(true));
                }
            }
            Ok(Value::Boolean(false))
        }
        "NOT" => Ok(Value::Boolean(!eval(&node.children[0], tuple)?.is_truthy())),
        other => Err(DbError::internal(format!("unknown logical operator '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{NodeValue};

    fn tuple() -> Tuple {
        Tuple::new("t", &["a", "b"], vec![Value::Integer(10), Value::Integer(3)])
    }

    #[test]
    fn arithmetic_widens_to_float_on_division() {
        let a = Node::leaf(NodeKind::ColumnName, NodeValue::Ident("a".into()));
        let b = Node::leaf(NodeKind::ColumnName, NodeValue::Ident("b".into()));
        let div = Node::new(NodeKind::ArithExpr, NodeValue::Op("/".into()), vec![a, b]);
        let v = eval(&div, Some(&tuple())).unwrap();
        assert_eq!(v, Value::Float(10.0 / 3.0));
    }

    #[test]
    fn comparison_against_null_is_never_true() {
        let a = Node::leaf(NodeKind::ColumnName, NodeValue::Ident("a".into()));
        let null = Node::leaf(NodeKind::LiteralNull, NodeValue::None);
        let eq = Node::new(NodeKind::Comparison, NodeValue::Op("=".into()), vec![a, null]);
        assert_eq!(eval(&eq, Some(&tuple())).unwrap(), Value::Boolean(false));
    }

    #[test]
    fn unqualified_column_lookup_into_empty_tuple_errors() {
        let a = Node::leaf(NodeKind::ColumnName, NodeValue::Ident("a".into()));
        assert!(eval(&a, None).is_err());
    }
}
