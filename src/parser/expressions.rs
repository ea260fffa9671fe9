//! Expression parsing: precedence climbing over OR/AND/NOT, then the
//! predicate operators (comparison, BETWEEN, IN, LIKE, IS [NOT] NULL), then
//! arithmetic.

use super::ast::*;
use super::Parser;
use crate::error::{DbError, Result};
use crate::lexer::Token;
use crate::types::Value;

impl Parser {
    pub(super) fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut terms = vec![self.parse_and()?];
        while self.match_token(&Token::Or) {
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 { terms.pop().unwrap() } else { Expr::Or(terms) })
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut terms = vec![self.parse_not()?];
        while self.match_token(&Token::And) {
            terms.push(self.parse_not()?);
        }
        Ok(if terms.len() == 1 { terms.pop().unwrap() } else { Expr::And(terms) })
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.match_token(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_predicate()
    }

    /// Parses one additive expression, then looks for a trailing predicate
    /// suffix: a comparison operator, `BETWEEN`, `[NOT] IN`, `LIKE`, or
    /// `IS [NOT] NULL`.
    fn parse_predicate(&mut self) -> Result<Expr> {
        let left = self.parse_additive()?;

        if let Some(op) = comparison_operator(self.peek()) {
            self.advance();
            let right = self.parse_additive()?;
            return Ok(Expr::BinaryOp { left: Box::new(left), op, right: Box::new(right) });
        }

        if self.match_token(&Token::Between) {
            let low = self.parse_additive()?;
            self.expect(&Token::And)?;
            let high = self.parse_additive()?;
            return Ok(Expr::Between { expr: Box::new(left), low: Box::new(low), high: Box::new(high) });
        }

        if self.match_token(&Token::Like) {
            let pattern = self.parse_additive()?;
            return Ok(Expr::Like { expr: Box::new(left), pattern: Box::new(pattern) });
        }

        if self.peek() == &Token::Not && self.tokens.get(self.pos + 1) == Some(&Token::In) {
            self.advance();
            self.advance();
            let values = self.parse_value_list()?;
            return Ok(Expr::NotIn { expr: Box::new(left), values });
        }
        if self.match_token(&Token::In) {
            let values = self.parse_value_list()?;
            return Ok(Expr::In { expr: Box::new(left), values });
        }

        if self.match_token(&Token::Is) {
            if self.match_token(&Token::Not) {
                self.expect(&Token::Null)?;
                return Ok(Expr::IsNotNull(Box::new(left)));
            }
            self.expect(&Token::Null)?;
            return Ok(Expr::IsNull(Box::new(left)));
        }

        Ok(left)
    }

    fn parse_value_list(&mut self) -> Result<Vec<Expr>> {
        self.expect(&Token::LeftParen)?;
        let mut values = vec![self.parse_additive()?];
        while self.match_token(&Token::Comma) {
            values.push(self.parse_additive()?);
        }
        self.expect(&Token::RightParen)?;
        Ok(values)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOperator::Plus,
                Token::Minus => BinaryOperator::Minus,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::BinaryOp { left: Box::new(left), op, right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_primary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOperator::Multiply,
                Token::Slash => BinaryOperator::Divide,
                _ => break,
            };
            self.advance();
            let right = self.parse_primary()?;
            left = Expr::BinaryOp { left: Box::new(left), op, right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Token::LeftParen => {
                let e = self.parse_expr()?;
                self.expect(&Token::RightParen)?;
                Ok(e)
            }
            Token::NumberLiteral(n) => {
                if n.contains('.') {
                    let f: f64 = n.parse().map_err(|_| DbError::parse(format!("invalid float literal '{}'", n)))?;
                    Ok(Expr::Literal(Value::Float(f)))
                } else {
                    let i: i64 = n.parse().map_err(|_| DbError::parse(format!("invalid integer literal '{}'", n)))?;
                    Ok(Expr::Literal(Value::Integer(i)))
                }
            }
            Token::StringLiteral(s) => Ok(Expr::Literal(Value::String(s))),
            Token::True => Ok(Expr::Literal(Value::Boolean(true))),
            Token::False => Ok(Expr::Literal(Value::Boolean(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Minus => {
                let inner = self.parse_primary()?;
                match inner {
                    Expr::Literal(Value::Integer(i)) => Ok(Expr::Literal(Value::Integer(-i))),
                    Expr::Literal(Value::Float(f)) => Ok(Expr::Literal(Value::Float(-f))),
                    other => Ok(Expr::BinaryOp {
                        left: Box::new(Expr::Literal(Value::Integer(0))),
                        op: BinaryOperator::Minus,
                        right: Box::new(other),
                    }),
                }
            }
            Token::Identifier(first) => {
                if self.match_token(&Token::Dot) {
                    let col = self.expect_identifier()?;
                    Ok(Expr::Column { table: Some(first), name: col })
                } else {
                    Ok(Expr::Column { table: None, name: first })
                }
            }
            other => Err(DbError::parse(format!("unexpected token in expression: {:?}", other))),
        }
    }
}

fn comparison_operator(t: &Token) -> Option<BinaryOperator> {
    Some(match t {
        Token::Equal => BinaryOperator::Equal,
        Token::NotEqual => BinaryOperator::NotEqual,
        Token::LessThan => BinaryOperator::LessThan,
        Token::LessThanEq => BinaryOperator::LessThanOrEqual,
        Token::GreaterThan => BinaryOperator::GreaterThan,
        Token::GreaterThanEq => BinaryOperator::GreaterThanOrEqual,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::super::Parser;
    use super::*;

    fn expr(s: &str) -> Expr {
        let tokens = crate::lexer::Lexer::new(s).tokenize().unwrap();
        let mut p = Parser { tokens, pos: 0 };
        p.parse_expr().unwrap()
    }

    #[test]
    fn and_binds_tighter_than_or() {
        match expr("a = 1 OR b = 2 AND c = 3") {
            Expr::Or(terms) => assert_eq!(terms.len(), 2),
            other => panic!("expected OR at top level, got {:?}", other),
        }
    }

    #[test]
    fn between_and_in_and_like() {
        assert!(matches!(expr("age BETWEEN 1 AND 9"), Expr::Between { .. }));
        assert!(matches!(expr("id IN (1, 2, 3)"), Expr::In { .. }));
        assert!(matches!(expr("id NOT IN (1, 2)"), Expr::NotIn { .. }));
        assert!(matches!(expr("name LIKE 'a%'"), Expr::Like { .. }));
    }

    #[test]
    fn is_null_and_is_not_null() {
        assert!(matches!(expr("x IS NULL"), Expr::IsNull(_)));
        assert!(matches!(expr("x IS NOT NULL"), Expr::IsNotNull(_)));
    }

    #[test]
    fn arithmetic_precedence() {
        match expr("1 + 2 * 3") {
            Expr::BinaryOp { op: BinaryOperator::Plus, right, .. } => {
                assert!(matches!(*right, Expr::BinaryOp { op: BinaryOperator::Multiply, .. }));
            }
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn qualified_column_reference() {
        match expr("orders.id") {
            Expr::Column { table, name } => {
                assert_eq!(table.as_deref(), Some("orders"));
                assert_eq!(name, "id");
            }
            other => panic!("expected qualified column, got {:?}", other),
        }
    }
}
