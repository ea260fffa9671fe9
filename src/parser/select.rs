//! `SELECT` statement parsing: projection list, `FROM`, `JOIN`s, `WHERE`,
//! `ORDER BY`, `LIMIT`.

use super::ast::*;
use super::Parser;
use crate::error::{DbError, Result};
use crate::lexer::Token;

impl Parser {
    pub(super) fn parse_select(&mut self) -> Result<SelectStmt> {
        self.expect(&Token::Select)?;

        let columns = self.parse_select_columns()?;

        self.expect(&Token::From)?;
        let from = self.parse_table_ref()?;

        let mut joins = Vec::new();
        loop {
            if self.match_token(&Token::Natural) {
                self.expect(&Token::Join)?;
                let table = self.parse_table_ref()?;
                joins.push(JoinClause { join_type: JoinType::Natural, table, on_condition: None });
                continue;
            }
            let took_inner = self.match_token(&Token::Inner);
            if self.match_token(&Token::Join) {
                let table = self.parse_table_ref()?;
                self.expect(&Token::On)?;
                let on_condition = Some(self.parse_expr()?);
                joins.push(JoinClause { join_type: JoinType::Inner, table, on_condition });
                continue;
            }
            if took_inner {
                return Err(DbError::parse("expected JOIN after INNER"));
            }
            break;
        }

        let where_clause = if self.match_token(&Token::Where) { Some(self.parse_expr()?) } else { None };

        let order_by = if self.match_token(&Token::Order) {
            self.expect(&Token::By)?;
            let column = self.expect_identifier()?;
            let direction = if self.match_token(&Token::Desc) {
                SortOrder::Desc
            } else {
                self.match_token(&Token::Asc);
                SortOrder::Asc
            };
            Some(OrderByClause { column, direction })
        } else {
            None
        };

        let limit = if self.match_token(&Token::Limit) {
            match self.advance() {
                Token::NumberLiteral(n) => {
                    Some(n.parse::<u64>().map_err(|_| DbError::parse(format!("invalid LIMIT value '{}'", n)))?)
                }
                other => return Err(DbError::parse(format!("expected integer after LIMIT, found {:?}", other))),
            }
        } else {
            None
        };

        Ok(SelectStmt { columns, from, joins, where_clause, order_by, limit })
    }

    fn parse_select_columns(&mut self) -> Result<Vec<SelectColumn>> {
        if self.match_token(&Token::Star) {
            return Ok(vec![SelectColumn::Star]);
        }
        let mut columns = vec![self.parse_select_column()?];
        while self.match_token(&Token::Comma) {
            columns.push(self.parse_select_column()?);
        }
        Ok(columns)
    }

    fn parse_select_column(&mut self) -> Result<SelectColumn> {
        let expr = self.parse_expr()?;
        let alias = if self.match_token(&Token::As) {
            Some(self.expect_identifier()?)
        } else if let Token::Identifier(name) = self.peek().clone() {
            self.advance();
            Some(name)
        } else {
            None
        };
        Ok(SelectColumn::Expr { expr, alias })
    }

    pub(super) fn parse_table_ref(&mut self) -> Result<TableRef> {
        let name = self.expect_identifier()?;
        let alias = if self.match_token(&Token::As) {
            Some(self.expect_identifier()?)
        } else if let Token::Identifier(a) = self.peek().clone() {
            self.advance();
            Some(a)
        } else {
            None
        };
        Ok(TableRef { name, alias })
    }
}
