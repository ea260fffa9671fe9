//! `INSERT` / `UPDATE` / `DELETE` parsing.

use super::ast::*;
use super::Parser;
use crate::error::Result;
use crate::lexer::Token;

impl Parser {
    pub(super) fn parse_insert(&mut self) -> Result<InsertStmt> {
        self.expect(&Token::Insert)?;
        self.expect(&Token::Into)?;
        let table_name = self.expect_identifier()?;

        let columns = if self.match_token(&Token::LeftParen) {
            let mut cols = vec![self.expect_identifier()?];
            while self.match_token(&Token::Comma) {
                cols.push(self.expect_identifier()?);
            }
            self.expect(&Token::RightParen)?;
            Some(cols)
        } else {
            None
        };

        self.expect(&Token::Values)?;
        self.expect(&Token::LeftParen)?;
        let mut values = vec![self.parse_expr()?];
        while self.match_token(&Token::Comma) {
            values.push(self.parse_expr()?);
        }
        self.expect(&Token::RightParen)?;

        Ok(InsertStmt { table_name, columns, values })
    }

    pub(super) fn parse_update(&mut self) -> Result<UpdateStmt> {
        self.expect(&Token::Update)?;
        let table_name = self.expect_identifier()?;
        self.expect(&Token::Set)?;

        let mut assignments = vec![self.parse_assignment()?];
        while self.match_token(&Token::Comma) {
            assignments.push(self.parse_assignment()?);
        }

        let where_clause = if self.match_token(&Token::Where) { Some(self.parse_expr()?) } else { None };

        Ok(UpdateStmt { table_name, assignments, where_clause })
    }

    fn parse_assignment(&mut self) -> Result<(String, Expr)> {
        let column = self.expect_identifier()?;
        self.expect(&Token::Equal)?;
        let value = self.parse_expr()?;
        Ok((column, value))
    }

    pub(super) fn parse_delete(&mut self) -> Result<DeleteStmt> {
        self.expect(&Token::Delete)?;
        self.expect(&Token::From)?;
        let table_name = self.expect_identifier()?;
        let where_clause = if self.match_token(&Token::Where) { Some(self.parse_expr()?) } else { None };
        Ok(DeleteStmt { table_name, where_clause })
    }
}
