//! `CREATE TABLE` / `DROP TABLE` parsing.

use super::ast::*;
use super::Parser;
use crate::error::{DbError, Result};
use crate::lexer::Token;
use crate::types::DataType;

impl Parser {
    pub(super) fn parse_create_table(&mut self) -> Result<Statement> {
        self.expect(&Token::Create)?;
        self.expect(&Token::Table)?;
        let table_name = self.expect_identifier()?;
        self.expect(&Token::LeftParen)?;

        let mut columns = Vec::new();
        loop {
            columns.push(self.parse_column_def()?);
            if self.match_token(&Token::Comma) {
                continue;
            }
            break;
        }
        self.expect(&Token::RightParen)?;

        Ok(Statement::CreateTable(CreateTableStmt { table_name, columns }))
    }

    fn parse_column_def(&mut self) -> Result<ColumnDefAst> {
        let name = self.expect_identifier()?;
        let data_type = self.parse_data_type()?;

        let mut primary_key = false;
        let mut foreign_key = None;
        loop {
            if self.match_token(&Token::Primary) {
                self.expect(&Token::Key)?;
                primary_key = true;
                continue;
            }
            if self.match_token(&Token::Foreign) {
                self.expect(&Token::Key)?;
                self.expect(&Token::References)?;
                let ref_table = self.expect_identifier()?;
                self.expect(&Token::LeftParen)?;
                let ref_column = self.expect_identifier()?;
                self.expect(&Token::RightParen)?;
                foreign_key = Some((ref_table, ref_column));
                continue;
            }
            break;
        }

        Ok(ColumnDefAst { name, data_type, primary_key, foreign_key })
    }

    fn parse_data_type(&mut self) -> Result<DataType> {
        match self.advance() {
            Token::Integer => Ok(DataType::Integer),
            Token::Float => Ok(DataType::Float),
            Token::Boolean => Ok(DataType::Boolean),
            Token::Char => {
                let len = self.parse_optional_length()?;
                Ok(DataType::Varchar(len))
            }
            Token::Varchar => {
                let len = self.parse_optional_length()?;
                Ok(DataType::Varchar(len))
            }
            other => Err(DbError::parse(format!("expected a data type, found {:?}", other))),
        }
    }

    fn parse_optional_length(&mut self) -> Result<Option<u32>> {
        if self.match_token(&Token::LeftParen) {
            let n = match self.advance() {
                Token::NumberLiteral(n) => {
                    n.parse::<u32>().map_err(|_| DbError::parse(format!("invalid length '{}'", n)))?
                }
                other => return Err(DbError::parse(format!("expected integer length, found {:?}", other))),
            };
            self.expect(&Token::RightParen)?;
            Ok(Some(n))
        } else {
            Ok(None)
        }
    }

    pub(super) fn parse_drop_table(&mut self) -> Result<Statement> {
        self.expect(&Token::Drop)?;
        self.expect(&Token::Table)?;
        let table_name = self.expect_identifier()?;
        let behavior = if self.match_token(&Token::Cascade) {
            DropBehavior::Cascade
        } else {
            self.match_token(&Token::Restrict);
            DropBehavior::Restrict
        };
        Ok(Statement::DropTable(DropTableStmt { table_name, behavior }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_table_with_primary_and_foreign_key() {
        let stmt = Parser::parse(
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER FOREIGN KEY REFERENCES customers(id), note VARCHAR(40));",
        )
        .unwrap();
        match stmt {
            Statement::CreateTable(ct) => {
                assert_eq!(ct.table_name, "orders");
                assert_eq!(ct.columns.len(), 3);
                assert!(ct.columns[0].primary_key);
                assert_eq!(
                    ct.columns[1].foreign_key,
                    Some(("customers".to_string(), "id".to_string()))
                );
                assert_eq!(ct.columns[2].data_type, DataType::Varchar(Some(40)));
            }
            other => panic!("expected CreateTable, got {:?}", other),
        }
    }

    #[test]
    fn drop_table_defaults_to_restrict() {
        match Parser::parse("DROP TABLE orders;").unwrap() {
            Statement::DropTable(dt) => assert_eq!(dt.behavior, DropBehavior::Restrict),
            other => panic!("expected DropTable, got {:?}", other),
        }
    }

    #[test]
    fn drop_table_cascade() {
        match Parser::parse("DROP TABLE orders CASCADE;").unwrap() {
            Statement::DropTable(dt) => assert_eq!(dt.behavior, DropBehavior::Cascade),
            other => panic!("expected DropTable, got {:?}", other),
        }
    }
}
