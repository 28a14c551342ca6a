pub mod lexer;
pub mod parser;
pub mod rewrite;
pub mod statement;

use serde::{Deserialize, Serialize};

use crate::error::DbResult;

pub use lexer::{Span, SqlLexer, Token};
pub use parser::SqlParser;
pub use rewrite::{RewriteContext, SqlRewriter};
pub use statement::*;

/// SQL dialect of the physical databases behind the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DatabaseType {
    #[default]
    MySQL,
    PostgreSQL,
}

/// Parse a single SQL statement.
pub fn parse(sql: &str, database_type: DatabaseType) -> DbResult<SqlStatement> {
    SqlParser::new(sql, database_type)?.parse()
}
