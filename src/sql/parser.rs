use super::lexer::{Span, SpannedToken, SqlLexer, Token};
use super::statement::*;
use super::DatabaseType;
use crate::error::{DbError, DbResult};

/// SQL Parser
pub struct SqlParser<'a> {
    sql: &'a str,
    tokens: Vec<SpannedToken>,
    position: usize,
    parameter_index: usize,
    tables: Vec<TableSegment>,
}

static EOF: SpannedToken = SpannedToken {
    token: Token::Eof,
    span: Span { start: 0, end: 0 },
};

impl<'a> SqlParser<'a> {
    pub fn new(sql: &'a str, database_type: DatabaseType) -> DbResult<Self> {
        let mut lexer = SqlLexer::new(sql, database_type);
        let tokens = lexer.tokenize()?;

        Ok(Self {
            sql,
            tokens,
            position: 0,
            parameter_index: 0,
            tables: Vec::new(),
        })
    }

    fn current(&self) -> &SpannedToken {
        self.tokens.get(self.position).unwrap_or(&EOF)
    }

    fn current_token(&self) -> &Token {
        &self.current().token
    }

    fn peek_token(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.position + offset)
            .map(|t| &t.token)
            .unwrap_or(&Token::Eof)
    }

    /// End offset of the most recently consumed token.
    fn previous_end(&self) -> usize {
        self.position
            .checked_sub(1)
            .and_then(|p| self.tokens.get(p))
            .map(|t| t.span.end)
            .unwrap_or(0)
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.current_token() == expected {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> DbResult<()> {
        if *self.current_token() == expected {
            self.advance();
            Ok(())
        } else {
            Err(DbError::ParseError(format!(
                "Expected {:?}, found {:?}",
                expected,
                self.current_token()
            )))
        }
    }

    /// Upper-cased text of a non-reserved word at the cursor.
    fn word(&self) -> Option<String> {
        match self.current_token() {
            Token::Identifier(name) => Some(name.to_uppercase()),
            _ => None,
        }
    }

    fn is_word(&self, word: &str) -> bool {
        matches!(self.current_token(), Token::Identifier(name) if name.eq_ignore_ascii_case(word))
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.is_word(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_identifier(&mut self) -> DbResult<String> {
        match self.current_token().clone() {
            Token::Identifier(name) | Token::QuotedIdentifier(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(DbError::ParseError(format!(
                "Expected identifier, found {:?}",
                other
            ))),
        }
    }

    fn expect_table_name(&mut self) -> DbResult<(String, Span)> {
        let span = self.current().span;
        let name = self.expect_identifier()?;
        Ok((name, span))
    }

    fn push_table(&mut self, name: String, alias: Option<String>, span: Span) {
        self.tables.push(TableSegment {
            name,
            alias,
            span,
            is_owner: false,
        });
    }

    fn push_owner(&mut self, name: &str, span: Span) {
        self.tables.push(TableSegment {
            name: name.to_string(),
            alias: None,
            span,
            is_owner: true,
        });
    }

    fn next_parameter(&mut self) -> usize {
        let index = self.parameter_index;
        self.parameter_index += 1;
        index
    }

    pub fn parse(mut self) -> DbResult<SqlStatement> {
        let stmt = match self.current_token().clone() {
            Token::Select => self.parse_select()?,
            Token::Insert => self.parse_insert()?,
            Token::Update => self.parse_update()?,
            Token::Delete => self.parse_delete()?,
            Token::Create | Token::Drop => return self.parse_ddl(),
            Token::Desc => return self.parse_dal(),
            Token::Set => return self.parse_set(),
            Token::Identifier(word) => match word.to_uppercase().as_str() {
                "ALTER" | "TRUNCATE" => return self.parse_ddl(),
                "GRANT" | "REVOKE" => return self.parse_dcl(),
                "BEGIN" | "START" | "COMMIT" | "ROLLBACK" | "SAVEPOINT" => return self.parse_tcl(),
                "SHOW" | "DESCRIBE" | "EXPLAIN" | "USE" => return self.parse_dal(),
                other => {
                    return Err(DbError::ParseError(format!(
                        "Unsupported statement: {}",
                        other
                    )));
                }
            },
            other => {
                return Err(DbError::ParseError(format!(
                    "Unexpected token at start of statement: {:?}",
                    other
                )));
            }
        };

        self.eat(&Token::Semicolon);
        if *self.current_token() != Token::Eof {
            return Err(DbError::ParseError(format!(
                "Unexpected trailing token: {:?}",
                self.current_token()
            )));
        }

        Ok(stmt)
    }

    fn parse_select(&mut self) -> DbResult<SqlStatement> {
        self.expect(Token::Select)?;
        let distinct = self.eat(&Token::Distinct);

        let projections = self.parse_projections()?;
        let projections_end = self.previous_end();

        self.expect(Token::From)?;
        self.parse_table_reference()?;
        while self.eat(&Token::Comma) {
            self.parse_table_reference()?;
        }

        let joins = self.parse_join_clauses()?;

        let where_clause = if self.eat(&Token::Where) {
            Some(self.parse_expression()?)
        } else {
            None
        };

        let group_by = if self.eat(&Token::Group) {
            self.expect(Token::By)?;
            self.parse_order_items()?
        } else {
            Vec::new()
        };

        let having = if self.eat(&Token::Having) {
            Some(self.parse_expression()?)
        } else {
            None
        };

        let order_by = if self.eat(&Token::Order) {
            self.expect(Token::By)?;
            self.parse_order_items()?
        } else {
            Vec::new()
        };

        let limit = self.parse_limit()?;

        Ok(SqlStatement::Select(SelectStatement {
            distinct,
            projections,
            projections_end,
            tables: std::mem::take(&mut self.tables),
            joins,
            where_clause,
            group_by,
            having,
            order_by,
            limit,
            parameter_count: self.parameter_index,
        }))
    }

    fn parse_optional_alias(&mut self) -> DbResult<Option<String>> {
        if self.eat(&Token::As) {
            return Ok(Some(self.expect_identifier()?));
        }
        match self.current_token() {
            Token::Identifier(_) | Token::QuotedIdentifier(_) => Ok(Some(self.expect_identifier()?)),
            _ => Ok(None),
        }
    }

    fn parse_table_reference(&mut self) -> DbResult<(String, Option<String>)> {
        if *self.current_token() == Token::LeftParen {
            return Err(DbError::ParseError(
                "Subqueries in FROM are not supported".to_string(),
            ));
        }
        let (name, span) = self.expect_table_name()?;
        let alias = self.parse_optional_alias()?;
        self.push_table(name.clone(), alias.clone(), span);
        Ok((name, alias))
    }

    fn parse_join_clauses(&mut self) -> DbResult<Vec<JoinClause>> {
        let mut joins = Vec::new();

        loop {
            let join_type = match self.current_token() {
                Token::Join => {
                    self.advance();
                    JoinType::Inner
                }
                Token::Inner => {
                    self.advance();
                    self.expect(Token::Join)?;
                    JoinType::Inner
                }
                Token::Left => {
                    self.advance();
                    self.eat(&Token::Outer);
                    self.expect(Token::Join)?;
                    JoinType::Left
                }
                Token::Right => {
                    self.advance();
                    self.eat(&Token::Outer);
                    self.expect(Token::Join)?;
                    JoinType::Right
                }
                _ => break,
            };

            let (table, alias) = self.parse_table_reference()?;

            self.expect(Token::On)?;
            let on_condition = self.parse_expression()?;

            joins.push(JoinClause {
                join_type,
                table,
                alias,
                on_condition,
            });
        }

        Ok(joins)
    }

    fn parse_projections(&mut self) -> DbResult<Vec<Projection>> {
        let mut projections = Vec::new();

        loop {
            projections.push(self.parse_projection()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }

        Ok(projections)
    }

    fn aggregation_at_cursor(&self) -> Option<AggregationType> {
        if *self.peek_token(1) != Token::LeftParen {
            return None;
        }
        match self.current_token() {
            Token::Count => Some(AggregationType::Count),
            Token::Sum => Some(AggregationType::Sum),
            Token::Avg => Some(AggregationType::Avg),
            Token::Min => Some(AggregationType::Min),
            Token::Max => Some(AggregationType::Max),
            _ => None,
        }
    }

    fn parse_projection(&mut self) -> DbResult<Projection> {
        if self.eat(&Token::Star) {
            return Ok(Projection::Star { owner: None });
        }

        if let (Token::Identifier(owner), Token::Dot, Token::Star) = (
            self.current_token().clone(),
            self.peek_token(1).clone(),
            self.peek_token(2).clone(),
        ) {
            let span = self.current().span;
            self.push_owner(&owner, span);
            self.advance();
            self.advance();
            self.advance();
            return Ok(Projection::Star { owner: Some(owner) });
        }

        let start = self.current().span.start;

        if let Some(function) = self.aggregation_at_cursor() {
            self.advance();
            self.expect(Token::LeftParen)?;
            let distinct = self.eat(&Token::Distinct);
            let argument_start = self.current().span.start;
            if !self.eat(&Token::Star) {
                self.parse_expression()?;
            }
            let argument = self.sql[argument_start..self.previous_end()].to_string();
            self.expect(Token::RightParen)?;
            let text = self.sql[start..self.previous_end()].to_string();
            let alias = self.parse_optional_alias()?;

            return Ok(Projection::Aggregate {
                function,
                distinct,
                argument,
                text,
                alias,
            });
        }

        let expr = self.parse_expression()?;
        let text = self.sql[start..self.previous_end()].to_string();
        let alias = self.parse_optional_alias()?;

        Ok(match expr {
            SqlExpr::Column { owner, name } => Projection::Column { owner, name, alias },
            _ => Projection::Expression { text, alias },
        })
    }

    fn parse_order_items(&mut self) -> DbResult<Vec<OrderItem>> {
        let mut items = Vec::new();

        loop {
            let start = self.current().span.start;
            let target = match self.parse_expression()? {
                SqlExpr::Column { owner, name } => OrderTarget::Column { owner, name },
                SqlExpr::Integer(n) if n > 0 => OrderTarget::Ordinal(n as usize),
                _ => OrderTarget::Expression(self.sql[start..self.previous_end()].to_string()),
            };

            let direction = if self.eat(&Token::Desc) {
                OrderDirection::Desc
            } else {
                self.eat(&Token::Asc);
                OrderDirection::Asc
            };

            let nulls = if self.eat_word("NULLS") {
                if self.eat_word("FIRST") {
                    Some(NullsOrder::First)
                } else if self.eat_word("LAST") {
                    Some(NullsOrder::Last)
                } else {
                    return Err(DbError::ParseError(
                        "Expected FIRST or LAST after NULLS".to_string(),
                    ));
                }
            } else {
                None
            };

            items.push(OrderItem {
                target,
                direction,
                nulls,
            });

            if !self.eat(&Token::Comma) {
                break;
            }
        }

        Ok(items)
    }

    fn parse_pagination_value(&mut self) -> DbResult<PaginationValue> {
        let span = self.current().span;
        match self.current_token().clone() {
            Token::Integer(value) => {
                self.advance();
                Ok(PaginationValue::Literal { value, span })
            }
            Token::Placeholder => {
                self.advance();
                Ok(PaginationValue::Parameter {
                    index: self.next_parameter(),
                })
            }
            other => Err(DbError::ParseError(format!(
                "Expected integer or parameter in pagination, found {:?}",
                other
            ))),
        }
    }

    fn parse_limit(&mut self) -> DbResult<Option<Limit>> {
        if self.eat(&Token::Limit) {
            let first = self.parse_pagination_value()?;
            if self.eat(&Token::Comma) {
                // MySQL: LIMIT offset, row_count
                let row_count = self.parse_pagination_value()?;
                return Ok(Some(Limit {
                    row_count: Some(row_count),
                    offset: Some(first),
                }));
            }
            let offset = if self.eat(&Token::Offset) {
                Some(self.parse_pagination_value()?)
            } else {
                None
            };
            return Ok(Some(Limit {
                row_count: Some(first),
                offset,
            }));
        }

        if self.eat(&Token::Offset) {
            let offset = self.parse_pagination_value()?;
            self.eat_word("ROWS");
            let row_count = if self.eat(&Token::Limit) {
                Some(self.parse_pagination_value()?)
            } else {
                None
            };
            return Ok(Some(Limit {
                row_count,
                offset: Some(offset),
            }));
        }

        Ok(None)
    }

    fn parse_expression_list(&mut self) -> DbResult<Vec<SqlExpr>> {
        let mut exprs = Vec::new();

        loop {
            exprs.push(self.parse_expression()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }

        Ok(exprs)
    }

    pub(crate) fn parse_expression(&mut self) -> DbResult<SqlExpr> {
        self.parse_or_expression()
    }

    fn parse_or_expression(&mut self) -> DbResult<SqlExpr> {
        let mut left = self.parse_and_expression()?;

        while self.eat(&Token::Or) {
            let right = self.parse_and_expression()?;
            left = SqlExpr::BinaryOp {
                left: Box::new(left),
                op: BinaryOp::Or,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_and_expression(&mut self) -> DbResult<SqlExpr> {
        let mut left = self.parse_not_expression()?;

        while self.eat(&Token::And) {
            let right = self.parse_not_expression()?;
            left = SqlExpr::BinaryOp {
                left: Box::new(left),
                op: BinaryOp::And,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_not_expression(&mut self) -> DbResult<SqlExpr> {
        if self.eat(&Token::Not) {
            let expr = self.parse_not_expression()?;
            return Ok(SqlExpr::Not(Box::new(expr)));
        }

        self.parse_comparison_expression()
    }

    fn parse_comparison_expression(&mut self) -> DbResult<SqlExpr> {
        let left = self.parse_additive_expression()?;

        if self.eat(&Token::Is) {
            if self.eat(&Token::Not) {
                self.expect(Token::Null)?;
                return Ok(SqlExpr::IsNotNull(Box::new(left)));
            }
            self.expect(Token::Null)?;
            return Ok(SqlExpr::IsNull(Box::new(left)));
        }

        let negated = *self.current_token() == Token::Not
            && matches!(self.peek_token(1), Token::Between | Token::In | Token::Like);
        if negated {
            self.advance();
        }

        if self.eat(&Token::Between) {
            let low = self.parse_additive_expression()?;
            self.expect(Token::And)?;
            let high = self.parse_additive_expression()?;
            return Ok(SqlExpr::Between {
                expr: Box::new(left),
                low: Box::new(low),
                high: Box::new(high),
                negated,
            });
        }

        if self.eat(&Token::In) {
            self.expect(Token::LeftParen)?;
            if *self.current_token() == Token::Select {
                return Err(DbError::ParseError(
                    "Subqueries in IN are not supported".to_string(),
                ));
            }
            let list = self.parse_expression_list()?;
            self.expect(Token::RightParen)?;
            return Ok(SqlExpr::InList {
                expr: Box::new(left),
                list,
                negated,
            });
        }

        if self.eat(&Token::Like) {
            let right = self.parse_additive_expression()?;
            let like = SqlExpr::BinaryOp {
                left: Box::new(left),
                op: BinaryOp::Like,
                right: Box::new(right),
            };
            return Ok(if negated {
                SqlExpr::Not(Box::new(like))
            } else {
                like
            });
        }

        let op = match self.current_token() {
            Token::Equal => Some(BinaryOp::Eq),
            Token::NotEqual => Some(BinaryOp::NotEq),
            Token::LessThan => Some(BinaryOp::Lt),
            Token::LessThanEq => Some(BinaryOp::LtEq),
            Token::GreaterThan => Some(BinaryOp::Gt),
            Token::GreaterThanEq => Some(BinaryOp::GtEq),
            _ => None,
        };

        if let Some(op) = op {
            self.advance();
            let right = self.parse_additive_expression()?;
            return Ok(SqlExpr::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            });
        }

        Ok(left)
    }

    fn parse_additive_expression(&mut self) -> DbResult<SqlExpr> {
        let mut left = self.parse_multiplicative_expression()?;

        loop {
            let op = match self.current_token() {
                Token::Plus => BinaryOp::Plus,
                Token::Minus => BinaryOp::Minus,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative_expression()?;
            left = SqlExpr::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_multiplicative_expression(&mut self) -> DbResult<SqlExpr> {
        let mut left = self.parse_primary_expression()?;

        loop {
            let op = match self.current_token() {
                Token::Star => BinaryOp::Multiply,
                Token::Slash => BinaryOp::Divide,
                Token::Percent => BinaryOp::Modulo,
                _ => break,
            };
            self.advance();
            let right = self.parse_primary_expression()?;
            left = SqlExpr::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_primary_expression(&mut self) -> DbResult<SqlExpr> {
        match self.current_token().clone() {
            Token::Integer(n) => {
                self.advance();
                Ok(SqlExpr::Integer(n))
            }
            Token::Float(n) => {
                self.advance();
                Ok(SqlExpr::Float(n))
            }
            Token::String(s) => {
                self.advance();
                Ok(SqlExpr::String(s))
            }
            Token::True => {
                self.advance();
                Ok(SqlExpr::Boolean(true))
            }
            Token::False => {
                self.advance();
                Ok(SqlExpr::Boolean(false))
            }
            Token::Null => {
                self.advance();
                Ok(SqlExpr::Null)
            }
            Token::Placeholder => {
                self.advance();
                Ok(SqlExpr::Parameter(self.next_parameter()))
            }
            Token::Minus => {
                self.advance();
                match self.parse_primary_expression()? {
                    SqlExpr::Integer(n) => Ok(SqlExpr::Integer(-n)),
                    SqlExpr::Float(n) => Ok(SqlExpr::Float(-n)),
                    other => Ok(SqlExpr::Negate(Box::new(other))),
                }
            }
            Token::LeftParen => {
                self.advance();
                if *self.current_token() == Token::Select {
                    return Err(DbError::ParseError(
                        "Subqueries are not supported".to_string(),
                    ));
                }
                let expr = self.parse_expression()?;
                self.expect(Token::RightParen)?;
                Ok(expr)
            }
            Token::Identifier(name) | Token::QuotedIdentifier(name) => {
                let span = self.current().span;
                self.advance();

                if *self.current_token() == Token::LeftParen {
                    self.advance();
                    let args = if *self.current_token() == Token::RightParen {
                        Vec::new()
                    } else {
                        self.parse_expression_list()?
                    };
                    self.expect(Token::RightParen)?;
                    return Ok(SqlExpr::Function { name, args });
                }

                if self.eat(&Token::Dot) {
                    let column = self.expect_identifier()?;
                    self.push_owner(&name, span);
                    return Ok(SqlExpr::Column {
                        owner: Some(name),
                        name: column,
                    });
                }

                Ok(SqlExpr::Column { owner: None, name })
            }
            Token::Count | Token::Sum | Token::Avg | Token::Min | Token::Max => {
                let name = match self.current_token() {
                    Token::Count => "COUNT",
                    Token::Sum => "SUM",
                    Token::Avg => "AVG",
                    Token::Min => "MIN",
                    _ => "MAX",
                }
                .to_string();
                self.advance();

                self.expect(Token::LeftParen)?;
                self.eat(&Token::Distinct);
                let args = if self.eat(&Token::Star) {
                    vec![SqlExpr::Column {
                        owner: None,
                        name: "*".to_string(),
                    }]
                } else if *self.current_token() == Token::RightParen {
                    Vec::new()
                } else {
                    self.parse_expression_list()?
                };
                self.expect(Token::RightParen)?;

                Ok(SqlExpr::Function { name, args })
            }
            other => Err(DbError::ParseError(format!(
                "Unexpected token in expression: {:?}",
                other
            ))),
        }
    }

    fn parse_insert(&mut self) -> DbResult<SqlStatement> {
        self.expect(Token::Insert)?;
        self.expect(Token::Into)?;

        let (name, span) = self.expect_table_name()?;
        let table = TableSegment {
            name,
            alias: None,
            span,
            is_owner: false,
        };

        let columns = if self.eat(&Token::LeftParen) {
            let mut cols = Vec::new();
            loop {
                cols.push(self.expect_identifier()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(Token::RightParen)?;
            Some(cols)
        } else {
            None
        };

        if !self.eat(&Token::Values) && !self.eat_word("VALUE") {
            return Err(DbError::ParseError(format!(
                "Expected VALUES, found {:?}",
                self.current_token()
            )));
        }

        let mut rows = Vec::new();
        loop {
            let start = self.current().span.start;
            let first_parameter = self.parameter_index;
            self.expect(Token::LeftParen)?;
            let values = self.parse_expression_list()?;
            self.expect(Token::RightParen)?;

            if let Some(cols) = &columns {
                if cols.len() != values.len() {
                    return Err(DbError::ParseError(format!(
                        "Column count {} does not match value count {}",
                        cols.len(),
                        values.len()
                    )));
                }
            }

            rows.push(InsertRow {
                values,
                span: Span::new(start, self.previous_end()),
                first_parameter,
                parameter_count: self.parameter_index - first_parameter,
            });

            if !self.eat(&Token::Comma) {
                break;
            }
        }

        Ok(SqlStatement::Insert(InsertStatement {
            table,
            columns,
            rows,
            parameter_count: self.parameter_index,
        }))
    }

    fn parse_update(&mut self) -> DbResult<SqlStatement> {
        self.expect(Token::Update)?;

        self.parse_table_reference()?;

        self.expect(Token::Set)?;

        let mut assignments = Vec::new();
        loop {
            let column = match self.parse_primary_expression()? {
                SqlExpr::Column { name, .. } => name,
                other => {
                    return Err(DbError::ParseError(format!(
                        "Expected column in SET, found {:?}",
                        other
                    )));
                }
            };
            self.expect(Token::Equal)?;
            let value = self.parse_expression()?;
            assignments.push((column, value));

            if !self.eat(&Token::Comma) {
                break;
            }
        }

        let where_clause = if self.eat(&Token::Where) {
            Some(self.parse_expression()?)
        } else {
            None
        };

        Ok(SqlStatement::Update(UpdateStatement {
            tables: std::mem::take(&mut self.tables),
            assignments,
            where_clause,
            parameter_count: self.parameter_index,
        }))
    }

    fn parse_delete(&mut self) -> DbResult<SqlStatement> {
        self.expect(Token::Delete)?;
        self.expect(Token::From)?;

        self.parse_table_reference()?;

        let where_clause = if self.eat(&Token::Where) {
            Some(self.parse_expression()?)
        } else {
            None
        };

        Ok(SqlStatement::Delete(DeleteStatement {
            tables: std::mem::take(&mut self.tables),
            where_clause,
            parameter_count: self.parameter_index,
        }))
    }

    fn skip_if_exists(&mut self) {
        if self.is_word("IF") {
            self.advance();
            self.eat(&Token::Not);
            self.eat_word("EXISTS");
        }
    }

    fn parse_ddl(&mut self) -> DbResult<SqlStatement> {
        let leading = self.current_token().clone();
        self.advance();

        let operation = match leading {
            Token::Create => {
                self.eat_word("TEMPORARY");
                self.eat_word("UNIQUE");
                if self.eat_word("INDEX") {
                    DdlOperation::CreateIndex
                } else {
                    self.expect(Token::Table)?;
                    DdlOperation::Create
                }
            }
            Token::Drop => {
                if self.eat_word("INDEX") {
                    DdlOperation::DropIndex
                } else {
                    self.expect(Token::Table)?;
                    DdlOperation::Drop
                }
            }
            Token::Identifier(ref word) if word.eq_ignore_ascii_case("ALTER") => {
                self.expect(Token::Table)?;
                DdlOperation::Alter
            }
            _ => {
                self.eat(&Token::Table);
                DdlOperation::Truncate
            }
        };

        match operation {
            DdlOperation::CreateIndex | DdlOperation::DropIndex => {
                // index name, then ON table (MySQL) for both forms
                self.skip_if_exists();
                self.expect_identifier()?;
                if self.eat(&Token::On) {
                    let (name, span) = self.expect_table_name()?;
                    self.push_table(name, None, span);
                }
            }
            _ => {
                self.skip_if_exists();
                loop {
                    let (name, span) = self.expect_table_name()?;
                    self.push_table(name, None, span);
                    if operation != DdlOperation::Drop || !self.eat(&Token::Comma) {
                        break;
                    }
                }
            }
        }

        Ok(SqlStatement::Ddl(DdlStatement {
            operation,
            tables: std::mem::take(&mut self.tables),
        }))
    }

    fn parse_dcl(&mut self) -> DbResult<SqlStatement> {
        while !matches!(self.current_token(), Token::On | Token::Eof) {
            self.advance();
        }
        if self.eat(&Token::On) {
            self.eat(&Token::Table);
            if let (Token::Identifier(_), next) = (self.current_token().clone(), self.peek_token(1)) {
                if *next != Token::Dot {
                    let (name, span) = self.expect_table_name()?;
                    self.push_table(name, None, span);
                }
            }
        }
        Ok(SqlStatement::Dcl(DclStatement {
            tables: std::mem::take(&mut self.tables),
        }))
    }

    fn parse_tcl(&mut self) -> DbResult<SqlStatement> {
        let word = self.word().unwrap_or_default();
        self.advance();
        let statement = match word.as_str() {
            "BEGIN" | "START" => TclStatement::Begin,
            "COMMIT" => TclStatement::Commit,
            "ROLLBACK" => {
                self.eat_word("WORK");
                if self.eat_word("TO") {
                    self.eat_word("SAVEPOINT");
                    TclStatement::Savepoint(self.expect_identifier()?)
                } else {
                    TclStatement::Rollback
                }
            }
            _ => TclStatement::Savepoint(self.expect_identifier()?),
        };
        Ok(SqlStatement::Tcl(statement))
    }

    fn parse_set(&mut self) -> DbResult<SqlStatement> {
        self.expect(Token::Set)?;
        if self.eat_word("AUTOCOMMIT") {
            self.expect(Token::Equal)?;
            let enabled = match self.current_token().clone() {
                Token::Integer(n) => n != 0,
                Token::True => true,
                Token::False => false,
                Token::On => true,
                Token::Identifier(w) if w.eq_ignore_ascii_case("OFF") => false,
                other => {
                    return Err(DbError::ParseError(format!(
                        "Invalid AUTOCOMMIT value: {:?}",
                        other
                    )));
                }
            };
            return Ok(SqlStatement::Tcl(TclStatement::SetAutoCommit(enabled)));
        }
        Ok(SqlStatement::Dal(DalStatement {
            keyword: "SET".to_string(),
            tables: Vec::new(),
        }))
    }

    fn parse_dal(&mut self) -> DbResult<SqlStatement> {
        let keyword = match self.current_token() {
            Token::Desc => "DESCRIBE".to_string(),
            _ => self.word().unwrap_or_default(),
        };
        self.advance();

        match keyword.as_str() {
            "DESCRIBE" | "EXPLAIN" => {
                if let Token::Identifier(_) | Token::QuotedIdentifier(_) = self.current_token() {
                    let (name, span) = self.expect_table_name()?;
                    self.push_table(name, None, span);
                }
            }
            "SHOW" => {
                // SHOW COLUMNS FROM t / SHOW INDEX FROM t / SHOW CREATE TABLE t
                while !matches!(self.current_token(), Token::From | Token::Table | Token::Eof) {
                    self.advance();
                }
                if self.eat(&Token::From) || self.eat(&Token::Table) {
                    let (name, span) = self.expect_table_name()?;
                    self.push_table(name, None, span);
                }
            }
            _ => {}
        }

        Ok(SqlStatement::Dal(DalStatement {
            keyword,
            tables: std::mem::take(&mut self.tables),
        }))
    }
}
