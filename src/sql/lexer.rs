use super::DatabaseType;
use crate::error::{DbError, DbResult};

/// Byte range of a token inside the original SQL text (end exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // SQL Keywords
    Select,
    From,
    Where,
    Insert,
    Into,
    Values,
    Update,
    Set,
    Delete,
    Create,
    Drop,
    Table,
    Distinct,

    // Clauses
    Order,
    By,
    Group,
    Having,
    Limit,
    Offset,
    As,

    // Joins
    Join,
    Left,
    Right,
    Inner,
    Outer,
    On,

    // Logical
    And,
    Or,
    Not,

    // Comparison
    Is,
    Null,
    Between,
    Like,
    In,

    // Aggregates
    Count,
    Sum,
    Avg,
    Min,
    Max,

    // Boolean
    True,
    False,

    // Sort direction
    Asc,
    Desc,

    // Literals and identifiers
    Identifier(String),
    QuotedIdentifier(String),
    Integer(i64),
    Float(f64),
    String(String),
    Placeholder,

    // Operators
    Equal,         // =
    NotEqual,      // != or <>
    LessThan,      // <
    LessThanEq,    // <=
    GreaterThan,   // >
    GreaterThanEq, // >=
    Plus,          // +
    Minus,         // -
    Star,          // *
    Slash,         // /
    Percent,       // %

    // Delimiters
    Comma,
    Dot,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Semicolon,

    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

pub struct SqlLexer {
    /// (byte offset, char) pairs of the input
    input: Vec<(usize, char)>,
    len: usize,
    position: usize,
    current_char: Option<char>,
    database_type: DatabaseType,
}

impl SqlLexer {
    pub fn new(input: &str, database_type: DatabaseType) -> Self {
        let chars: Vec<(usize, char)> = input.char_indices().collect();
        let current_char = chars.first().map(|(_, c)| *c);

        Self {
            input: chars,
            len: input.len(),
            position: 0,
            current_char,
            database_type,
        }
    }

    fn offset(&self) -> usize {
        self.input.get(self.position).map(|(o, _)| *o).unwrap_or(self.len)
    }

    fn advance(&mut self) {
        self.position += 1;
        self.current_char = self.input.get(self.position).map(|(_, c)| *c);
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position + 1).map(|(_, c)| *c)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(ch) = self.current_char {
            self.advance();
            if ch == '\n' {
                break;
            }
        }
    }

    fn skip_block_comment(&mut self) {
        self.advance(); // skip /
        self.advance(); // skip *
        while let Some(ch) = self.current_char {
            if ch == '*' && self.peek() == Some('/') {
                self.advance();
                self.advance();
                break;
            }
            self.advance();
        }
    }

    fn read_number(&mut self) -> DbResult<Token> {
        let mut num_str = String::new();
        let mut has_dot = false;

        while let Some(ch) = self.current_char {
            if ch.is_ascii_digit() {
                num_str.push(ch);
                self.advance();
            } else if ch == '.' && !has_dot && self.peek().is_some_and(|n| n.is_ascii_digit()) {
                has_dot = true;
                num_str.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        if has_dot {
            num_str
                .parse::<f64>()
                .map(Token::Float)
                .map_err(|_| DbError::ParseError(format!("Invalid float number: {}", num_str)))
        } else {
            num_str
                .parse::<i64>()
                .map(Token::Integer)
                .map_err(|_| DbError::ParseError(format!("Invalid integer number: {}", num_str)))
        }
    }

    fn read_string(&mut self, quote: char) -> DbResult<Token> {
        self.advance(); // opening quote

        let mut string = String::new();

        while let Some(ch) = self.current_char {
            if ch == quote {
                // doubled quote is an escaped quote
                if self.peek() == Some(quote) {
                    string.push(quote);
                    self.advance();
                    self.advance();
                } else {
                    self.advance();
                    return Ok(Token::String(string));
                }
            } else if ch == '\\' {
                self.advance();
                if let Some(escaped) = self.current_char {
                    string.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        _ => escaped,
                    });
                    self.advance();
                }
            } else {
                string.push(ch);
                self.advance();
            }
        }

        Err(DbError::ParseError("Unterminated string".to_string()))
    }

    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();

        while let Some(ch) = self.current_char {
            if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        match ident.to_uppercase().as_str() {
            "SELECT" => Token::Select,
            "FROM" => Token::From,
            "WHERE" => Token::Where,
            "INSERT" => Token::Insert,
            "INTO" => Token::Into,
            "VALUES" => Token::Values,
            "UPDATE" => Token::Update,
            "SET" => Token::Set,
            "DELETE" => Token::Delete,
            "CREATE" => Token::Create,
            "DROP" => Token::Drop,
            "TABLE" => Token::Table,
            "DISTINCT" => Token::Distinct,
            "ORDER" => Token::Order,
            "BY" => Token::By,
            "GROUP" => Token::Group,
            "HAVING" => Token::Having,
            "LIMIT" => Token::Limit,
            "OFFSET" => Token::Offset,
            "AS" => Token::As,
            "JOIN" => Token::Join,
            "LEFT" => Token::Left,
            "RIGHT" => Token::Right,
            "INNER" => Token::Inner,
            "OUTER" => Token::Outer,
            "ON" => Token::On,
            "AND" => Token::And,
            "OR" => Token::Or,
            "NOT" => Token::Not,
            "IS" => Token::Is,
            "NULL" => Token::Null,
            "BETWEEN" => Token::Between,
            "LIKE" => Token::Like,
            "IN" => Token::In,
            "COUNT" => Token::Count,
            "SUM" => Token::Sum,
            "AVG" => Token::Avg,
            "MIN" => Token::Min,
            "MAX" => Token::Max,
            "TRUE" => Token::True,
            "FALSE" => Token::False,
            "ASC" => Token::Asc,
            "DESC" => Token::Desc,
            _ => Token::Identifier(ident),
        }
    }

    fn read_quoted_identifier(&mut self, quote: char) -> DbResult<Token> {
        self.advance(); // opening quote

        let mut ident = String::new();

        while let Some(ch) = self.current_char {
            if ch == quote {
                self.advance();
                return Ok(Token::QuotedIdentifier(ident));
            }
            ident.push(ch);
            self.advance();
        }

        Err(DbError::ParseError("Unterminated quoted identifier".to_string()))
    }

    fn single(&mut self, token: Token) -> Token {
        self.advance();
        token
    }

    fn next_token(&mut self) -> DbResult<SpannedToken> {
        loop {
            self.skip_whitespace();

            match self.current_char {
                Some('-') if self.peek() == Some('-') => self.skip_line_comment(),
                Some('#') if self.database_type == DatabaseType::MySQL => self.skip_line_comment(),
                Some('/') if self.peek() == Some('*') => self.skip_block_comment(),
                _ => break,
            }
        }

        let start = self.offset();

        let token = match self.current_char {
            None => Token::Eof,
            Some(ch) if ch.is_ascii_digit() => self.read_number()?,
            Some('\'') => self.read_string('\'')?,
            Some('"') => match self.database_type {
                DatabaseType::PostgreSQL => self.read_quoted_identifier('"')?,
                DatabaseType::MySQL => self.read_string('"')?,
            },
            Some('`') => self.read_quoted_identifier('`')?,
            Some(ch) if ch.is_alphabetic() || ch == '_' => self.read_identifier(),
            Some('?') => self.single(Token::Placeholder),
            Some('=') => self.single(Token::Equal),
            Some('!') => {
                self.advance();
                if self.current_char == Some('=') {
                    self.single(Token::NotEqual)
                } else {
                    Token::Not
                }
            }
            Some('<') => {
                self.advance();
                match self.current_char {
                    Some('=') => self.single(Token::LessThanEq),
                    Some('>') => self.single(Token::NotEqual),
                    _ => Token::LessThan,
                }
            }
            Some('>') => {
                self.advance();
                if self.current_char == Some('=') {
                    self.single(Token::GreaterThanEq)
                } else {
                    Token::GreaterThan
                }
            }
            Some('+') => self.single(Token::Plus),
            Some('-') => self.single(Token::Minus),
            Some('*') => self.single(Token::Star),
            Some('/') => self.single(Token::Slash),
            Some('%') => self.single(Token::Percent),
            Some(',') => self.single(Token::Comma),
            Some('.') => self.single(Token::Dot),
            Some('(') => self.single(Token::LeftParen),
            Some(')') => self.single(Token::RightParen),
            Some('[') => self.single(Token::LeftBracket),
            Some(']') => self.single(Token::RightBracket),
            Some(';') => self.single(Token::Semicolon),
            Some(ch) => {
                return Err(DbError::ParseError(format!("Unexpected character: {}", ch)));
            }
        };

        Ok(SpannedToken {
            token,
            span: Span::new(start, self.offset()),
        })
    }

    pub fn tokenize(&mut self) -> DbResult<Vec<SpannedToken>> {
        let mut tokens = Vec::new();

        loop {
            let token = self.next_token()?;
            let done = token.token == Token::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }

        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(input: &str) -> Vec<Token> {
        SqlLexer::new(input, DatabaseType::MySQL)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(tokenize("select")[0], Token::Select);
        assert_eq!(tokenize("Select")[0], Token::Select);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(tokenize("123")[0], Token::Integer(123));
        assert_eq!(tokenize("3.25")[0], Token::Float(3.25));
    }

    #[test]
    fn test_operators() {
        assert_eq!(tokenize("!=")[0], Token::NotEqual);
        assert_eq!(tokenize("<>")[0], Token::NotEqual);
        assert_eq!(tokenize("<=")[0], Token::LessThanEq);
        assert_eq!(tokenize(">=")[0], Token::GreaterThanEq);
    }

    #[test]
    fn test_spans_are_byte_offsets() {
        let sql = "SELECT * FROM t_order WHERE id = ?";
        let tokens = SqlLexer::new(sql, DatabaseType::MySQL).tokenize().unwrap();
        let table = &tokens[3];
        assert_eq!(table.token, Token::Identifier("t_order".to_string()));
        assert_eq!(&sql[table.span.start..table.span.end], "t_order");
        assert_eq!(tokens[7].token, Token::Placeholder);
        assert_eq!(tokens.last().unwrap().span, Span::new(sql.len(), sql.len()));
    }

    #[test]
    fn test_spans_after_multibyte_text() {
        let sql = "SELECT 'é' FROM t";
        let tokens = SqlLexer::new(sql, DatabaseType::MySQL).tokenize().unwrap();
        let table = &tokens[3];
        assert_eq!(&sql[table.span.start..table.span.end], "t");
    }

    #[test]
    fn test_double_quote_depends_on_dialect() {
        let my = tokenize("\"abc\"");
        assert_eq!(my[0], Token::String("abc".to_string()));

        let pg: Vec<Token> = SqlLexer::new("\"abc\"", DatabaseType::PostgreSQL)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect();
        assert_eq!(pg[0], Token::QuotedIdentifier("abc".to_string()));
    }

    #[test]
    fn test_comments() {
        let tokens = tokenize("SELECT -- this is a comment\n* FROM users");
        assert_eq!(tokens[0], Token::Select);
        assert_eq!(tokens[1], Token::Star);
        assert_eq!(tokens[2], Token::From);
    }
}
