//! Parser for the store's SQL subset (SELECT/UPDATE/DELETE) and DDL (CREATE/DROP TABLE|INDEX)

use super::ast::*;
use rowmap_core::StoreError;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    // Keywords
    Select,
    From,
    Where,
    Update,
    Set,
    Delete,
    Create,
    Drop,
    Order,
    By,
    Asc,
    Desc,
    Limit,
    Offset,
    And,
    Or,
    Not,
    Null,
    True,
    False,
    Is,
    In,
    On,

    // Symbols
    LeftParen,
    RightParen,
    Comma,
    Semicolon,
    Star,

    // Operators
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Slash,

    // Literals
    Ident(String),
    String(String),
    Int(i64),
    Float(f64),
    Param(String), // @name

    Eof,
}

struct Lexer {
    input: Vec<char>,
    pos: usize,
}

impl Lexer {
    fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_ident(&mut self) -> String {
        let mut s = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                s.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        s
    }

    fn read_quoted(&mut self, quote: char) -> Result<String, StoreError> {
        self.advance(); // opening quote
        let mut s = String::new();
        while let Some(ch) = self.advance() {
            if ch == quote {
                // doubled quote is an escaped quote
                if self.peek() == Some(quote) {
                    self.advance();
                    s.push(quote);
                    continue;
                }
                return Ok(s);
            }
            s.push(ch);
        }
        Err(StoreError::InvalidArgument("unterminated quoted literal".into()))
    }

    fn read_number(&mut self) -> Result<Token, StoreError> {
        let mut num = String::new();
        let mut is_float = false;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                num.push(ch);
                self.advance();
            } else if ch == '.' && !is_float {
                is_float = true;
                num.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        if is_float {
            num.parse::<f64>()
                .map(Token::Float)
                .map_err(|_| StoreError::InvalidArgument(format!("invalid float: {num}")))
        } else {
            num.parse::<i64>()
                .map(Token::Int)
                .map_err(|_| StoreError::InvalidArgument(format!("invalid int: {num}")))
        }
    }

    fn next_token(&mut self) -> Result<Token, StoreError> {
        self.skip_whitespace();
        match self.peek() {
            None => Ok(Token::Eof),
            Some('(') => { self.advance(); Ok(Token::LeftParen) }
            Some(')') => { self.advance(); Ok(Token::RightParen) }
            Some(',') => { self.advance(); Ok(Token::Comma) }
            Some(';') => { self.advance(); Ok(Token::Semicolon) }
            Some('*') => { self.advance(); Ok(Token::Star) }
            Some('+') => { self.advance(); Ok(Token::Plus) }
            Some('-') => { self.advance(); Ok(Token::Minus) }
            Some('/') => { self.advance(); Ok(Token::Slash) }
            Some('=') => { self.advance(); Ok(Token::Eq) }
            Some('\'') => self.read_quoted('\'').map(Token::String),
            Some('"') => self.read_quoted('"').map(Token::String),
            Some('`') => self.read_quoted('`').map(Token::Ident),
            Some('@') => {
                self.advance();
                let name = self.read_ident();
                if name.is_empty() {
                    return Err(StoreError::InvalidArgument("expected parameter name after @".into()));
                }
                Ok(Token::Param(name))
            }
            Some('<') => {
                self.advance();
                match self.peek() {
                    Some('=') => { self.advance(); Ok(Token::Le) }
                    Some('>') => { self.advance(); Ok(Token::Ne) }
                    _ => Ok(Token::Lt),
                }
            }
            Some('>') => {
                self.advance();
                if self.peek() == Some('=') {
                    self.advance();
                    Ok(Token::Ge)
                } else {
                    Ok(Token::Gt)
                }
            }
            Some('!') => {
                self.advance();
                if self.peek() == Some('=') {
                    self.advance();
                    Ok(Token::Ne)
                } else {
                    Err(StoreError::InvalidArgument("unexpected !".into()))
                }
            }
            Some(ch) if ch.is_ascii_digit() => self.read_number(),
            Some(ch) if ch.is_alphabetic() || ch == '_' => {
                let ident = self.read_ident();
                Ok(match ident.to_uppercase().as_str() {
                    "SELECT" => Token::Select,
                    "FROM" => Token::From,
                    "WHERE" => Token::Where,
                    "UPDATE" => Token::Update,
                    "SET" => Token::Set,
                    "DELETE" => Token::Delete,
                    "CREATE" => Token::Create,
                    "DROP" => Token::Drop,
                    "ORDER" => Token::Order,
                    "BY" => Token::By,
                    "ASC" => Token::Asc,
                    "DESC" => Token::Desc,
                    "LIMIT" => Token::Limit,
                    "OFFSET" => Token::Offset,
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    "NULL" => Token::Null,
                    "TRUE" => Token::True,
                    "FALSE" => Token::False,
                    "IS" => Token::Is,
                    "IN" => Token::In,
                    "ON" => Token::On,
                    _ => Token::Ident(ident),
                })
            }
            Some(ch) => Err(StoreError::InvalidArgument(format!("unexpected char: {ch}"))),
        }
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(input: &str) -> Result<Self, StoreError> {
        let mut lexer = Lexer::new(input);
        let mut tokens = Vec::new();
        loop {
            let tok = lexer.next_token()?;
            if tok == Token::Eof {
                tokens.push(tok);
                break;
            }
            tokens.push(tok);
        }
        Ok(Self { tokens, pos: 0 })
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if tok != Token::Eof {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: Token) -> Result<(), StoreError> {
        let tok = self.advance();
        if tok == expected {
            Ok(())
        } else {
            Err(StoreError::InvalidArgument(format!("expected {:?}, got {:?}", expected, tok)))
        }
    }

    fn ident(&mut self) -> Result<String, StoreError> {
        match self.advance() {
            Token::Ident(name) => Ok(name),
            other => Err(StoreError::InvalidArgument(format!("expected identifier, got {:?}", other))),
        }
    }

    /// Consumes a non-reserved word such as TABLE or PRIMARY, case-insensitively.
    fn eat_word(&mut self, word: &str) -> bool {
        if let Token::Ident(name) = self.peek() {
            if name.eq_ignore_ascii_case(word) {
                self.advance();
                return true;
            }
        }
        false
    }

    fn expect_word(&mut self, word: &str) -> Result<(), StoreError> {
        if self.eat_word(word) {
            Ok(())
        } else {
            Err(StoreError::InvalidArgument(format!("expected {word}, got {:?}", self.peek())))
        }
    }

    fn finish(&mut self) -> Result<(), StoreError> {
        if *self.peek() == Token::Semicolon {
            self.advance();
        }
        match self.peek() {
            Token::Eof => Ok(()),
            other => Err(StoreError::InvalidArgument(format!("unexpected trailing token {:?}", other))),
        }
    }

    pub fn parse_statement(&mut self) -> Result<SqlStatement, StoreError> {
        let stmt = match self.peek() {
            Token::Select => SqlStatement::Select(self.parse_select()?),
            Token::Update => SqlStatement::Update(self.parse_update()?),
            Token::Delete => SqlStatement::Delete(self.parse_delete()?),
            other => {
                return Err(StoreError::InvalidArgument(format!(
                    "expected SELECT, UPDATE or DELETE, got {:?}",
                    other
                )))
            }
        };
        self.finish()?;
        Ok(stmt)
    }

    fn parse_select(&mut self) -> Result<Select, StoreError> {
        self.expect(Token::Select)?;
        let projection = self.parse_projection()?;
        self.expect(Token::From)?;
        let table = self.ident()?;
        let filter = self.parse_where()?;

        let mut order_by = Vec::new();
        if *self.peek() == Token::Order {
            self.advance();
            self.expect(Token::By)?;
            loop {
                let column = self.ident()?;
                let descending = match self.peek() {
                    Token::Desc => { self.advance(); true }
                    Token::Asc => { self.advance(); false }
                    _ => false, // Default to ASC
                };
                order_by.push(OrderByItem { column, descending });
                if *self.peek() == Token::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
        }

        let limit = if *self.peek() == Token::Limit {
            self.advance();
            Some(self.parse_primary()?)
        } else {
            None
        };
        let offset = if *self.peek() == Token::Offset {
            self.advance();
            Some(self.parse_primary()?)
        } else {
            None
        };

        Ok(Select { projection, table, filter, order_by, limit, offset })
    }

    fn parse_projection(&mut self) -> Result<Projection, StoreError> {
        if *self.peek() == Token::Star {
            self.advance();
            return Ok(Projection::Star);
        }
        if let Token::Ident(name) = self.peek() {
            if name.eq_ignore_ascii_case("COUNT") {
                self.advance();
                self.expect(Token::LeftParen)?;
                match self.advance() {
                    Token::Star | Token::Int(_) => {}
                    other => {
                        return Err(StoreError::InvalidArgument(format!("unsupported COUNT argument {:?}", other)))
                    }
                }
                self.expect(Token::RightParen)?;
                return Ok(Projection::Count);
            }
        }
        let mut columns = vec![self.ident()?];
        while *self.peek() == Token::Comma {
            self.advance();
            columns.push(self.ident()?);
        }
        Ok(Projection::Columns(columns))
    }

    fn parse_where(&mut self) -> Result<Option<Expr>, StoreError> {
        if *self.peek() == Token::Where {
            self.advance();
            Ok(Some(self.parse_expr()?))
        } else {
            Ok(None)
        }
    }

    fn parse_update(&mut self) -> Result<Update, StoreError> {
        self.expect(Token::Update)?;
        let table = self.ident()?;
        self.expect(Token::Set)?;
        let mut assignments = Vec::new();
        loop {
            let column = self.ident()?;
            self.expect(Token::Eq)?;
            assignments.push((column, self.parse_expr()?));
            if *self.peek() == Token::Comma {
                self.advance();
            } else {
                break;
            }
        }
        let filter = self.parse_where()?;
        Ok(Update { table, assignments, filter })
    }

    fn parse_delete(&mut self) -> Result<Delete, StoreError> {
        self.expect(Token::Delete)?;
        if *self.peek() == Token::From {
            self.advance();
        }
        let table = self.ident()?;
        let filter = self.parse_where()?;
        Ok(Delete { table, filter })
    }

    // -----------------------
    // Expressions
    // -----------------------

    fn parse_expr(&mut self) -> Result<Expr, StoreError> {
        self.parse_or_expr()
    }

    fn parse_or_expr(&mut self) -> Result<Expr, StoreError> {
        let mut left = self.parse_and_expr()?;
        while *self.peek() == Token::Or {
            self.advance();
            let right = self.parse_and_expr()?;
            left = Expr::BinaryOp(Box::new(left), BinOp::Or, Box::new(right));
        }
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<Expr, StoreError> {
        let mut left = self.parse_not_expr()?;
        while *self.peek() == Token::And {
            self.advance();
            let right = self.parse_not_expr()?;
            left = Expr::BinaryOp(Box::new(left), BinOp::And, Box::new(right));
        }
        Ok(left)
    }

    fn parse_not_expr(&mut self) -> Result<Expr, StoreError> {
        if *self.peek() == Token::Not {
            self.advance();
            let operand = self.parse_not_expr()?;
            return Ok(Expr::UnaryOp(UnOp::Not, Box::new(operand)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, StoreError> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Token::Eq => BinOp::Eq,
            Token::Ne => BinOp::Ne,
            Token::Lt => BinOp::Lt,
            Token::Le => BinOp::Le,
            Token::Gt => BinOp::Gt,
            Token::Ge => BinOp::Ge,
            Token::Is => {
                self.advance();
                let negated = if *self.peek() == Token::Not {
                    self.advance();
                    true
                } else {
                    false
                };
                self.expect(Token::Null)?;
                return Ok(if negated {
                    Expr::IsNotNull(Box::new(left))
                } else {
                    Expr::IsNull(Box::new(left))
                });
            }
            Token::In => {
                self.advance();
                return self.parse_in_list(left, false);
            }
            Token::Not => {
                self.advance();
                self.expect(Token::In)?;
                return self.parse_in_list(left, true);
            }
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(Expr::BinaryOp(Box::new(left), op, Box::new(right)))
    }

    fn parse_in_list(&mut self, expr: Expr, negated: bool) -> Result<Expr, StoreError> {
        self.expect(Token::LeftParen)?;
        let mut list = vec![self.parse_expr()?];
        while *self.peek() == Token::Comma {
            self.advance();
            list.push(self.parse_expr()?);
        }
        self.expect(Token::RightParen)?;
        Ok(Expr::InList { expr: Box::new(expr), list, negated })
    }

    fn parse_additive(&mut self) -> Result<Expr, StoreError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::BinaryOp(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, StoreError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::BinaryOp(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, StoreError> {
        if *self.peek() == Token::Minus {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::UnaryOp(UnOp::Neg, Box::new(operand)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, StoreError> {
        match self.advance() {
            Token::Int(n) => Ok(Expr::Literal(Literal::Int(n))),
            Token::Float(f) => Ok(Expr::Literal(Literal::Float(f))),
            Token::String(s) => Ok(Expr::Literal(Literal::String(s))),
            Token::True => Ok(Expr::Literal(Literal::Bool(true))),
            Token::False => Ok(Expr::Literal(Literal::Bool(false))),
            Token::Null => Ok(Expr::Literal(Literal::Null)),
            Token::Param(name) => Ok(Expr::Parameter(name)),
            Token::Ident(name) => Ok(Expr::Column(name)),
            Token::LeftParen => {
                let expr = self.parse_expr()?;
                self.expect(Token::RightParen)?;
                Ok(expr)
            }
            other => Err(StoreError::InvalidArgument(format!("unexpected token in expression: {:?}", other))),
        }
    }

    // -----------------------
    // DDL
    // -----------------------

    pub fn parse_ddl(&mut self) -> Result<DdlStatement, StoreError> {
        let stmt = match self.advance() {
            Token::Create => {
                if self.eat_word("TABLE") {
                    DdlStatement::CreateTable(self.parse_create_table()?)
                } else {
                    self.eat_word("UNIQUE");
                    self.eat_word("NULL_FILTERED");
                    self.expect_word("INDEX")?;
                    DdlStatement::CreateIndex(self.parse_create_index()?)
                }
            }
            Token::Drop => {
                if self.eat_word("TABLE") {
                    DdlStatement::DropTable(self.ident()?)
                } else {
                    self.expect_word("INDEX")?;
                    DdlStatement::DropIndex(self.ident()?)
                }
            }
            other => return Err(StoreError::InvalidArgument(format!("expected CREATE or DROP, got {:?}", other))),
        };
        self.finish()?;
        Ok(stmt)
    }

    fn parse_create_table(&mut self) -> Result<CreateTable, StoreError> {
        let name = self.ident()?;
        self.expect(Token::LeftParen)?;
        let mut columns = Vec::new();
        if *self.peek() != Token::RightParen {
            loop {
                columns.push(self.ident()?);
                self.skip_column_type()?;
                if *self.peek() == Token::Comma {
                    self.advance();
                    // trailing comma before ')' is accepted
                    if *self.peek() == Token::RightParen {
                        break;
                    }
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RightParen)?;
        self.expect_word("PRIMARY")?;
        self.expect_word("KEY")?;
        let primary_key = self.parse_column_list()?;

        let mut parent = None;
        let mut on_delete_cascade = false;
        if *self.peek() == Token::Comma {
            self.advance();
            self.expect_word("INTERLEAVE")?;
            self.expect(Token::In)?;
            self.expect_word("PARENT")?;
            parent = Some(self.ident()?);
            if *self.peek() == Token::On {
                self.advance();
                self.expect(Token::Delete)?;
                if self.eat_word("CASCADE") {
                    on_delete_cascade = true;
                } else {
                    self.expect_word("NO")?;
                    self.expect_word("ACTION")?;
                }
            }
        }
        Ok(CreateTable { name, columns, primary_key, parent, on_delete_cascade })
    }

    /// Skips a column's type and options up to the next top-level ',' or ')'.
    fn skip_column_type(&mut self) -> Result<(), StoreError> {
        let mut depth = 0usize;
        loop {
            match self.peek() {
                Token::Eof => return Err(StoreError::InvalidArgument("unterminated column definition".into())),
                Token::Comma | Token::RightParen if depth == 0 => return Ok(()),
                Token::LeftParen => depth += 1,
                Token::RightParen => depth -= 1,
                _ => {}
            }
            self.advance();
        }
    }

    fn parse_create_index(&mut self) -> Result<CreateIndex, StoreError> {
        let name = self.ident()?;
        self.expect(Token::On)?;
        let table = self.ident()?;
        let columns = self.parse_column_list()?;
        Ok(CreateIndex { name, table, columns })
    }

    /// `(a [ASC|DESC], b ...)`
    fn parse_column_list(&mut self) -> Result<Vec<String>, StoreError> {
        self.expect(Token::LeftParen)?;
        let mut columns = Vec::new();
        loop {
            columns.push(self.ident()?);
            if matches!(self.peek(), Token::Asc | Token::Desc) {
                self.advance();
            }
            if *self.peek() == Token::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(Token::RightParen)?;
        Ok(columns)
    }
}

pub fn parse_sql(input: &str) -> Result<SqlStatement, StoreError> {
    let mut parser = Parser::new(input)?;
    parser.parse_statement()
}

pub fn parse_ddl(input: &str) -> Result<DdlStatement, StoreError> {
    let mut parser = Parser::new(input)?;
    parser.parse_ddl()
}
