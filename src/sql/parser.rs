//! Recursive-descent SQL parser with a one-token lookahead buffer.
//!
//! Every production reads tokens through `scan` and pushes the token back
//! with `unscan` when it belongs to the caller. Parse errors carry the
//! offending token's position and the alternatives the failing production
//! actually accepts.

use crate::document::{Path, PathFragment, Value, ValueKind};
use crate::error::VellumError;
use crate::sql::ast::{
    BinaryOp, CreateIndexStmt, CreateTableStmt, DeleteStmt, Expr, FieldDef, InsertSource,
    InsertStmt, OrderBy, Projection, SelectStmt, SortDirection, Statement, UnaryOp, UpdateAction,
    UpdateStmt,
};
use crate::sql::scanner::Scanner;
use crate::sql::token::{Token, TokenKind};

pub struct Parser {
    scanner: Scanner,
    buffered: Option<Token>,
    positional_count: usize,
}

/// Parses exactly one statement, allowing a trailing semicolon.
pub fn parse(sql: &str) -> Result<Statement, VellumError> {
    let mut parser = Parser::new(sql);
    let stmt = parser.parse_statement()?;
    parser.finish()?;
    Ok(stmt)
}

/// Parses a semicolon-separated sequence of statements.
pub fn parse_script(sql: &str) -> Result<Vec<Statement>, VellumError> {
    let mut parser = Parser::new(sql);
    let mut out = Vec::new();
    loop {
        let token = parser.scan()?;
        match token.kind {
            TokenKind::Eof => return Ok(out),
            TokenKind::Semicolon => continue,
            _ => {
                parser.unscan(token);
                out.push(parser.parse_statement()?);
            }
        }
    }
}

impl Parser {
    pub fn new(sql: &str) -> Parser {
        Parser {
            scanner: Scanner::new(sql),
            buffered: None,
            positional_count: 0,
        }
    }

    fn scan(&mut self) -> Result<Token, VellumError> {
        match self.buffered.take() {
            Some(token) => Ok(token),
            None => self.scanner.next_token(),
        }
    }

    fn unscan(&mut self, token: Token) {
        debug_assert!(self.buffered.is_none(), "unscan buffer holds one token");
        self.buffered = Some(token);
    }

    fn error(token: &Token, expected: &[&str]) -> VellumError {
        VellumError::Parse {
            line: token.line,
            column: token.col,
            found: token.kind.to_string(),
            expected: expected.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Consumes `kind` when it is next, otherwise leaves the stream
    /// untouched.
    fn eat(&mut self, kind: &TokenKind) -> Result<bool, VellumError> {
        let token = self.scan()?;
        if token.kind == *kind {
            Ok(true)
        } else {
            self.unscan(token);
            Ok(false)
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, VellumError> {
        let token = self.scan()?;
        if token.kind == kind {
            Ok(token)
        } else {
            Err(Self::error(&token, &[what]))
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, VellumError> {
        let token = self.scan()?;
        match token.kind {
            TokenKind::Ident(name) | TokenKind::QuotedIdent(name) => Ok(name),
            _ => Err(Self::error(&token, &[what])),
        }
    }

    fn finish(&mut self) -> Result<(), VellumError> {
        while self.eat(&TokenKind::Semicolon)? {}
        let token = self.scan()?;
        if token.kind == TokenKind::Eof {
            Ok(())
        } else {
            Err(Self::error(&token, &["end of statement"]))
        }
    }

    pub fn parse_statement(&mut self) -> Result<Statement, VellumError> {
        let token = self.scan()?;
        match token.kind {
            TokenKind::KwSelect => self.parse_select().map(Statement::Select),
            TokenKind::KwInsert => self.parse_insert().map(Statement::Insert),
            TokenKind::KwUpdate => self.parse_update().map(Statement::Update),
            TokenKind::KwDelete => self.parse_delete().map(Statement::Delete),
            TokenKind::KwCreate => self.parse_create(),
            TokenKind::KwDrop => self.parse_drop(),
            TokenKind::KwReindex => {
                let next = self.scan()?;
                match next.kind {
                    TokenKind::Ident(name) | TokenKind::QuotedIdent(name) => {
                        Ok(Statement::Reindex { name: Some(name) })
                    }
                    _ => {
                        self.unscan(next);
                        Ok(Statement::Reindex { name: None })
                    }
                }
            }
            TokenKind::KwBegin => {
                self.eat(&TokenKind::KwTransaction)?;
                let writable = if self.eat(&TokenKind::KwRead)? {
                    self.expect(TokenKind::KwOnly, "ONLY")?;
                    false
                } else {
                    true
                };
                Ok(Statement::Begin { writable })
            }
            TokenKind::KwCommit => Ok(Statement::Commit),
            TokenKind::KwRollback => Ok(Statement::Rollback),
            TokenKind::KwExplain => {
                let inner = self.parse_statement()?;
                Ok(Statement::Explain(Box::new(inner)))
            }
            _ => Err(Self::error(
                &token,
                &[
                    "SELECT", "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "REINDEX", "BEGIN",
                    "COMMIT", "ROLLBACK", "EXPLAIN",
                ],
            )),
        }
    }

    fn parse_select(&mut self) -> Result<SelectStmt, VellumError> {
        let distinct = self.eat(&TokenKind::KwDistinct)?;

        let mut projections = Vec::new();
        loop {
            projections.push(self.parse_projection()?);
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }

        self.expect(TokenKind::KwFrom, "FROM")?;
        let table = self.ident("table name")?;

        let filter = if self.eat(&TokenKind::KwWhere)? {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let group_by = if self.eat(&TokenKind::KwGroup)? {
            self.expect(TokenKind::KwBy, "BY")?;
            Some(self.parse_path()?)
        } else {
            None
        };

        let order_by = if self.eat(&TokenKind::KwOrder)? {
            self.expect(TokenKind::KwBy, "BY")?;
            let path = self.parse_path()?;
            let direction = if self.eat(&TokenKind::KwDesc)? {
                SortDirection::Desc
            } else {
                self.eat(&TokenKind::KwAsc)?;
                SortDirection::Asc
            };
            Some(OrderBy { path, direction })
        } else {
            None
        };

        let limit = if self.eat(&TokenKind::KwLimit)? {
            Some(self.parse_expr()?)
        } else {
            None
        };
        let offset = if self.eat(&TokenKind::KwOffset)? {
            Some(self.parse_expr()?)
        } else {
            None
        };

        Ok(SelectStmt {
            distinct,
            projections,
            table,
            filter,
            group_by,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_projection(&mut self) -> Result<Projection, VellumError> {
        if self.eat(&TokenKind::Star)? {
            return Ok(Projection::Wildcard);
        }
        let expr = self.parse_expr()?;
        let alias = if self.eat(&TokenKind::KwAs)? {
            Some(self.ident("alias")?)
        } else {
            let token = self.scan()?;
            match token.kind {
                TokenKind::Ident(name) | TokenKind::QuotedIdent(name) => Some(name),
                _ => {
                    self.unscan(token);
                    None
                }
            }
        };
        Ok(Projection::Expr { expr, alias })
    }

    fn parse_insert(&mut self) -> Result<InsertStmt, VellumError> {
        self.expect(TokenKind::KwInto, "INTO")?;
        let table = self.ident("table name")?;

        let fields = if self.eat(&TokenKind::LParen)? {
            let mut fields = Vec::new();
            loop {
                fields.push(self.ident("field name")?);
                if !self.eat(&TokenKind::Comma)? {
                    break;
                }
            }
            self.expect(TokenKind::RParen, "')'")?;
            Some(fields)
        } else {
            None
        };

        let token = self.scan()?;
        let source = match token.kind {
            TokenKind::KwValues => {
                if fields.is_some() {
                    // Tuple rows, one per parenthesized list.
                    let mut rows = Vec::new();
                    loop {
                        self.expect(TokenKind::LParen, "'('")?;
                        let mut row = Vec::new();
                        loop {
                            row.push(self.parse_expr()?);
                            if !self.eat(&TokenKind::Comma)? {
                                break;
                            }
                        }
                        self.expect(TokenKind::RParen, "')'")?;
                        rows.push(row);
                        if !self.eat(&TokenKind::Comma)? {
                            break;
                        }
                    }
                    InsertSource::Tuples(rows)
                } else {
                    InsertSource::Documents(self.parse_expr_list()?)
                }
            }
            TokenKind::KwDocuments => InsertSource::Documents(self.parse_expr_list()?),
            _ => return Err(Self::error(&token, &["VALUES", "DOCUMENTS"])),
        };

        Ok(InsertStmt {
            table,
            fields,
            source,
        })
    }

    fn parse_expr_list(&mut self) -> Result<Vec<Expr>, VellumError> {
        let mut out = Vec::new();
        loop {
            out.push(self.parse_expr()?);
            if !self.eat(&TokenKind::Comma)? {
                return Ok(out);
            }
        }
    }

    fn parse_update(&mut self) -> Result<UpdateStmt, VellumError> {
        let table = self.ident("table name")?;
        let token = self.scan()?;
        let actions = match token.kind {
            TokenKind::KwSet => {
                let mut actions = Vec::new();
                loop {
                    let path = self.parse_path()?;
                    self.expect(TokenKind::Eq, "'='")?;
                    let expr = self.parse_expr()?;
                    actions.push(UpdateAction::Set { path, expr });
                    if !self.eat(&TokenKind::Comma)? {
                        break;
                    }
                }
                actions
            }
            TokenKind::KwUnset => {
                let mut actions = Vec::new();
                loop {
                    actions.push(UpdateAction::Unset {
                        path: self.parse_path()?,
                    });
                    if !self.eat(&TokenKind::Comma)? {
                        break;
                    }
                }
                actions
            }
            _ => return Err(Self::error(&token, &["SET", "UNSET"])),
        };

        let filter = if self.eat(&TokenKind::KwWhere)? {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(UpdateStmt {
            table,
            actions,
            filter,
        })
    }

    fn parse_delete(&mut self) -> Result<DeleteStmt, VellumError> {
        self.expect(TokenKind::KwFrom, "FROM")?;
        let table = self.ident("table name")?;
        let filter = if self.eat(&TokenKind::KwWhere)? {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(DeleteStmt { table, filter })
    }

    fn parse_create(&mut self) -> Result<Statement, VellumError> {
        let token = self.scan()?;
        match token.kind {
            TokenKind::KwTable => {
                let if_not_exists = self.parse_if_not_exists()?;
                let name = self.ident("table name")?;
                let mut fields = Vec::new();
                if self.eat(&TokenKind::LParen)? {
                    loop {
                        fields.push(self.parse_field_def()?);
                        if !self.eat(&TokenKind::Comma)? {
                            break;
                        }
                    }
                    self.expect(TokenKind::RParen, "')'")?;
                }
                Ok(Statement::CreateTable(CreateTableStmt {
                    name,
                    if_not_exists,
                    fields,
                }))
            }
            TokenKind::KwUnique | TokenKind::KwIndex => {
                let unique = token.kind == TokenKind::KwUnique;
                if unique {
                    self.expect(TokenKind::KwIndex, "INDEX")?;
                }
                let if_not_exists = self.parse_if_not_exists()?;
                let name = self.ident("index name")?;
                self.expect(TokenKind::KwOn, "ON")?;
                let table = self.ident("table name")?;
                self.expect(TokenKind::LParen, "'('")?;
                let path = self.parse_path()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(Statement::CreateIndex(CreateIndexStmt {
                    name,
                    table,
                    path,
                    unique,
                    if_not_exists,
                }))
            }
            _ => Err(Self::error(&token, &["TABLE", "INDEX", "UNIQUE"])),
        }
    }

    fn parse_if_not_exists(&mut self) -> Result<bool, VellumError> {
        if self.eat(&TokenKind::KwIf)? {
            self.expect(TokenKind::KwNot, "NOT")?;
            self.expect(TokenKind::KwExists, "EXISTS")?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn parse_field_def(&mut self) -> Result<FieldDef, VellumError> {
        let path = self.parse_path()?;
        let mut def = FieldDef {
            path,
            kind: None,
            primary_key: false,
            not_null: false,
            default_value: None,
        };

        let token = self.scan()?;
        match type_kind(&token.kind) {
            Some(kind) => def.kind = Some(kind),
            None => self.unscan(token),
        }

        loop {
            let token = self.scan()?;
            match token.kind {
                TokenKind::KwPrimary => {
                    self.expect(TokenKind::KwKey, "KEY")?;
                    def.primary_key = true;
                }
                TokenKind::KwNot => {
                    self.expect(TokenKind::KwNull, "NULL")?;
                    def.not_null = true;
                }
                TokenKind::KwDefault => {
                    def.default_value = Some(self.parse_expr()?);
                }
                _ => {
                    self.unscan(token);
                    return Ok(def);
                }
            }
        }
    }

    fn parse_drop(&mut self) -> Result<Statement, VellumError> {
        let token = self.scan()?;
        let is_table = match token.kind {
            TokenKind::KwTable => true,
            TokenKind::KwIndex => false,
            _ => return Err(Self::error(&token, &["TABLE", "INDEX"])),
        };
        let if_exists = if self.eat(&TokenKind::KwIf)? {
            self.expect(TokenKind::KwExists, "EXISTS")?;
            true
        } else {
            false
        };
        let name = self.ident(if is_table { "table name" } else { "index name" })?;
        Ok(if is_table {
            Statement::DropTable { name, if_exists }
        } else {
            Statement::DropIndex { name, if_exists }
        })
    }

    fn parse_path(&mut self) -> Result<Path, VellumError> {
        let first = self.ident("path")?;
        self.parse_path_from(first)
    }

    /// Continues parsing a path whose first field name has already been
    /// consumed from the token stream.
    fn parse_path_from(&mut self, first: String) -> Result<Path, VellumError> {
        let mut fragments = vec![PathFragment::Field(first.into())];
        while self.eat(&TokenKind::Dot)? {
            let token = self.scan()?;
            match token.kind {
                TokenKind::Ident(name) | TokenKind::QuotedIdent(name) => {
                    fragments.push(PathFragment::Field(name.into()));
                }
                TokenKind::Integer(i) if i >= 0 => {
                    fragments.push(PathFragment::Index(i as usize));
                }
                _ => return Err(Self::error(&token, &["field name", "array index"])),
            }
        }
        Ok(Path(fragments))
    }

    // Expression grammar, loosest binding first:
    // OR < AND < NOT < comparison < additive < multiplicative < unary.

    pub fn parse_expr(&mut self) -> Result<Expr, VellumError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, VellumError> {
        let mut expr = self.parse_and()?;
        while self.eat(&TokenKind::KwOr)? {
            let rhs = self.parse_and()?;
            expr = Expr::Binary(BinaryOp::Or, Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, VellumError> {
        let mut expr = self.parse_not()?;
        while self.eat(&TokenKind::KwAnd)? {
            let rhs = self.parse_not()?;
            expr = Expr::Binary(BinaryOp::And, Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_not(&mut self) -> Result<Expr, VellumError> {
        if self.eat(&TokenKind::KwNot)? {
            let inner = self.parse_not()?;
            Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)))
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, VellumError> {
        let mut expr = self.parse_additive()?;
        loop {
            let token = self.scan()?;
            let op = match token.kind {
                TokenKind::Eq => BinaryOp::Eq,
                TokenKind::Neq => BinaryOp::Neq,
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Ge => BinaryOp::Ge,
                TokenKind::KwLike => {
                    let rhs = self.parse_additive()?;
                    expr = Expr::Binary(BinaryOp::Like, Box::new(expr), Box::new(rhs));
                    continue;
                }
                TokenKind::KwIs => {
                    let negated = self.eat(&TokenKind::KwNot)?;
                    let rhs = self.parse_additive()?;
                    expr = Expr::Is {
                        expr: Box::new(expr),
                        other: Box::new(rhs),
                        negated,
                    };
                    continue;
                }
                TokenKind::KwIn => {
                    expr = self.parse_in(expr, false)?;
                    continue;
                }
                TokenKind::KwNot => {
                    let next = self.scan()?;
                    match next.kind {
                        TokenKind::KwIn => {
                            expr = self.parse_in(expr, true)?;
                            continue;
                        }
                        TokenKind::KwLike => {
                            let rhs = self.parse_additive()?;
                            let like =
                                Expr::Binary(BinaryOp::Like, Box::new(expr), Box::new(rhs));
                            expr = Expr::Unary(UnaryOp::Not, Box::new(like));
                            continue;
                        }
                        _ => return Err(Self::error(&next, &["IN", "LIKE"])),
                    }
                }
                TokenKind::KwBetween => {
                    let low = self.parse_additive()?;
                    self.expect(TokenKind::KwAnd, "AND")?;
                    let high = self.parse_additive()?;
                    expr = Expr::Between {
                        expr: Box::new(expr),
                        low: Box::new(low),
                        high: Box::new(high),
                    };
                    continue;
                }
                _ => {
                    self.unscan(token);
                    return Ok(expr);
                }
            };
            let rhs = self.parse_additive()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
        }
    }

    fn parse_in(&mut self, expr: Expr, negated: bool) -> Result<Expr, VellumError> {
        self.expect(TokenKind::LParen, "'('")?;
        let list = self.parse_expr_list()?;
        self.expect(TokenKind::RParen, "')'")?;
        Ok(Expr::In {
            expr: Box::new(expr),
            list,
            negated,
        })
    }

    fn parse_additive(&mut self) -> Result<Expr, VellumError> {
        let mut expr = self.parse_multiplicative()?;
        loop {
            let token = self.scan()?;
            let op = match token.kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => {
                    self.unscan(token);
                    return Ok(expr);
                }
            };
            let rhs = self.parse_multiplicative()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, VellumError> {
        let mut expr = self.parse_unary()?;
        loop {
            let token = self.scan()?;
            let op = match token.kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => {
                    self.unscan(token);
                    return Ok(expr);
                }
            };
            let rhs = self.parse_unary()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, VellumError> {
        let token = self.scan()?;
        match token.kind {
            TokenKind::Minus => {
                let inner = self.parse_unary()?;
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(inner)))
            }
            TokenKind::Plus => self.parse_unary(),
            _ => {
                self.unscan(token);
                self.parse_primary()
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, VellumError> {
        let token = self.scan()?;
        match token.kind {
            TokenKind::Integer(i) => Ok(Expr::Literal(Value::Integer(i))),
            TokenKind::Float(f) => Ok(Expr::Literal(Value::Double(f))),
            TokenKind::String(s) => Ok(Expr::Literal(Value::Text(s.into()))),
            TokenKind::KwTrue => Ok(Expr::Literal(Value::Bool(true))),
            TokenKind::KwFalse => Ok(Expr::Literal(Value::Bool(false))),
            TokenKind::KwNull => Ok(Expr::Literal(Value::Null)),
            TokenKind::Positional => {
                let index = self.positional_count;
                self.positional_count += 1;
                Ok(Expr::PositionalParam(index))
            }
            TokenKind::Named(name) => Ok(Expr::NamedParam(name)),
            TokenKind::LParen => {
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::LBrace => self.parse_document_literal(),
            TokenKind::LBracket => {
                if self.eat(&TokenKind::RBracket)? {
                    return Ok(Expr::ArrayLiteral(Vec::new()));
                }
                let items = self.parse_expr_list()?;
                self.expect(TokenKind::RBracket, "']'")?;
                Ok(Expr::ArrayLiteral(items))
            }
            TokenKind::KwCast => {
                self.expect(TokenKind::LParen, "'('")?;
                let expr = self.parse_expr()?;
                self.expect(TokenKind::KwAs, "AS")?;
                let type_token = self.scan()?;
                let Some(to) = type_kind(&type_token.kind) else {
                    return Err(Self::error(&type_token, &["a type name"]));
                };
                self.expect(TokenKind::RParen, "')'")?;
                Ok(Expr::Cast {
                    expr: Box::new(expr),
                    to,
                })
            }
            TokenKind::Ident(name) | TokenKind::QuotedIdent(name) => {
                if self.eat(&TokenKind::LParen)? {
                    return self.parse_function_call(name);
                }
                self.parse_path_from(name).map(Expr::Path)
            }
            _ => Err(Self::error(
                &token,
                &[
                    "a literal",
                    "a path",
                    "a parameter",
                    "'('",
                    "'{'",
                    "'['",
                    "CAST",
                ],
            )),
        }
    }

    fn parse_function_call(&mut self, name: String) -> Result<Expr, VellumError> {
        if self.eat(&TokenKind::Star)? {
            self.expect(TokenKind::RParen, "')'")?;
            return Ok(Expr::FunctionCall {
                name: name.to_lowercase(),
                args: Vec::new(),
                wildcard: true,
            });
        }
        let args = if self.eat(&TokenKind::RParen)? {
            Vec::new()
        } else {
            let args = self.parse_expr_list()?;
            self.expect(TokenKind::RParen, "')'")?;
            args
        };
        Ok(Expr::FunctionCall {
            name: name.to_lowercase(),
            args,
            wildcard: false,
        })
    }

    fn parse_document_literal(&mut self) -> Result<Expr, VellumError> {
        if self.eat(&TokenKind::RBrace)? {
            return Ok(Expr::DocumentLiteral(Vec::new()));
        }
        let mut pairs = Vec::new();
        loop {
            let token = self.scan()?;
            let field = match token.kind {
                TokenKind::Ident(name)
                | TokenKind::QuotedIdent(name)
                | TokenKind::String(name) => name,
                _ => return Err(Self::error(&token, &["field name"])),
            };
            self.expect(TokenKind::Colon, "':'")?;
            pairs.push((field, self.parse_expr()?));
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(Expr::DocumentLiteral(pairs))
    }
}

fn type_kind(kind: &TokenKind) -> Option<ValueKind> {
    match kind {
        TokenKind::KwInt | TokenKind::KwInteger => Some(ValueKind::Integer),
        TokenKind::KwDouble | TokenKind::KwReal => Some(ValueKind::Double),
        TokenKind::KwText => Some(ValueKind::Text),
        TokenKind::KwBlob => Some(ValueKind::Blob),
        TokenKind::KwBool | TokenKind::KwBoolean => Some(ValueKind::Bool),
        TokenKind::KwArray => Some(ValueKind::Array),
        TokenKind::KwDocument => Some(ValueKind::Document),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{parse, parse_script};
    use crate::document::{Path, Value, ValueKind};
    use crate::error::VellumError;
    use crate::sql::ast::{
        BinaryOp, Expr, InsertSource, Projection, SortDirection, Statement, UpdateAction,
    };

    #[test]
    fn select_with_all_clauses() {
        let stmt = parse(
            "SELECT DISTINCT a, b AS total FROM t \
             WHERE a > 1 AND b = 'x' \
             GROUP BY a ORDER BY b DESC LIMIT 10 OFFSET 2",
        )
        .unwrap();
        let Statement::Select(select) = stmt else {
            panic!("expected SELECT");
        };
        assert!(select.distinct);
        assert_eq!(select.projections.len(), 2);
        assert!(matches!(
            &select.projections[1],
            Projection::Expr { alias: Some(a), .. } if a == "total"
        ));
        assert_eq!(select.table, "t");
        assert!(select.filter.is_some());
        assert_eq!(select.group_by, Some(Path::parse("a")));
        let order = select.order_by.unwrap();
        assert_eq!(order.path, Path::parse("b"));
        assert_eq!(order.direction, SortDirection::Desc);
        assert_eq!(select.limit, Some(Expr::Literal(Value::Integer(10))));
        assert_eq!(select.offset, Some(Expr::Literal(Value::Integer(2))));
    }

    #[test]
    fn insert_document_literals() {
        let stmt = parse("INSERT INTO t VALUES {a: 1, b: 'x'}, {a: 2}").unwrap();
        let Statement::Insert(insert) = stmt else {
            panic!("expected INSERT");
        };
        assert_eq!(insert.fields, None);
        let InsertSource::Documents(docs) = insert.source else {
            panic!("expected document source");
        };
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn insert_tuples_require_field_list() {
        let stmt = parse("INSERT INTO t (a, b) VALUES (1, 'x'), (2, 'y')").unwrap();
        let Statement::Insert(insert) = stmt else {
            panic!("expected INSERT");
        };
        assert_eq!(insert.fields.as_deref().unwrap(), ["a", "b"]);
        let InsertSource::Tuples(rows) = insert.source else {
            panic!("expected tuple source");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), 2);
    }

    #[test]
    fn update_set_and_unset_forms() {
        let stmt = parse("UPDATE t SET a.1.b = 9, c = 'x' WHERE a = 1").unwrap();
        let Statement::Update(update) = stmt else {
            panic!("expected UPDATE");
        };
        assert_eq!(update.actions.len(), 2);
        assert!(matches!(
            &update.actions[0],
            UpdateAction::Set { path, .. } if *path == Path::parse("a.1.b")
        ));

        let stmt = parse("UPDATE t UNSET a, b").unwrap();
        let Statement::Update(update) = stmt else {
            panic!("expected UPDATE");
        };
        assert_eq!(update.actions.len(), 2);
        assert!(matches!(&update.actions[1], UpdateAction::Unset { .. }));
    }

    #[test]
    fn create_table_with_constraints() {
        let stmt = parse(
            "CREATE TABLE IF NOT EXISTS t (\
               a INTEGER PRIMARY KEY, \
               b TEXT NOT NULL DEFAULT 'x', \
               c.d DOUBLE)",
        )
        .unwrap();
        let Statement::CreateTable(create) = stmt else {
            panic!("expected CREATE TABLE");
        };
        assert!(create.if_not_exists);
        assert_eq!(create.fields.len(), 3);
        assert!(create.fields[0].primary_key);
        assert_eq!(create.fields[0].kind, Some(ValueKind::Integer));
        assert!(create.fields[1].not_null);
        assert_eq!(
            create.fields[1].default_value,
            Some(Expr::Literal(Value::text("x")))
        );
        assert_eq!(create.fields[2].path, Path::parse("c.d"));
    }

    #[test]
    fn create_unique_index() {
        let stmt = parse("CREATE UNIQUE INDEX ix ON t (a.b)").unwrap();
        let Statement::CreateIndex(create) = stmt else {
            panic!("expected CREATE INDEX");
        };
        assert!(create.unique);
        assert_eq!(create.path, Path::parse("a.b"));
    }

    #[test]
    fn drop_and_reindex() {
        assert_eq!(
            parse("DROP TABLE IF EXISTS t").unwrap(),
            Statement::DropTable {
                name: "t".into(),
                if_exists: true
            }
        );
        assert_eq!(
            parse("DROP INDEX ix").unwrap(),
            Statement::DropIndex {
                name: "ix".into(),
                if_exists: false
            }
        );
        assert_eq!(parse("REINDEX").unwrap(), Statement::Reindex { name: None });
        assert_eq!(
            parse("REINDEX ix").unwrap(),
            Statement::Reindex {
                name: Some("ix".into())
            }
        );
    }

    #[test]
    fn transactions() {
        assert_eq!(parse("BEGIN").unwrap(), Statement::Begin { writable: true });
        assert_eq!(
            parse("BEGIN READ ONLY").unwrap(),
            Statement::Begin { writable: false }
        );
        assert_eq!(parse("COMMIT").unwrap(), Statement::Commit);
        assert_eq!(parse("ROLLBACK").unwrap(), Statement::Rollback);
    }

    #[test]
    fn operator_precedence() {
        let stmt = parse("SELECT * FROM t WHERE a = 1 + 2 * 3 OR NOT b AND c").unwrap();
        let Statement::Select(select) = stmt else {
            panic!("expected SELECT");
        };
        // OR is the loosest binder.
        let Some(Expr::Binary(BinaryOp::Or, left, _)) = select.filter else {
            panic!("expected OR at the top");
        };
        // 1 + 2 * 3 groups as 1 + (2 * 3).
        let Expr::Binary(BinaryOp::Eq, _, rhs) = *left else {
            panic!("expected comparison under OR");
        };
        let Expr::Binary(BinaryOp::Add, _, mul) = *rhs else {
            panic!("expected addition");
        };
        assert!(matches!(*mul, Expr::Binary(BinaryOp::Mul, _, _)));
    }

    #[test]
    fn parameters_number_in_appearance_order() {
        let stmt = parse("SELECT * FROM t WHERE a = ? AND b = ? AND c = $named").unwrap();
        let Statement::Select(select) = stmt else {
            panic!("expected SELECT");
        };
        let conjuncts = select.filter.unwrap().conjuncts();
        assert!(matches!(
            &conjuncts[0],
            Expr::Binary(_, _, rhs) if **rhs == Expr::PositionalParam(0)
        ));
        assert!(matches!(
            &conjuncts[1],
            Expr::Binary(_, _, rhs) if **rhs == Expr::PositionalParam(1)
        ));
        assert!(matches!(
            &conjuncts[2],
            Expr::Binary(_, _, rhs)
                if matches!(&**rhs, Expr::NamedParam(n) if n == "named")
        ));
    }

    #[test]
    fn cast_in_not_in_between_is() {
        let stmt = parse(
            "SELECT * FROM t WHERE CAST(a AS INTEGER) IN (1, 2) \
             AND b NOT IN (3) AND c BETWEEN 1 AND 5 AND d IS NOT NULL",
        )
        .unwrap();
        let Statement::Select(select) = stmt else {
            panic!("expected SELECT");
        };
        let conjuncts = select.filter.unwrap().conjuncts();
        assert!(matches!(
            &conjuncts[0],
            Expr::In { negated: false, expr, .. } if matches!(**expr, Expr::Cast { .. })
        ));
        assert!(matches!(&conjuncts[1], Expr::In { negated: true, .. }));
        assert!(matches!(&conjuncts[2], Expr::Between { .. }));
        assert!(matches!(&conjuncts[3], Expr::Is { negated: true, .. }));
    }

    #[test]
    fn count_star_and_pk_function() {
        let stmt = parse("SELECT count(*), pk() FROM t").unwrap();
        let Statement::Select(select) = stmt else {
            panic!("expected SELECT");
        };
        assert!(matches!(
            &select.projections[0],
            Projection::Expr { expr: Expr::FunctionCall { name, wildcard: true, .. }, .. }
                if name == "count"
        ));
        assert!(matches!(
            &select.projections[1],
            Projection::Expr { expr: Expr::FunctionCall { name, wildcard: false, args }, .. }
                if name == "pk" && args.is_empty()
        ));
    }

    #[test]
    fn errors_carry_position_and_expected_set() {
        let err = parse("SELECT * FORM t").unwrap_err();
        let VellumError::Parse {
            line,
            column,
            found,
            expected,
        } = err
        else {
            panic!("expected parse error");
        };
        assert_eq!(line, 1);
        assert_eq!(column, 10);
        assert_eq!(found, "FORM");
        assert!(expected.contains(&"FROM".to_string()));
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        assert!(parse("SELECT * FROM t garbage more").is_err());
        assert!(parse("COMMIT COMMIT").is_err());
    }

    #[test]
    fn scripts_split_on_semicolons() {
        let stmts =
            parse_script("CREATE TABLE t; INSERT INTO t VALUES {a: 1}; SELECT * FROM t;")
                .unwrap();
        assert_eq!(stmts.len(), 3);
    }

    #[test]
    fn explain_wraps_a_statement() {
        let stmt = parse("EXPLAIN SELECT * FROM t WHERE a = 1").unwrap();
        assert!(matches!(stmt, Statement::Explain(_)));
    }
}
