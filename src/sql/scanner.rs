//! SQL tokenizer. Tracks line and column for every token so parse errors
//! can point at the offending spot.

use crate::error::VellumError;
use crate::sql::token::{Token, TokenKind};

pub struct Scanner {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
}

impl Scanner {
    pub fn new(src: &str) -> Scanner {
        Scanner {
            chars: src.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn error(&self, found: impl Into<String>, expected: &[&str]) -> VellumError {
        VellumError::Parse {
            line: self.line,
            column: self.col,
            found: found.into(),
            expected: expected.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), VellumError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('-') if self.peek_at(1) == Some('-') => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => {
                                return Err(self.error(
                                    "end of input",
                                    &["closing '*/'"],
                                ));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Produces the next token, or `Eof` at the end of input.
    pub fn next_token(&mut self) -> Result<Token, VellumError> {
        self.skip_whitespace_and_comments()?;
        let line = self.line;
        let col = self.col;
        let kind = self.scan_kind()?;
        Ok(Token { kind, line, col })
    }

    fn scan_kind(&mut self) -> Result<TokenKind, VellumError> {
        let Some(c) = self.peek() else {
            return Ok(TokenKind::Eof);
        };
        match c {
            '0'..='9' => self.scan_number(),
            '\'' => self.scan_string(),
            '`' | '"' => self.scan_quoted_ident(c),
            '$' => {
                self.bump();
                let name = self.scan_ident_text();
                if name.is_empty() {
                    return Err(self.error("'$'", &["parameter name"]));
                }
                Ok(TokenKind::Named(name))
            }
            '?' => {
                self.bump();
                Ok(TokenKind::Positional)
            }
            c if c.is_alphabetic() || c == '_' => {
                let text = self.scan_ident_text();
                Ok(TokenKind::lookup_keyword(&text).unwrap_or(TokenKind::Ident(text)))
            }
            _ => self.scan_symbol(),
        }
    }

    fn scan_symbol(&mut self) -> Result<TokenKind, VellumError> {
        let c = self.bump().expect("caller checked a char is present");
        let kind = match c {
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semicolon,
            '=' => TokenKind::Eq,
            '!' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::Neq
                } else {
                    return Err(self.error("'!'", &["'!='"]));
                }
            }
            '<' => match self.peek() {
                Some('=') => {
                    self.bump();
                    TokenKind::Le
                }
                Some('>') => {
                    self.bump();
                    TokenKind::Neq
                }
                _ => TokenKind::Lt,
            },
            '>' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            other => {
                return Err(self.error(format!("'{other}'"), &["a token"]));
            }
        };
        Ok(kind)
    }

    fn scan_ident_text(&mut self) -> String {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        text
    }

    fn scan_number(&mut self) -> Result<TokenKind, VellumError> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        let mut is_float = false;
        // Only treat a dot as a decimal point when a digit follows, so
        // paths like `a.1.b` tokenize as ident, dot, integer, dot, ident.
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            text.push('.');
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let mut offset = 1;
            if matches!(self.peek_at(1), Some('+') | Some('-')) {
                offset = 2;
            }
            if self.peek_at(offset).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                for _ in 0..offset {
                    text.push(self.bump().expect("exponent chars are present"));
                }
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
            }
        }

        if is_float {
            text.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| self.error(text.clone(), &["a number"]))
        } else {
            text.parse::<i64>()
                .map(TokenKind::Integer)
                .map_err(|_| self.error(text.clone(), &["an integer"]))
        }
    }

    fn scan_string(&mut self) -> Result<TokenKind, VellumError> {
        self.bump(); // opening quote
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('\'') => {
                    // A doubled quote is an escaped quote.
                    if self.peek() == Some('\'') {
                        self.bump();
                        text.push('\'');
                    } else {
                        return Ok(TokenKind::String(text));
                    }
                }
                Some('\\') => match self.bump() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('\\') => text.push('\\'),
                    Some('\'') => text.push('\''),
                    Some('"') => text.push('"'),
                    Some(other) => {
                        return Err(
                            self.error(format!("'\\{other}'"), &["a string escape"])
                        );
                    }
                    None => return Err(self.error("end of input", &["closing quote"])),
                },
                Some(c) => text.push(c),
                None => return Err(self.error("end of input", &["closing quote"])),
            }
        }
    }

    fn scan_quoted_ident(&mut self, quote: char) -> Result<TokenKind, VellumError> {
        self.bump(); // opening quote
        let mut text = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(TokenKind::QuotedIdent(text)),
                Some(c) => text.push(c),
                None => return Err(self.error("end of input", &["closing quote"])),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Scanner;
    use crate::sql::token::TokenKind;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new(src);
        let mut out = Vec::new();
        loop {
            let token = scanner.next_token().unwrap();
            if token.kind == TokenKind::Eof {
                return out;
            }
            out.push(token.kind);
        }
    }

    #[test]
    fn keywords_are_case_insensitive_and_identifiers_are_not() {
        assert_eq!(
            kinds("select From users"),
            vec![
                TokenKind::KwSelect,
                TokenKind::KwFrom,
                TokenKind::Ident("users".into())
            ]
        );
    }

    #[test]
    fn numbers_distinguish_integer_from_float() {
        assert_eq!(
            kinds("1 2.5 3e2 4.0e-1"),
            vec![
                TokenKind::Integer(1),
                TokenKind::Float(2.5),
                TokenKind::Float(300.0),
                TokenKind::Float(0.4),
            ]
        );
    }

    #[test]
    fn dotted_paths_are_not_floats() {
        assert_eq!(
            kinds("a.1.b"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Dot,
                TokenKind::Integer(1),
                TokenKind::Dot,
                TokenKind::Ident("b".into()),
            ]
        );
    }

    #[test]
    fn strings_support_doubled_and_backslash_escapes() {
        assert_eq!(
            kinds(r"'it''s' 'a\nb'"),
            vec![
                TokenKind::String("it's".into()),
                TokenKind::String("a\nb".into())
            ]
        );
    }

    #[test]
    fn quoted_identifiers_use_backticks_or_double_quotes() {
        assert_eq!(
            kinds("`order` \"select\""),
            vec![
                TokenKind::QuotedIdent("order".into()),
                TokenKind::QuotedIdent("select".into())
            ]
        );
    }

    #[test]
    fn parameters_and_operators() {
        assert_eq!(
            kinds("? $name <= <> !="),
            vec![
                TokenKind::Positional,
                TokenKind::Named("name".into()),
                TokenKind::Le,
                TokenKind::Neq,
                TokenKind::Neq,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("1 -- trailing\n/* block */ 2"),
            vec![TokenKind::Integer(1), TokenKind::Integer(2)]
        );
    }

    #[test]
    fn tokens_carry_positions() {
        let mut scanner = Scanner::new("select\n  x");
        let first = scanner.next_token().unwrap();
        assert_eq!((first.line, first.col), (1, 1));
        let second = scanner.next_token().unwrap();
        assert_eq!((second.line, second.col), (2, 3));
    }

    #[test]
    fn unterminated_string_is_a_parse_error() {
        let mut scanner = Scanner::new("'abc");
        assert!(scanner.next_token().is_err());
    }
}
