//! SQL token types. Keywords are their own variants so the parser can
//! match on them directly; every token carries its line and column.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub col: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals.
    Integer(i64),
    Float(f64),
    String(String),

    // Identifiers: bare, or quoted with backticks / double quotes.
    Ident(String),
    QuotedIdent(String),

    // Parameters.
    Positional,
    Named(String),

    // Operators.
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,

    // Punctuation.
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    Semicolon,

    // Keywords.
    KwSelect,
    KwDistinct,
    KwFrom,
    KwWhere,
    KwGroup,
    KwBy,
    KwOrder,
    KwAsc,
    KwDesc,
    KwLimit,
    KwOffset,
    KwInsert,
    KwInto,
    KwValues,
    KwDocuments,
    KwUpdate,
    KwSet,
    KwUnset,
    KwDelete,
    KwCreate,
    KwTable,
    KwUnique,
    KwIndex,
    KwIf,
    KwNot,
    KwExists,
    KwOn,
    KwDrop,
    KwReindex,
    KwBegin,
    KwTransaction,
    KwRead,
    KwOnly,
    KwCommit,
    KwRollback,
    KwExplain,
    KwAnd,
    KwOr,
    KwIn,
    KwBetween,
    KwIs,
    KwLike,
    KwNull,
    KwTrue,
    KwFalse,
    KwCast,
    KwAs,
    KwPrimary,
    KwKey,
    KwDefault,
    // Type names.
    KwInt,
    KwInteger,
    KwDouble,
    KwReal,
    KwText,
    KwBlob,
    KwBool,
    KwBoolean,
    KwArray,
    KwDocument,

    Eof,
}

impl TokenKind {
    /// Case-insensitive keyword lookup for an identifier-shaped string.
    pub fn lookup_keyword(s: &str) -> Option<TokenKind> {
        match s.to_ascii_uppercase().as_str() {
            "SELECT" => Some(TokenKind::KwSelect),
            "DISTINCT" => Some(TokenKind::KwDistinct),
            "FROM" => Some(TokenKind::KwFrom),
            "WHERE" => Some(TokenKind::KwWhere),
            "GROUP" => Some(TokenKind::KwGroup),
            "BY" => Some(TokenKind::KwBy),
            "ORDER" => Some(TokenKind::KwOrder),
            "ASC" => Some(TokenKind::KwAsc),
            "DESC" => Some(TokenKind::KwDesc),
            "LIMIT" => Some(TokenKind::KwLimit),
            "OFFSET" => Some(TokenKind::KwOffset),
            "INSERT" => Some(TokenKind::KwInsert),
            "INTO" => Some(TokenKind::KwInto),
            "VALUES" => Some(TokenKind::KwValues),
            "DOCUMENTS" => Some(TokenKind::KwDocuments),
            "UPDATE" => Some(TokenKind::KwUpdate),
            "SET" => Some(TokenKind::KwSet),
            "UNSET" => Some(TokenKind::KwUnset),
            "DELETE" => Some(TokenKind::KwDelete),
            "CREATE" => Some(TokenKind::KwCreate),
            "TABLE" => Some(TokenKind::KwTable),
            "UNIQUE" => Some(TokenKind::KwUnique),
            "INDEX" => Some(TokenKind::KwIndex),
            "IF" => Some(TokenKind::KwIf),
            "NOT" => Some(TokenKind::KwNot),
            "EXISTS" => Some(TokenKind::KwExists),
            "ON" => Some(TokenKind::KwOn),
            "DROP" => Some(TokenKind::KwDrop),
            "REINDEX" => Some(TokenKind::KwReindex),
            "BEGIN" => Some(TokenKind::KwBegin),
            "TRANSACTION" => Some(TokenKind::KwTransaction),
            "READ" => Some(TokenKind::KwRead),
            "ONLY" => Some(TokenKind::KwOnly),
            "COMMIT" => Some(TokenKind::KwCommit),
            "ROLLBACK" => Some(TokenKind::KwRollback),
            "EXPLAIN" => Some(TokenKind::KwExplain),
            "AND" => Some(TokenKind::KwAnd),
            "OR" => Some(TokenKind::KwOr),
            "IN" => Some(TokenKind::KwIn),
            "BETWEEN" => Some(TokenKind::KwBetween),
            "IS" => Some(TokenKind::KwIs),
            "LIKE" => Some(TokenKind::KwLike),
            "NULL" => Some(TokenKind::KwNull),
            "TRUE" => Some(TokenKind::KwTrue),
            "FALSE" => Some(TokenKind::KwFalse),
            "CAST" => Some(TokenKind::KwCast),
            "AS" => Some(TokenKind::KwAs),
            "PRIMARY" => Some(TokenKind::KwPrimary),
            "KEY" => Some(TokenKind::KwKey),
            "DEFAULT" => Some(TokenKind::KwDefault),
            "INT" => Some(TokenKind::KwInt),
            "INTEGER" => Some(TokenKind::KwInteger),
            "DOUBLE" => Some(TokenKind::KwDouble),
            "REAL" => Some(TokenKind::KwReal),
            "TEXT" => Some(TokenKind::KwText),
            "BLOB" => Some(TokenKind::KwBlob),
            "BOOL" => Some(TokenKind::KwBool),
            "BOOLEAN" => Some(TokenKind::KwBoolean),
            "ARRAY" => Some(TokenKind::KwArray),
            "DOCUMENT" => Some(TokenKind::KwDocument),
            _ => None,
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Integer(n) => write!(f, "{n}"),
            TokenKind::Float(n) => write!(f, "{n}"),
            TokenKind::String(s) => write!(f, "'{s}'"),
            TokenKind::Ident(s) | TokenKind::QuotedIdent(s) => write!(f, "{s}"),
            TokenKind::Positional => write!(f, "?"),
            TokenKind::Named(name) => write!(f, "${name}"),
            TokenKind::Plus => write!(f, "+"),
            TokenKind::Minus => write!(f, "-"),
            TokenKind::Star => write!(f, "*"),
            TokenKind::Slash => write!(f, "/"),
            TokenKind::Percent => write!(f, "%"),
            TokenKind::Eq => write!(f, "="),
            TokenKind::Neq => write!(f, "!="),
            TokenKind::Lt => write!(f, "<"),
            TokenKind::Le => write!(f, "<="),
            TokenKind::Gt => write!(f, ">"),
            TokenKind::Ge => write!(f, ">="),
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::LBrace => write!(f, "{{"),
            TokenKind::RBrace => write!(f, "}}"),
            TokenKind::LBracket => write!(f, "["),
            TokenKind::RBracket => write!(f, "]"),
            TokenKind::Comma => write!(f, ","),
            TokenKind::Dot => write!(f, "."),
            TokenKind::Colon => write!(f, ":"),
            TokenKind::Semicolon => write!(f, ";"),
            TokenKind::Eof => write!(f, "end of input"),
            keyword => {
                // Keyword variants render as their SQL spelling.
                let name = format!("{keyword:?}");
                write!(f, "{}", name.trim_start_matches("Kw").to_uppercase())
            }
        }
    }
}
