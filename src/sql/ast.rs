//! Parsed SQL statements and expressions.

use crate::document::{Path, Value, ValueKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
    CreateTable(CreateTableStmt),
    CreateIndex(CreateIndexStmt),
    DropTable {
        name: String,
        if_exists: bool,
    },
    DropIndex {
        name: String,
        if_exists: bool,
    },
    Reindex {
        name: Option<String>,
    },
    Begin {
        writable: bool,
    },
    Commit,
    Rollback,
    Explain(Box<Statement>),
}

impl Statement {
    /// True when executing this statement requires a write transaction.
    pub fn is_mutation(&self) -> bool {
        match self {
            Statement::Select(_) => false,
            Statement::Explain(inner) => inner.is_mutation(),
            Statement::Begin { .. } | Statement::Commit | Statement::Rollback => false,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStmt {
    pub distinct: bool,
    pub projections: Vec<Projection>,
    pub table: String,
    pub filter: Option<Expr>,
    pub group_by: Option<Path>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<Expr>,
    pub offset: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Wildcard,
    Expr { expr: Expr, alias: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub path: Path,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStmt {
    pub table: String,
    /// Field names of the tuple form `INSERT INTO t (a, b) VALUES (1, 2)`.
    pub fields: Option<Vec<String>>,
    pub source: InsertSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    /// One expression list per row.
    Tuples(Vec<Vec<Expr>>),
    /// Document expressions, from `VALUES {..}` or `DOCUMENTS ...`.
    Documents(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStmt {
    pub table: String,
    pub actions: Vec<UpdateAction>,
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateAction {
    Set { path: Path, expr: Expr },
    Unset { path: Path },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStmt {
    pub table: String,
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStmt {
    pub name: String,
    pub if_not_exists: bool,
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub path: Path,
    pub kind: Option<ValueKind>,
    pub primary_key: bool,
    pub not_null: bool,
    pub default_value: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndexStmt {
    pub name: String,
    pub table: String,
    pub path: Path,
    pub unique: bool,
    pub if_not_exists: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Like,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Neq | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    DocumentLiteral(Vec<(String, Expr)>),
    ArrayLiteral(Vec<Expr>),
    Path(Path),
    /// `?`, numbered in order of appearance.
    PositionalParam(usize),
    /// `$name`.
    NamedParam(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
    },
    Is {
        expr: Box<Expr>,
        other: Box<Expr>,
        negated: bool,
    },
    Cast {
        expr: Box<Expr>,
        to: ValueKind,
    },
    FunctionCall {
        name: String,
        args: Vec<Expr>,
        /// `count(*)`.
        wildcard: bool,
    },
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "=",
            BinaryOp::Neq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Like => "LIKE",
        };
        write!(f, "{symbol}")
    }
}

/// Renders the expression as SQL-shaped text. Used for projection field
/// names, aggregate scope keys and EXPLAIN output.
impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::DocumentLiteral(pairs) => {
                write!(f, "{{")?;
                for (i, (field, expr)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field}: {expr}")?;
                }
                write!(f, "}}")
            }
            Expr::ArrayLiteral(items) => {
                write!(f, "[")?;
                for (i, expr) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{expr}")?;
                }
                write!(f, "]")
            }
            Expr::Path(path) => write!(f, "{path}"),
            Expr::PositionalParam(_) => write!(f, "?"),
            Expr::NamedParam(name) => write!(f, "${name}"),
            Expr::Unary(UnaryOp::Neg, inner) => write!(f, "-{inner}"),
            Expr::Unary(UnaryOp::Not, inner) => write!(f, "NOT {inner}"),
            Expr::Binary(op, left, right) => write!(f, "{left} {op} {right}"),
            Expr::In {
                expr,
                list,
                negated,
            } => {
                write!(f, "{expr} {}IN (", if *negated { "NOT " } else { "" })?;
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Expr::Between { expr, low, high } => {
                write!(f, "{expr} BETWEEN {low} AND {high}")
            }
            Expr::Is {
                expr,
                other,
                negated,
            } => write!(f, "{expr} IS {}{other}", if *negated { "NOT " } else { "" }),
            Expr::Cast { expr, to } => write!(f, "CAST({expr} AS {to})"),
            Expr::FunctionCall {
                name,
                args,
                wildcard,
            } => {
                write!(f, "{name}(")?;
                if *wildcard {
                    write!(f, "*")?;
                } else {
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{arg}")?;
                    }
                }
                write!(f, ")")
            }
        }
    }
}

impl Expr {
    pub fn path(text: &str) -> Expr {
        Expr::Path(Path::parse(text))
    }

    /// Splits an AND chain into its conjuncts.
    pub fn conjuncts(self) -> Vec<Expr> {
        match self {
            Expr::Binary(BinaryOp::And, left, right) => {
                let mut out = left.conjuncts();
                out.extend(right.conjuncts());
                out
            }
            other => vec![other],
        }
    }
}
