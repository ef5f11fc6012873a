//! The logical planner: turns bound statements into operator trees.
//!
//! Passes run in a fixed order. Binding resolves catalog names and checks
//! the statement's parameters against the bound ones; the WHERE clause is
//! decomposed into an AND-chain; at most one index replaces the table
//! scan when a conjunct forms a supported range on an indexed path; an
//! ORDER BY matching the chosen index path drops the explicit sort; and
//! LIMIT/OFFSET fold onto the pipeline tail.

use crate::catalog::{Catalog, IndexInfo};
use crate::document::{Path, Value};
use crate::engine::Direction;
use crate::error::VellumError;
use crate::sql::ast::{
    BinaryOp, DeleteStmt, Expr, InsertSource, InsertStmt, Projection, SelectStmt, SortDirection,
    Statement, UpdateAction, UpdateStmt,
};
use crate::storage::index::{Index, IndexRange};
use crate::stream::expr::{FunctionKind, eval_expr, function_kind};
use crate::stream::{
    AggFunc, AggregateSpec, BoxedOperator, CancelFlag, DeleteOperator, DistinctOperator,
    Environment, FilterOperator, GroupOperator, IndexLookupOperator, InsertOperator,
    LimitOperator, OffsetOperator, Params, ProjectOperator, ScanGuard, ScanOperator,
    SortOperator, UpdateOperator, ValuesOperator,
};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Value bounds expressed as constant expressions, evaluated against the
/// bound parameters when the pipeline is built.
#[derive(Debug, Clone, Default)]
pub struct RangeExpr {
    pub low: Option<(Expr, bool)>,
    pub high: Option<(Expr, bool)>,
}

impl RangeExpr {
    fn eq(expr: Expr) -> RangeExpr {
        RangeExpr {
            low: Some((expr.clone(), true)),
            high: Some((expr, true)),
        }
    }
}

/// A bound plan tree. Immutable once built; `Display` renders it for
/// EXPLAIN.
#[derive(Debug)]
pub enum PlanNode {
    TableScan {
        table: String,
    },
    IndexScan {
        index: IndexInfo,
        /// One range per scan; IN produces one equality range per item.
        ranges: Vec<RangeExpr>,
        direction: Direction,
    },
    Values {
        exprs: Vec<Expr>,
    },
    Filter {
        expr: Expr,
        child: Box<PlanNode>,
    },
    Group {
        path: Option<Path>,
        aggregates: Vec<AggregateSpec>,
        child: Box<PlanNode>,
    },
    Project {
        projections: Vec<Projection>,
        child: Box<PlanNode>,
    },
    Distinct {
        child: Box<PlanNode>,
    },
    Sort {
        path: Path,
        direction: SortDirection,
        child: Box<PlanNode>,
    },
    Offset {
        count: usize,
        child: Box<PlanNode>,
    },
    Limit {
        count: usize,
        child: Box<PlanNode>,
    },
    Insert {
        table: String,
        child: Box<PlanNode>,
    },
    Update {
        table: String,
        actions: Vec<UpdateAction>,
        child: Box<PlanNode>,
    },
    Delete {
        table: String,
        child: Box<PlanNode>,
    },
}

impl PlanNode {
    fn child(&self) -> Option<&PlanNode> {
        match self {
            PlanNode::TableScan { .. }
            | PlanNode::IndexScan { .. }
            | PlanNode::Values { .. } => None,
            PlanNode::Filter { child, .. }
            | PlanNode::Group { child, .. }
            | PlanNode::Project { child, .. }
            | PlanNode::Distinct { child }
            | PlanNode::Sort { child, .. }
            | PlanNode::Offset { child, .. }
            | PlanNode::Limit { child, .. }
            | PlanNode::Insert { child, .. }
            | PlanNode::Update { child, .. }
            | PlanNode::Delete { child, .. } => Some(child),
        }
    }

    fn describe(&self) -> String {
        match self {
            PlanNode::TableScan { table } => format!("scan table {table}"),
            PlanNode::IndexScan {
                index, direction, ..
            } => {
                let dir = match direction {
                    Direction::Forward => "asc",
                    Direction::Backward => "desc",
                };
                format!("scan index {} ({dir})", index.name)
            }
            PlanNode::Values { exprs } => format!("values ({} rows)", exprs.len()),
            PlanNode::Filter { expr, .. } => format!("filter {expr}"),
            PlanNode::Group { path, .. } => match path {
                Some(path) => format!("group by {path}"),
                None => "group all".to_string(),
            },
            PlanNode::Project { projections, .. } => {
                let fields: Vec<String> = projections
                    .iter()
                    .map(|p| match p {
                        Projection::Wildcard => "*".to_string(),
                        Projection::Expr {
                            expr,
                            alias: Some(alias),
                        } => format!("{expr} AS {alias}"),
                        Projection::Expr { expr, alias: None } => expr.to_string(),
                    })
                    .collect();
                format!("project {}", fields.join(", "))
            }
            PlanNode::Distinct { .. } => "distinct".to_string(),
            PlanNode::Sort { path, direction, .. } => {
                let dir = match direction {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                };
                format!("sort {path} {dir}")
            }
            PlanNode::Offset { count, .. } => format!("offset {count}"),
            PlanNode::Limit { count, .. } => format!("limit {count}"),
            PlanNode::Insert { table, .. } => format!("insert into {table}"),
            PlanNode::Update { table, .. } => format!("update {table}"),
            PlanNode::Delete { table, .. } => format!("delete from {table}"),
        }
    }
}

impl fmt::Display for PlanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut node = Some(self);
        let mut depth = 0usize;
        while let Some(current) = node {
            if depth > 0 {
                writeln!(f)?;
                write!(f, "{}-> ", "  ".repeat(depth))?;
            }
            write!(f, "{}", current.describe())?;
            node = current.child();
            depth += 1;
        }
        Ok(())
    }
}

/// Plans one non-DDL statement against the catalog.
pub fn plan_statement(
    catalog: &Catalog<'_>,
    stmt: &Statement,
    params: &Params,
) -> Result<PlanNode, VellumError> {
    check_parameters(stmt, params)?;
    match stmt {
        Statement::Select(select) => plan_select(catalog, select, params),
        Statement::Insert(insert) => plan_insert(catalog, insert),
        Statement::Update(update) => plan_update(catalog, update),
        Statement::Delete(delete) => plan_delete(catalog, delete),
        _ => Err(VellumError::Validation(
            "statement does not produce a stream plan".into(),
        )),
    }
}

fn plan_select(
    catalog: &Catalog<'_>,
    stmt: &SelectStmt,
    params: &Params,
) -> Result<PlanNode, VellumError> {
    catalog.get_table(&stmt.table)?;
    for projection in &stmt.projections {
        if let Projection::Expr { expr, .. } = projection {
            check_functions(expr)?;
        }
    }
    if let Some(filter) = &stmt.filter {
        check_functions(filter)?;
    }

    let indexes = catalog.list_indexes(Some(&stmt.table))?;

    // Decompose the WHERE clause and try to push one conjunct down onto
    // an index.
    let mut conjuncts = match stmt.filter.clone() {
        Some(filter) => filter.conjuncts(),
        None => Vec::new(),
    };
    let mut chosen: Option<(IndexInfo, Vec<RangeExpr>)> = None;
    if let Some((position, index, ranges)) = select_index(&indexes, &conjuncts) {
        conjuncts.remove(position);
        debug!(index = %index.name, "selection pushed down onto index");
        chosen = Some((index, ranges));
    }

    // An ORDER BY over the chosen index path needs no explicit sort: the
    // scan direction covers it. Without a predicate index, an index on
    // the sort path serves the same purpose.
    let mut order_by = stmt.order_by.clone();
    let mut direction = Direction::Forward;
    if let Some(order) = order_by.clone() {
        let order_dir = match order.direction {
            SortDirection::Asc => Direction::Forward,
            SortDirection::Desc => Direction::Backward,
        };
        let chosen_path = chosen.as_ref().map(|(index, _)| index.path.clone());
        match chosen_path {
            Some(path) if path == order.path => {
                direction = order_dir;
                order_by = None;
            }
            Some(_) => {}
            None => {
                if let Some(index) = best_index(&indexes, &order.path) {
                    debug!(index = %index.name, "sort satisfied by index order");
                    chosen = Some((index.clone(), vec![RangeExpr::default()]));
                    direction = order_dir;
                    order_by = None;
                }
            }
        }
    }

    let mut node = match chosen {
        Some((index, ranges)) => PlanNode::IndexScan {
            index,
            ranges,
            direction,
        },
        None => PlanNode::TableScan {
            table: stmt.table.clone(),
        },
    };

    for conjunct in conjuncts {
        node = PlanNode::Filter {
            expr: conjunct,
            child: Box::new(node),
        };
    }

    // Grouping needs its input sorted on the group path.
    let aggregates = collect_aggregates(&stmt.projections)?;
    if stmt.group_by.is_some() || !aggregates.is_empty() {
        if let Some(path) = &stmt.group_by {
            node = PlanNode::Sort {
                path: path.clone(),
                direction: SortDirection::Asc,
                child: Box::new(node),
            };
        }
        node = PlanNode::Group {
            path: stmt.group_by.clone(),
            aggregates,
            child: Box::new(node),
        };
    }

    node = PlanNode::Project {
        projections: stmt.projections.clone(),
        child: Box::new(node),
    };
    if stmt.distinct {
        node = PlanNode::Distinct {
            child: Box::new(node),
        };
    }
    if let Some(order) = order_by {
        node = PlanNode::Sort {
            path: order.path,
            direction: order.direction,
            child: Box::new(node),
        };
    }
    // OFFSET discards before LIMIT counts.
    if let Some(offset) = &stmt.offset {
        node = PlanNode::Offset {
            count: bound_usize(offset, params, "OFFSET")?,
            child: Box::new(node),
        };
    }
    if let Some(limit) = &stmt.limit {
        node = PlanNode::Limit {
            count: bound_usize(limit, params, "LIMIT")?,
            child: Box::new(node),
        };
    }
    Ok(node)
}

fn plan_insert(catalog: &Catalog<'_>, stmt: &InsertStmt) -> Result<PlanNode, VellumError> {
    catalog.get_table(&stmt.table)?;
    let exprs = match &stmt.source {
        InsertSource::Documents(docs) => docs.clone(),
        InsertSource::Tuples(rows) => {
            let fields = stmt.fields.as_ref().ok_or_else(|| {
                VellumError::Validation("INSERT tuples require a field list".into())
            })?;
            let mut docs = Vec::with_capacity(rows.len());
            for row in rows {
                if row.len() != fields.len() {
                    return Err(VellumError::Validation(format!(
                        "INSERT expects {} values per row, got {}",
                        fields.len(),
                        row.len()
                    )));
                }
                docs.push(Expr::DocumentLiteral(
                    fields.iter().cloned().zip(row.iter().cloned()).collect(),
                ));
            }
            docs
        }
    };
    for expr in &exprs {
        check_functions(expr)?;
    }
    Ok(PlanNode::Insert {
        table: stmt.table.clone(),
        child: Box::new(PlanNode::Values { exprs }),
    })
}

fn plan_update(catalog: &Catalog<'_>, stmt: &UpdateStmt) -> Result<PlanNode, VellumError> {
    catalog.get_table(&stmt.table)?;
    let mut node = PlanNode::TableScan {
        table: stmt.table.clone(),
    };
    if let Some(filter) = &stmt.filter {
        check_functions(filter)?;
        node = PlanNode::Filter {
            expr: filter.clone(),
            child: Box::new(node),
        };
    }
    Ok(PlanNode::Update {
        table: stmt.table.clone(),
        actions: stmt.actions.clone(),
        child: Box::new(node),
    })
}

fn plan_delete(catalog: &Catalog<'_>, stmt: &DeleteStmt) -> Result<PlanNode, VellumError> {
    catalog.get_table(&stmt.table)?;
    let mut node = PlanNode::TableScan {
        table: stmt.table.clone(),
    };
    if let Some(filter) = &stmt.filter {
        check_functions(filter)?;
        node = PlanNode::Filter {
            expr: filter.clone(),
            child: Box::new(node),
        };
    }
    Ok(PlanNode::Delete {
        table: stmt.table.clone(),
        child: Box::new(node),
    })
}

/// Picks the one index satisfying a conjunct, preferring unique indexes
/// and then creation order.
fn select_index(
    indexes: &[IndexInfo],
    conjuncts: &[Expr],
) -> Option<(usize, IndexInfo, Vec<RangeExpr>)> {
    let mut best: Option<(usize, IndexInfo, Vec<RangeExpr>)> = None;
    for (position, conjunct) in conjuncts.iter().enumerate() {
        let Some((path, ranges)) = conjunct_ranges(conjunct) else {
            continue;
        };
        for index in indexes {
            if index.path != path {
                continue;
            }
            let better = match &best {
                None => true,
                Some((_, current, _)) => {
                    (index.unique, std::cmp::Reverse(index.seq))
                        > (current.unique, std::cmp::Reverse(current.seq))
                }
            };
            if better {
                best = Some((position, index.clone(), ranges.clone()));
            }
        }
    }
    best
}

fn best_index<'i>(indexes: &'i [IndexInfo], path: &Path) -> Option<&'i IndexInfo> {
    indexes
        .iter()
        .filter(|index| index.path == *path)
        .max_by_key(|index| (index.unique, std::cmp::Reverse(index.seq)))
}

/// Recognizes conjuncts an index scan can satisfy: `path cmp constant`,
/// `constant cmp path`, `path BETWEEN a AND b`, `path IN (constants)`.
fn conjunct_ranges(expr: &Expr) -> Option<(Path, Vec<RangeExpr>)> {
    match expr {
        Expr::Binary(op, left, right) if op.is_comparison() && *op != BinaryOp::Neq => {
            let (path, constant, op) = match (left.as_ref(), right.as_ref()) {
                (Expr::Path(path), rhs) if is_constant(rhs) => (path, rhs, *op),
                (lhs, Expr::Path(path)) if is_constant(lhs) => (path, lhs, flip(*op)),
                _ => return None,
            };
            let range = match op {
                BinaryOp::Eq => RangeExpr::eq(constant.clone()),
                BinaryOp::Gt => RangeExpr {
                    low: Some((constant.clone(), false)),
                    high: None,
                },
                BinaryOp::Ge => RangeExpr {
                    low: Some((constant.clone(), true)),
                    high: None,
                },
                BinaryOp::Lt => RangeExpr {
                    low: None,
                    high: Some((constant.clone(), false)),
                },
                BinaryOp::Le => RangeExpr {
                    low: None,
                    high: Some((constant.clone(), true)),
                },
                _ => return None,
            };
            Some((path.clone(), vec![range]))
        }
        Expr::Between { expr, low, high } => {
            let Expr::Path(path) = expr.as_ref() else {
                return None;
            };
            if !is_constant(low) || !is_constant(high) {
                return None;
            }
            Some((
                path.clone(),
                vec![RangeExpr {
                    low: Some(((**low).clone(), true)),
                    high: Some(((**high).clone(), true)),
                }],
            ))
        }
        Expr::In {
            expr,
            list,
            negated: false,
        } => {
            let Expr::Path(path) = expr.as_ref() else {
                return None;
            };
            if list.is_empty() || !list.iter().all(is_constant) {
                return None;
            }
            Some((
                path.clone(),
                list.iter().cloned().map(RangeExpr::eq).collect(),
            ))
        }
        _ => None,
    }
}

fn flip(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::Le => BinaryOp::Ge,
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::Ge => BinaryOp::Le,
        other => other,
    }
}

/// True when the expression evaluates without a document: literals,
/// parameters and operators over them.
fn is_constant(expr: &Expr) -> bool {
    match expr {
        Expr::Literal(_) | Expr::PositionalParam(_) | Expr::NamedParam(_) => true,
        Expr::Unary(_, inner) => is_constant(inner),
        Expr::Binary(_, a, b) => is_constant(a) && is_constant(b),
        Expr::Cast { expr, .. } => is_constant(expr),
        Expr::ArrayLiteral(items) => items.iter().all(is_constant),
        Expr::DocumentLiteral(pairs) => pairs.iter().all(|(_, e)| is_constant(e)),
        _ => false,
    }
}

fn collect_aggregates(projections: &[Projection]) -> Result<Vec<AggregateSpec>, VellumError> {
    let mut specs: Vec<AggregateSpec> = Vec::new();
    for projection in projections {
        let Projection::Expr { expr, .. } = projection else {
            continue;
        };
        collect_aggregates_expr(expr, &mut specs)?;
    }
    Ok(specs)
}

fn collect_aggregates_expr(
    expr: &Expr,
    specs: &mut Vec<AggregateSpec>,
) -> Result<(), VellumError> {
    if let Expr::FunctionCall {
        name,
        args,
        wildcard,
    } = expr
        && matches!(function_kind(name), Some(FunctionKind::Aggregate))
    {
        let key = expr.to_string();
        if specs.iter().any(|spec| spec.key == key) {
            return Ok(());
        }
        let func = match name.as_str() {
            "count" => AggFunc::Count,
            "min" => AggFunc::Min,
            "max" => AggFunc::Max,
            "sum" => AggFunc::Sum,
            "avg" => AggFunc::Avg,
            _ => unreachable!("registry lists exactly these aggregates"),
        };
        if !*wildcard && args.len() != 1 {
            return Err(VellumError::Validation(format!(
                "{name} takes exactly one argument"
            )));
        }
        if *wildcard && func != AggFunc::Count {
            return Err(VellumError::Validation(format!(
                "{name}(*) is not supported"
            )));
        }
        specs.push(AggregateSpec {
            key,
            func,
            arg: args.first().cloned(),
            wildcard: *wildcard,
        });
        return Ok(());
    }
    match expr {
        Expr::Unary(_, inner) => collect_aggregates_expr(inner, specs),
        Expr::Binary(_, a, b) => {
            collect_aggregates_expr(a, specs)?;
            collect_aggregates_expr(b, specs)
        }
        Expr::Cast { expr, .. } => collect_aggregates_expr(expr, specs),
        _ => Ok(()),
    }
}

/// Rejects unknown function names anywhere in the expression at plan
/// time, and aggregates in filtering position.
fn check_functions(expr: &Expr) -> Result<(), VellumError> {
    match expr {
        Expr::FunctionCall { name, args, .. } => {
            if function_kind(name).is_none() {
                return Err(VellumError::UnknownFunction(name.clone()));
            }
            for arg in args {
                check_functions(arg)?;
            }
            Ok(())
        }
        Expr::Unary(_, inner) => check_functions(inner),
        Expr::Binary(_, a, b) => {
            check_functions(a)?;
            check_functions(b)
        }
        Expr::In { expr, list, .. } => {
            check_functions(expr)?;
            for item in list {
                check_functions(item)?;
            }
            Ok(())
        }
        Expr::Between { expr, low, high } => {
            check_functions(expr)?;
            check_functions(low)?;
            check_functions(high)
        }
        Expr::Is { expr, other, .. } => {
            check_functions(expr)?;
            check_functions(other)
        }
        Expr::Cast { expr, .. } => check_functions(expr),
        Expr::DocumentLiteral(pairs) => {
            for (_, e) in pairs {
                check_functions(e)?;
            }
            Ok(())
        }
        Expr::ArrayLiteral(items) => {
            for item in items {
                check_functions(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Evaluates a LIMIT/OFFSET expression against the bound parameters and
/// requires a non-negative integer.
fn bound_usize(expr: &Expr, params: &Params, clause: &str) -> Result<usize, VellumError> {
    if !is_constant(expr) {
        return Err(VellumError::Validation(format!(
            "{clause} expects a constant expression"
        )));
    }
    let env = Environment::new(Arc::new(params.clone()));
    match eval_expr(expr, &env)? {
        Value::Integer(n) => usize::try_from(n).map_err(|_| {
            VellumError::Validation(format!("{clause} expects a non-negative integer"))
        }),
        other => Err(VellumError::TypeMismatch {
            expected: "integer".into(),
            actual: other.kind().to_string(),
        }),
    }
}

/// Verifies the statement's parameter references against the bound set.
fn check_parameters(stmt: &Statement, params: &Params) -> Result<(), VellumError> {
    let mut needed = 0usize;
    let mut named: Vec<String> = Vec::new();
    walk_statement_exprs(stmt, &mut |expr| {
        match expr {
            Expr::PositionalParam(index) => needed = needed.max(index + 1),
            Expr::NamedParam(name) => {
                if !named.contains(name) {
                    named.push(name.clone());
                }
            }
            _ => {}
        }
    });
    if needed != params.positional.len() && !(needed == 0 && params.positional.is_empty()) {
        if needed > params.positional.len() {
            return Err(VellumError::ParameterMismatch(format!(
                "statement uses {needed} positional parameters, {} bound",
                params.positional.len()
            )));
        }
        return Err(VellumError::ParameterMismatch(format!(
            "{} positional parameters bound, statement uses {needed}",
            params.positional.len()
        )));
    }
    for name in named {
        if !params.named.contains_key(&name) {
            return Err(VellumError::ParameterMismatch(format!(
                "named parameter '${name}' is not bound"
            )));
        }
    }
    Ok(())
}

/// True when the statement references any positional or named parameter.
/// Parameter-bearing statements are planned fresh on every execution.
pub fn statement_has_parameters(stmt: &Statement) -> bool {
    let mut found = false;
    walk_statement_exprs(stmt, &mut |expr| {
        if matches!(expr, Expr::PositionalParam(_) | Expr::NamedParam(_)) {
            found = true;
        }
    });
    found
}

fn walk_statement_exprs(stmt: &Statement, f: &mut impl FnMut(&Expr)) {
    let mut walk = |expr: &Expr| walk_expr(expr, f);
    match stmt {
        Statement::Select(select) => {
            for projection in &select.projections {
                if let Projection::Expr { expr, .. } = projection {
                    walk(expr);
                }
            }
            if let Some(filter) = &select.filter {
                walk(filter);
            }
            if let Some(limit) = &select.limit {
                walk(limit);
            }
            if let Some(offset) = &select.offset {
                walk(offset);
            }
        }
        Statement::Insert(insert) => match &insert.source {
            InsertSource::Documents(docs) => docs.iter().for_each(&mut walk),
            InsertSource::Tuples(rows) => {
                rows.iter().flatten().for_each(&mut walk);
            }
        },
        Statement::Update(update) => {
            for action in &update.actions {
                if let UpdateAction::Set { expr, .. } = action {
                    walk(expr);
                }
            }
            if let Some(filter) = &update.filter {
                walk(filter);
            }
        }
        Statement::Delete(delete) => {
            if let Some(filter) = &delete.filter {
                walk(filter);
            }
        }
        Statement::Explain(inner) => walk_statement_exprs(inner, f),
        _ => {}
    }
}

fn walk_expr(expr: &Expr, f: &mut impl FnMut(&Expr)) {
    f(expr);
    match expr {
        Expr::Unary(_, inner) => walk_expr(inner, f),
        Expr::Binary(_, a, b) => {
            walk_expr(a, f);
            walk_expr(b, f);
        }
        Expr::In { expr, list, .. } => {
            walk_expr(expr, f);
            for item in list {
                walk_expr(item, f);
            }
        }
        Expr::Between { expr, low, high } => {
            walk_expr(expr, f);
            walk_expr(low, f);
            walk_expr(high, f);
        }
        Expr::Is { expr, other, .. } => {
            walk_expr(expr, f);
            walk_expr(other, f);
        }
        Expr::Cast { expr, .. } => walk_expr(expr, f),
        Expr::FunctionCall { args, .. } => {
            for arg in args {
                walk_expr(arg, f);
            }
        }
        Expr::DocumentLiteral(pairs) => {
            for (_, e) in pairs {
                walk_expr(e, f);
            }
        }
        Expr::ArrayLiteral(items) => {
            for item in items {
                walk_expr(item, f);
            }
        }
        _ => {}
    }
}

/// Builds the operator pipeline for a bound plan. The scan guard bounds
/// how many rows the statement's scans may pull.
pub fn build_pipeline<'a>(
    catalog: &Catalog<'a>,
    node: &PlanNode,
    params: &Arc<Params>,
    cancel: &CancelFlag,
    guard: ScanGuard,
) -> Result<BoxedOperator<'a>, VellumError> {
    let op: BoxedOperator<'a> = match node {
        PlanNode::TableScan { table } => {
            let table = catalog.table(table)?;
            Box::new(ScanOperator::new(
                table.scan_all()?,
                params.clone(),
                cancel.clone(),
                guard,
            ))
        }
        PlanNode::IndexScan {
            index,
            ranges,
            direction,
        } => {
            let handle = Index::new(catalog.tx(), index.clone());
            let env = Environment::new(params.clone());
            let mut resolved = Vec::with_capacity(ranges.len());
            for range in ranges {
                let low = match &range.low {
                    Some((expr, inclusive)) => Some((eval_expr(expr, &env)?, *inclusive)),
                    None => None,
                };
                let high = match &range.high {
                    Some((expr, inclusive)) => Some((eval_expr(expr, &env)?, *inclusive)),
                    None => None,
                };
                resolved.push(IndexRange { low, high });
            }
            // IN expands to several point scans; keep overall key order.
            // Duplicates collapse under SQL equality, so 5 and 5.0 do
            // not scan the same rows twice.
            resolved.sort_by(|a, b| {
                let key = |r: &IndexRange| r.low.as_ref().map(|(v, _)| v.clone());
                key(a).cmp(&key(b))
            });
            let bound_eq = |x: &Option<(Value, bool)>, y: &Option<(Value, bool)>| match (x, y) {
                (Some((vx, ix)), Some((vy, iy))) => {
                    ix == iy && vx.sql_cmp(vy) == std::cmp::Ordering::Equal
                }
                (None, None) => true,
                _ => false,
            };
            resolved.dedup_by(|a, b| bound_eq(&a.low, &b.low) && bound_eq(&a.high, &b.high));
            if *direction == Direction::Backward {
                resolved.reverse();
            }
            let mut pks = Vec::new();
            for range in &resolved {
                pks.extend(handle.scan(range, *direction)?);
            }
            let table = catalog.table(&index.table)?;
            Box::new(IndexLookupOperator::new(
                table,
                pks,
                params.clone(),
                cancel.clone(),
                guard,
            ))
        }
        PlanNode::Values { exprs } => Box::new(ValuesOperator::new(
            exprs.clone(),
            params.clone(),
            cancel.clone(),
        )),
        PlanNode::Filter { expr, child } => Box::new(FilterOperator::new(
            build_pipeline(catalog, child, params, cancel, guard)?,
            expr.clone(),
            cancel.clone(),
        )),
        PlanNode::Group {
            path,
            aggregates,
            child,
        } => Box::new(GroupOperator::new(
            build_pipeline(catalog, child, params, cancel, guard)?,
            path.clone(),
            aggregates.clone(),
            params.clone(),
            cancel.clone(),
        )),
        PlanNode::Project { projections, child } => Box::new(ProjectOperator::new(
            build_pipeline(catalog, child, params, cancel, guard)?,
            projections.clone(),
            cancel.clone(),
        )),
        PlanNode::Distinct { child } => Box::new(DistinctOperator::new(
            build_pipeline(catalog, child, params, cancel, guard)?,
            cancel.clone(),
        )),
        PlanNode::Sort {
            path,
            direction,
            child,
        } => Box::new(SortOperator::new(
            build_pipeline(catalog, child, params, cancel, guard)?,
            path.clone(),
            *direction,
            cancel.clone(),
        )),
        PlanNode::Offset { count, child } => Box::new(OffsetOperator::new(
            build_pipeline(catalog, child, params, cancel, guard)?,
            *count,
        )),
        PlanNode::Limit { count, child } => Box::new(LimitOperator::new(
            build_pipeline(catalog, child, params, cancel, guard)?,
            *count,
        )),
        PlanNode::Insert { table, child } => Box::new(InsertOperator::new(
            catalog.table(table)?,
            build_pipeline(catalog, child, params, cancel, guard)?,
            cancel.clone(),
        )),
        PlanNode::Update {
            table,
            actions,
            child,
        } => Box::new(UpdateOperator::new(
            catalog.table(table)?,
            actions.clone(),
            build_pipeline(catalog, child, params, cancel, guard)?,
            cancel.clone(),
        )),
        PlanNode::Delete { table, child } => Box::new(DeleteOperator::new(
            catalog.table(table)?,
            build_pipeline(catalog, child, params, cancel, guard)?,
            cancel.clone(),
        )),
    };
    Ok(op)
}
