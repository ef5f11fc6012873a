//! Streaming execution: pull-based operators threading environments.
//!
//! A pipeline is a chain of operators, each pulling from its child with
//! `next`. An environment carries the current document, its storage key
//! when it has one, a named scalar scope and the bound parameters.
//! Cancellation is cooperative: every operator checks the flag on each
//! per-document step.

pub mod expr;

use crate::document::{
    Document, FieldBuffer, Path, PathFragment, Value, get_in_value,
};
use crate::encoding::key::{EncodedKey, KeyBuf, encode_value};
use crate::encoding::record::EncodedDocument;
use crate::error::VellumError;
use crate::sql::ast::{Expr, Projection, SortDirection, UpdateAction};
use crate::storage::table::Table;
use crate::stream::expr::eval_expr;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

/// Bound statement parameters.
#[derive(Debug, Clone, Default)]
pub struct Params {
    pub positional: Vec<Value>,
    pub named: HashMap<String, Value>,
}

impl Params {
    pub fn positional(values: Vec<Value>) -> Params {
        Params {
            positional: values,
            named: HashMap::new(),
        }
    }
}

/// Cooperative cancellation signal, observable at every operator step.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Option<Arc<AtomicBool>>);

impl CancelFlag {
    pub fn none() -> CancelFlag {
        CancelFlag(None)
    }

    pub fn new(flag: Arc<AtomicBool>) -> CancelFlag {
        CancelFlag(Some(flag))
    }

    pub fn check(&self) -> Result<(), VellumError> {
        match &self.0 {
            Some(flag) if flag.load(AtomicOrdering::Relaxed) => Err(VellumError::Cancelled),
            _ => Ok(()),
        }
    }
}

/// A document flowing through the pipeline: either still encoded (reads
/// decode on demand) or materialized in memory.
#[derive(Debug, Clone)]
pub enum StreamDoc {
    Encoded(EncodedDocument),
    Buffer(FieldBuffer),
}

impl StreamDoc {
    pub fn get_path(&self, path: &Path) -> Result<Value, VellumError> {
        match self {
            StreamDoc::Buffer(buf) => buf.get_path(path),
            StreamDoc::Encoded(doc) => {
                let (first, rest) = path
                    .fragments()
                    .split_first()
                    .ok_or(VellumError::FieldNotFound)?;
                let PathFragment::Field(name) = first else {
                    return Err(VellumError::FieldNotFound);
                };
                let value = doc.get(name)?;
                get_in_value(&value, rest)
            }
        }
    }

    pub fn to_buffer(&self) -> Result<FieldBuffer, VellumError> {
        match self {
            StreamDoc::Buffer(buf) => Ok(buf.clone()),
            StreamDoc::Encoded(doc) => doc.to_field_buffer(),
        }
    }
}

/// Execution-time context for one document.
#[derive(Debug, Clone)]
pub struct Environment {
    pub doc: Option<StreamDoc>,
    /// The pre-projection document, kept so sorting can fall back to
    /// source fields that the projection dropped.
    pub base: Option<StreamDoc>,
    pub key: Option<Vec<u8>>,
    pub scalars: HashMap<String, Value>,
    pub params: Arc<Params>,
}

impl Environment {
    pub fn new(params: Arc<Params>) -> Environment {
        Environment {
            doc: None,
            base: None,
            key: None,
            scalars: HashMap::new(),
            params,
        }
    }

    pub fn set_doc(&mut self, doc: FieldBuffer, key: Option<Vec<u8>>) {
        self.doc = Some(StreamDoc::Buffer(doc));
        self.key = key;
    }

    /// Resolves a path against the current document; an unresolvable path
    /// yields NULL, decode failures propagate.
    pub fn resolve_path(&self, path: &Path) -> Result<Value, VellumError> {
        match &self.doc {
            Some(doc) => match doc.get_path(path) {
                Ok(v) => Ok(v),
                Err(VellumError::FieldNotFound) => Ok(Value::Null),
                Err(e) => Err(e),
            },
            None => Ok(Value::Null),
        }
    }

    /// The document materialized, failing when the environment carries
    /// none.
    pub fn buffer(&self) -> Result<FieldBuffer, VellumError> {
        match &self.doc {
            Some(doc) => doc.to_buffer(),
            None => Err(VellumError::DocumentNotFound),
        }
    }
}

pub trait Operator {
    fn next(&mut self) -> Result<Option<Environment>, VellumError>;
}

pub type BoxedOperator<'a> = Box<dyn Operator + 'a>;

/// Per-statement budget of rows the scan operators may pull. Zero
/// disables the guard.
#[derive(Debug, Clone, Copy)]
pub struct ScanGuard {
    max_scan_rows: usize,
}

impl ScanGuard {
    pub fn new(max_scan_rows: usize) -> ScanGuard {
        ScanGuard { max_scan_rows }
    }

    pub fn unlimited() -> ScanGuard {
        ScanGuard { max_scan_rows: 0 }
    }

    fn admit(&self, scanned: usize) -> Result<(), VellumError> {
        if self.max_scan_rows > 0 && scanned > self.max_scan_rows {
            return Err(VellumError::ScanLimitExceeded {
                max_scan_rows: self.max_scan_rows,
            });
        }
        Ok(())
    }
}

/// Emits one environment per stored row, in the order the rows were
/// handed over.
pub struct ScanOperator {
    rows: std::vec::IntoIter<(EncodedKey, EncodedDocument)>,
    params: Arc<Params>,
    cancel: CancelFlag,
    guard: ScanGuard,
    scanned: usize,
}

impl ScanOperator {
    pub fn new(
        rows: Vec<(EncodedKey, EncodedDocument)>,
        params: Arc<Params>,
        cancel: CancelFlag,
        guard: ScanGuard,
    ) -> ScanOperator {
        ScanOperator {
            rows: rows.into_iter(),
            params,
            cancel,
            guard,
            scanned: 0,
        }
    }
}

impl Operator for ScanOperator {
    fn next(&mut self) -> Result<Option<Environment>, VellumError> {
        self.cancel.check()?;
        let Some((key, doc)) = self.rows.next() else {
            return Ok(None);
        };
        self.scanned += 1;
        self.guard.admit(self.scanned)?;
        let mut env = Environment::new(self.params.clone());
        env.doc = Some(StreamDoc::Encoded(doc));
        env.key = Some(key.into_vec());
        Ok(Some(env))
    }
}

/// Looks up table rows for primary keys produced by an index scan.
pub struct IndexLookupOperator<'a> {
    table: Table<'a>,
    pks: std::vec::IntoIter<Vec<u8>>,
    params: Arc<Params>,
    cancel: CancelFlag,
    guard: ScanGuard,
    scanned: usize,
}

impl<'a> IndexLookupOperator<'a> {
    pub fn new(
        table: Table<'a>,
        pks: Vec<Vec<u8>>,
        params: Arc<Params>,
        cancel: CancelFlag,
        guard: ScanGuard,
    ) -> IndexLookupOperator<'a> {
        IndexLookupOperator {
            table,
            pks: pks.into_iter(),
            params,
            cancel,
            guard,
            scanned: 0,
        }
    }
}

impl Operator for IndexLookupOperator<'_> {
    fn next(&mut self) -> Result<Option<Environment>, VellumError> {
        self.cancel.check()?;
        let Some(pk) = self.pks.next() else {
            return Ok(None);
        };
        self.scanned += 1;
        self.guard.admit(self.scanned)?;
        let doc = self.table.get(&pk)?;
        let mut env = Environment::new(self.params.clone());
        env.doc = Some(StreamDoc::Encoded(doc));
        env.key = Some(pk);
        Ok(Some(env))
    }
}

/// Emits one environment per document expression; the INSERT source.
pub struct ValuesOperator {
    exprs: std::vec::IntoIter<Expr>,
    params: Arc<Params>,
    cancel: CancelFlag,
}

impl ValuesOperator {
    pub fn new(exprs: Vec<Expr>, params: Arc<Params>, cancel: CancelFlag) -> ValuesOperator {
        ValuesOperator {
            exprs: exprs.into_iter(),
            params,
            cancel,
        }
    }
}

impl Operator for ValuesOperator {
    fn next(&mut self) -> Result<Option<Environment>, VellumError> {
        self.cancel.check()?;
        let Some(expr) = self.exprs.next() else {
            return Ok(None);
        };
        let empty = Environment::new(self.params.clone());
        let value = eval_expr(&expr, &empty)?;
        let Value::Document(buf) = value else {
            return Err(VellumError::TypeMismatch {
                expected: "document".into(),
                actual: value.kind().to_string(),
            });
        };
        let mut env = Environment::new(self.params.clone());
        env.set_doc(buf, None);
        Ok(Some(env))
    }
}

pub struct FilterOperator<'a> {
    child: BoxedOperator<'a>,
    predicate: Expr,
    cancel: CancelFlag,
}

impl<'a> FilterOperator<'a> {
    pub fn new(child: BoxedOperator<'a>, predicate: Expr, cancel: CancelFlag) -> Self {
        FilterOperator {
            child,
            predicate,
            cancel,
        }
    }
}

impl Operator for FilterOperator<'_> {
    fn next(&mut self) -> Result<Option<Environment>, VellumError> {
        loop {
            self.cancel.check()?;
            let Some(env) = self.child.next()? else {
                return Ok(None);
            };
            if eval_expr(&self.predicate, &env)?.is_truthy() {
                return Ok(Some(env));
            }
        }
    }
}

/// Builds the projected document: aliases become field names, `*` expands
/// to the source document's fields in order, and everything else is named
/// after its expression text.
pub struct ProjectOperator<'a> {
    child: BoxedOperator<'a>,
    projections: Vec<Projection>,
    cancel: CancelFlag,
}

impl<'a> ProjectOperator<'a> {
    pub fn new(
        child: BoxedOperator<'a>,
        projections: Vec<Projection>,
        cancel: CancelFlag,
    ) -> Self {
        ProjectOperator {
            child,
            projections,
            cancel,
        }
    }
}

impl Operator for ProjectOperator<'_> {
    fn next(&mut self) -> Result<Option<Environment>, VellumError> {
        self.cancel.check()?;
        let Some(mut env) = self.child.next()? else {
            return Ok(None);
        };
        let mut out = FieldBuffer::new();
        for projection in &self.projections {
            match projection {
                Projection::Wildcard => {
                    if let Some(doc) = &env.doc {
                        out.copy_document(&ProjectionSource(doc))?;
                    }
                }
                Projection::Expr { expr, alias } => {
                    let name = match alias {
                        Some(alias) => alias.clone(),
                        None => expr.to_string(),
                    };
                    out.add(&name, eval_expr(expr, &env)?);
                }
            }
        }
        env.base = env.doc.take();
        env.doc = Some(StreamDoc::Buffer(out));
        Ok(Some(env))
    }
}

/// Adapter so `copy_document` can consume a stream document.
struct ProjectionSource<'a>(&'a StreamDoc);

impl Document for ProjectionSource<'_> {
    fn iter_fields(
        &self,
    ) -> Box<dyn Iterator<Item = Result<(compact_str::CompactString, Value), VellumError>> + '_>
    {
        match self.0 {
            StreamDoc::Buffer(buf) => buf.iter_fields(),
            StreamDoc::Encoded(doc) => doc.iter_fields(),
        }
    }

    fn get(&self, field: &str) -> Result<Value, VellumError> {
        match self.0 {
            StreamDoc::Buffer(buf) => buf.get(field),
            StreamDoc::Encoded(doc) => doc.get(field),
        }
    }
}

/// Suppresses environments whose projected document was already emitted,
/// compared through the order-preserving encoding.
pub struct DistinctOperator<'a> {
    child: BoxedOperator<'a>,
    seen: HashSet<Vec<u8>>,
    cancel: CancelFlag,
}

impl<'a> DistinctOperator<'a> {
    pub fn new(child: BoxedOperator<'a>, cancel: CancelFlag) -> Self {
        DistinctOperator {
            child,
            seen: HashSet::new(),
            cancel,
        }
    }
}

impl Operator for DistinctOperator<'_> {
    fn next(&mut self) -> Result<Option<Environment>, VellumError> {
        loop {
            self.cancel.check()?;
            let Some(env) = self.child.next()? else {
                return Ok(None);
            };
            let mut fingerprint = KeyBuf::new();
            encode_value(&Value::Document(env.buffer()?), &mut fingerprint);
            if self.seen.insert(fingerprint.into_vec()) {
                return Ok(Some(env));
            }
        }
    }
}

struct SortEntry {
    key: Vec<u8>,
    seq: usize,
    direction: SortDirection,
    env: Environment,
}

impl PartialEq for SortEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortEntry {}

impl PartialOrd for SortEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // The greatest entry pops first. Ties release in input order for
        // both directions.
        match self.direction {
            SortDirection::Asc => other
                .key
                .cmp(&self.key)
                .then_with(|| other.seq.cmp(&self.seq)),
            SortDirection::Desc => self
                .key
                .cmp(&other.key)
                .then_with(|| other.seq.cmp(&self.seq)),
        }
    }
}

/// Sorts the stream on the order-preserving encoding of the value at a
/// path. The whole input is materialized into a binary heap before the
/// first environment comes out; a missing sort field counts as NULL.
pub struct SortOperator<'a> {
    child: Option<BoxedOperator<'a>>,
    path: Path,
    direction: SortDirection,
    heap: BinaryHeap<SortEntry>,
    cancel: CancelFlag,
}

impl<'a> SortOperator<'a> {
    pub fn new(
        child: BoxedOperator<'a>,
        path: Path,
        direction: SortDirection,
        cancel: CancelFlag,
    ) -> Self {
        SortOperator {
            child: Some(child),
            path,
            direction,
            heap: BinaryHeap::new(),
            cancel,
        }
    }

    fn sort_key(&self, env: &Environment) -> Result<Vec<u8>, VellumError> {
        // A projected stream may have dropped the sort field; fall back
        // to the pre-projection document before settling on NULL.
        let mut value = env.resolve_path(&self.path)?;
        if value == Value::Null
            && let Some(base) = &env.base
        {
            value = match base.get_path(&self.path) {
                Ok(v) => v,
                Err(VellumError::FieldNotFound) => Value::Null,
                Err(e) => return Err(e),
            };
        }
        let mut buf = KeyBuf::new();
        encode_value(&value, &mut buf);
        Ok(buf.into_vec())
    }

    fn fill(&mut self) -> Result<(), VellumError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let mut seq = 0usize;
        while let Some(env) = child.next()? {
            self.cancel.check()?;
            let key = self.sort_key(&env)?;
            self.heap.push(SortEntry {
                key,
                seq,
                direction: self.direction,
                env,
            });
            seq += 1;
        }
        Ok(())
    }
}

impl Operator for SortOperator<'_> {
    fn next(&mut self) -> Result<Option<Environment>, VellumError> {
        self.fill()?;
        self.cancel.check()?;
        Ok(self.heap.pop().map(|entry| entry.env))
    }
}

pub struct LimitOperator<'a> {
    child: BoxedOperator<'a>,
    remaining: usize,
}

impl<'a> LimitOperator<'a> {
    pub fn new(child: BoxedOperator<'a>, limit: usize) -> Self {
        LimitOperator {
            child,
            remaining: limit,
        }
    }
}

impl Operator for LimitOperator<'_> {
    fn next(&mut self) -> Result<Option<Environment>, VellumError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        match self.child.next()? {
            Some(env) => {
                self.remaining -= 1;
                Ok(Some(env))
            }
            None => Ok(None),
        }
    }
}

pub struct OffsetOperator<'a> {
    child: BoxedOperator<'a>,
    to_skip: usize,
}

impl<'a> OffsetOperator<'a> {
    pub fn new(child: BoxedOperator<'a>, offset: usize) -> Self {
        OffsetOperator {
            child,
            to_skip: offset,
        }
    }
}

impl Operator for OffsetOperator<'_> {
    fn next(&mut self) -> Result<Option<Environment>, VellumError> {
        while self.to_skip > 0 {
            if self.child.next()?.is_none() {
                return Ok(None);
            }
            self.to_skip -= 1;
        }
        self.child.next()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Min,
    Max,
    Sum,
    Avg,
}

/// One aggregate accumulated by the grouping operator. `key` is the
/// rendered call text the evaluator resolves from the scalar scope.
#[derive(Debug, Clone)]
pub struct AggregateSpec {
    pub key: String,
    pub func: AggFunc,
    pub arg: Option<Expr>,
    pub wildcard: bool,
}

#[derive(Debug, Clone)]
enum AggregateState {
    Count(i64),
    Sum(Option<Value>),
    Min(Option<Value>),
    Max(Option<Value>),
    Avg { total: f64, count: i64 },
}

impl AggregateState {
    fn new(func: AggFunc) -> AggregateState {
        match func {
            AggFunc::Count => AggregateState::Count(0),
            AggFunc::Sum => AggregateState::Sum(None),
            AggFunc::Min => AggregateState::Min(None),
            AggFunc::Max => AggregateState::Max(None),
            AggFunc::Avg => AggregateState::Avg {
                total: 0.0,
                count: 0,
            },
        }
    }

    fn update(&mut self, value: Option<Value>) -> Result<(), VellumError> {
        match self {
            AggregateState::Count(n) => {
                if value.is_some() {
                    *n = n.saturating_add(1);
                }
            }
            AggregateState::Sum(state) => {
                if let Some(value) = value {
                    let next = match state.take() {
                        None => value,
                        Some(acc) => {
                            crate::stream::expr::eval_add(acc, value)?
                        }
                    };
                    *state = Some(next);
                }
            }
            AggregateState::Min(state) => {
                if let Some(value) = value
                    && state.as_ref().is_none_or(|current| value < *current)
                {
                    *state = Some(value);
                }
            }
            AggregateState::Max(state) => {
                if let Some(value) = value
                    && state.as_ref().is_none_or(|current| value > *current)
                {
                    *state = Some(value);
                }
            }
            AggregateState::Avg { total, count } => {
                if let Some(value) = value {
                    match value {
                        Value::Integer(i) => *total += i as f64,
                        Value::Double(d) => *total += d,
                        other => {
                            return Err(VellumError::TypeMismatch {
                                expected: "a number".into(),
                                actual: other.kind().to_string(),
                            });
                        }
                    }
                    *count += 1;
                }
            }
        }
        Ok(())
    }

    fn finalize(self) -> Value {
        match self {
            AggregateState::Count(n) => Value::Integer(n),
            AggregateState::Sum(v) | AggregateState::Min(v) | AggregateState::Max(v) => {
                v.unwrap_or(Value::Null)
            }
            AggregateState::Avg { total, count } => {
                if count == 0 {
                    Value::Null
                } else {
                    Value::Double(total / count as f64)
                }
            }
        }
    }
}

/// Groups a stream sorted on the group path, emitting one environment per
/// group with the accumulated aggregates in its scalar scope. Without a
/// group path the whole stream is one group, emitted even when empty so
/// `count(*)` over an empty table yields 0.
pub struct GroupOperator<'a> {
    child: Option<BoxedOperator<'a>>,
    group_path: Option<Path>,
    aggregates: Vec<AggregateSpec>,
    pending: std::vec::IntoIter<Environment>,
    cancel: CancelFlag,
    params: Arc<Params>,
}

impl<'a> GroupOperator<'a> {
    pub fn new(
        child: BoxedOperator<'a>,
        group_path: Option<Path>,
        aggregates: Vec<AggregateSpec>,
        params: Arc<Params>,
        cancel: CancelFlag,
    ) -> Self {
        GroupOperator {
            child: Some(child),
            group_path,
            aggregates,
            pending: Vec::new().into_iter(),
            cancel,
            params,
        }
    }

    fn group_env(&self, group: Option<Value>, states: Vec<AggregateState>) -> Environment {
        let mut env = Environment::new(self.params.clone());
        let mut doc = FieldBuffer::new();
        if let (Some(path), Some(value)) = (&self.group_path, group) {
            add_group_field(&mut doc, path, value);
        }
        env.doc = Some(StreamDoc::Buffer(doc));
        for (spec, state) in self.aggregates.iter().zip(states) {
            env.scalars.insert(spec.key.clone(), state.finalize());
        }
        env
    }

    fn fresh_states(&self) -> Vec<AggregateState> {
        self.aggregates
            .iter()
            .map(|spec| AggregateState::new(spec.func))
            .collect()
    }

    fn accumulate(
        &self,
        states: &mut [AggregateState],
        env: &Environment,
    ) -> Result<(), VellumError> {
        for (spec, state) in self.aggregates.iter().zip(states.iter_mut()) {
            let sample = if spec.wildcard {
                Some(Value::Integer(1))
            } else {
                match &spec.arg {
                    Some(arg) => match eval_expr(arg, env)? {
                        Value::Null => None,
                        value => Some(value),
                    },
                    None => None,
                }
            };
            state.update(sample)?;
        }
        Ok(())
    }

    fn fill(&mut self) -> Result<(), VellumError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let mut groups: Vec<Environment> = Vec::new();
        let mut current: Option<(Option<Value>, Vec<AggregateState>)> = None;

        while let Some(env) = child.next()? {
            self.cancel.check()?;
            let group_value = match &self.group_path {
                Some(path) => Some(env.resolve_path(path)?),
                None => None,
            };
            match &mut current {
                Some((value, states)) if *value == group_value => {
                    self.accumulate(states, &env)?;
                }
                Some((value, states)) => {
                    let finished_states = std::mem::replace(states, self.fresh_states());
                    let finished_value = std::mem::replace(value, group_value);
                    groups.push(self.group_env(finished_value, finished_states));
                    self.accumulate(states, &env)?;
                }
                None => {
                    let mut states = self.fresh_states();
                    self.accumulate(&mut states, &env)?;
                    current = Some((group_value, states));
                }
            }
        }

        match current {
            Some((value, states)) => groups.push(self.group_env(value, states)),
            // An ungrouped aggregate over an empty stream still emits one
            // row of initial values.
            None if self.group_path.is_none() => {
                groups.push(self.group_env(None, self.fresh_states()));
            }
            None => {}
        }

        self.pending = groups.into_iter();
        Ok(())
    }
}

/// Places the group key in the output document so the grouping path
/// resolves against it. Field fragments nest; a path with array indexes
/// falls back to its flat text as the field name.
fn add_group_field(doc: &mut FieldBuffer, path: &Path, value: Value) {
    fn build(frags: &[PathFragment], value: Value) -> Value {
        match frags.split_first() {
            None => value,
            Some((PathFragment::Field(name), rest)) => {
                let mut buf = FieldBuffer::new();
                buf.add(name, build(rest, value));
                Value::Document(buf)
            }
            Some((PathFragment::Index(_), _)) => {
                unreachable!("caller filters index fragments")
            }
        }
    }
    match path.fragments() {
        [PathFragment::Field(first), rest @ ..]
            if rest
                .iter()
                .all(|frag| matches!(frag, PathFragment::Field(_))) =>
        {
            doc.add(first, build(rest, value));
        }
        _ => {
            doc.add(&path.to_string(), value);
        }
    }
}

impl Operator for GroupOperator<'_> {
    fn next(&mut self) -> Result<Option<Environment>, VellumError> {
        self.fill()?;
        self.cancel.check()?;
        Ok(self.pending.next())
    }
}

/// Terminal operator: inserts each incoming document and emits the stored
/// form keyed by its new primary key.
pub struct InsertOperator<'a> {
    table: Table<'a>,
    child: BoxedOperator<'a>,
    cancel: CancelFlag,
}

impl<'a> InsertOperator<'a> {
    pub fn new(table: Table<'a>, child: BoxedOperator<'a>, cancel: CancelFlag) -> Self {
        InsertOperator {
            table,
            child,
            cancel,
        }
    }
}

impl Operator for InsertOperator<'_> {
    fn next(&mut self) -> Result<Option<Environment>, VellumError> {
        self.cancel.check()?;
        let Some(mut env) = self.child.next()? else {
            return Ok(None);
        };
        let buf = env.buffer()?;
        let (key, stored) = self.table.insert(&buf)?;
        env.set_doc(stored, Some(key.into_vec()));
        Ok(Some(env))
    }
}

/// Terminal operator: applies SET / UNSET actions to each incoming
/// document and writes it back under the same key.
pub struct UpdateOperator<'a> {
    table: Table<'a>,
    actions: Vec<UpdateAction>,
    child: BoxedOperator<'a>,
    cancel: CancelFlag,
}

impl<'a> UpdateOperator<'a> {
    pub fn new(
        table: Table<'a>,
        actions: Vec<UpdateAction>,
        child: BoxedOperator<'a>,
        cancel: CancelFlag,
    ) -> Self {
        UpdateOperator {
            table,
            actions,
            child,
            cancel,
        }
    }
}

impl Operator for UpdateOperator<'_> {
    fn next(&mut self) -> Result<Option<Environment>, VellumError> {
        self.cancel.check()?;
        let Some(mut env) = self.child.next()? else {
            return Ok(None);
        };
        let mut buf = env.buffer()?;
        for action in &self.actions {
            match action {
                UpdateAction::Set { path, expr } => {
                    let value = eval_expr(expr, &env)?;
                    // Documents the path does not apply to are left as
                    // they are.
                    match buf.set_path(path, value) {
                        Ok(()) | Err(VellumError::FieldNotFound) => {}
                        Err(e) => return Err(e),
                    }
                }
                UpdateAction::Unset { path } => match buf.delete_path(path) {
                    Ok(()) | Err(VellumError::FieldNotFound) => {}
                    Err(e) => return Err(e),
                },
            }
        }
        let key = env.key.clone().ok_or(VellumError::DocumentNotFound)?;
        let stored = self.table.replace(&key, &buf)?;
        env.set_doc(stored, Some(key));
        Ok(Some(env))
    }
}

/// Terminal operator: deletes each incoming document and emits its last
/// stored form.
pub struct DeleteOperator<'a> {
    table: Table<'a>,
    child: BoxedOperator<'a>,
    cancel: CancelFlag,
}

impl<'a> DeleteOperator<'a> {
    pub fn new(table: Table<'a>, child: BoxedOperator<'a>, cancel: CancelFlag) -> Self {
        DeleteOperator {
            table,
            child,
            cancel,
        }
    }
}

impl Operator for DeleteOperator<'_> {
    fn next(&mut self) -> Result<Option<Environment>, VellumError> {
        self.cancel.check()?;
        let Some(mut env) = self.child.next()? else {
            return Ok(None);
        };
        let key = env.key.clone().ok_or(VellumError::DocumentNotFound)?;
        let buf = env.buffer()?;
        self.table.delete(&key)?;
        env.set_doc(buf, Some(key));
        Ok(Some(env))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AggFunc, AggregateSpec, CancelFlag, DistinctOperator, Environment, FilterOperator,
        GroupOperator, LimitOperator, OffsetOperator, Operator, Params, ProjectOperator,
        SortOperator, StreamDoc,
    };
    use crate::document::{FieldBuffer, Path, Value};
    use crate::sql::ast::{Expr, Projection, SortDirection};
    use crate::sql::parser::Parser;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Fixed {
        envs: std::vec::IntoIter<Environment>,
    }

    impl Operator for Fixed {
        fn next(&mut self) -> Result<Option<Environment>, crate::error::VellumError> {
            Ok(self.envs.next())
        }
    }

    fn source(rows: Vec<Vec<(&str, Value)>>) -> Box<Fixed> {
        let params = Arc::new(Params::default());
        let envs: Vec<Environment> = rows
            .into_iter()
            .map(|fields| {
                let mut buf = FieldBuffer::new();
                for (f, v) in fields {
                    buf.add(f, v);
                }
                let mut env = Environment::new(params.clone());
                env.set_doc(buf, None);
                env
            })
            .collect();
        Box::new(Fixed {
            envs: envs.into_iter(),
        })
    }

    fn drain(mut op: impl Operator) -> Vec<FieldBuffer> {
        let mut out = Vec::new();
        while let Some(env) = op.next().unwrap() {
            out.push(env.buffer().unwrap());
        }
        out
    }

    fn field(buf: &FieldBuffer, name: &str) -> Value {
        buf.get_field(name).cloned().unwrap()
    }

    fn parse_expr(text: &str) -> Expr {
        Parser::new(text).parse_expr().unwrap()
    }

    #[test]
    fn filter_drops_falsy_environments() {
        let child = source(vec![
            vec![("a", Value::Integer(1))],
            vec![("a", Value::Integer(5))],
            vec![("b", Value::Integer(9))],
        ]);
        let out = drain(FilterOperator::new(
            child,
            parse_expr("a > 2"),
            CancelFlag::none(),
        ));
        assert_eq!(out.len(), 1);
        assert_eq!(field(&out[0], "a"), Value::Integer(5));
    }

    #[test]
    fn project_builds_named_fields_and_keeps_base() {
        let child = source(vec![vec![
            ("a", Value::Integer(2)),
            ("b", Value::Integer(3)),
        ]]);
        let mut op = ProjectOperator::new(
            child,
            vec![
                Projection::Expr {
                    expr: parse_expr("a + b"),
                    alias: Some("total".into()),
                },
                Projection::Expr {
                    expr: parse_expr("a"),
                    alias: None,
                },
            ],
            CancelFlag::none(),
        );
        let env = op.next().unwrap().unwrap();
        let buf = env.buffer().unwrap();
        assert_eq!(field(&buf, "total"), Value::Integer(5));
        assert_eq!(field(&buf, "a"), Value::Integer(2));
        assert!(matches!(env.base, Some(StreamDoc::Buffer(_))));
    }

    #[test]
    fn wildcard_expands_source_fields_in_order() {
        let child = source(vec![vec![
            ("x", Value::Integer(1)),
            ("y", Value::Integer(2)),
        ]]);
        let out = drain(ProjectOperator::new(
            child,
            vec![Projection::Wildcard],
            CancelFlag::none(),
        ));
        let names: Vec<String> = out[0].iter().map(|(f, _)| f.to_string()).collect();
        assert_eq!(names, ["x", "y"]);
    }

    #[test]
    fn sort_orders_by_encoded_key_with_stable_ties() {
        let child = source(vec![
            vec![("a", Value::Integer(3)), ("tag", Value::text("first"))],
            vec![("a", Value::Integer(1))],
            vec![("a", Value::Integer(3)), ("tag", Value::text("second"))],
            vec![("b", Value::Integer(0))],
        ]);
        let out = drain(SortOperator::new(
            child,
            Path::parse("a"),
            SortDirection::Asc,
            CancelFlag::none(),
        ));
        // Missing sort field counts as NULL and sorts first.
        assert!(out[0].get_field("a").is_none());
        assert_eq!(field(&out[1], "a"), Value::Integer(1));
        assert_eq!(field(&out[2], "tag"), Value::text("first"));
        assert_eq!(field(&out[3], "tag"), Value::text("second"));

        let child = source(vec![
            vec![("a", Value::Integer(1))],
            vec![("a", Value::Integer(2))],
        ]);
        let out = drain(SortOperator::new(
            child,
            Path::parse("a"),
            SortDirection::Desc,
            CancelFlag::none(),
        ));
        assert_eq!(field(&out[0], "a"), Value::Integer(2));
    }

    #[test]
    fn distinct_suppresses_equal_documents() {
        let child = source(vec![
            vec![("a", Value::Integer(1))],
            vec![("a", Value::Integer(1))],
            vec![("a", Value::Integer(2))],
        ]);
        let out = drain(DistinctOperator::new(child, CancelFlag::none()));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn limit_and_offset_bound_the_stream() {
        let rows: Vec<_> = (1..=5).map(|i| vec![("a", Value::Integer(i))]).collect();
        let out = drain(LimitOperator::new(
            Box::new(OffsetOperator::new(source(rows), 1)),
            2,
        ));
        assert_eq!(out.len(), 2);
        assert_eq!(field(&out[0], "a"), Value::Integer(2));
        assert_eq!(field(&out[1], "a"), Value::Integer(3));
    }

    #[test]
    fn group_accumulates_per_run_and_handles_empty_input() {
        let child = source(vec![
            vec![("g", Value::Integer(1)), ("v", Value::Integer(10))],
            vec![("g", Value::Integer(1)), ("v", Value::Integer(20))],
            vec![("g", Value::Integer(2)), ("v", Value::Integer(5))],
        ]);
        let specs = vec![
            AggregateSpec {
                key: "count(*)".into(),
                func: AggFunc::Count,
                arg: None,
                wildcard: true,
            },
            AggregateSpec {
                key: "sum(v)".into(),
                func: AggFunc::Sum,
                arg: Some(parse_expr("v")),
                wildcard: false,
            },
        ];
        let mut op = GroupOperator::new(
            child,
            Some(Path::parse("g")),
            specs.clone(),
            Arc::new(Params::default()),
            CancelFlag::none(),
        );
        let first = op.next().unwrap().unwrap();
        assert_eq!(first.scalars["count(*)"], Value::Integer(2));
        assert_eq!(first.scalars["sum(v)"], Value::Integer(30));
        let second = op.next().unwrap().unwrap();
        assert_eq!(second.scalars["sum(v)"], Value::Integer(5));
        assert!(op.next().unwrap().is_none());

        // No group path and no rows: one environment with zeroed state.
        let mut op = GroupOperator::new(
            source(vec![]),
            None,
            specs,
            Arc::new(Params::default()),
            CancelFlag::none(),
        );
        let only = op.next().unwrap().unwrap();
        assert_eq!(only.scalars["count(*)"], Value::Integer(0));
        assert_eq!(only.scalars["sum(v)"], Value::Null);
        assert!(op.next().unwrap().is_none());
    }

    #[test]
    fn scan_guard_stops_oversized_scans() {
        use super::{ScanGuard, ScanOperator};
        use crate::encoding::key::EncodedKey;
        use crate::encoding::record::{EncodedDocument, encode_document};

        let rows: Vec<_> = (1..=3)
            .map(|i| {
                let mut buf = FieldBuffer::new();
                buf.add("a", Value::Integer(i));
                (
                    EncodedKey::from_value(&Value::Integer(i)),
                    EncodedDocument::new(encode_document(&buf).unwrap()),
                )
            })
            .collect();

        let mut op = ScanOperator::new(
            rows.clone(),
            Arc::new(Params::default()),
            CancelFlag::none(),
            ScanGuard::new(2),
        );
        assert!(op.next().unwrap().is_some());
        assert!(op.next().unwrap().is_some());
        assert!(matches!(
            op.next(),
            Err(crate::error::VellumError::ScanLimitExceeded { max_scan_rows: 2 })
        ));

        let mut op = ScanOperator::new(
            rows,
            Arc::new(Params::default()),
            CancelFlag::none(),
            ScanGuard::unlimited(),
        );
        let mut emitted = 0;
        while op.next().unwrap().is_some() {
            emitted += 1;
        }
        assert_eq!(emitted, 3);
    }

    #[test]
    fn cancellation_stops_the_pipeline() {
        let flag = Arc::new(AtomicBool::new(true));
        let mut op = FilterOperator::new(
            source(vec![vec![("a", Value::Integer(1))]]),
            parse_expr("a = 1"),
            CancelFlag::new(flag.clone()),
        );
        assert!(matches!(
            op.next(),
            Err(crate::error::VellumError::Cancelled)
        ));
        flag.store(false, Ordering::Relaxed);
        assert!(op.next().unwrap().is_some());
    }
}
