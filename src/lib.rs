//! Vellum: an embedded, SQL-speaking, schemaless document database over a
//! pluggable ordered key-value engine.
//!
//! A [`Database`] wraps an engine and executes SQL statements, each in an
//! implicit transaction, or inside an explicit [`Transaction`] obtained
//! from [`Database::begin`]. A [`Session`] additionally routes `BEGIN` /
//! `COMMIT` / `ROLLBACK` statements onto an owned transaction so callers
//! can drive transactions purely through SQL.

pub mod catalog;
pub mod config;
pub mod document;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod planner;
pub mod sql;
pub mod storage;
pub mod stream;

pub use config::VellumConfig;
pub use document::{Document, FieldBuffer, Path, Value, ValueKind};
pub use engine::{Engine, MemoryEngine};
pub use error::{VellumError, VellumErrorCode};
pub use stream::Params;

use crate::catalog::{Catalog, FieldConstraint, IndexInfo, TableInfo};
use crate::config::validate_config;
use crate::engine::EngineTx;
use crate::planner::PlanNode;
use crate::sql::ast::{CreateIndexStmt, CreateTableStmt, Statement};
use crate::stream::{CancelFlag, Environment, ScanGuard};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{info, warn};

struct CachedPlan {
    version: u64,
    plan: Arc<PlanNode>,
}

pub struct Database {
    engine: Box<dyn Engine>,
    config: VellumConfig,
    /// Bumped on every committed DDL change; plans carry the version they
    /// were built against and are re-planned when stale.
    catalog_version: AtomicU64,
    plan_cache: Option<Mutex<LruCache<String, CachedPlan>>>,
}

impl Database {
    /// Opens a database over the given engine, creating the reserved
    /// catalog stores when they are absent.
    pub fn open(engine: Box<dyn Engine>, config: VellumConfig) -> Result<Database, VellumError> {
        validate_config(&config)?;
        info!(
            plan_cache_entries = config.plan_cache_entries,
            max_scan_rows = config.max_scan_rows,
            "opening database"
        );
        let tx = engine.begin(true)?;
        Catalog::new(tx.as_ref()).bootstrap()?;
        tx.commit()?;

        let plan_cache = NonZeroUsize::new(config.plan_cache_entries)
            .map(|capacity| Mutex::new(LruCache::new(capacity)));
        Ok(Database {
            engine,
            config,
            catalog_version: AtomicU64::new(0),
            plan_cache,
        })
    }

    /// Opens a database over a fresh in-memory engine.
    pub fn open_memory() -> Result<Database, VellumError> {
        Database::open(Box::new(MemoryEngine::new()), VellumConfig::default())
    }

    pub fn config(&self) -> &VellumConfig {
        &self.config
    }

    /// Starts an explicit transaction. A read-write transaction blocks
    /// while another writer is live, per the engine's semantics.
    pub fn begin(&self, writable: bool) -> Result<Transaction<'_>, VellumError> {
        Ok(Transaction {
            db: self,
            inner: Some(self.engine.begin(writable)?),
            writable,
            pending_ddl: false,
        })
    }

    /// Executes one statement in an implicit transaction and returns the
    /// number of documents it emitted.
    pub fn exec(&self, sql: &str, params: Params) -> Result<usize, VellumError> {
        Ok(self.run_implicit(sql, params, CancelFlag::none())?.len())
    }

    /// Executes one statement in an implicit transaction and returns the
    /// documents it emitted.
    pub fn query(&self, sql: &str, params: Params) -> Result<Vec<FieldBuffer>, VellumError> {
        self.run_implicit(sql, params, CancelFlag::none())
    }

    /// Like [`Database::query`], with a cooperative cancellation signal
    /// observed at every pipeline step.
    pub fn query_cancellable(
        &self,
        sql: &str,
        params: Params,
        cancel: Arc<AtomicBool>,
    ) -> Result<Vec<FieldBuffer>, VellumError> {
        self.run_implicit(sql, params, CancelFlag::new(cancel))
    }

    /// Executes a semicolon-separated script, one implicit transaction
    /// per statement, and returns the output of the last one.
    pub fn exec_script(&self, sql: &str) -> Result<Vec<FieldBuffer>, VellumError> {
        let mut last = Vec::new();
        for stmt in sql::parse_script(sql)? {
            last = self.run_parsed_implicit(&stmt, None, Params::default(), CancelFlag::none())?;
        }
        Ok(last)
    }

    fn run_implicit(
        &self,
        sql: &str,
        params: Params,
        cancel: CancelFlag,
    ) -> Result<Vec<FieldBuffer>, VellumError> {
        let stmt = sql::parse(sql)?;
        self.run_parsed_implicit(&stmt, Some(sql), params, cancel)
    }

    fn run_parsed_implicit(
        &self,
        stmt: &Statement,
        sql_key: Option<&str>,
        params: Params,
        cancel: CancelFlag,
    ) -> Result<Vec<FieldBuffer>, VellumError> {
        if matches!(
            stmt,
            Statement::Begin { .. } | Statement::Commit | Statement::Rollback
        ) {
            return Err(VellumError::Validation(
                "transaction statements need a session or an explicit transaction".into(),
            ));
        }
        let writable = stmt.is_mutation();
        let tx = self.engine.begin(writable)?;
        match self.run_statement_keyed(tx.as_ref(), sql_key, stmt, &Arc::new(params), &cancel) {
            Ok(docs) => {
                tx.commit()?;
                if is_ddl(stmt) {
                    self.bump_catalog_version();
                }
                Ok(docs)
            }
            Err(e) => {
                // The statement opened this transaction; it unwinds here.
                if let Err(rollback_err) = tx.rollback() {
                    warn!(error = %rollback_err, "rollback after failed statement");
                }
                Err(e)
            }
        }
    }

    fn bump_catalog_version(&self) {
        let version = self.catalog_version.fetch_add(1, Ordering::SeqCst) + 1;
        info!(version, "catalog changed; cached plans invalidated");
    }

    /// Plans a stream statement, consulting the plan cache for
    /// parameter-free statements. Cached entries are tagged with the
    /// catalog version seen at planning and re-planned when stale.
    fn plan(
        &self,
        catalog: &Catalog<'_>,
        sql_key: Option<&str>,
        stmt: &Statement,
        params: &Params,
    ) -> Result<Arc<PlanNode>, VellumError> {
        let version = self.catalog_version.load(Ordering::SeqCst);
        let cacheable = sql_key.filter(|_| !planner::statement_has_parameters(stmt));
        if let (Some(cache), Some(key)) = (&self.plan_cache, cacheable) {
            {
                let mut guard = cache.lock();
                if let Some(entry) = guard.get(key) {
                    if entry.version == version {
                        return Ok(entry.plan.clone());
                    }
                }
            }
            let plan = Arc::new(planner::plan_statement(catalog, stmt, params)?);
            cache.lock().put(
                key.to_string(),
                CachedPlan {
                    version,
                    plan: plan.clone(),
                },
            );
            return Ok(plan);
        }
        Ok(Arc::new(planner::plan_statement(catalog, stmt, params)?))
    }

    fn run_statement(
        &self,
        tx: &dyn EngineTx,
        stmt: &Statement,
        params: &Arc<Params>,
        cancel: &CancelFlag,
    ) -> Result<Vec<FieldBuffer>, VellumError> {
        self.run_statement_keyed(tx, None, stmt, params, cancel)
    }

    fn run_statement_keyed(
        &self,
        tx: &dyn EngineTx,
        sql_key: Option<&str>,
        stmt: &Statement,
        params: &Arc<Params>,
        cancel: &CancelFlag,
    ) -> Result<Vec<FieldBuffer>, VellumError> {
        let catalog = Catalog::new(tx);
        match stmt {
            Statement::Select(_)
            | Statement::Insert(_)
            | Statement::Update(_)
            | Statement::Delete(_) => {
                if stmt.is_mutation() && !tx.writable() {
                    return Err(VellumError::TxReadOnly);
                }
                let plan = self.plan(&catalog, sql_key, stmt, params)?;
                let guard = ScanGuard::new(self.config.max_scan_rows);
                let mut pipeline =
                    planner::build_pipeline(&catalog, &plan, params, cancel, guard)?;
                let mut out = Vec::new();
                while let Some(env) = pipeline.next()? {
                    out.push(env.buffer()?);
                }
                Ok(out)
            }
            Statement::Explain(inner) => {
                let plan = planner::plan_statement(&catalog, inner, params)?;
                let mut doc = FieldBuffer::new();
                doc.add("plan", Value::text(&plan.to_string()));
                Ok(vec![doc])
            }
            Statement::CreateTable(create) => {
                if !tx.writable() {
                    return Err(VellumError::TxReadOnly);
                }
                self.create_table(&catalog, create, params)?;
                Ok(Vec::new())
            }
            Statement::CreateIndex(create) => {
                if !tx.writable() {
                    return Err(VellumError::TxReadOnly);
                }
                self.create_index(&catalog, create)?;
                Ok(Vec::new())
            }
            Statement::DropTable { name, if_exists } => {
                if !tx.writable() {
                    return Err(VellumError::TxReadOnly);
                }
                match catalog.drop_table(name) {
                    Ok(_) => Ok(Vec::new()),
                    Err(VellumError::TableNotFound(_)) if *if_exists => Ok(Vec::new()),
                    Err(e) => Err(e),
                }
            }
            Statement::DropIndex { name, if_exists } => {
                if !tx.writable() {
                    return Err(VellumError::TxReadOnly);
                }
                match catalog.drop_index(name) {
                    Ok(_) => Ok(Vec::new()),
                    Err(VellumError::IndexNotFound(_)) if *if_exists => Ok(Vec::new()),
                    Err(e) => Err(e),
                }
            }
            Statement::Reindex { name } => {
                if !tx.writable() {
                    return Err(VellumError::TxReadOnly);
                }
                catalog.reindex(name.as_deref())?;
                Ok(Vec::new())
            }
            Statement::Begin { .. } | Statement::Commit | Statement::Rollback => {
                Err(VellumError::Validation(
                    "transaction statements need a session".into(),
                ))
            }
        }
    }

    fn create_table(
        &self,
        catalog: &Catalog<'_>,
        stmt: &CreateTableStmt,
        params: &Arc<Params>,
    ) -> Result<(), VellumError> {
        let env = Environment::new(params.clone());
        let mut constraints = Vec::with_capacity(stmt.fields.len());
        let mut has_primary_key = false;
        for field in &stmt.fields {
            if field.primary_key {
                if has_primary_key {
                    return Err(VellumError::Validation(
                        "a table can declare at most one primary key".into(),
                    ));
                }
                has_primary_key = true;
            }
            let default_value = match &field.default_value {
                Some(expr) => Some(stream::expr::eval_expr(expr, &env)?),
                None => None,
            };
            constraints.push(FieldConstraint {
                path: field.path.clone(),
                kind: field.kind,
                primary_key: field.primary_key,
                not_null: field.not_null,
                default_value,
            });
        }
        match catalog.create_table(TableInfo::new(&stmt.name, constraints)) {
            Ok(_) => Ok(()),
            Err(VellumError::TableExists(_)) if stmt.if_not_exists => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn create_index(
        &self,
        catalog: &Catalog<'_>,
        stmt: &CreateIndexStmt,
    ) -> Result<(), VellumError> {
        // A typed constraint on the indexed path types the index.
        let table = catalog.get_table(&stmt.table)?;
        let kind = table
            .field_constraints
            .iter()
            .find(|c| c.path == stmt.path)
            .and_then(|c| c.kind);
        let info = IndexInfo {
            name: stmt.name.clone(),
            table: stmt.table.clone(),
            path: stmt.path.clone(),
            unique: stmt.unique,
            kind,
            seq: 0,
        };
        match catalog.create_index(info) {
            Ok(()) => Ok(()),
            Err(VellumError::IndexExists(_)) if stmt.if_not_exists => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn is_ddl(stmt: &Statement) -> bool {
    matches!(
        stmt,
        Statement::CreateTable(_)
            | Statement::CreateIndex(_)
            | Statement::DropTable { .. }
            | Statement::DropIndex { .. }
            | Statement::Reindex { .. }
    )
}

/// An explicit transaction. Dropping it without committing rolls back,
/// so exactly one of commit or rollback runs on every exit path.
pub struct Transaction<'db> {
    db: &'db Database,
    inner: Option<Box<dyn EngineTx + 'db>>,
    writable: bool,
    pending_ddl: bool,
}

impl<'db> Transaction<'db> {
    pub fn writable(&self) -> bool {
        self.writable
    }

    fn tx(&self) -> Result<&dyn EngineTx, VellumError> {
        self.inner
            .as_deref()
            .ok_or(VellumError::TxClosed)
            .map(|tx| tx as &dyn EngineTx)
    }

    /// Executes one statement inside this transaction. Errors propagate
    /// without rolling back; the caller decides the transaction's fate.
    pub fn exec(&mut self, sql: &str, params: Params) -> Result<usize, VellumError> {
        Ok(self.query(sql, params)?.len())
    }

    pub fn query(&mut self, sql: &str, params: Params) -> Result<Vec<FieldBuffer>, VellumError> {
        self.query_cancellable(sql, params, CancelFlag::none())
    }

    pub fn query_with_cancel(
        &mut self,
        sql: &str,
        params: Params,
        cancel: Arc<AtomicBool>,
    ) -> Result<Vec<FieldBuffer>, VellumError> {
        self.query_cancellable(sql, params, CancelFlag::new(cancel))
    }

    fn query_cancellable(
        &mut self,
        sql: &str,
        params: Params,
        cancel: CancelFlag,
    ) -> Result<Vec<FieldBuffer>, VellumError> {
        let stmt = sql::parse(sql)?;
        if matches!(
            stmt,
            Statement::Begin { .. } | Statement::Commit | Statement::Rollback
        ) {
            return Err(VellumError::Validation(
                "the transaction is managed through commit() and rollback()".into(),
            ));
        }
        let tx = self.tx()?;
        let result = self
            .db
            .run_statement(tx, &stmt, &Arc::new(params), &cancel);
        if result.is_ok() && is_ddl(&stmt) {
            self.pending_ddl = true;
        }
        result
    }

    pub fn commit(mut self) -> Result<(), VellumError> {
        let tx = self.inner.take().ok_or(VellumError::TxClosed)?;
        tx.commit()?;
        if self.pending_ddl {
            self.db.bump_catalog_version();
        }
        Ok(())
    }

    pub fn rollback(mut self) -> Result<(), VellumError> {
        let tx = self.inner.take().ok_or(VellumError::TxClosed)?;
        tx.rollback()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if let Some(tx) = self.inner.take()
            && let Err(e) = tx.rollback()
        {
            warn!(error = %e, "implicit rollback on drop");
        }
    }
}

/// A stateful SQL session: `BEGIN`, `COMMIT` and `ROLLBACK` statements
/// manage an owned transaction, everything else runs inside it (or in an
/// implicit per-statement transaction when none is open).
pub struct Session<'db> {
    db: &'db Database,
    current: Option<Transaction<'db>>,
}

impl<'db> Session<'db> {
    pub fn new(db: &'db Database) -> Session<'db> {
        Session { db, current: None }
    }

    pub fn in_transaction(&self) -> bool {
        self.current.is_some()
    }

    pub fn exec(&mut self, sql: &str, params: Params) -> Result<Vec<FieldBuffer>, VellumError> {
        match sql::parse(sql)? {
            Statement::Begin { writable } => {
                if self.current.is_some() {
                    return Err(VellumError::Validation(
                        "a transaction is already in progress".into(),
                    ));
                }
                self.current = Some(self.db.begin(writable)?);
                Ok(Vec::new())
            }
            Statement::Commit => match self.current.take() {
                Some(tx) => {
                    tx.commit()?;
                    Ok(Vec::new())
                }
                None => Err(VellumError::TxClosed),
            },
            Statement::Rollback => match self.current.take() {
                Some(tx) => {
                    tx.rollback()?;
                    Ok(Vec::new())
                }
                None => Err(VellumError::TxClosed),
            },
            stmt => match &mut self.current {
                Some(tx) => {
                    let inner = tx.tx()?;
                    let result = self.db.run_statement(
                        inner,
                        &stmt,
                        &Arc::new(params),
                        &CancelFlag::none(),
                    );
                    if result.is_ok() && is_ddl(&stmt) {
                        tx.pending_ddl = true;
                    }
                    result
                }
                None => self
                    .db
                    .run_parsed_implicit(&stmt, None, params, CancelFlag::none()),
            },
        }
    }
}
