//! Statement dispatcher and the cursor pipeline.
//!
//! [`Executor::execute`] parses a statement, detects the target's storage
//! format, validates any attached transaction against the table's current
//! schema, and routes to the matching execution path. Results come back as
//! [`SqlResult`]; dropping one closes the whole cursor chain.

pub mod cursor;
mod dml;
mod groupby;
mod meta_ops;
mod pool;
mod result;
mod select;

pub use cursor::{Projection, RowCursor};
pub use pool::{TableHandle, TablePool};
pub use result::SqlResult;

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::core::EngineError;
use crate::files::FileFormat;
use crate::parser::{parse_statement, Query, StatementKind};
use crate::txn::Transaction;

pub struct Executor {
    pool: Arc<TablePool>,
}

impl Executor {
    /// The pool is injected so concurrent executors over the same process
    /// share open tables; construct one pool per process.
    pub fn new(pool: Arc<TablePool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<TablePool> {
        &self.pool
    }

    /// Execute one SQL statement. A transaction returned by BEGIN rides on
    /// the result; pass it back in for statements that should run under it.
    pub fn execute(
        &self,
        sql: &str,
        transaction: Option<Transaction>,
    ) -> Result<SqlResult, EngineError> {
        let q = parse_statement(sql)?;
        debug!(kind = ?q.kind(), table = %q.table, "dispatch");

        // Statements without a target table.
        match q.kind() {
            StatementKind::ShowTables => return meta_ops::show_tables(&q),
            StatementKind::Commit => return self.finish_transaction(transaction, true),
            StatementKind::Rollback => return self.finish_transaction(transaction, false),
            _ => {}
        }

        if q.table.is_empty() {
            return Err(EngineError::Parse(format!(
                "statement requires a table: {sql}"
            )));
        }
        let fmt = FileFormat::detect(&q.table);
        if fmt == FileFormat::Unknown {
            return Err(EngineError::NotSupported(format!(
                "unable to detect file format for table: {}",
                q.table
            )));
        }

        // A stale transaction must not touch the table.
        if let Some(txn) = &transaction {
            if fmt == FileFormat::Flint {
                txn.validate()?;
            }
        }

        let mut keep_txn = transaction;
        let mut result = match q.kind() {
            StatementKind::Select if q.into.is_some() => Err(EngineError::NotSupported(
                "SELECT ... INTO not yet implemented, use INSERT ... FROM instead".into(),
            )),
            StatementKind::Select => {
                if fmt == FileFormat::Flint {
                    select::select_table(self, &q)
                } else {
                    select::select_file(&q)
                }
            }
            StatementKind::Insert | StatementKind::Replace => {
                if q.from.is_some() {
                    dml::insert_from(self, &q).map(SqlResult::affected)
                } else if fmt != FileFormat::Flint {
                    Err(EngineError::NotSupported(format!(
                        "INSERT operation not supported for read-only file formats, {}",
                        q.table
                    )))
                } else {
                    dml::insert(self, &q).map(SqlResult::affected)
                }
            }
            StatementKind::Update => {
                self.require_binary(fmt, "UPDATE", &q)?;
                dml::update(self, &q).map(SqlResult::affected)
            }
            StatementKind::Delete => {
                self.require_binary(fmt, "DELETE", &q)?;
                dml::delete(self, &q).map(SqlResult::affected)
            }
            StatementKind::Create => dml::create(&q).map(SqlResult::affected),
            StatementKind::Drop => dml::drop_table(&q).map(SqlResult::affected),
            StatementKind::Alter => Err(EngineError::NotSupported(
                "ALTER TABLE not yet supported. Modify the .desc descriptor manually and rebuild indexes".into(),
            )),
            StatementKind::Describe => meta_ops::describe(self, &q),
            StatementKind::Meta => meta_ops::meta_info(self, &q),
            StatementKind::Begin => {
                // BEGIN replaces any transaction already in flight.
                keep_txn = None;
                self.begin_transaction(&q)
            }
            StatementKind::ShowTables
            | StatementKind::Commit
            | StatementKind::Rollback => unreachable!("handled above"),
        }?;

        if result.transaction.is_none() {
            result.transaction = keep_txn;
        }
        Ok(result)
    }

    fn require_binary(
        &self,
        fmt: FileFormat,
        op: &str,
        q: &Query,
    ) -> Result<(), EngineError> {
        if fmt == FileFormat::Flint {
            Ok(())
        } else {
            Err(EngineError::NotSupported(format!(
                "{op} operation not supported for read-only file formats, {}",
                q.table
            )))
        }
    }

    fn begin_transaction(&self, q: &Query) -> Result<SqlResult, EngineError> {
        if q.table.is_empty() {
            return Err(EngineError::Parse(
                "table name required for BEGIN TRANSACTION".into(),
            ));
        }
        let handle = self.pool.borrow(Path::new(&q.table))?;
        let mut result = SqlResult::affected(1);
        result.transaction = Some(Transaction::begin(handle));
        Ok(result)
    }

    fn finish_transaction(
        &self,
        transaction: Option<Transaction>,
        commit: bool,
    ) -> Result<SqlResult, EngineError> {
        let Some(txn) = transaction else {
            return Err(EngineError::Execution(
                "no active transaction".into(),
            ));
        };
        if commit {
            txn.commit()?;
        } else {
            txn.rollback()?;
        }
        Ok(SqlResult::affected(1))
    }
}
