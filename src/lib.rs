//! flintdb: an embedded SQL query engine over binary tables and flat
//! row-oriented files (CSV/TSV/JSONL).
//!
//! A statement executes through a lazily-iterated cursor pipeline: a
//! storage or file scan with the residual predicate applied inline, then
//! projection, DISTINCT, GROUP BY/aggregation, external sort, and
//! offset/limit governance. Concurrent statements against the same file
//! share one open table through a reference-counted handle pool.
//!
//! ```no_run
//! use std::sync::Arc;
//! use flintdb::{Executor, TablePool};
//!
//! let pool = Arc::new(TablePool::new());
//! let exec = Executor::new(pool);
//! exec.execute("CREATE TABLE t.flintdb (id INT, qty INT, PRIMARY KEY (id))", None)?;
//! exec.execute("INSERT INTO t.flintdb VALUES (1, 10)", None)?;
//! let mut result = exec.execute("SELECT qty FROM t.flintdb WHERE id = 1", None)?;
//! while let Some(row) = result.next_row()? {
//!     println!("{}", row.display_value(0));
//! }
//! # Ok::<(), flintdb::EngineError>(())
//! ```

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

// Value/row/schema model and the error taxonomy
pub mod core;

// WHERE-clause predicate compiler and index split
pub mod filter;

// OFFSET/LIMIT governor shared by every cursor stage
pub mod limit;

// SQL statement parsing (statement kind + clause strings)
pub mod parser;

// Binary table storage engine
pub mod storage;

// Flat-file codecs behind the format registry
pub mod files;

// External (disk-spilling) sort
pub mod sort;

// GROUP BY / aggregation engine
pub mod aggregate;

// Transactions (schema-snapshot validation, commit/rollback)
pub mod txn;

// Statement dispatcher, cursor pipeline, table-handle pool
pub mod exec;

pub use crate::core::{Column, DataType, EngineError, IndexDef, Row, Schema, Value};
pub use exec::{Executor, RowCursor, SqlResult, TableHandle, TablePool};
pub use filter::{best_index, Filter, FilterLayers};
pub use limit::Limit;
pub use parser::{parse_statement, Query, StatementKind};
pub use sort::{cleanup_temp_dir, Filesort};
pub use txn::Transaction;
