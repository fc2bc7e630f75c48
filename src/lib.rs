//! A single-file embeddable relational database engine: a page-based
//! store with b-tree indexes, a rollback journal for crash recovery,
//! shared/reserved/exclusive file locking for cross-process isolation,
//! and a SQL front end executed one tuple at a time.
//!
//! System layers, leaves first:
//! * `pager` (with `dbheader`, `journal`, `locking`) presents the file as
//!   an array of fixed-size pages under a transaction.
//! * `btree` keeps key-ordered maps on those pages: one tree per table,
//!   one per secondary index.
//! * `catalog` and `record` describe tables and encode rows and keys.
//! * `parser`/`pt_to_ast`/`ast` turn SQL text into a syntax tree,
//!   `ast_to_ir` plans it, `ir_interpreter` executes it against `table`.
//! * `connection` ties the layers together behind the public query API;
//!   the REPL in `main` sits on top of that.

mod ast;
mod ast_to_ir;
mod btree;
mod catalog;
mod connection;
mod dbheader;
pub mod errors;
pub mod formatting;
mod ir;
mod ir_interpreter;
mod journal;
mod locking;
pub mod pager;
mod parser;
mod pt_to_ast;
mod record;
mod sql_type;
mod sql_value;
mod table;
mod typed_row;

extern crate pest;
#[macro_use]
extern crate pest_derive;

pub use connection::{Connection, QueryResult, StatementResult, TxnState};
pub use errors::{Error, Result};
pub use sql_type::SqlType;
pub use sql_value::SqlValue;
pub use typed_row::Row;
