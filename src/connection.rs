//! One open database connection: it owns the pager, the lock dance, and
//! the schema dictionary.  No module-level state; multiple connections in
//! one process are independent.
//!
//! The connection drives the transaction state machine:
//!
//! ```text
//! IDLE ──BEGIN──▶ IN_TXN ──COMMIT/ROLLBACK──▶ IDLE
//! IDLE ──auto stmt──▶ IDLE   (implicit begin + commit)
//! IN_TXN ──IO/CORRUPT──▶ ABORTED ──ROLLBACK──▶ IDLE
//! ```
//!
//! Every statement outside an explicit transaction is wrapped:
//! begin, execute, commit on success, rollback on error.  In ABORTED only
//! ROLLBACK is accepted.  A connection dropped with an open transaction
//! rolls it back.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::ast;
use crate::ast_to_ir::{self, lower_expr, plan_select, table_out_cols};
use crate::catalog::Catalog;
use crate::errors::{Error, Result};
use crate::ir_interpreter::{eval_expr, eval_predicate, run_block, ExecCtx};
use crate::locking::DEFAULT_BUSY_TIMEOUT;
use crate::pager::Pager;
use crate::record::encode_pk_key;
use crate::sql_value::SqlValue;
use crate::table::Table;
use crate::typed_row::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Idle,
    InTxn,
    Aborted,
}

/// What one statement produced.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    /// SELECT output.
    Rows(QueryResult),
    /// INSERT/UPDATE/DELETE row count.
    Affected(usize),
    /// DDL and transaction control.
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub col_names: Vec<String>,
    pub rows: Vec<Row>,
}

pub struct Connection {
    pager: Pager,
    catalog: RefCell<Catalog>,
    state: TxnState,
}

impl Connection {
    pub fn open(path: &Path) -> Result<Connection> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_timeout(path: &Path, busy_timeout: Duration) -> Result<Connection> {
        let pager = Pager::open(path, busy_timeout)?;
        Ok(Connection {
            pager,
            catalog: RefCell::new(Catalog::empty()),
            state: TxnState::Idle,
        })
    }

    pub fn set_busy_timeout(&self, busy_timeout: Duration) {
        self.pager.set_busy_timeout(busy_timeout);
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Parses and executes one SQL statement.
    pub fn exec(&mut self, sql: &str) -> Result<StatementResult> {
        let stmt = crate::pt_to_ast::parse_statement(sql)?;
        if self.state == TxnState::Aborted && stmt != ast::Statement::Rollback {
            return Err(Error::schema(
                "transaction was aborted; only ROLLBACK is accepted",
            ));
        }
        match stmt {
            ast::Statement::Begin => self.exec_begin(),
            ast::Statement::Commit => self.exec_commit(),
            ast::Statement::Rollback => self.exec_rollback(),
            stmt => self.exec_wrapped(stmt),
        }
    }

    fn exec_begin(&mut self) -> Result<StatementResult> {
        if self.state != TxnState::Idle {
            return Err(Error::schema("already in a transaction"));
        }
        if let Err(e) = self.begin_statement() {
            let _ = self.pager.end_read();
            return Err(e);
        }
        self.state = TxnState::InTxn;
        Ok(StatementResult::Done)
    }

    fn exec_commit(&mut self) -> Result<StatementResult> {
        if self.state != TxnState::InTxn {
            return Err(Error::schema("no transaction is active"));
        }
        match self.pager.commit() {
            Ok(()) => {
                self.state = TxnState::Idle;
                Ok(StatementResult::Done)
            }
            // BUSY leaves the transaction open for retry; harder failures
            // poison it.
            Err(Error::Busy) => Err(Error::Busy),
            Err(e) => {
                if e.poisons_transaction() {
                    self.state = TxnState::Aborted;
                }
                Err(e)
            }
        }
    }

    fn exec_rollback(&mut self) -> Result<StatementResult> {
        if self.state == TxnState::Idle {
            return Err(Error::schema("no transaction is active"));
        }
        self.pager.rollback()?;
        self.state = TxnState::Idle;
        Ok(StatementResult::Done)
    }

    /// Runs a non-transaction-control statement with auto-commit
    /// wrapping when no explicit transaction is open.
    fn exec_wrapped(&mut self, stmt: ast::Statement) -> Result<StatementResult> {
        let auto = self.state == TxnState::Idle;
        if let Err(e) = self.begin_statement() {
            if auto {
                let _ = self.pager.end_read();
            }
            return Err(e);
        }
        let is_write = !matches!(stmt, ast::Statement::Select(_));
        if is_write {
            if let Err(e) = self.pager.begin_write() {
                if auto {
                    let _ = self.pager.end_read();
                }
                return Err(e);
            }
        }
        let result = self.dispatch(&stmt);
        match result {
            Ok(r) => {
                if auto {
                    if is_write {
                        match self.pager.commit() {
                            Ok(()) => {}
                            Err(e) => {
                                // Auto-commit atomicity: all or nothing.
                                let _ = self.pager.rollback();
                                return Err(e);
                            }
                        }
                    } else {
                        self.pager.end_read()?;
                    }
                }
                Ok(r)
            }
            Err(e) => {
                if auto {
                    if is_write {
                        let _ = self.pager.rollback();
                    } else {
                        let _ = self.pager.end_read();
                    }
                } else if e.poisons_transaction() {
                    self.state = TxnState::Aborted;
                }
                Err(e)
            }
        }
    }

    /// Acquires SHARED and refreshes the schema dictionary if another
    /// connection's DDL moved the schema counter.
    fn begin_statement(&self) -> Result<()> {
        self.pager.begin_read()?;
        if self.catalog.borrow().is_stale(&self.pager) {
            log::debug!("schema counter moved; reloading catalog");
            let reloaded = Catalog::load(&self.pager)?;
            *self.catalog.borrow_mut() = reloaded;
        }
        Ok(())
    }

    fn dispatch(&self, stmt: &ast::Statement) -> Result<StatementResult> {
        match stmt {
            ast::Statement::Select(ss) => self.exec_select(ss),
            ast::Statement::Insert(ins) => self.exec_insert(ins),
            ast::Statement::Update(upd) => self.exec_update(upd),
            ast::Statement::Delete(del) => self.exec_delete(del),
            ast::Statement::CreateTable(ct) => {
                self.catalog.borrow_mut().create_table(&self.pager, ct)?;
                Ok(StatementResult::Done)
            }
            ast::Statement::CreateIndex(ci) => {
                self.catalog.borrow_mut().create_index(&self.pager, ci)?;
                Ok(StatementResult::Done)
            }
            ast::Statement::DropTable(d) => {
                self.catalog.borrow_mut().drop_table(&self.pager, &d.name)?;
                Ok(StatementResult::Done)
            }
            ast::Statement::DropIndex(d) => {
                self.catalog.borrow_mut().drop_index(&self.pager, &d.name)?;
                Ok(StatementResult::Done)
            }
            ast::Statement::Begin | ast::Statement::Commit | ast::Statement::Rollback => {
                Err(Error::internal("transaction control reached dispatch"))
            }
        }
    }

    fn exec_select(&self, ss: &ast::SelectStatement) -> Result<StatementResult> {
        let catalog = self.catalog.borrow();
        let plan = plan_select(&catalog, ss)?;
        log::debug!("plan: {}", plan.block.describe());
        let mut ctx = ExecCtx::new(&self.pager, &catalog);
        let rows = run_block(&plan.block, &mut ctx)?;
        Ok(StatementResult::Rows(QueryResult {
            col_names: plan.col_names,
            rows,
        }))
    }

    fn exec_insert(&self, ins: &ast::InsertStatement) -> Result<StatementResult> {
        let catalog = self.catalog.borrow();
        let schema = catalog.table(&ins.tablename)?.clone();
        let table = Table::new(&self.pager, schema);
        let pk_col = table.schema().pk_col();

        // Validate the whole batch before touching the tree, so a bad row
        // in a multi-row INSERT leaves nothing behind even inside an
        // explicit transaction.
        let mut rows = vec![];
        let mut batch_pks = HashSet::new();
        for constants in &ins.values {
            let row = Row::new(constants.iter().map(constant_to_value).collect());
            table.validate_row(&row)?;
            let pk = &row.items[pk_col];
            if !batch_pks.insert(encode_pk_key(pk)?) || table.get_by_pk(pk)?.is_some() {
                return Err(Error::constraint(format!(
                    "duplicate primary key {} in table {}",
                    pk, ins.tablename
                )));
            }
            rows.push(row);
        }
        for row in &rows {
            table.insert_row(row)?;
        }
        Ok(StatementResult::Affected(rows.len()))
    }

    fn exec_update(&self, upd: &ast::UpdateStatement) -> Result<StatementResult> {
        let catalog = self.catalog.borrow();
        let schema = catalog.table(&upd.tablename)?.clone();
        let cols = table_out_cols(&schema, &upd.tablename);
        let pred = match &upd.where_expr {
            Some(e) => Some(lower_expr(e, &cols)?),
            None => None,
        };
        let mut assignments = vec![];
        for (col, expr) in &upd.assignments {
            let idx = ast_to_ir::resolve_column(col, &cols)?;
            assignments.push((idx, lower_expr(expr, &cols)?));
        }
        let table = Table::new(&self.pager, schema);
        let pk_col = table.schema().pk_col();

        // Materialize matching rows first: the scan cursor must not see
        // its own writes, and validation wants the whole set anyway.
        let mut changes: Vec<(SqlValue, Row)> = vec![];
        let mut scan = table.scan()?;
        while let Some(row) = scan.next_row()? {
            if let Some(pred) = &pred {
                if !eval_predicate(pred, &row)? {
                    continue;
                }
            }
            let mut new_row = row.clone();
            for (idx, expr) in &assignments {
                new_row.items[*idx] = eval_expr(expr, &row)?;
            }
            table.validate_row(&new_row)?;
            changes.push((row.items[pk_col].clone(), new_row));
        }

        // Check pk collisions against the post-statement state: a new pk
        // may only collide with a row that this statement removes.
        let old_pks: HashSet<Vec<u8>> = changes
            .iter()
            .map(|(pk, _)| encode_pk_key(pk))
            .collect::<Result<_>>()?;
        let mut new_pks = HashSet::new();
        for (_, new_row) in &changes {
            let new_pk = &new_row.items[pk_col];
            let key = encode_pk_key(new_pk)?;
            if !new_pks.insert(key.clone()) {
                return Err(Error::constraint(format!(
                    "duplicate primary key {} in table {}",
                    new_pk, upd.tablename
                )));
            }
            if !old_pks.contains(&key) && table.get_by_pk(new_pk)?.is_some() {
                return Err(Error::constraint(format!(
                    "duplicate primary key {} in table {}",
                    new_pk, upd.tablename
                )));
            }
        }

        // Delete-all then insert-all so pk rotations cannot collide
        // transiently.
        for (old_pk, _) in &changes {
            if !table.delete_by_pk(old_pk)? {
                return Err(Error::internal("updated row vanished mid-statement"));
            }
        }
        for (_, new_row) in &changes {
            table.insert_row(new_row)?;
        }
        Ok(StatementResult::Affected(changes.len()))
    }

    fn exec_delete(&self, del: &ast::DeleteStatement) -> Result<StatementResult> {
        let catalog = self.catalog.borrow();
        let schema = catalog.table(&del.tablename)?.clone();
        let cols = table_out_cols(&schema, &del.tablename);
        let pred = match &del.where_expr {
            Some(e) => Some(lower_expr(e, &cols)?),
            None => None,
        };
        let table = Table::new(&self.pager, schema);
        let pk_col = table.schema().pk_col();

        let mut pks = vec![];
        let mut scan = table.scan()?;
        while let Some(row) = scan.next_row()? {
            if let Some(pred) = &pred {
                if !eval_predicate(pred, &row)? {
                    continue;
                }
            }
            pks.push(row.items[pk_col].clone());
        }
        for pk in &pks {
            if !table.delete_by_pk(pk)? {
                return Err(Error::internal("deleted row vanished mid-statement"));
            }
        }
        Ok(StatementResult::Affected(pks.len()))
    }

    /// User tables, for the REPL's `.tables`.
    pub fn table_names(&mut self) -> Result<Vec<String>> {
        let auto = self.state == TxnState::Idle;
        if let Err(e) = self.begin_statement() {
            if auto {
                let _ = self.pager.end_read();
            }
            return Err(e);
        }
        let names = self.catalog.borrow().table_names();
        if auto {
            self.pager.end_read()?;
        }
        Ok(names)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // The pager rolls back any open write transaction on drop; here
        // we only log the implied rollback of an explicit transaction.
        if self.state != TxnState::Idle {
            log::debug!("connection closed with an open transaction; rolling back");
        }
    }
}

fn constant_to_value(c: &ast::Constant) -> SqlValue {
    match c {
        ast::Constant::Int(i) => SqlValue::Int(*i),
        ast::Constant::String(s) => SqlValue::Str(s.clone()),
        ast::Constant::Null => SqlValue::Null,
    }
}
