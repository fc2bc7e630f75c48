//! Executes SQL intermediate representation (IR).
//!
//! Pull-based: every operator exposes `next`, returning the next output
//! row or end-of-stream.  Blocking operators (HashAggregate, Sort, the
//! right side of a nested-loop join, CTE materialization) drain their
//! input when opened; everything else streams.

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{AggFunc, CompOp, JoinKind};
use crate::catalog::Catalog;
use crate::errors::{Error, Result};
use crate::ir;
use crate::pager::Pager;
use crate::sql_value::{arith, cmp_for_sort, cmp_values, SqlValue};
use crate::table::{IndexPkScan, RowScan, Table};
use crate::typed_row::Row;

/// Per-statement execution context: the storage handles plus CTEs
/// materialized so far.
pub struct ExecCtx<'p> {
    pub pager: &'p Pager,
    pub catalog: &'p Catalog,
    ctes: HashMap<String, Rc<Vec<Row>>>,
}

impl<'p> ExecCtx<'p> {
    pub fn new(pager: &'p Pager, catalog: &'p Catalog) -> ExecCtx<'p> {
        ExecCtx {
            pager,
            catalog,
            ctes: HashMap::new(),
        }
    }
}

/// Runs a block to completion and collects its output.
pub fn run_block(block: &ir::Block, ctx: &mut ExecCtx<'_>) -> Result<Vec<Row>> {
    let mut exec = open_block(block, ctx)?;
    let mut rows = vec![];
    while let Some(row) = exec.next(ctx)? {
        rows.push(row);
    }
    Ok(rows)
}

/// One volcano operator with its runtime state.
pub enum Exec<'p> {
    /// Pre-computed output (ConstantRow, HashAggregate, Sort).
    Rows(std::vec::IntoIter<Row>),
    SeqScan(RowScan<'p>),
    IndexScan {
        table: Table<'p>,
        scan: IndexPkScan<'p>,
    },
    CteScan {
        rows: Rc<Vec<Row>>,
        pos: usize,
    },
    Filter {
        pred: ir::Expr,
        input: Box<Exec<'p>>,
    },
    NestedLoopJoin {
        left: Box<Exec<'p>>,
        right_rows: Vec<Row>,
        pred: ir::Expr,
        kind: JoinKind,
        right_width: usize,
        current: Option<Row>,
        right_pos: usize,
        matched: bool,
    },
    Project {
        exprs: Vec<ir::Expr>,
        input: Box<Exec<'p>>,
    },
}

pub fn open_block<'p>(block: &ir::Block, ctx: &mut ExecCtx<'p>) -> Result<Exec<'p>> {
    match block {
        ir::Block::ConstantRow { exprs } => {
            let empty = Row::new(vec![]);
            let items = exprs
                .iter()
                .map(|e| eval_expr(e, &empty))
                .collect::<Result<Vec<_>>>()?;
            Ok(Exec::Rows(vec![Row::new(items)].into_iter()))
        }
        ir::Block::SeqScan { table } => {
            let schema = ctx.catalog.table(table)?.clone();
            let handle = Table::new(ctx.pager, schema);
            Ok(Exec::SeqScan(handle.scan()?))
        }
        ir::Block::IndexScan {
            table,
            index,
            lo,
            hi,
        } => {
            let schema = ctx.catalog.table(table)?.clone();
            let ix = schema
                .indexes
                .iter()
                .find(|ix| ix.name == *index)
                .ok_or_else(|| Error::internal(format!("planned index {} missing", index)))?
                .clone();
            let handle = Table::new(ctx.pager, schema);
            let scan = handle.index_pk_scan(ix.root_page, lo.clone(), hi.clone())?;
            Ok(Exec::IndexScan {
                table: handle,
                scan,
            })
        }
        ir::Block::CteScan { name } => {
            let rows = ctx
                .ctes
                .get(name)
                .cloned()
                .ok_or_else(|| Error::internal(format!("CTE {} not materialized", name)))?;
            Ok(Exec::CteScan { rows, pos: 0 })
        }
        ir::Block::CteMaterialize { name, plan, body } => {
            let rows = run_block(plan, ctx)?;
            ctx.ctes.insert(name.clone(), Rc::new(rows));
            open_block(body, ctx)
        }
        ir::Block::Filter { pred, input } => Ok(Exec::Filter {
            pred: pred.clone(),
            input: Box::new(open_block(input, ctx)?),
        }),
        ir::Block::NestedLoopJoin {
            left,
            right,
            pred,
            kind,
            right_width,
        } => {
            let left_exec = open_block(left, ctx)?;
            let right_rows = run_block(right, ctx)?;
            Ok(Exec::NestedLoopJoin {
                left: Box::new(left_exec),
                right_rows,
                pred: pred.clone(),
                kind: *kind,
                right_width: *right_width,
                current: None,
                right_pos: 0,
                matched: false,
            })
        }
        ir::Block::HashAggregate {
            group_cols,
            aggs,
            input,
        } => {
            let rows = run_aggregate(group_cols, aggs, input, ctx)?;
            Ok(Exec::Rows(rows.into_iter()))
        }
        ir::Block::Sort { keys, input } => {
            let mut rows = run_block(input, ctx)?;
            sort_rows(&mut rows, keys)?;
            Ok(Exec::Rows(rows.into_iter()))
        }
        ir::Block::Project { exprs, input } => Ok(Exec::Project {
            exprs: exprs.clone(),
            input: Box::new(open_block(input, ctx)?),
        }),
    }
}

impl<'p> Exec<'p> {
    pub fn next(&mut self, ctx: &mut ExecCtx<'p>) -> Result<Option<Row>> {
        match self {
            Exec::Rows(iter) => Ok(iter.next()),
            Exec::SeqScan(scan) => scan.next_row(),
            Exec::IndexScan { table, scan } => loop {
                let Some(pk) = scan.next_pk()? else {
                    return Ok(None);
                };
                match table.get_by_pk(&pk)? {
                    Some(row) => return Ok(Some(row)),
                    None => {
                        return Err(Error::corrupt(format!(
                            "index entry points at missing pk {}",
                            pk
                        )))
                    }
                }
            },
            Exec::CteScan { rows, pos } => {
                let row = rows.get(*pos).cloned();
                *pos += 1;
                Ok(row)
            }
            Exec::Filter { pred, input } => loop {
                let Some(row) = input.next(ctx)? else {
                    return Ok(None);
                };
                if eval_predicate(pred, &row)? {
                    return Ok(Some(row));
                }
            },
            Exec::NestedLoopJoin {
                left,
                right_rows,
                pred,
                kind,
                right_width,
                current,
                right_pos,
                matched,
            } => loop {
                if current.is_none() {
                    match left.next(ctx)? {
                        None => return Ok(None),
                        Some(row) => {
                            *current = Some(row);
                            *right_pos = 0;
                            *matched = false;
                        }
                    }
                }
                let left_row = current.as_ref().expect("just set");
                while *right_pos < right_rows.len() {
                    let candidate = left_row.concat(&right_rows[*right_pos]);
                    *right_pos += 1;
                    if eval_predicate(pred, &candidate)? {
                        *matched = true;
                        return Ok(Some(candidate));
                    }
                }
                // Right side exhausted for this left row.
                if *kind == JoinKind::Left && !*matched {
                    let mut padded = left_row.clone();
                    padded
                        .items
                        .extend(std::iter::repeat(SqlValue::Null).take(*right_width));
                    *current = None;
                    return Ok(Some(padded));
                }
                *current = None;
            },
            Exec::Project { exprs, input } => {
                let Some(row) = input.next(ctx)? else {
                    return Ok(None);
                };
                let items = exprs
                    .iter()
                    .map(|e| eval_expr(e, &row))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Some(Row::new(items)))
            }
        }
    }
}

// ----- expressions -----

pub fn eval_expr(expr: &ir::Expr, row: &Row) -> Result<SqlValue> {
    match expr {
        ir::Expr::Const(v) => Ok(v.clone()),
        ir::Expr::Col(i) => row
            .items
            .get(*i)
            .cloned()
            .ok_or_else(|| Error::internal(format!("column {} out of range", i))),
        ir::Expr::Comparison { lhs, op, rhs } => {
            let a = eval_expr(lhs, row)?;
            let b = eval_expr(rhs, row)?;
            match cmp_values(&a, &b)? {
                // A comparison against NULL is NULL, which no WHERE treats
                // as a match.
                None => Ok(SqlValue::Null),
                Some(ord) => {
                    let matched = match op {
                        CompOp::Eq => ord == std::cmp::Ordering::Equal,
                        CompOp::Ne => ord != std::cmp::Ordering::Equal,
                        CompOp::Lt => ord == std::cmp::Ordering::Less,
                        CompOp::Le => ord != std::cmp::Ordering::Greater,
                        CompOp::Gt => ord == std::cmp::Ordering::Greater,
                        CompOp::Ge => ord != std::cmp::Ordering::Less,
                    };
                    Ok(SqlValue::Int(matched as i64))
                }
            }
        }
        ir::Expr::Arith { lhs, op, rhs } => {
            let a = eval_expr(lhs, row)?;
            let b = eval_expr(rhs, row)?;
            arith(*op, &a, &b)
        }
        ir::Expr::And(a, b) => {
            let left = truthy(&eval_expr(a, row)?)?;
            if !left {
                return Ok(SqlValue::Int(0));
            }
            Ok(SqlValue::Int(truthy(&eval_expr(b, row)?)? as i64))
        }
        ir::Expr::Or(a, b) => {
            let left = truthy(&eval_expr(a, row)?)?;
            if left {
                return Ok(SqlValue::Int(1));
            }
            Ok(SqlValue::Int(truthy(&eval_expr(b, row)?)? as i64))
        }
        ir::Expr::Not(e) => Ok(SqlValue::Int(!truthy(&eval_expr(e, row)?)? as i64)),
    }
}

pub fn eval_predicate(expr: &ir::Expr, row: &Row) -> Result<bool> {
    truthy(&eval_expr(expr, row)?)
}

fn truthy(v: &SqlValue) -> Result<bool> {
    match v {
        SqlValue::Null => Ok(false),
        SqlValue::Int(i) => Ok(*i != 0),
        SqlValue::Real(f) => Ok(*f != 0.0),
        SqlValue::Str(_) => Err(Error::type_err("expected a boolean condition, got STR")),
    }
}

// ----- aggregation -----

enum AggState {
    Count(i64),
    Sum { sum: i64, seen: bool },
    Avg { sum: i64, n: i64 },
    Min(Option<SqlValue>),
    Max(Option<SqlValue>),
}

impl AggState {
    fn new(func: AggFunc) -> AggState {
        match func {
            AggFunc::Count => AggState::Count(0),
            AggFunc::Sum => AggState::Sum { sum: 0, seen: false },
            AggFunc::Avg => AggState::Avg { sum: 0, n: 0 },
            AggFunc::Min => AggState::Min(None),
            AggFunc::Max => AggState::Max(None),
        }
    }

    /// Feeds one value.  `None` means `COUNT(*)`, which counts every row
    /// including NULLs; all other aggregates skip NULLs.
    fn update(&mut self, value: Option<SqlValue>) -> Result<()> {
        match (self, value) {
            (AggState::Count(n), None) => *n += 1,
            (AggState::Count(n), Some(v)) => {
                if !v.is_null() {
                    *n += 1;
                }
            }
            (_, None) => return Err(Error::internal("only COUNT takes *")),
            (AggState::Sum { .. } | AggState::Avg { .. }, Some(SqlValue::Null)) => {}
            (AggState::Sum { sum, seen }, Some(SqlValue::Int(i))) => {
                *sum = sum.wrapping_add(i);
                *seen = true;
            }
            (AggState::Avg { sum, n }, Some(SqlValue::Int(i))) => {
                *sum = sum.wrapping_add(i);
                *n += 1;
            }
            (AggState::Sum { .. } | AggState::Avg { .. }, Some(v)) => {
                return Err(Error::type_err(format!(
                    "SUM/AVG need INT values, got {}",
                    v.type_name()
                )));
            }
            (AggState::Min(cur) | AggState::Max(cur), Some(v)) if cur.is_none() => {
                if !v.is_null() {
                    *cur = Some(v);
                }
            }
            (AggState::Min(cur), Some(v)) => {
                if !v.is_null() {
                    let best = cur.as_ref().expect("checked above");
                    if cmp_values(&v, best)? == Some(std::cmp::Ordering::Less) {
                        *cur = Some(v);
                    }
                }
            }
            (AggState::Max(cur), Some(v)) => {
                if !v.is_null() {
                    let best = cur.as_ref().expect("checked above");
                    if cmp_values(&v, best)? == Some(std::cmp::Ordering::Greater) {
                        *cur = Some(v);
                    }
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> SqlValue {
        match self {
            AggState::Count(n) => SqlValue::Int(n),
            AggState::Sum { sum, seen } => {
                if seen {
                    SqlValue::Int(sum)
                } else {
                    SqlValue::Null
                }
            }
            AggState::Avg { sum, n } => {
                if n == 0 {
                    SqlValue::Null
                } else {
                    SqlValue::Real(sum as f64 / n as f64)
                }
            }
            AggState::Min(v) | AggState::Max(v) => v.unwrap_or(SqlValue::Null),
        }
    }
}

fn run_aggregate(
    group_cols: &[usize],
    aggs: &[ir::AggSpec],
    input: &ir::Block,
    ctx: &mut ExecCtx<'_>,
) -> Result<Vec<Row>> {
    let mut exec = open_block(input, ctx)?;
    // Groups keyed by the encoding of their group values; insertion order
    // kept so output is deterministic.
    let mut groups: HashMap<Vec<u8>, (Vec<SqlValue>, Vec<AggState>)> = HashMap::new();
    let mut order: Vec<Vec<u8>> = vec![];

    if group_cols.is_empty() {
        // A lone aggregate has exactly one group, present even when the
        // input is empty.
        groups.insert(
            vec![],
            (vec![], aggs.iter().map(|a| AggState::new(a.func)).collect()),
        );
        order.push(vec![]);
    }

    while let Some(row) = exec.next(ctx)? {
        let mut key_vals = Vec::with_capacity(group_cols.len());
        for c in group_cols {
            key_vals.push(
                row.items
                    .get(*c)
                    .cloned()
                    .ok_or_else(|| Error::internal("group column out of range"))?,
            );
        }
        let key = group_key(&key_vals);
        let entry = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            (
                key_vals.clone(),
                aggs.iter().map(|a| AggState::new(a.func)).collect(),
            )
        });
        for (state, spec) in entry.1.iter_mut().zip(aggs) {
            let value = match &spec.arg {
                None => None,
                Some(e) => Some(eval_expr(e, &row)?),
            };
            state.update(value)?;
        }
    }

    let mut out = Vec::with_capacity(order.len());
    for key in order {
        let (key_vals, states) = groups
            .remove(&key)
            .ok_or_else(|| Error::internal("group vanished"))?;
        let mut items = key_vals;
        items.extend(states.into_iter().map(AggState::finish));
        out.push(Row::new(items));
    }
    Ok(out)
}

/// Deterministic byte key for a group: type tag plus canonical bytes per
/// value.
fn group_key(values: &[SqlValue]) -> Vec<u8> {
    let mut key = vec![];
    for v in values {
        match v {
            SqlValue::Null => key.push(0),
            SqlValue::Int(i) => {
                key.push(1);
                key.extend_from_slice(&i.to_be_bytes());
            }
            SqlValue::Str(s) => {
                key.push(2);
                key.extend_from_slice(&(s.len() as u32).to_be_bytes());
                key.extend_from_slice(s.as_bytes());
            }
            SqlValue::Real(f) => {
                key.push(3);
                key.extend_from_slice(&f.to_bits().to_be_bytes());
            }
        }
    }
    key
}

// ----- sorting -----

/// Stable sort by the given keys; ties keep input order.  NULL sorts
/// first.
fn sort_rows(rows: &mut [Row], keys: &[ir::SortKey]) -> Result<()> {
    let mut first_error: Option<Error> = None;
    rows.sort_by(|a, b| {
        for key in keys {
            let (x, y) = match (a.items.get(key.col), b.items.get(key.col)) {
                (Some(x), Some(y)) => (x, y),
                _ => {
                    if first_error.is_none() {
                        first_error = Some(Error::internal("sort key out of range"));
                    }
                    return std::cmp::Ordering::Equal;
                }
            };
            match cmp_for_sort(x, y) {
                Ok(std::cmp::Ordering::Equal) => continue,
                Ok(ord) => {
                    return if key.desc { ord.reverse() } else { ord };
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                    return std::cmp::Ordering::Equal;
                }
            }
        }
        std::cmp::Ordering::Equal
    });
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
