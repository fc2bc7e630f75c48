//! `ast_to_ir` converts a SELECT AST into an IR operator tree, resolving
//! every column reference to a position and choosing access paths.
//!
//! Index selection is syntactic: for a single-table query, a top-level
//! WHERE conjunct of the form `col <op> literal` (op one of = < <= > >=)
//! on an indexed column becomes an `IndexScan` key range; everything else
//! scans.  The full WHERE predicate is kept in a `Filter` above the scan,
//! so a narrowed range never changes results.

use std::collections::HashMap;
use std::ops::Bound;

use crate::ast;
use crate::catalog::{Catalog, TableSchema};
use crate::errors::{Error, Result};
use crate::ir;
use crate::record::{encode_pk_key, index_prefix_upper_bound};
use crate::sql_value::SqlValue;

/// One column of a block's output layout, as seen by name resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutCol {
    /// Table binding (alias or table name); `None` for computed columns.
    pub table: Option<String>,
    pub name: String,
}

/// A planned SELECT: the operator tree plus display names for the result
/// columns.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectPlan {
    pub block: ir::Block,
    pub col_names: Vec<String>,
}

pub fn plan_select(catalog: &Catalog, ss: &ast::SelectStatement) -> Result<SelectPlan> {
    let mut ctx = PlanCtx {
        catalog,
        ctes: HashMap::new(),
    };
    let (block, _cols, names) = plan_select_inner(&mut ctx, ss)?;
    Ok(SelectPlan {
        block,
        col_names: names,
    })
}

struct PlanCtx<'a> {
    catalog: &'a Catalog,
    /// CTE name -> output column names, visible while planning.
    ctes: HashMap<String, Vec<String>>,
}

fn plan_select_inner(
    ctx: &mut PlanCtx<'_>,
    ss: &ast::SelectStatement,
) -> Result<(ir::Block, Vec<OutCol>, Vec<String>)> {
    let saved_ctes = ctx.ctes.clone();
    let mut materialized: Vec<(String, ir::Block)> = vec![];
    for cte in &ss.with {
        if ctx.ctes.contains_key(&cte.name) {
            return Err(Error::schema(format!("duplicate CTE name {}", cte.name)));
        }
        let (block, _cols, names) = plan_select_inner(ctx, &cte.query)?;
        ctx.ctes.insert(cte.name.clone(), names);
        materialized.push((cte.name.clone(), block));
    }

    let result = plan_select_core(ctx, ss);
    ctx.ctes = saved_ctes;
    let (mut block, cols, names) = result?;

    // Wrap materializations outermost-first so each CTE can read the ones
    // defined before it.
    for (name, plan) in materialized.into_iter().rev() {
        block = ir::Block::CteMaterialize {
            name,
            plan: Box::new(plan),
            body: Box::new(block),
        };
    }
    Ok((block, cols, names))
}

fn plan_select_core(
    ctx: &mut PlanCtx<'_>,
    ss: &ast::SelectStatement,
) -> Result<(ir::Block, Vec<OutCol>, Vec<String>)> {
    // FROM-less SELECT: one constant row.
    let Some(from) = &ss.from else {
        if !ss.joins.is_empty()
            || ss.where_expr.is_some()
            || !ss.group_by.is_empty()
            || !ss.order_by.is_empty()
        {
            return Err(Error::schema("clauses other than SELECT need a FROM"));
        }
        let mut exprs = vec![];
        let mut names = vec![];
        for item in &ss.items {
            let ast::SelItem::Expr { expr, alias } = item else {
                return Err(Error::schema("cannot select * without a FROM clause"));
            };
            exprs.push(lower_expr(expr, &[])?);
            names.push(alias.clone().unwrap_or_else(|| expr.to_string()));
        }
        let cols = names
            .iter()
            .map(|n| OutCol {
                table: None,
                name: n.clone(),
            })
            .collect();
        return Ok((ir::Block::ConstantRow { exprs }, cols, names));
    };

    // FROM and joins.
    let (mut block, mut cols) = plan_table_ref(ctx, from)?;
    for join in &ss.joins {
        let (right, right_cols) = plan_table_ref(ctx, &join.table)?;
        let mut joined_cols = cols.clone();
        joined_cols.extend(right_cols.iter().cloned());
        let pred = lower_expr(&join.on, &joined_cols)?;
        block = ir::Block::NestedLoopJoin {
            left: Box::new(block),
            right: Box::new(right),
            pred,
            kind: join.kind,
            right_width: right_cols.len(),
        };
        cols = joined_cols;
    }

    // Syntactic index selection, single stored table only.
    if ss.joins.is_empty() {
        let chosen = match (&ss.where_expr, &block) {
            (Some(where_expr), ir::Block::SeqScan { table }) => {
                pick_index_scan(ctx.catalog, table, where_expr, &cols)?
            }
            _ => None,
        };
        if let Some(scan) = chosen {
            block = scan;
        }
    }

    if let Some(where_expr) = &ss.where_expr {
        let pred = lower_expr(where_expr, &cols)?;
        block = ir::Block::Filter {
            pred,
            input: Box::new(block),
        };
    }

    // Aggregation.
    let has_agg = ss
        .items
        .iter()
        .any(|i| matches!(i, ast::SelItem::Expr { expr, .. } if expr.has_aggregate()));
    // When aggregating, name resolution still happens against the scan
    // layout (`agg_input_cols`); positions are then mapped into the
    // post-aggregate layout of group columns followed by aggregates.
    let (block, cols, agg_input_cols, group_input_idxs, aggs_ast) =
        if has_agg || !ss.group_by.is_empty() {
            let mut group_input_idxs = vec![];
            for col in &ss.group_by {
                group_input_idxs.push(resolve_column(col, &cols)?);
            }
            let mut aggs_ast: Vec<ast::Expr> = vec![];
            for item in &ss.items {
                if let ast::SelItem::Expr { expr, .. } = item {
                    collect_aggregates(expr, &mut aggs_ast)?;
                }
            }
            for key in &ss.order_by {
                collect_aggregates(&key.expr, &mut aggs_ast)?;
            }
            let mut aggs = vec![];
            for agg in &aggs_ast {
                let ast::Expr::Aggregate { func, arg } = agg else {
                    unreachable!("collect_aggregates only yields aggregates")
                };
                let arg = match arg {
                    None => None,
                    Some(a) => Some(lower_expr(a, &cols)?),
                };
                aggs.push(ir::AggSpec { func: *func, arg });
            }
            let mut out_cols: Vec<OutCol> = group_input_idxs
                .iter()
                .map(|i| cols[*i].clone())
                .collect();
            out_cols.extend(aggs_ast.iter().map(|a| OutCol {
                table: None,
                name: a.to_string(),
            }));
            let block = ir::Block::HashAggregate {
                group_cols: group_input_idxs.clone(),
                aggs,
                input: Box::new(block),
            };
            (block, out_cols, Some(cols), Some(group_input_idxs), aggs_ast)
        } else {
            (block, cols, None, None, vec![])
        };

    // Projection.
    let mut proj_exprs = vec![];
    let mut out_names = vec![];
    let mut out_items: Vec<Option<&ast::Expr>> = vec![];
    let mut aliases: Vec<Option<String>> = vec![];
    for item in &ss.items {
        match item {
            ast::SelItem::Star => {
                if group_input_idxs.is_some() {
                    return Err(Error::schema("cannot select * with GROUP BY or aggregates"));
                }
                for (i, c) in cols.iter().enumerate() {
                    proj_exprs.push(ir::Expr::Col(i));
                    out_names.push(c.name.clone());
                    out_items.push(None);
                    aliases.push(None);
                }
            }
            ast::SelItem::Expr { expr, alias } => {
                let lowered = match (&group_input_idxs, &agg_input_cols) {
                    (Some(group_idxs), Some(input_cols)) => {
                        lower_post_agg_expr(expr, input_cols, group_idxs, &aggs_ast)?
                    }
                    _ => lower_expr(expr, &cols)?,
                };
                proj_exprs.push(lowered);
                out_names.push(alias.clone().unwrap_or_else(|| expr.to_string()));
                out_items.push(Some(expr));
                aliases.push(alias.clone());
            }
        }
    }

    // ORDER BY: sort below the projection when every key names an input
    // column (or aggregate), above it when keys name output columns or
    // aliases.
    let mut pre_keys: Option<Vec<ir::SortKey>> = Some(vec![]);
    for key in &ss.order_by {
        let resolve_cols = agg_input_cols.as_deref().unwrap_or(&cols);
        let resolved =
            resolve_order_key_pre(&key.expr, resolve_cols, &aggs_ast, group_input_idxs.as_deref());
        match (resolved, &mut pre_keys) {
            (Some(col), Some(keys)) => keys.push(ir::SortKey { col, desc: key.desc }),
            _ => {
                pre_keys = None;
                break;
            }
        }
    }

    let mut block = block;
    if let (Some(keys), false) = (&pre_keys, ss.order_by.is_empty()) {
        block = ir::Block::Sort {
            keys: keys.clone(),
            input: Box::new(block),
        };
    }
    block = ir::Block::Project {
        exprs: proj_exprs,
        input: Box::new(block),
    };
    if pre_keys.is_none() {
        let mut keys = vec![];
        for key in &ss.order_by {
            let col = resolve_order_key_post(&key.expr, &out_names, &aliases, &out_items)
                .ok_or_else(|| {
                    Error::schema(format!(
                        "ORDER BY term {} does not name an input or output column",
                        key.expr
                    ))
                })?;
            keys.push(ir::SortKey { col, desc: key.desc });
        }
        block = ir::Block::Sort {
            keys,
            input: Box::new(block),
        };
    }

    let final_cols = out_names
        .iter()
        .map(|n| OutCol {
            table: None,
            name: n.clone(),
        })
        .collect();
    Ok((block, final_cols, out_names))
}

fn plan_table_ref(
    ctx: &mut PlanCtx<'_>,
    tr: &ast::TableRef,
) -> Result<(ir::Block, Vec<OutCol>)> {
    let binding = tr.binding().to_string();
    if let Some(names) = ctx.ctes.get(&tr.tablename) {
        let cols = names
            .iter()
            .map(|n| OutCol {
                table: Some(binding.clone()),
                name: n.clone(),
            })
            .collect();
        return Ok((
            ir::Block::CteScan {
                name: tr.tablename.clone(),
            },
            cols,
        ));
    }
    let schema = ctx.catalog.table(&tr.tablename)?;
    Ok((
        ir::Block::SeqScan {
            table: tr.tablename.clone(),
        },
        table_out_cols(schema, &binding),
    ))
}

/// The output layout of a stored-table scan under a binding name.
pub fn table_out_cols(schema: &TableSchema, binding: &str) -> Vec<OutCol> {
    schema
        .columns
        .iter()
        .map(|c| OutCol {
            table: Some(binding.to_string()),
            name: c.name.clone(),
        })
        .collect()
}

/// Resolves a possibly-qualified column name to a position.  Ambiguity
/// and misses are schema errors.
pub fn resolve_column(col: &ast::ColName, cols: &[OutCol]) -> Result<usize> {
    let matches: Vec<usize> = cols
        .iter()
        .enumerate()
        .filter(|(_, c)| {
            c.name == col.name
                && match &col.table {
                    None => true,
                    Some(t) => c.table.as_deref() == Some(t.as_str()),
                }
        })
        .map(|(i, _)| i)
        .collect();
    match matches.len() {
        0 => Err(Error::schema(format!("no such column: {}", col))),
        1 => Ok(matches[0]),
        _ => Err(Error::schema(format!("ambiguous column name: {}", col))),
    }
}

/// Lowers an AST expression against a row layout.  Aggregates are not
/// allowed here; they are planned separately.
pub fn lower_expr(expr: &ast::Expr, cols: &[OutCol]) -> Result<ir::Expr> {
    match expr {
        ast::Expr::Constant(c) => Ok(ir::Expr::Const(constant_to_value(c))),
        ast::Expr::Column(c) => Ok(ir::Expr::Col(resolve_column(c, cols)?)),
        ast::Expr::Comparison { lhs, op, rhs } => Ok(ir::Expr::Comparison {
            lhs: Box::new(lower_expr(lhs, cols)?),
            op: *op,
            rhs: Box::new(lower_expr(rhs, cols)?),
        }),
        ast::Expr::Arith { lhs, op, rhs } => Ok(ir::Expr::Arith {
            lhs: Box::new(lower_expr(lhs, cols)?),
            op: *op,
            rhs: Box::new(lower_expr(rhs, cols)?),
        }),
        ast::Expr::And(a, b) => Ok(ir::Expr::And(
            Box::new(lower_expr(a, cols)?),
            Box::new(lower_expr(b, cols)?),
        )),
        ast::Expr::Or(a, b) => Ok(ir::Expr::Or(
            Box::new(lower_expr(a, cols)?),
            Box::new(lower_expr(b, cols)?),
        )),
        ast::Expr::Not(e) => Ok(ir::Expr::Not(Box::new(lower_expr(e, cols)?))),
        ast::Expr::Aggregate { .. } => Err(Error::schema(format!(
            "aggregate {} is only allowed in the select list of a grouped query",
            expr
        ))),
    }
}

/// Lowers a projection expression over the output of a HashAggregate:
/// aggregates map to their computed slots, plain columns must be grouped.
fn lower_post_agg_expr(
    expr: &ast::Expr,
    input_cols: &[OutCol],
    group_idxs: &[usize],
    aggs: &[ast::Expr],
) -> Result<ir::Expr> {
    if let ast::Expr::Aggregate { .. } = expr {
        let pos = aggs
            .iter()
            .position(|a| a == expr)
            .expect("aggregates were collected beforehand");
        return Ok(ir::Expr::Col(group_idxs.len() + pos));
    }
    match expr {
        ast::Expr::Constant(c) => Ok(ir::Expr::Const(constant_to_value(c))),
        ast::Expr::Column(c) => {
            let input_idx = resolve_column(c, input_cols)?;
            let group_pos = group_idxs
                .iter()
                .position(|g| *g == input_idx)
                .ok_or_else(|| {
                    Error::schema(format!("column {} must appear in GROUP BY", c))
                })?;
            Ok(ir::Expr::Col(group_pos))
        }
        ast::Expr::Comparison { lhs, op, rhs } => Ok(ir::Expr::Comparison {
            lhs: Box::new(lower_post_agg_expr(lhs, input_cols, group_idxs, aggs)?),
            op: *op,
            rhs: Box::new(lower_post_agg_expr(rhs, input_cols, group_idxs, aggs)?),
        }),
        ast::Expr::Arith { lhs, op, rhs } => Ok(ir::Expr::Arith {
            lhs: Box::new(lower_post_agg_expr(lhs, input_cols, group_idxs, aggs)?),
            op: *op,
            rhs: Box::new(lower_post_agg_expr(rhs, input_cols, group_idxs, aggs)?),
        }),
        ast::Expr::And(a, b) => Ok(ir::Expr::And(
            Box::new(lower_post_agg_expr(a, input_cols, group_idxs, aggs)?),
            Box::new(lower_post_agg_expr(b, input_cols, group_idxs, aggs)?),
        )),
        ast::Expr::Or(a, b) => Ok(ir::Expr::Or(
            Box::new(lower_post_agg_expr(a, input_cols, group_idxs, aggs)?),
            Box::new(lower_post_agg_expr(b, input_cols, group_idxs, aggs)?),
        )),
        ast::Expr::Not(e) => Ok(ir::Expr::Not(Box::new(lower_post_agg_expr(
            e, input_cols, group_idxs, aggs,
        )?))),
        ast::Expr::Aggregate { .. } => unreachable!("handled above"),
    }
}

fn collect_aggregates(expr: &ast::Expr, out: &mut Vec<ast::Expr>) -> Result<()> {
    match expr {
        ast::Expr::Aggregate { arg, .. } => {
            if let Some(a) = arg {
                if a.has_aggregate() {
                    return Err(Error::schema("aggregates cannot be nested"));
                }
            }
            if !out.contains(expr) {
                out.push(expr.clone());
            }
            Ok(())
        }
        ast::Expr::Comparison { lhs, rhs, .. } | ast::Expr::Arith { lhs, rhs, .. } => {
            collect_aggregates(lhs, out)?;
            collect_aggregates(rhs, out)
        }
        ast::Expr::And(a, b) | ast::Expr::Or(a, b) => {
            collect_aggregates(a, out)?;
            collect_aggregates(b, out)
        }
        ast::Expr::Not(e) => collect_aggregates(e, out),
        ast::Expr::Constant(_) | ast::Expr::Column(_) => Ok(()),
    }
}

fn resolve_order_key_pre(
    expr: &ast::Expr,
    cols: &[OutCol],
    aggs: &[ast::Expr],
    group_idxs: Option<&[usize]>,
) -> Option<usize> {
    match group_idxs {
        None => match expr {
            ast::Expr::Column(c) => resolve_column(c, cols).ok(),
            _ => None,
        },
        Some(group_idxs) => {
            // Post-aggregate layout: group columns then aggregates.
            if let Some(pos) = aggs.iter().position(|a| a == expr) {
                return Some(group_idxs.len() + pos);
            }
            let ast::Expr::Column(c) = expr else { return None };
            let idx = resolve_column(c, cols).ok()?;
            group_idxs.iter().position(|g| *g == idx)
        }
    }
}

fn resolve_order_key_post(
    expr: &ast::Expr,
    out_names: &[String],
    aliases: &[Option<String>],
    out_items: &[Option<&ast::Expr>],
) -> Option<usize> {
    if let ast::Expr::Column(c) = expr {
        if c.table.is_none() {
            if let Some(i) = aliases
                .iter()
                .position(|a| a.as_deref() == Some(c.name.as_str()))
            {
                return Some(i);
            }
            if let Some(i) = out_names.iter().position(|n| *n == c.name) {
                return Some(i);
            }
        }
    }
    let text = expr.to_string();
    out_items
        .iter()
        .position(|i| matches!(i, Some(e) if e.to_string() == text))
}

fn constant_to_value(c: &ast::Constant) -> SqlValue {
    match c {
        ast::Constant::Int(i) => SqlValue::Int(*i),
        ast::Constant::String(s) => SqlValue::Str(s.clone()),
        ast::Constant::Null => SqlValue::Null,
    }
}

/// Looks for a usable `col <op> literal` conjunct and turns it into an
/// index key range.
fn pick_index_scan(
    catalog: &Catalog,
    table: &str,
    where_expr: &ast::Expr,
    cols: &[OutCol],
) -> Result<Option<ir::Block>> {
    let schema = catalog.table(table)?;
    let mut conjuncts = vec![];
    flatten_and(where_expr, &mut conjuncts);
    for conjunct in conjuncts {
        let Some((col, op, value)) = comparison_with_literal(conjunct) else {
            continue;
        };
        if value == SqlValue::Null {
            continue;
        }
        let Ok(idx) = resolve_column(col, cols) else {
            continue;
        };
        let column_name = &schema.columns[idx].name;
        let Some(index) = schema.index_on(column_name) else {
            continue;
        };
        let (lo, hi) = match op {
            ast::CompOp::Eq => (
                Bound::Included(encode_pk_key(&value)?),
                Bound::Excluded(index_prefix_upper_bound(&value)?),
            ),
            ast::CompOp::Lt => (Bound::Unbounded, Bound::Excluded(encode_pk_key(&value)?)),
            ast::CompOp::Le => (
                Bound::Unbounded,
                Bound::Excluded(index_prefix_upper_bound(&value)?),
            ),
            ast::CompOp::Gt => (
                Bound::Included(index_prefix_upper_bound(&value)?),
                Bound::Unbounded,
            ),
            ast::CompOp::Ge => (Bound::Included(encode_pk_key(&value)?), Bound::Unbounded),
            ast::CompOp::Ne => continue,
        };
        return Ok(Some(ir::Block::IndexScan {
            table: table.to_string(),
            index: index.name.clone(),
            lo,
            hi,
        }));
    }
    Ok(None)
}

fn flatten_and<'e>(expr: &'e ast::Expr, out: &mut Vec<&'e ast::Expr>) {
    match expr {
        ast::Expr::And(a, b) => {
            flatten_and(a, out);
            flatten_and(b, out);
        }
        e => out.push(e),
    }
}

/// Matches `col <op> literal` or `literal <op> col` (with the operator
/// flipped).
fn comparison_with_literal(expr: &ast::Expr) -> Option<(&ast::ColName, ast::CompOp, SqlValue)> {
    let ast::Expr::Comparison { lhs, op, rhs } = expr else {
        return None;
    };
    match (lhs.as_ref(), rhs.as_ref()) {
        (ast::Expr::Column(c), ast::Expr::Constant(k)) => Some((c, *op, constant_to_value(k))),
        (ast::Expr::Constant(k), ast::Expr::Column(c)) => {
            use ast::CompOp::*;
            let flipped = match op {
                Eq => Eq,
                Ne => Ne,
                Lt => Gt,
                Le => Ge,
                Gt => Lt,
                Ge => Le,
            };
            Some((c, flipped, constant_to_value(k)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Block;
    use std::time::Duration;

    fn catalog_with_employees() -> (tempfile::TempDir, crate::pager::Pager) {
        let dir = tempfile::tempdir().unwrap();
        let pager = crate::pager::Pager::open(
            &dir.path().join("plan_test.db"),
            Duration::from_millis(100),
        )
        .unwrap();
        pager.begin_read().unwrap();
        pager.begin_write().unwrap();
        (dir, pager)
    }

    fn plan(catalog: &Catalog, sql: &str) -> ir::Block {
        let crate::ast::Statement::Select(ss) =
            crate::pt_to_ast::parse_statement(sql).unwrap()
        else {
            panic!("expected select")
        };
        plan_select(catalog, &ss).unwrap().block
    }

    #[test]
    fn test_index_selection_is_syntactic() {
        let (_dir, pager) = catalog_with_employees();
        let mut catalog = Catalog::load(&pager).unwrap();
        for sql in [
            "CREATE TABLE employees (id INT PRIMARY KEY, role STR, salary INT)",
        ] {
            let crate::ast::Statement::CreateTable(ct) =
                crate::pt_to_ast::parse_statement(sql).unwrap()
            else {
                panic!("expected create table")
            };
            catalog.create_table(&pager, &ct).unwrap();
        }
        let crate::ast::Statement::CreateIndex(ci) =
            crate::pt_to_ast::parse_statement("CREATE INDEX idx_role ON employees(role)")
                .unwrap()
        else {
            panic!("expected create index")
        };
        catalog.create_index(&pager, &ci).unwrap();

        // An indexed equality conjunct becomes an IndexScan key range.
        let block = plan(&catalog, "SELECT * FROM employees WHERE role = 'Engineer'");
        let Block::Project { input, .. } = block else { panic!("expected project") };
        let Block::Filter { input, .. } = *input else { panic!("expected filter") };
        let Block::IndexScan { index, table, .. } = *input else {
            panic!("expected index scan")
        };
        assert_eq!(index, "idx_role");
        assert_eq!(table, "employees");

        // Same with the literal on the left.
        let block = plan(&catalog, "SELECT * FROM employees WHERE 'Engineer' = role");
        let Block::Project { input, .. } = block else { panic!("expected project") };
        let Block::Filter { input, .. } = *input else { panic!("expected filter") };
        assert!(matches!(*input, Block::IndexScan { .. }));

        // An unindexed column scans.
        let block = plan(&catalog, "SELECT * FROM employees WHERE salary > 100000");
        let Block::Project { input, .. } = block else { panic!("expected project") };
        let Block::Filter { input, .. } = *input else { panic!("expected filter") };
        assert!(matches!(*input, Block::SeqScan { .. }));

        // A range conjunct on the indexed column also probes.
        let block = plan(&catalog, "SELECT * FROM employees WHERE role >= 'M'");
        let Block::Project { input, .. } = block else { panic!("expected project") };
        let Block::Filter { input, .. } = *input else { panic!("expected filter") };
        assert!(matches!(*input, Block::IndexScan { .. }));

        // != never uses an index.
        let block = plan(&catalog, "SELECT * FROM employees WHERE role != 'Engineer'");
        let Block::Project { input, .. } = block else { panic!("expected project") };
        let Block::Filter { input, .. } = *input else { panic!("expected filter") };
        assert!(matches!(*input, Block::SeqScan { .. }));

        // Unknown columns are schema errors at plan time.
        let crate::ast::Statement::Select(ss) =
            crate::pt_to_ast::parse_statement("SELECT ghost FROM employees").unwrap()
        else {
            panic!("expected select")
        };
        assert!(matches!(
            plan_select(&catalog, &ss),
            Err(Error::Schema(_))
        ));
    }
}
