//! `pt_to_ast` has routines for converting parse trees to ASTs for SQL.
//! A pest parse tree has one enum for all possible terminals and
//! non-terminals.  Our AST has enums for groups of terminals that are
//! used in the same production, and discards lexical detail like case
//! and position in the input.

use std::str::FromStr;

use pest::iterators::Pair;

use crate::ast;
use crate::errors::{Error, Result};
use crate::parser::{parse_column_name, parse_expr, parse_sql, Rule};
use crate::sql_type::SqlType;

/// Parses one SQL statement into its AST.
pub fn parse_statement(sql: &str) -> Result<ast::Statement> {
    let statement = parse_sql(sql)?;
    let inner = statement
        .into_inner()
        .next()
        .expect("statement has one alternative");
    match inner.as_rule() {
        Rule::create_table_stmt => Ok(ast::Statement::CreateTable(pt_create_table_to_ast(inner)?)),
        Rule::create_index_stmt => Ok(ast::Statement::CreateIndex(pt_create_index_to_ast(inner))),
        Rule::drop_table_stmt => Ok(ast::Statement::DropTable(pt_drop_to_ast(inner))),
        Rule::drop_index_stmt => Ok(ast::Statement::DropIndex(pt_drop_to_ast(inner))),
        Rule::insert_stmt => Ok(ast::Statement::Insert(pt_insert_to_ast(inner)?)),
        Rule::select_stmt => Ok(ast::Statement::Select(pt_select_to_ast(inner)?)),
        Rule::update_stmt => Ok(ast::Statement::Update(pt_update_to_ast(inner)?)),
        Rule::delete_stmt => Ok(ast::Statement::Delete(pt_delete_to_ast(inner)?)),
        Rule::begin_stmt => Ok(ast::Statement::Begin),
        Rule::commit_stmt => Ok(ast::Statement::Commit),
        Rule::rollback_stmt => Ok(ast::Statement::Rollback),
        r => Err(Error::internal(format!("unexpected statement rule {:?}", r))),
    }
}

fn pt_create_table_to_ast(pair: Pair<'_, Rule>) -> Result<ast::CreateTableStatement> {
    use itertools::Itertools;
    let mut inner = pair.into_inner();
    let tablename = inner.next().expect("table name").as_str().to_string();
    let mut coldefs = vec![];
    for column_def in inner.next().expect("column defs").into_inner() {
        let mut parts = column_def.into_inner();
        let (colname, typename) = parts
            .by_ref()
            .take(2)
            .map(|p| p.as_str().to_string())
            .collect_tuple()
            .expect("column def has name and type");
        let coltype = SqlType::from_str(&typename)
            .map_err(|_| Error::schema(format!("unknown column type {}", typename)))?;
        let mut is_pk = false;
        let mut not_null = false;
        for constraint in parts {
            match constraint.as_rule() {
                Rule::primary_key_constraint => is_pk = true,
                Rule::not_null_constraint => not_null = true,
                r => return Err(Error::internal(format!("unexpected constraint {:?}", r))),
            }
        }
        coldefs.push(ast::ColDef {
            colname: ast::ColName::bare(&colname),
            coltype,
            is_pk,
            not_null,
        });
    }
    Ok(ast::CreateTableStatement { tablename, coldefs })
}

fn pt_create_index_to_ast(pair: Pair<'_, Rule>) -> ast::CreateIndexStatement {
    let mut inner = pair.into_inner();
    let indexname = inner.next().expect("index name").as_str().to_string();
    let tablename = inner.next().expect("table name").as_str().to_string();
    let colname = ast::ColName::bare(inner.next().expect("column name").as_str());
    ast::CreateIndexStatement {
        indexname,
        tablename,
        colname,
    }
}

fn pt_drop_to_ast(pair: Pair<'_, Rule>) -> ast::DropStatement {
    let name = pair
        .into_inner()
        .next()
        .expect("object name")
        .as_str()
        .to_string();
    ast::DropStatement { name }
}

fn pt_insert_to_ast(pair: Pair<'_, Rule>) -> Result<ast::InsertStatement> {
    let mut inner = pair.into_inner();
    let tablename = inner.next().expect("table name").as_str().to_string();
    let mut values = vec![];
    for expr_list in inner.next().expect("values").into_inner() {
        let mut row = vec![];
        for expr in expr_list.into_inner() {
            match parse_expr(expr)? {
                ast::Expr::Constant(c) => row.push(c),
                other => {
                    return Err(Error::schema(format!(
                        "only literal values are supported in VALUES, found {}",
                        other
                    )))
                }
            }
        }
        values.push(row);
    }
    Ok(ast::InsertStatement { tablename, values })
}

fn pt_table_ref_to_ast(pair: Pair<'_, Rule>) -> ast::TableRef {
    let mut inner = pair.into_inner();
    let tablename = inner.next().expect("table name").as_str().to_string();
    let alias = inner.next().map(|p| p.as_str().to_string());
    ast::TableRef { tablename, alias }
}

fn pt_select_to_ast(pair: Pair<'_, Rule>) -> Result<ast::SelectStatement> {
    let mut with = vec![];
    let mut items = vec![];
    let mut from = None;
    let mut joins = vec![];
    let mut where_expr = None;
    let mut group_by = vec![];
    let mut order_by = vec![];

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::with_clause => {
                for cte in part.into_inner() {
                    let mut inner = cte.into_inner();
                    let name = inner.next().expect("cte name").as_str().to_string();
                    let query = pt_select_to_ast(inner.next().expect("cte query"))?;
                    with.push(ast::CommonTableExpr { name, query });
                }
            }
            Rule::select_core => {
                for clause in part.into_inner() {
                    match clause.as_rule() {
                        Rule::select_items => {
                            for item in clause.into_inner() {
                                match item.as_rule() {
                                    Rule::star => items.push(ast::SelItem::Star),
                                    Rule::select_item => {
                                        let mut inner = item.into_inner();
                                        let expr =
                                            parse_expr(inner.next().expect("item expr"))?;
                                        let alias =
                                            inner.next().map(|p| p.as_str().to_string());
                                        items.push(ast::SelItem::Expr { expr, alias });
                                    }
                                    r => {
                                        return Err(Error::internal(format!(
                                            "unexpected select item {:?}",
                                            r
                                        )))
                                    }
                                }
                            }
                        }
                        Rule::table_ref => from = Some(pt_table_ref_to_ast(clause)),
                        Rule::join_clause => {
                            let mut inner = clause.into_inner();
                            let kind = match inner
                                .next()
                                .expect("join kind")
                                .into_inner()
                                .next()
                                .expect("join kind word")
                                .as_rule()
                            {
                                Rule::left_kw => ast::JoinKind::Left,
                                _ => ast::JoinKind::Inner,
                            };
                            let table = pt_table_ref_to_ast(inner.next().expect("join table"));
                            let on = parse_expr(inner.next().expect("join condition"))?;
                            joins.push(ast::Join { kind, table, on });
                        }
                        Rule::where_clause => {
                            where_expr =
                                Some(parse_expr(clause.into_inner().next().expect("where expr"))?);
                        }
                        Rule::group_by_clause => {
                            for col in clause.into_inner() {
                                group_by.push(parse_column_name(col));
                            }
                        }
                        Rule::order_by_clause => {
                            for key in clause.into_inner() {
                                let mut inner = key.into_inner();
                                let expr = parse_expr(inner.next().expect("order expr"))?;
                                let desc = matches!(
                                    inner.next().map(|p| p.as_rule()),
                                    Some(Rule::desc_kw)
                                );
                                order_by.push(ast::OrderKey { expr, desc });
                            }
                        }
                        r => return Err(Error::internal(format!("unexpected clause {:?}", r))),
                    }
                }
            }
            r => return Err(Error::internal(format!("unexpected select part {:?}", r))),
        }
    }
    Ok(ast::SelectStatement {
        with,
        items,
        from,
        joins,
        where_expr,
        group_by,
        order_by,
    })
}

fn pt_update_to_ast(pair: Pair<'_, Rule>) -> Result<ast::UpdateStatement> {
    let mut inner = pair.into_inner();
    let tablename = inner.next().expect("table name").as_str().to_string();
    let mut assignments = vec![];
    let mut where_expr = None;
    for part in inner {
        match part.as_rule() {
            Rule::assignment => {
                let mut kv = part.into_inner();
                let col = parse_column_name(kv.next().expect("assignment column"));
                let value = parse_expr(kv.next().expect("assignment value"))?;
                assignments.push((col, value));
            }
            Rule::where_clause => {
                where_expr = Some(parse_expr(part.into_inner().next().expect("where expr"))?);
            }
            r => return Err(Error::internal(format!("unexpected update part {:?}", r))),
        }
    }
    Ok(ast::UpdateStatement {
        tablename,
        assignments,
        where_expr,
    })
}

fn pt_delete_to_ast(pair: Pair<'_, Rule>) -> Result<ast::DeleteStatement> {
    let mut inner = pair.into_inner();
    let tablename = inner.next().expect("table name").as_str().to_string();
    let where_expr = match inner.next() {
        Some(clause) => Some(parse_expr(clause.into_inner().next().expect("where expr"))?),
        None => None,
    };
    Ok(ast::DeleteStatement {
        tablename,
        where_expr,
    })
}
