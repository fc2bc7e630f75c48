//! The pest-generated SQL parser plus the expression lowering shared by
//! every statement kind.

use pest::iterators::{Pair, Pairs};
use pest::Parser;

use crate::ast;
use crate::errors::{Error, Result};

#[derive(Parser)]
#[grammar = "sql.pest"]
pub struct SQLParser;

/// Runs the grammar over one statement, mapping a pest failure to a
/// `SYNTAX` error carrying the input position.
pub fn parse_sql(sql: &str) -> Result<Pair<'_, Rule>> {
    let mut pairs =
        SQLParser::parse(Rule::sql, sql).map_err(|e| syntax_error(&e))?;
    let sql_pair = pairs.next().expect("sql rule always produces one pair");
    let statement = sql_pair
        .into_inner()
        .find(|p| p.as_rule() == Rule::statement)
        .expect("sql rule always contains a statement");
    Ok(statement)
}

fn syntax_error(e: &pest::error::Error<Rule>) -> Error {
    let (line, col) = match e.line_col {
        pest::error::LineColLocation::Pos((l, c)) => (l, c),
        pest::error::LineColLocation::Span((l, c), _) => (l, c),
    };
    Error::Syntax {
        line,
        col,
        msg: e.variant.message().to_string(),
    }
}

/// Lowers an `expr` pair (or any of the precedence-layer pairs below it)
/// into an AST expression.
pub fn parse_expr(pair: Pair<'_, Rule>) -> Result<ast::Expr> {
    match pair.as_rule() {
        Rule::expr | Rule::not_expr | Rule::primary => {
            parse_expr(pair.into_inner().next().expect("single inner"))
        }
        Rule::or_expr => {
            fold_binary(pair.into_inner(), |lhs, _op, rhs| {
                ast::Expr::Or(Box::new(lhs), Box::new(rhs))
            })
        }
        Rule::and_expr => {
            fold_binary(pair.into_inner(), |lhs, _op, rhs| {
                ast::Expr::And(Box::new(lhs), Box::new(rhs))
            })
        }
        Rule::negation => {
            let inner = pair.into_inner().next().expect("negation operand");
            Ok(ast::Expr::Not(Box::new(parse_expr(inner)?)))
        }
        Rule::comparison => {
            let mut inner = pair.into_inner();
            let lhs = parse_expr(inner.next().expect("comparison lhs"))?;
            match inner.next() {
                None => Ok(lhs),
                Some(op_pair) => {
                    let op = match op_pair.as_str() {
                        "=" => ast::CompOp::Eq,
                        "!=" => ast::CompOp::Ne,
                        "<" => ast::CompOp::Lt,
                        "<=" => ast::CompOp::Le,
                        ">" => ast::CompOp::Gt,
                        ">=" => ast::CompOp::Ge,
                        other => {
                            return Err(Error::internal(format!(
                                "unknown comparison operator {}",
                                other
                            )))
                        }
                    };
                    let rhs = parse_expr(inner.next().expect("comparison rhs"))?;
                    Ok(ast::Expr::Comparison {
                        lhs: Box::new(lhs),
                        op,
                        rhs: Box::new(rhs),
                    })
                }
            }
        }
        Rule::additive | Rule::multiplicative => {
            fold_binary(pair.into_inner(), |lhs, op, rhs| {
                let op = match op {
                    "+" => ast::ArithOp::Add,
                    "-" => ast::ArithOp::Subtract,
                    "*" => ast::ArithOp::Multiply,
                    _ => ast::ArithOp::Divide,
                };
                ast::Expr::Arith {
                    lhs: Box::new(lhs),
                    op,
                    rhs: Box::new(rhs),
                }
            })
        }
        Rule::literal => Ok(ast::Expr::Constant(parse_literal(
            pair.into_inner().next().expect("literal inner"),
        )?)),
        Rule::column_name => Ok(ast::Expr::Column(parse_column_name(pair))),
        Rule::aggregate_call => {
            let mut inner = pair.into_inner();
            let func = match inner
                .next()
                .expect("aggregate name")
                .as_str()
                .to_uppercase()
                .as_str()
            {
                "COUNT" => ast::AggFunc::Count,
                "SUM" => ast::AggFunc::Sum,
                "AVG" => ast::AggFunc::Avg,
                "MIN" => ast::AggFunc::Min,
                _ => ast::AggFunc::Max,
            };
            let arg_pair = inner.next().expect("aggregate argument");
            let arg = match arg_pair.as_rule() {
                Rule::star => {
                    if func != ast::AggFunc::Count {
                        return Err(Error::schema(format!("{}(*) is not supported", func)));
                    }
                    None
                }
                _ => Some(Box::new(parse_expr(arg_pair)?)),
            };
            Ok(ast::Expr::Aggregate { func, arg })
        }
        r => Err(Error::internal(format!("unexpected rule in expression: {:?}", r))),
    }
}

/// Folds `operand (op operand)*` pairs left-associatively.  Silent
/// keyword operators (AND/OR) yield no pair, so consecutive operands fold
/// with an empty operator string.
fn fold_binary(
    mut pairs: Pairs<'_, Rule>,
    combine: impl Fn(ast::Expr, &str, ast::Expr) -> ast::Expr,
) -> Result<ast::Expr> {
    let first = pairs.next().expect("at least one operand");
    let mut acc = parse_expr(first)?;
    let mut pending_op: Option<String> = None;
    for p in pairs {
        match p.as_rule() {
            Rule::add_op | Rule::mul_op | Rule::comp_op => {
                pending_op = Some(p.as_str().to_string());
            }
            _ => {
                let rhs = parse_expr(p)?;
                acc = combine(acc, pending_op.as_deref().unwrap_or(""), rhs);
                pending_op = None;
            }
        }
    }
    Ok(acc)
}

pub fn parse_column_name(pair: Pair<'_, Rule>) -> ast::ColName {
    let parts: Vec<String> = pair
        .into_inner()
        .map(|p| p.as_str().to_string())
        .collect();
    match parts.len() {
        1 => ast::ColName {
            table: None,
            name: parts[0].clone(),
        },
        _ => ast::ColName {
            table: Some(parts[0].clone()),
            name: parts[1].clone(),
        },
    }
}

pub fn parse_literal(pair: Pair<'_, Rule>) -> Result<ast::Constant> {
    match pair.as_rule() {
        Rule::null_literal => Ok(ast::Constant::Null),
        Rule::integer_literal => pair
            .as_str()
            .parse::<i64>()
            .map(ast::Constant::Int)
            .map_err(|_| Error::schema(format!("integer literal {} out of range", pair.as_str()))),
        Rule::single_quoted_string => Ok(ast::Constant::String(remove_single_quoting(
            pair.as_str(),
        ))),
        r => Err(Error::internal(format!("unexpected literal rule {:?}", r))),
    }
}

fn remove_single_quoting(s: &str) -> String {
    debug_assert!(s.len() >= 2 && s.starts_with('\'') && s.ends_with('\''));
    s[1..s.len() - 1].replace("''", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_single_quoting() {
        let cases = [
            ("''", ""),
            ("'hi'", "hi"),
            ("'h''i'", "h'i"),
            ("'it''''s'", "it''s"),
        ];
        for (input, expected) in cases {
            assert_eq!(remove_single_quoting(input), expected);
        }
    }

    #[test]
    fn test_parse_sql_reports_position() {
        let err = parse_sql("SELEKT 1").unwrap_err();
        match err {
            Error::Syntax { line, col, .. } => {
                assert_eq!(line, 1);
                assert_eq!(col, 1);
            }
            e => panic!("expected syntax error, got {}", e),
        }
    }

    #[test]
    fn test_statements_parse() {
        let cases = [
            "CREATE TABLE t (id INT PRIMARY KEY, v STR)",
            "create table t (id int primary key, v str not null)",
            "CREATE INDEX idx_role ON employees(role)",
            "DROP TABLE t",
            "DROP INDEX idx_role",
            "INSERT INTO foo VALUES (1, 'two'), (3, 'four')",
            "SELECT * FROM t",
            "SELECT a, b AS c FROM t WHERE a = 1 AND NOT b < 2 ORDER BY a DESC",
            "SELECT dept_id, COUNT(*), AVG(salary) FROM employees GROUP BY dept_id",
            "SELECT e.name, d.name FROM employees e LEFT JOIN departments d ON e.dept_id = d.dept_id",
            "WITH hi AS (SELECT name FROM employees WHERE salary > 150) SELECT name FROM hi",
            "UPDATE t SET v = 'x', w = 2 WHERE id = 1",
            "DELETE FROM t WHERE id = 1",
            "BEGIN TRANSACTION",
            "BEGIN",
            "COMMIT",
            "ROLLBACK",
            "SELECT 1 + 2 * 3",
            "SELECT 'it''s' -- trailing comment",
        ];
        for sql in cases {
            parse_sql(sql).unwrap_or_else(|e| panic!("failed to parse [{}]: {}", sql, e));
        }
    }

    #[test]
    fn test_garbage_rejected() {
        for sql in ["", "SELECT", "SELECT FROM", "CREATE t", "INSERT t VALUES 1", "SELECT * FROM t extra junk ("] {
            assert!(parse_sql(sql).is_err(), "should not parse: {}", sql);
        }
    }
}
