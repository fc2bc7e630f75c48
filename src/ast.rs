//! This module defines abstract syntax tree (AST) types for SQL.

use enum_as_inner::EnumAsInner;

use crate::sql_type::SqlType;

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTable(CreateTableStatement),
    CreateIndex(CreateIndexStatement),
    DropTable(DropStatement),
    DropIndex(DropStatement),
    Insert(InsertStatement),
    Select(SelectStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    Begin,
    Commit,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColName {
    /// Qualifying table name or alias, when written as `t.col`.
    pub table: Option<String>,
    pub name: String,
}

impl ColName {
    pub fn bare(name: &str) -> ColName {
        ColName {
            table: None,
            name: name.to_string(),
        }
    }
}

impl std::fmt::Display for ColName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.table {
            Some(t) => write!(f, "{}.{}", t, self.name),
            None => self.name.fmt(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColDef {
    pub colname: ColName,
    pub coltype: SqlType,
    pub is_pk: bool,
    pub not_null: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTableStatement {
    pub tablename: String,
    pub coldefs: Vec<ColDef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateIndexStatement {
    pub indexname: String,
    pub tablename: String,
    pub colname: ColName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropStatement {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub tablename: String,
    pub values: Vec<Vec<Constant>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub tablename: String,
    pub assignments: Vec<(ColName, Expr)>,
    pub where_expr: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub tablename: String,
    pub where_expr: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub tablename: String,
    pub alias: Option<String>,
}

impl TableRef {
    /// The name other clauses refer to this source by.
    pub fn binding(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.tablename)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: TableRef,
    pub on: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommonTableExpr {
    pub name: String,
    pub query: SelectStatement,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    pub expr: Expr,
    pub desc: bool,
}

#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum SelItem {
    Expr { expr: Expr, alias: Option<String> },
    Star,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub with: Vec<CommonTableExpr>,
    pub items: Vec<SelItem>,
    pub from: Option<TableRef>,
    pub joins: Vec<Join>,
    pub where_expr: Option<Expr>,
    pub group_by: Vec<ColName>,
    pub order_by: Vec<OrderKey>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64),
    String(String),
    Null,
}

impl std::fmt::Display for Constant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constant::Int(x) => x.fmt(f),
            Constant::String(x) => write!(f, "'{}'", x.replace('\'', "''")),
            Constant::Null => "NULL".fmt(f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl std::fmt::Display for CompOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use CompOp::*;
        match self {
            Eq => "=".fmt(f),
            Ne => "!=".fmt(f),
            Lt => "<".fmt(f),
            Le => "<=".fmt(f),
            Gt => ">".fmt(f),
            Ge => ">=".fmt(f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl std::fmt::Display for ArithOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ArithOp::*;
        match self {
            Add => "+".fmt(f),
            Subtract => "-".fmt(f),
            Multiply => "*".fmt(f),
            Divide => "/".fmt(f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl std::fmt::Display for AggFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use AggFunc::*;
        match self {
            Count => "COUNT".fmt(f),
            Sum => "SUM".fmt(f),
            Avg => "AVG".fmt(f),
            Min => "MIN".fmt(f),
            Max => "MAX".fmt(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum Expr {
    Constant(Constant),
    Column(ColName),
    Comparison {
        lhs: Box<Expr>,
        op: CompOp,
        rhs: Box<Expr>,
    },
    Arith {
        lhs: Box<Expr>,
        op: ArithOp,
        rhs: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    /// Aggregate call; `arg` of `None` is `COUNT(*)`.
    Aggregate {
        func: AggFunc,
        arg: Option<Box<Expr>>,
    },
}

impl Expr {
    /// Whether any aggregate call occurs in this expression.
    pub fn has_aggregate(&self) -> bool {
        match self {
            Expr::Constant(_) | Expr::Column(_) => false,
            Expr::Comparison { lhs, rhs, .. } | Expr::Arith { lhs, rhs, .. } => {
                lhs.has_aggregate() || rhs.has_aggregate()
            }
            Expr::And(a, b) | Expr::Or(a, b) => a.has_aggregate() || b.has_aggregate(),
            Expr::Not(e) => e.has_aggregate(),
            Expr::Aggregate { .. } => true,
        }
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Constant(c) => c.fmt(f),
            Expr::Column(c) => c.fmt(f),
            Expr::Comparison { lhs, op, rhs } => write!(f, "{} {} {}", lhs, op, rhs),
            Expr::Arith { lhs, op, rhs } => write!(f, "{} {} {}", lhs, op, rhs),
            Expr::And(a, b) => write!(f, "({} AND {})", a, b),
            Expr::Or(a, b) => write!(f, "({} OR {})", a, b),
            Expr::Not(e) => write!(f, "(NOT {})", e),
            Expr::Aggregate { func, arg } => match arg {
                Some(e) => write!(f, "{}({})", func, e),
                None => write!(f, "{}(*)", func),
            },
        }
    }
}
