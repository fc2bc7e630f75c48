//! Defines an enum of the SQL column types we support and routines for conversion to and from string.
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// These are the SQL column types that can be stored in a table.
/// `REAL` is not here on purpose: fractional values exist only at runtime
/// (as the result of `AVG`) and cannot be declared as a column type.
pub enum SqlType {
    Int,
    Str,
}

impl std::fmt::Display for SqlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlType::Int => write!(f, "INT"),
            SqlType::Str => write!(f, "STR"),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseSqlTypeError;

impl FromStr for SqlType {
    type Err = ParseSqlTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INT" | "INTEGER" => Ok(SqlType::Int),
            "STR" | "TEXT" | "STRING" => Ok(SqlType::Str),
            _ => Err(ParseSqlTypeError),
        }
    }
}

#[test]
fn test_sql_type_from_str() {
    assert_eq!(SqlType::from_str("int"), Ok(SqlType::Int));
    assert_eq!(SqlType::from_str("INTEGER"), Ok(SqlType::Int));
    assert_eq!(SqlType::from_str("tExT"), Ok(SqlType::Str));
    assert_eq!(SqlType::from_str("STR"), Ok(SqlType::Str));
    assert_eq!(SqlType::from_str("blob"), Err(ParseSqlTypeError));
}
