//! Defines an enum of all the possible values that a SQL value can have,
//! and the comparison and arithmetic dispatch over them.

use std::cmp::Ordering;

use crate::errors::{Error, Result};
use crate::sql_type::SqlType;

#[derive(Debug, Clone, PartialEq)]
/// Can hold any value that can flow through the engine.
/// `Int` and `Str` are the storable types; `Null` is a distinct value with
/// its own type tag; `Real` only arises at runtime as the result of `AVG`
/// and is rejected by the row codec.
pub enum SqlValue {
    Null,
    Int(i64),
    Str(String),
    Real(f64),
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Int(x) => write!(f, "{}", x),
            SqlValue::Str(x) => write!(f, "{}", x),
            SqlValue::Real(x) => write!(f, "{}", x),
        }
    }
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "NULL",
            SqlValue::Int(_) => "INT",
            SqlValue::Str(_) => "STR",
            SqlValue::Real(_) => "REAL",
        }
    }

    /// Whether this value can be stored in a column of type `t`.
    /// NULLs pass here; nullability is checked separately.
    pub fn fits(&self, t: SqlType) -> bool {
        matches!(
            (self, t),
            (SqlValue::Null, _) | (SqlValue::Int(_), SqlType::Int) | (SqlValue::Str(_), SqlType::Str)
        )
    }
}

/// Compares two values for expression evaluation.
/// Returns `None` if either side is NULL (a NULL comparison is never a
/// match).  Mixing INT and STR is a runtime type error.
pub fn cmp_values(a: &SqlValue, b: &SqlValue) -> Result<Option<Ordering>> {
    use SqlValue::*;
    match (a, b) {
        (Null, _) | (_, Null) => Ok(None),
        (Int(x), Int(y)) => Ok(Some(x.cmp(y))),
        // Byte-wise comparison of the UTF-8 encoding; no collation.
        (Str(x), Str(y)) => Ok(Some(x.as_bytes().cmp(y.as_bytes()))),
        (Real(x), Real(y)) => Ok(Some(x.partial_cmp(y).unwrap_or(Ordering::Equal))),
        (Int(x), Real(y)) => Ok(Some((*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal))),
        (Real(x), Int(y)) => Ok(Some(x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal))),
        (x, y) => Err(Error::type_err(format!(
            "cannot compare {} with {}",
            x.type_name(),
            y.type_name()
        ))),
    }
}

/// Total order used by ORDER BY and GROUP BY: NULL sorts first, then
/// values by `cmp_values`.
pub fn cmp_for_sort(a: &SqlValue, b: &SqlValue) -> Result<Ordering> {
    use SqlValue::*;
    match (a, b) {
        (Null, Null) => Ok(Ordering::Equal),
        (Null, _) => Ok(Ordering::Less),
        (_, Null) => Ok(Ordering::Greater),
        _ => Ok(cmp_values(a, b)?.unwrap_or(Ordering::Equal)),
    }
}

/// Integer arithmetic with NULL propagation.  Division by zero yields NULL.
pub fn arith(op: crate::ast::ArithOp, a: &SqlValue, b: &SqlValue) -> Result<SqlValue> {
    use crate::ast::ArithOp::*;
    use SqlValue::*;
    match (a, b) {
        (Null, _) | (_, Null) => Ok(Null),
        (Int(x), Int(y)) => Ok(match op {
            Add => Int(x.wrapping_add(*y)),
            Subtract => Int(x.wrapping_sub(*y)),
            Multiply => Int(x.wrapping_mul(*y)),
            Divide => {
                if *y == 0 {
                    Null
                } else {
                    Int(x.wrapping_div(*y))
                }
            }
        }),
        (x, y) => Err(Error::type_err(format!(
            "cannot apply arithmetic to {} and {}",
            x.type_name(),
            y.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SqlValue::*;

    #[test]
    fn test_cmp_values() {
        assert_eq!(cmp_values(&Int(1), &Int(2)).unwrap(), Some(Ordering::Less));
        assert_eq!(
            cmp_values(&Str("a".into()), &Str("ab".into())).unwrap(),
            Some(Ordering::Less)
        );
        assert_eq!(cmp_values(&Null, &Int(1)).unwrap(), None);
        assert_eq!(cmp_values(&Int(1), &Null).unwrap(), None);
        assert!(cmp_values(&Int(1), &Str("a".into())).is_err());
    }

    #[test]
    fn test_cmp_for_sort_nulls_first() {
        assert_eq!(cmp_for_sort(&Null, &Int(-5)).unwrap(), Ordering::Less);
        assert_eq!(cmp_for_sort(&Int(-5), &Null).unwrap(), Ordering::Greater);
        assert_eq!(cmp_for_sort(&Null, &Null).unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_arith() {
        use crate::ast::ArithOp;
        assert_eq!(arith(ArithOp::Add, &Int(2), &Int(3)).unwrap(), Int(5));
        assert_eq!(arith(ArithOp::Divide, &Int(7), &Int(2)).unwrap(), Int(3));
        assert_eq!(arith(ArithOp::Divide, &Int(7), &Int(0)).unwrap(), Null);
        assert_eq!(arith(ArithOp::Multiply, &Null, &Int(2)).unwrap(), Null);
        assert!(arith(ArithOp::Add, &Int(1), &Str("x".into())).is_err());
    }
}
