//! Provides the in-memory representation of one table or result row.

use crate::sql_value::SqlValue;

/// A sequence of values whose column order matches the producing schema or
/// projection.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub items: Vec<SqlValue>,
}

impl Row {
    pub fn new(items: Vec<SqlValue>) -> Row {
        Row { items }
    }

    /// Concatenates two rows, as a join output does.
    pub fn concat(&self, other: &Row) -> Row {
        let mut items = self.items.clone();
        items.extend(other.items.iter().cloned());
        Row { items }
    }
}

impl std::fmt::Display for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields: Vec<String> = self.items.iter().map(|v| format!("{}", v)).collect();
        write!(f, "({})", fields.join(", "))
    }
}
