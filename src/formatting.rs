//! formatting renders query results as bordered text tables for the
//! REPL.

use crate::connection::QueryResult;

/// Renders a result set like:
///
/// ```text
/// +----+-------+
/// | id | name  |
/// +----+-------+
/// | 1  | Alice |
/// +----+-------+
/// ```
pub fn format_table(result: &QueryResult) -> String {
    let mut widths: Vec<usize> = result.col_names.iter().map(|n| n.len()).collect();
    let rendered: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|r| r.items.iter().map(|v| format!("{}", v)).collect())
        .collect();
    for row in &rendered {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() && cell.len() > widths[i] {
                widths[i] = cell.len();
            }
        }
    }

    let border: String = {
        let mut s = String::from("+");
        for w in &widths {
            s.push_str(&"-".repeat(w + 2));
            s.push('+');
        }
        s.push('\n');
        s
    };
    let format_row = |cells: &[String]| -> String {
        let mut s = String::from("|");
        for (i, w) in widths.iter().enumerate() {
            let cell = cells.get(i).map(String::as_str).unwrap_or("");
            s.push_str(&format!(" {:<width$} |", cell, width = w));
        }
        s.push('\n');
        s
    };

    let mut out = String::new();
    out.push_str(&border);
    out.push_str(&format_row(&result.col_names));
    out.push_str(&border);
    for row in &rendered {
        out.push_str(&format_row(row));
    }
    out.push_str(&border);
    out
}
