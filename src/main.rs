//! The line-oriented REPL: `pysqlite <dbfile>`.
//!
//! Statements end at `;`.  Meta-commands begin with `.`: `.exit` quits,
//! `.tables` lists user tables.  Exit codes: 0 normal, 1 unrecoverable
//! engine error, 2 usage error.

use std::io::{BufRead, Write};
use std::path::Path;
use std::process::ExitCode;

use pysqlite::formatting::format_table;
use pysqlite::{Connection, StatementResult};

fn main() -> ExitCode {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        eprintln!("usage: {} <dbfile>", args.first().map(String::as_str).unwrap_or("pysqlite"));
        return ExitCode::from(2);
    }
    let mut conn = match Connection::open(Path::new(&args[1])) {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("cannot open {}: {}", args[1], e);
            return ExitCode::from(1);
        }
    };
    match repl(&mut conn) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("fatal: {}", e);
            ExitCode::from(1)
        }
    }
}

fn repl(conn: &mut Connection) -> anyhow::Result<ExitCode> {
    let stdin = std::io::stdin();
    let mut buffer = String::new();
    prompt(&buffer)?;
    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();

        if buffer.is_empty() && trimmed.starts_with('.') {
            match run_meta_command(conn, trimmed) {
                MetaOutcome::Continue => {}
                MetaOutcome::Exit => return Ok(ExitCode::SUCCESS),
            }
            prompt(&buffer)?;
            continue;
        }

        buffer.push_str(&line);
        buffer.push('\n');
        // Statements end at `;` (outside string literals).
        while let Some(semi) = find_statement_end(&buffer) {
            let stmt: String = buffer.drain(..=semi).collect();
            let stmt = stmt.trim_end_matches(';').trim().to_string();
            if !stmt.is_empty() {
                run_statement(conn, &stmt);
            }
        }
        prompt(&buffer)?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Position of the first `;` not inside a single-quoted string.  The
/// `''` escape toggles twice and falls out naturally.
fn find_statement_end(s: &str) -> Option<usize> {
    let mut in_string = false;
    for (i, b) in s.bytes().enumerate() {
        match b {
            b'\'' => in_string = !in_string,
            b';' if !in_string => return Some(i),
            _ => {}
        }
    }
    None
}

fn prompt(buffer: &str) -> anyhow::Result<()> {
    let p = if buffer.trim().is_empty() {
        "pysqlite> "
    } else {
        "     ...> "
    };
    print!("{}", p);
    std::io::stdout().flush()?;
    Ok(())
}

fn run_statement(conn: &mut Connection, sql: &str) {
    match conn.exec(sql) {
        Ok(StatementResult::Rows(result)) => {
            print!("{}", format_table(&result));
        }
        Ok(StatementResult::Affected(n)) => {
            println!("{} row(s) affected", n);
        }
        Ok(StatementResult::Done) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
        }
    }
}

enum MetaOutcome {
    Continue,
    Exit,
}

fn run_meta_command(conn: &mut Connection, command: &str) -> MetaOutcome {
    match command {
        ".exit" => MetaOutcome::Exit,
        ".tables" => {
            match conn.table_names() {
                Ok(names) => {
                    for name in names {
                        println!("{}", name);
                    }
                }
                Err(e) => eprintln!("Error: {}", e),
            }
            MetaOutcome::Continue
        }
        other => {
            eprintln!("unknown command: {} (try .tables or .exit)", other);
            MetaOutcome::Continue
        }
    }
}
