//! Print helpers for the operator-facing subcommands.
//!
//! Reports go to stdout, failures to stderr. Script labels and qualified
//! table names run long, so the aligned helpers reserve wide name columns.

use std::fmt::Display;
use std::io::{self, Write};

const RULE_WIDTH: usize = 56;
const LABEL_WIDTH: usize = 34;
const TABLE_WIDTH: usize = 44;

/// Section header with an underline rule.
pub fn section(title: &str) {
    println!("\n{title}\n{}", "─".repeat(RULE_WIDTH));
}

/// Aligned key/value line for configuration summaries.
pub fn key_value(label: &str, value: impl Display) {
    println!("{label:<18} {value}");
}

/// Registry line: a zero-padded script label and its task.
pub fn step(label: &str, task: &str) {
    println!("{label:<LABEL_WIDTH$} {task}");
}

/// Indented per-table line under a step heading.
pub fn table(mark: char, name: &str, detail: impl Display) {
    println!("  {mark} {name:<TABLE_WIDTH$} {detail}");
}

/// Successful status line.
pub fn ok(message: &str) {
    println!("✓ {message}");
}

/// Warning status line.
pub fn warn(message: &str) {
    println!("⚠ {message}");
}

/// Error line, on stderr.
pub fn error(message: &str) {
    eprintln!("✗ {message}");
}

/// Plain single-line note.
pub fn note(message: &str) {
    println!("{message}");
}

/// `Label... ` left open until `progress_done` settles it.
pub fn progress(label: &str) {
    print!("{label}... ");
    let _ = io::stdout().flush();
}

pub fn progress_done(success: bool) {
    println!("{}", if success { "ok" } else { "failed" });
}
