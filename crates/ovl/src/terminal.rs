//! Terminal UI utilities for progress indication and styled output.

use std::borrow::Cow;
use std::fmt::Write as _;
use std::io::{self, Write};
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Spinner for indeterminate progress.
pub struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    /// Create a new spinner with a message.
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        let bar = ProgressBar::new_spinner();
        let spinner_style = ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(spinner_style);
        bar.set_message(message);
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    /// Finish the spinner with a success message.
    pub fn finish_with_success(&self, message: &str) {
        self.bar.finish_and_clear();
        success(message);
    }

    /// Finish the spinner with a failure message.
    pub fn finish_with_failure(&self, message: &str) {
        self.bar.finish_and_clear();
        error(message);
    }

    /// Suspend the spinner while `f` runs, so log output is not garbled.
    pub fn suspend<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.bar.suspend(f)
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

/// Print a success message to stderr.
pub fn success(message: &str) {
    eprintln!("{} {}", style("✓").green().bold(), message);
}

/// Print an error message to stderr.
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

/// Print a warning message to stderr.
pub fn warning(message: &str) {
    eprintln!("{} {}", style("!").yellow().bold(), message);
}

/// Print a header/section title.
pub fn header(message: &str) {
    eprintln!("\n{}", style(message).bold());
}

/// Print a path output (like "-> /path/to/file").
pub fn path_output(path: &std::path::Path) {
    eprintln!("  {} {}", style("→").dim(), style(path.display()).dim());
}

/// Track progress through multiple steps.
pub struct StepTracker {
    current: usize,
    total: usize,
}

impl StepTracker {
    pub const fn new(total: usize) -> Self {
        Self { current: 0, total }
    }

    /// Start the next step with a message.
    pub fn step(&mut self, message: &str) -> Spinner {
        self.current += 1;
        Spinner::new(format!("[{}/{}] {}", self.current, self.total, message))
    }
}

/// Column alignment.
#[derive(Clone, Copy, Default)]
pub enum Alignment {
    #[default]
    Left,
    Right,
}

/// A markdown table printed to stdout.
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    alignments: Vec<Alignment>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| (*h).to_string()).collect(),
            rows: Vec::new(),
            alignments: vec![Alignment::Left; headers.len()],
        }
    }

    pub fn with_alignments(mut self, alignments: Vec<Alignment>) -> Self {
        self.alignments = alignments;
        self
    }

    pub fn add_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    /// Render the table as a markdown table.
    pub fn render(&self) -> String {
        let mut widths: Vec<usize> = self.headers.iter().map(String::len).collect();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let mut output = String::from("|");
        for (header, &w) in self.headers.iter().zip(&widths) {
            let _ = write!(output, " {header:^w$} |");
        }
        output.push_str("\n|");
        for (i, &w) in widths.iter().enumerate() {
            let _ = match self.alignments.get(i).copied().unwrap_or_default() {
                Alignment::Left => write!(output, ":{:-<w$}|", "", w = w + 1),
                Alignment::Right => write!(output, "{:-<w$}:|", "", w = w + 1),
            };
        }
        output.push('\n');

        for row in &self.rows {
            output.push('|');
            for (i, (cell, &w)) in row.iter().zip(&widths).enumerate() {
                let _ = match self.alignments.get(i).copied().unwrap_or_default() {
                    Alignment::Left => write!(output, " {cell:<w$} |"),
                    Alignment::Right => write!(output, " {cell:>w$} |"),
                };
            }
            output.push('\n');
        }
        output
    }

    /// Print the table to stdout.
    pub fn print(&self) {
        print!("{}", self.render());
        let _ = io::stdout().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_render() {
        let mut table = Table::new(&["routine", "blocks"])
            .with_alignments(vec![Alignment::Left, Alignment::Right]);
        table.add_row(vec!["main".to_string(), "12".to_string()]);
        assert_eq!(
            table.render(),
            "| routine | blocks |\n|:--------|-------:|\n| main    |     12 |\n"
        );
    }
}
