//! Console output helpers shared by the text and JSON report formats.

use colored::Colorize;
use serde::Serialize;

use crate::OutputFormat;

/// Print a serializable result. JSON goes to stdout as one document; text
/// mode prints nothing here, the caller renders its own lines.
pub fn print<T: Serialize>(value: &T, format: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    if let OutputFormat::Json = format {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("{}: failed to serialize report: {}", "Error".red().bold(), e),
        }
    }
}

/// Informational line, text mode only.
pub fn info(message: &str, format: OutputFormat, quiet: bool) {
    if quiet || matches!(format, OutputFormat::Json) {
        return;
    }
    println!("{} {}", "→".blue(), message);
}

pub fn success(message: &str, format: OutputFormat, quiet: bool) {
    if quiet || matches!(format, OutputFormat::Json) {
        return;
    }
    println!("{} {}", "✓".green().bold(), message);
}

/// Warnings go to stderr so they never mix with a JSON report.
pub fn warn(message: &str, quiet: bool) {
    if quiet {
        return;
    }
    eprintln!("{} {}", "!".yellow().bold(), message);
}

/// Space separated label list, as printed by the summary lines.
pub fn label_list(labels: &[i32]) -> String {
    labels
        .iter()
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
