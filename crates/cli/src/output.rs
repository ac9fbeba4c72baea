//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
    /// One `field  value` line per column
    Plain,
}

/// Row rendering for table and plain output
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

/// Print one record
pub fn print_item<T: Serialize + TableDisplay>(item: &T, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Yaml => print_value(item, format),
        _ => print_rows(std::slice::from_ref(item), format),
    }
}

/// Print records, or a note when there are none
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Yaml => print_value(items, format),
        _ if items.is_empty() => println!("No clients found."),
        _ => print_rows(items, format),
    }
}

fn print_rows<T: TableDisplay>(items: &[T], format: OutputFormat) {
    if let OutputFormat::Table = format {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(T::headers());
        for item in items {
            table.add_row(item.row());
        }
        println!("{table}");
        return;
    }

    let headers = T::headers();
    let width = headers.iter().map(|h| h.len()).max().unwrap_or(0);
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            println!();
        }
        for (header, value) in headers.iter().zip(item.row()) {
            println!("{:width$}  {}", header, value, width = width);
        }
    }
}

/// Print any serializable value as JSON or YAML; other formats fall back to JSON
pub fn print_value<T: Serialize + ?Sized>(value: &T, format: OutputFormat) {
    match format {
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(value).unwrap_or_default());
        }
        _ => {
            println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
        }
    }
}

// Status lines go to stderr; stdout carries only command output.

pub fn print_success(message: &str) {
    eprintln!("{} {}", "✓".green(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

pub fn print_warning(message: &str) {
    eprintln!("{} {}", "!".yellow(), message);
}

pub fn print_info(message: &str) {
    eprintln!("{} {}", "i".blue(), message);
}

/// Human-readable byte count
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
