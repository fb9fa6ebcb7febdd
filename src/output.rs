//! Output formatting for CLI results

use chrono::Utc;
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Rows},
};

use offsync::Result;

use crate::cli::OutputFormat;

/// JSON envelope: the payload plus when and by which version it was produced
#[derive(Debug, Serialize)]
pub struct JsonOutput<'a, T: ?Sized> {
    pub data: &'a T,
    pub meta: Metadata,
}

#[derive(Debug, Serialize)]
pub struct Metadata {
    pub timestamp: String,
    pub version: &'static str,
}

/// Format data as pretty-printed JSON inside the envelope
pub fn format_json<T: Serialize + ?Sized>(data: &T) -> Result<String> {
    let output = JsonOutput {
        data,
        meta: Metadata {
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION"),
        },
    };
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Format rows as a rounded table, or `empty` when there are none
pub fn format_table<T: Tabled>(rows: &[T], empty: &str) -> String {
    if rows.is_empty() {
        return empty.to_string();
    }

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));
    table.to_string()
}

/// Print a list in the requested format
pub fn print_list<T: Tabled + Serialize>(rows: &[T], format: OutputFormat, empty: &str) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", format_table(rows, empty)),
        OutputFormat::Json => println!("{}", format_json(rows)?),
    }
    Ok(())
}
