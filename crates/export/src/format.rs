//! Format-specific chunk encoding.
//!
//! A chunk encodes rows only; whatever belongs exactly once in the artifact
//! (the CSV header) is emitted by the merge step, so chunks can be
//! concatenated in index order.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::source::Row;

/// Target artifact format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Csv,
    JsonLines,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::JsonLines => "jsonl",
        }
    }

    /// Bytes emitted exactly once at the start of the final artifact.
    pub fn header(&self, columns: &[String]) -> Option<Vec<u8>> {
        match self {
            ExportFormat::Csv => Some(csv_line(columns).into_bytes()),
            ExportFormat::JsonLines => None,
        }
    }

    /// Encode one chunk of rows (no header).
    pub fn encode_chunk(&self, columns: &[String], rows: &[Row]) -> Vec<u8> {
        match self {
            ExportFormat::Csv => {
                let mut out = String::new();
                for row in rows {
                    out.push_str(&csv_line(row));
                }
                out.into_bytes()
            }
            ExportFormat::JsonLines => {
                let mut out = Vec::new();
                for row in rows {
                    let object: serde_json::Map<String, serde_json::Value> = columns
                        .iter()
                        .zip(row.iter())
                        .map(|(col, cell)| (col.clone(), serde_json::Value::String(cell.clone())))
                        .collect();
                    // Maps of strings always serialize.
                    if let Ok(line) = serde_json::to_vec(&object) {
                        out.extend_from_slice(&line);
                        out.push(b'\n');
                    }
                }
                out
            }
        }
    }
}

fn csv_line<S: AsRef<str>>(cells: &[S]) -> String {
    let mut line = cells
        .iter()
        .map(|c| csv_field(c.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

fn csv_field(field: &str) -> Cow<'_, str> {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}
