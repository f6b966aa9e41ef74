//! # Snapshot Export
//!
//! Serializes records as CSV, a single-sheet XLSX workbook or a JSON array of
//! objects. Every format carries the same three columns in the same order:
//! `id`, `plate_number`, `call_sign`.
//!
//! The workbook is written by hand as a zip of the minimal SpreadsheetML
//! parts, with every value stored as an inline string.

use std::fmt;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zip::write::FileOptions;

use crate::connections::Record;

const COLUMNS: [&str; 3] = ["id", "plate_number", "call_sign"];
const SHEET_NAME: &str = "alpha";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("No data available to export")]
    NoData,
    #[error("Failed to write export file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to build workbook: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Excel,
    Json,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [ExportFormat::Csv, ExportFormat::Excel, ExportFormat::Json];

    /// Download file name.
    pub fn file_name(self) -> &'static str {
        match self {
            ExportFormat::Csv => "vehicle_data.csv",
            ExportFormat::Excel => "vehicle_data.xlsx",
            ExportFormat::Json => "vehicle_data.json",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Excel => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            ExportFormat::Json => "application/json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "excel" | "xlsx" => Ok(ExportFormat::Excel),
            "json" => Ok(ExportFormat::Json),
            other => Err(format!("unknown export format '{}' (expected csv, excel or json)", other)),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportFormat::Csv => "CSV",
            ExportFormat::Excel => "Excel",
            ExportFormat::Json => "JSON",
        })
    }
}

/// Encodes `records` in `format`. An empty slice is refused.
pub fn export(records: &[Record], format: ExportFormat) -> Result<Vec<u8>, ExportError> {
    if records.is_empty() {
        return Err(ExportError::NoData);
    }
    match format {
        ExportFormat::Csv => Ok(to_csv(records).into_bytes()),
        ExportFormat::Excel => to_xlsx(records),
        ExportFormat::Json => to_json(records).map(String::into_bytes),
    }
}

/// Exports into `dir` under the format's file name and returns the path written.
pub fn write_export(records: &[Record], format: ExportFormat, dir: &Path) -> Result<PathBuf, ExportError> {
    let bytes = export(records, format)?;
    fs::create_dir_all(dir)?;
    let path = dir.join(format.file_name());
    fs::write(&path, bytes)?;
    log::info!("Exported {} records as {} to {}", records.len(), format, path.display());
    Ok(path)
}

fn fields(record: &Record) -> [Option<&str>; 3] {
    [
        Some(record.id.as_str()),
        record.plate_number.as_deref(),
        record.call_sign.as_deref(),
    ]
}

/// RFC 4180: CRLF line ends, quoting only where needed, nulls as empty fields.
pub fn to_csv(records: &[Record]) -> String {
    let mut out = String::new();
    out.push_str(&COLUMNS.join(","));
    out.push_str("\r\n");
    for record in records {
        let line: Vec<String> = fields(record)
            .iter()
            .map(|f| csv_field(f.unwrap_or("")))
            .collect();
        out.push_str(&line.join(","));
        out.push_str("\r\n");
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Pretty-printed array of `{id, plate_number, call_sign}` objects.
pub fn to_json(records: &[Record]) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(records)?)
}

pub fn to_xlsx(records: &[Record]) -> Result<Vec<u8>, ExportError> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::<'_, ()>::default().compression_method(zip::CompressionMethod::Deflated);

    let parts: [(&str, String); 5] = [
        ("[Content_Types].xml", CONTENT_TYPES.to_string()),
        ("_rels/.rels", ROOT_RELS.to_string()),
        ("xl/workbook.xml", workbook_xml()),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.to_string()),
        ("xl/worksheets/sheet1.xml", sheet_xml(records)),
    ];
    for (name, body) in parts {
        zip.start_file(name, options)?;
        zip.write_all(body.as_bytes())?;
    }

    Ok(zip.finish()?.into_inner())
}

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

fn workbook_xml() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
        SHEET_NAME
    )
}

fn sheet_xml(records: &[Record]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );

    let header = COLUMNS.map(Some);
    let rows = std::iter::once(header).chain(records.iter().map(fields));
    for (i, row) in rows.enumerate() {
        let r = i + 1;
        xml.push_str(&format!(r#"<row r="{}">"#, r));
        for (col, value) in row.iter().enumerate() {
            // Null cells are left out entirely.
            if let Some(v) = value {
                xml.push_str(&format!(
                    r#"<c r="{}{}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                    column_letter(col),
                    r,
                    xml_escape(v)
                ));
            }
        }
        xml.push_str("</row>");
    }

    xml.push_str("</sheetData></worksheet>");
    xml
}

fn column_letter(index: usize) -> char {
    (b'A' + index as u8) as char
}

/// Escapes markup characters and drops control characters XML 1.0 cannot carry.
fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push(c),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}
