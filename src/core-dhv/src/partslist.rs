//! Parts-list (`.xlsx`) parsing for bulk-upload jobs.
//!
//! Layout: header row skipped; column A is the part number (non-empty),
//! column B the PDF URL (`http://` or `https://`). Rows that fail
//! validation are rejected up-front and only counted.

use std::path::Path;

use calamine::{Data, Reader, open_workbook_auto};

use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartsRow {
    pub part_number: String,
    pub pdf_url: String,
}

#[derive(Debug, Default)]
pub struct ParsedPartsList {
    pub rows: Vec<PartsRow>,
    pub rejected: usize,
}

pub fn parse_parts_list(path: &Path) -> Result<ParsedPartsList, Error> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| Error::PartsList(format!("Failed to open workbook: {}", e)))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| Error::PartsList("Workbook has no sheets".to_string()))?
        .map_err(|e| Error::PartsList(format!("Failed to read sheet: {}", e)))?;

    let mut parsed = ParsedPartsList::default();

    for row in range.rows().skip(1) {
        let part_number = row.first().map(cell_to_string).unwrap_or_default();
        let pdf_url = row.get(1).map(cell_to_string).unwrap_or_default();

        // fully empty rows are trailing padding, not data
        if part_number.is_empty() && pdf_url.is_empty() {
            continue;
        }

        match validate_row(&part_number, &pdf_url) {
            Ok(row) => parsed.rows.push(row),
            Err(reason) => {
                tracing::warn!("Rejecting parts-list row ({}): {} | {}", reason, part_number, pdf_url);
                parsed.rejected += 1;
            }
        }
    }

    Ok(parsed)
}

/// Validates one data row. Returns the cleaned row or the rejection reason.
pub fn validate_row(part_number: &str, pdf_url: &str) -> Result<PartsRow, &'static str> {
    let part_number = part_number.trim();
    let pdf_url = pdf_url.trim();

    if part_number.is_empty() {
        return Err("missing part number");
    }
    if pdf_url.is_empty() {
        return Err("missing URL");
    }
    if !pdf_url.starts_with("http://") && !pdf_url.starts_with("https://") {
        return Err("URL must start with http:// or https://");
    }

    Ok(PartsRow {
        part_number: part_number.to_string(),
        pdf_url: pdf_url.to_string(),
    })
}

/// Spreadsheet cells holding part numbers are frequently numeric; an
/// integral float renders without the trailing `.0`.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Empty => String::new(),
        other => other.to_string().trim().to_string(),
    }
}
