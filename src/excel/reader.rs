//! Workbook decoding and sheet selection
//!
//! Turns uploaded file bytes into a [`RawTable`]: the header row plus the raw
//! data rows of one selected sheet. Rejections (wrong extension, oversized
//! file, unreadable binary, empty sheet) all happen here, before any row
//! reaches the normalizer.

use std::io::Cursor;

use calamine::{Data, Reader, Sheets, open_workbook_auto_from_rs};

use crate::config::ImportConfig;
use crate::error::ImportError;
use crate::schema::FieldSchema;

/// Tabular extensions the engine accepts.
pub const ACCEPTED_EXTENSIONS: [&str; 2] = ["xls", "xlsx"];

/// One decoded sheet: header row plus raw data rows.
///
/// Produced once per upload and discarded after parsing.
#[derive(Debug, Clone)]
pub struct RawTable {
    /// Name of the sheet the data came from.
    pub sheet_name: String,
    /// First-row header cells, as strings.
    pub headers: Vec<String>,
    /// Data rows (everything after the header row).
    pub rows: Vec<Vec<Data>>,
}

/// Validate filename extension and byte size before any decoding.
pub fn validate_upload(filename: &str, bytes: &[u8], config: &ImportConfig) -> Result<(), ImportError> {
    let extension = filename
        .rsplit('.')
        .next()
        .filter(|ext| !ext.is_empty() && *ext != filename)
        .unwrap_or("")
        .to_lowercase();

    if !ACCEPTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ImportError::UnsupportedFileType {
            extension,
            accepted: ACCEPTED_EXTENSIONS.join(", "),
        });
    }

    if bytes.len() as u64 > config.max_file_bytes {
        return Err(ImportError::FileTooLarge {
            actual: bytes.len() as u64,
            limit: config.max_file_bytes,
        });
    }

    Ok(())
}

/// Pick the sheet to import from.
///
/// An explicitly requested sheet always wins. Otherwise sheet names are
/// searched for the schema's dataset hints (case-insensitive substring),
/// falling back to the first sheet.
pub fn select_sheet(
    sheet_names: &[String],
    schema: &FieldSchema,
    requested: Option<&str>,
) -> Option<String> {
    if let Some(name) = requested {
        return sheet_names.iter().find(|s| s.as_str() == name).cloned();
    }

    for hint in &schema.sheet_hints {
        if let Some(name) = sheet_names
            .iter()
            .find(|s| s.to_lowercase().contains(hint))
        {
            log::debug!("Sheet '{}' selected via hint '{}'", name, hint);
            return Some(name.clone());
        }
    }

    sheet_names.first().cloned()
}

/// Decode uploaded bytes and extract the selected sheet as a [`RawTable`].
pub fn read_table(
    filename: &str,
    bytes: Vec<u8>,
    schema: &FieldSchema,
    requested_sheet: Option<&str>,
    config: &ImportConfig,
) -> Result<RawTable, ImportError> {
    validate_upload(filename, &bytes, config)?;

    let mut workbook: Sheets<Cursor<Vec<u8>>> = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| ImportError::UnreadableWorkbook(e.to_string()))?;

    let sheet_names = workbook.sheet_names().to_vec();
    let sheet_name = select_sheet(&sheet_names, schema, requested_sheet)
        .ok_or_else(|| ImportError::UnreadableWorkbook("workbook has no sheets".to_string()))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| ImportError::UnreadableWorkbook(e.to_string()))?;

    let mut rows = range.rows().map(|r| r.to_vec());
    let header_row = match rows.next() {
        Some(row) => row,
        None => return Err(ImportError::EmptySheet(sheet_name)),
    };

    let headers: Vec<String> = header_row.iter().map(header_to_string).collect();
    let rows: Vec<Vec<Data>> = rows.collect();

    if rows.is_empty() {
        return Err(ImportError::EmptySheet(sheet_name));
    }

    log::info!(
        "Decoded '{}' sheet '{}': {} headers, {} data rows",
        filename,
        sheet_name,
        headers.iter().filter(|h| !h.is_empty()).count(),
        rows.len()
    );

    Ok(RawTable {
        sheet_name,
        headers,
        rows,
    })
}

fn header_to_string(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Empty => String::new(),
        other => other.to_string().trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CIR_SCHEMA, SEGMENT_SCHEMA};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rejects_unknown_extension() {
        let err = validate_upload("tarifs.csv", &[0u8; 4], &ImportConfig::default()).unwrap_err();
        assert!(matches!(err, ImportError::UnsupportedFileType { .. }));
    }

    #[test]
    fn test_rejects_missing_extension() {
        let err = validate_upload("tarifs", &[0u8; 4], &ImportConfig::default()).unwrap_err();
        assert!(matches!(err, ImportError::UnsupportedFileType { .. }));
    }

    #[test]
    fn test_rejects_oversized_file() {
        let config = ImportConfig {
            max_file_bytes: 8,
            ..ImportConfig::default()
        };
        let err = validate_upload("tarifs.xlsx", &[0u8; 16], &config).unwrap_err();
        assert!(matches!(err, ImportError::FileTooLarge { actual: 16, limit: 8 }));
    }

    #[test]
    fn test_accepts_both_tabular_extensions() {
        let config = ImportConfig::default();
        assert!(validate_upload("a.xls", &[0u8; 4], &config).is_ok());
        assert!(validate_upload("a.XLSX", &[0u8; 4], &config).is_ok());
    }

    #[test]
    fn test_sheet_hint_selection() {
        let sheets = names(&["Feuil1", "Requete tarifs", "Notes"]);
        assert_eq!(
            select_sheet(&sheets, &SEGMENT_SCHEMA, None).unwrap(),
            "Requete tarifs"
        );

        let sheets = names(&["Feuil1", "Classification CIR"]);
        assert_eq!(
            select_sheet(&sheets, &CIR_SCHEMA, None).unwrap(),
            "Classification CIR"
        );
    }

    #[test]
    fn test_sheet_fallback_to_first() {
        let sheets = names(&["Feuil1", "Feuil2"]);
        assert_eq!(select_sheet(&sheets, &SEGMENT_SCHEMA, None).unwrap(), "Feuil1");
    }

    #[test]
    fn test_requested_sheet_wins() {
        let sheets = names(&["Feuil1", "Requete tarifs"]);
        assert_eq!(
            select_sheet(&sheets, &SEGMENT_SCHEMA, Some("Feuil1")).unwrap(),
            "Feuil1"
        );
        assert!(select_sheet(&sheets, &SEGMENT_SCHEMA, Some("Missing")).is_none());
    }
}
