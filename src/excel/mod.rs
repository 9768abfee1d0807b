//! Upload validation and spreadsheet decoding

pub mod reader;

pub use reader::{ACCEPTED_EXTENSIONS, RawTable, read_table, select_sheet, validate_upload};
