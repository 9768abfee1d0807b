// Header matching service
//
// Pure logic for mapping raw spreadsheet headers onto a dataset schema,
// decoupled from file decoding and reusable across datasets.

pub mod core;
pub mod models;

pub use core::match_headers;
pub use models::{HeaderMapping, MatchType};
