//! Row validation for spreadsheet imports
//!
//! A row is either blank (skipped silently), valid (possibly with warnings
//! about unrecognised status values) or rejected with one issue per missing
//! required field. Rejections never stop the surrounding batch.

use crate::types::{
    is_known_value, ImportIssue, RawRow, ACCOUNT_STATUSES, CLIENT_STATUSES, ELIGIBILITY_VALUES,
};

/// Columns that must be present and non-blank in every data row
pub const REQUIRED_COLUMNS: [&str; 7] = [
    "store",
    "name",
    "account_status",
    "school",
    "district",
    "client_status",
    "area",
];

/// Outcome of validating one row
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    /// Every cell is blank
    Blank,
    /// Row can be translated; carries non-blocking warnings
    Valid(Vec<ImportIssue>),
    /// Row must not be inserted
    Rejected(Vec<ImportIssue>),
}

#[derive(Debug, Clone)]
pub struct RowValidator {
    required: Vec<&'static str>,
}

impl Default for RowValidator {
    fn default() -> Self {
        Self {
            required: REQUIRED_COLUMNS.to_vec(),
        }
    }
}

impl RowValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a row. `row_number` is the 1-based position in the data stream.
    pub fn validate(&self, row_number: u64, row: &RawRow) -> RowOutcome {
        if is_blank_row(row) {
            return RowOutcome::Blank;
        }

        let errors: Vec<ImportIssue> = self
            .required
            .iter()
            .filter(|column| is_blank(row.get(**column)))
            .map(|column| {
                ImportIssue::error(
                    row_number,
                    column,
                    format!("The {} field is required.", column),
                    row.get(*column).cloned(),
                )
            })
            .collect();

        if !errors.is_empty() {
            return RowOutcome::Rejected(errors);
        }

        RowOutcome::Valid(known_value_warnings(row_number, row))
    }
}

fn is_blank(value: Option<&String>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

fn is_blank_row(row: &RawRow) -> bool {
    row.values().all(|v| v.trim().is_empty())
}

fn known_value_warnings(row_number: u64, row: &RawRow) -> Vec<ImportIssue> {
    let checks: [(&str, &[&str]); 3] = [
        ("account_status", &ACCOUNT_STATUSES),
        ("renewal_remarks", &ELIGIBILITY_VALUES),
        ("client_status", &CLIENT_STATUSES),
    ];

    checks
        .iter()
        .filter_map(|(column, known)| {
            let value = row.get(*column).filter(|v| !v.trim().is_empty())?;
            if is_known_value(known, value) {
                return None;
            }
            Some(ImportIssue::warning(
                row_number,
                column,
                format!("Unrecognised {} '{}'", column, value.trim()),
                Some(value.clone()),
            ))
        })
        .collect()
}
