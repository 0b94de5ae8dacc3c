//! Import types shared by the spreadsheet pipeline

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// One parsed data row: canonical column key → raw cell text
pub type RawRow = HashMap<String, String>;

/// Accepted upload formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpreadsheetFormat {
    Csv,
    Xlsx,
    Xls,
}

impl SpreadsheetFormat {
    /// Detect the format from the file extension (case-insensitive)
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let ext = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(Self::Csv),
            "xlsx" => Some(Self::Xlsx),
            "xls" => Some(Self::Xls),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
            Self::Xls => "xls",
        }
    }
}

/// Import issue level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportIssueLevel {
    Warning,
    Error,
}

/// Single row-level import issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportIssue {
    /// 1-based position in the processed data stream (heading row excluded)
    pub row_number: u64,
    pub level: ImportIssueLevel,
    pub field: String,
    pub message: String,
    pub original_value: Option<String>,
}

impl ImportIssue {
    pub fn error(row_number: u64, field: &str, message: impl Into<String>, original_value: Option<String>) -> Self {
        Self {
            row_number,
            level: ImportIssueLevel::Error,
            field: field.to_string(),
            message: message.into(),
            original_value,
        }
    }

    pub fn warning(row_number: u64, field: &str, message: impl Into<String>, original_value: Option<String>) -> Self {
        Self {
            row_number,
            level: ImportIssueLevel::Warning,
            field: field.to_string(),
            message: message.into(),
            original_value,
        }
    }
}

/// Final accounting of one import run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    /// Records flagged archived before the run started
    pub archived_count: u64,
    /// Data rows read from the file (valid, rejected and blank)
    pub processed_rows: u64,
    pub inserted_count: u64,
    /// Entirely blank rows, silently skipped
    pub skipped_count: u64,
    pub rejected_count: u64,
    pub warning_count: u64,
    /// Row issues in file order; each level is capped separately so
    /// warnings never crowd out rejections
    pub issues: Vec<ImportIssue>,
    pub duration_ms: u64,
    #[serde(skip)]
    pub(crate) reported_errors: usize,
    #[serde(skip)]
    pub(crate) reported_warnings: usize,
}

/// Upper bound on the rejection issues kept in a summary
pub const MAX_REPORTED_ERRORS: usize = 500;
/// Upper bound on the warning issues kept in a summary
pub const MAX_REPORTED_WARNINGS: usize = 100;

impl ImportSummary {
    pub fn push_issue(&mut self, issue: ImportIssue) {
        let (reported, cap) = match issue.level {
            ImportIssueLevel::Warning => {
                self.warning_count += 1;
                (&mut self.reported_warnings, MAX_REPORTED_WARNINGS)
            }
            ImportIssueLevel::Error => (&mut self.reported_errors, MAX_REPORTED_ERRORS),
        };
        if *reported < cap {
            *reported += 1;
            self.issues.push(issue);
        }
    }

    /// Up to `limit` issues, rejections before warnings
    pub fn leading_issues(&self, limit: usize) -> Vec<ImportIssue> {
        let errors = self.issues.iter().filter(|i| i.level == ImportIssueLevel::Error);
        let warnings = self.issues.iter().filter(|i| i.level == ImportIssueLevel::Warning);
        errors.chain(warnings).take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_file_name() {
        assert_eq!(SpreadsheetFormat::from_file_name("list.csv"), Some(SpreadsheetFormat::Csv));
        assert_eq!(SpreadsheetFormat::from_file_name("LIST.XLSX"), Some(SpreadsheetFormat::Xlsx));
        assert_eq!(SpreadsheetFormat::from_file_name("old.xls"), Some(SpreadsheetFormat::Xls));
        assert_eq!(SpreadsheetFormat::from_file_name("notes.txt"), None);
        assert_eq!(SpreadsheetFormat::from_file_name("no_extension"), None);
    }

    #[test]
    fn test_issue_serializes_camel_case() {
        let issue = ImportIssue::error(3, "school", "The school field is required.", None);
        let json = serde_json::to_string(&issue).unwrap();
        assert!(json.contains("rowNumber"));
        assert!(json.contains("\"level\":\"error\""));
        assert!(json.contains("originalValue"));
    }

    #[test]
    fn test_summary_caps_warnings_but_keeps_counting_them() {
        let mut summary = ImportSummary::default();
        for row in 0..(MAX_REPORTED_WARNINGS as u64 + 10) {
            summary.push_issue(ImportIssue::warning(row + 1, "area", "unknown", None));
        }
        assert_eq!(summary.issues.len(), MAX_REPORTED_WARNINGS);
        assert_eq!(summary.warning_count, MAX_REPORTED_WARNINGS as u64 + 10);
    }

    #[test]
    fn test_rejection_after_many_warnings_is_kept() {
        let mut summary = ImportSummary::default();
        for row in 1..=600 {
            summary.push_issue(ImportIssue::warning(row, "account_status", "Unknown account status", None));
        }
        summary.push_issue(ImportIssue::error(601, "account_status", "The account status field is required.", None));

        let errors: Vec<&ImportIssue> = summary
            .issues
            .iter()
            .filter(|i| i.level == ImportIssueLevel::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].row_number, 601);
        assert_eq!(summary.warning_count, 600);
    }

    #[test]
    fn test_leading_issues_put_rejections_first() {
        let mut summary = ImportSummary::default();
        summary.push_issue(ImportIssue::warning(1, "client_status", "unknown", None));
        summary.push_issue(ImportIssue::warning(2, "client_status", "unknown", None));
        summary.push_issue(ImportIssue::error(3, "school", "required", None));

        let leading = summary.leading_issues(2);
        assert_eq!(leading.len(), 2);
        assert_eq!(leading[0].row_number, 3);
        assert_eq!(leading[1].row_number, 1);
    }
}
