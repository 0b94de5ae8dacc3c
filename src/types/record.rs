//! LMT list record types
//!
//! One `Record` is one borrower/account row tied to a school. The
//! store → district → school → area hierarchy is kept as plain strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Known `account_status` values
pub const ACCOUNT_STATUSES: [&str; 7] = [
    "Current",
    "NTB",
    "New Possible PD",
    "Performing Pastdue",
    "Possible Non Performing",
    "Non Performing Pastdue",
    "WRITTEN OFF",
];

/// Known `renewal_remarks` (eligibility) values
pub const ELIGIBILITY_VALUES: [&str; 3] = ["QUALIFIED", "FOR RECOVERY", "NOT QUALIFIED"];

/// Known `client_status` values
pub const CLIENT_STATUSES: [&str; 2] = ["Existing Borrower", "Non-Borrowers"];

/// Case-insensitive membership check against one of the known-value lists
pub fn is_known_value(known: &[&str], value: &str) -> bool {
    let value = value.trim();
    known.iter().any(|k| k.eq_ignore_ascii_case(value))
}

/// Heading aliases accepted by the importer: (heading in file, canonical column)
const COLUMN_ALIASES: &[(&str, &str)] = &[("office", "store")];

/// Map a heading cell to the column key used by the importer.
/// Headings are matched exactly (after trimming); only listed aliases are rewritten.
pub fn canonical_column(heading: &str) -> String {
    let heading = heading.trim();
    COLUMN_ALIASES
        .iter()
        .find(|(alias, _)| *alias == heading)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| heading.to_string())
}

/// Persisted record (row of `data_lmt_lists`)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: i64,

    // Location hierarchy
    pub store: String,
    pub district: String,
    pub school: String,
    pub area: String,

    pub name: String,

    // Status fields
    pub account_status: String,
    pub renewal_remarks: Option<String>,
    pub client_status: String,

    // Ledger columns (copied through as text)
    pub gtd: Option<String>,
    pub prncpl: Option<String>,
    pub tsndng: Option<String>,
    pub ntrst: Option<String>,
    pub mrtztn: Option<String>,
    pub ewrbddctn: Option<String>,
    pub nthp: Option<String>,
    pub nddctd: Option<String>,
    pub dedstat: Option<String>,
    pub ntprcd: Option<String>,
    pub mntd: Option<String>,

    // Engagement workflow
    pub engagement_status: Option<String>,
    pub progress_report: Option<String>,
    pub priority_to_engage: Option<String>,
    pub action_taken_by: Option<String>,
    pub converted: Option<String>,
    pub converted_by: Option<String>,

    // Archival
    pub is_archived: bool,
    pub upload_date: Option<DateTime<Utc>>,
    pub uploaded_by: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Record produced by the import translator, ready for bulk insert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecord {
    pub store: String,
    pub district: String,
    pub school: String,
    pub area: String,
    pub name: String,
    pub account_status: String,
    pub renewal_remarks: Option<String>,
    pub client_status: String,
    pub gtd: Option<String>,
    pub prncpl: Option<String>,
    pub tsndng: Option<String>,
    pub ntrst: Option<String>,
    pub mrtztn: Option<String>,
    pub ewrbddctn: Option<String>,
    pub nthp: Option<String>,
    pub nddctd: Option<String>,
    pub dedstat: Option<String>,
    pub ntprcd: Option<String>,
    pub mntd: Option<String>,
    pub engagement_status: Option<String>,
    pub progress_report: Option<String>,
    pub priority_to_engage: Option<String>,
    pub action_taken_by: Option<String>,
    pub converted: Option<String>,
    pub converted_by: Option<String>,
    pub is_archived: bool,
    pub upload_date: DateTime<Utc>,
    pub uploaded_by: String,
}

/// Request to list records of one generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordListRequest {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    /// Restrict to a single store
    #[serde(default)]
    pub store: Option<String>,
}

impl Default for RecordListRequest {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            offset: 0,
            store: None,
        }
    }
}

fn default_limit() -> i64 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_office_heading_maps_to_store() {
        assert_eq!(canonical_column("office"), "store");
        assert_eq!(canonical_column("  office "), "store");
    }

    #[test]
    fn test_headings_are_case_sensitive() {
        assert_eq!(canonical_column("Office"), "Office");
        assert_eq!(canonical_column("Account_Status"), "Account_Status");
        assert_eq!(canonical_column("account_status"), "account_status");
    }

    #[test]
    fn test_known_values_ignore_case_and_padding() {
        assert!(is_known_value(&ACCOUNT_STATUSES, "written off"));
        assert!(is_known_value(&ACCOUNT_STATUSES, " NTB "));
        assert!(is_known_value(&ELIGIBILITY_VALUES, "For Recovery"));
        assert!(!is_known_value(&CLIENT_STATUSES, "Prospect"));
    }

    #[test]
    fn test_list_request_defaults() {
        let req: RecordListRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.limit, 100);
        assert_eq!(req.offset, 0);
        assert!(req.store.is_none());
    }
}
