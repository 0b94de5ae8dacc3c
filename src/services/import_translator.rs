//! Maps validated spreadsheet rows onto `NewRecord`s

use chrono::{DateTime, Utc};

use crate::types::{NewRecord, RawRow};

/// Stamps every translated record with the same upload metadata
#[derive(Debug, Clone)]
pub struct ImportTranslator {
    uploaded_by: String,
    upload_date: DateTime<Utc>,
}

impl ImportTranslator {
    /// `uploaded_by` is the identity of the user who submitted the upload.
    pub fn new(uploaded_by: impl Into<String>, upload_date: DateTime<Utc>) -> Self {
        Self {
            uploaded_by: uploaded_by.into(),
            upload_date,
        }
    }

    /// Translate a row that passed validation. Unknown columns are ignored
    /// and absent or blank optional columns become `None`.
    pub fn translate(&self, row: &RawRow) -> NewRecord {
        let text = |key: &str| optional(row, key);
        let required = |key: &str| optional(row, key).unwrap_or_default();

        NewRecord {
            store: required("store"),
            district: required("district"),
            school: required("school"),
            area: required("area"),
            name: required("name"),
            account_status: required("account_status"),
            renewal_remarks: text("renewal_remarks"),
            client_status: required("client_status"),
            gtd: text("gtd"),
            prncpl: text("prncpl"),
            tsndng: text("tsndng"),
            ntrst: text("ntrst"),
            mrtztn: text("mrtztn"),
            ewrbddctn: text("ewrbddctn"),
            nthp: text("nthp"),
            nddctd: text("nddctd"),
            dedstat: text("dedstat"),
            ntprcd: text("ntprcd"),
            mntd: text("mntd"),
            engagement_status: text("engagement_status"),
            progress_report: text("progress_report"),
            priority_to_engage: text("priority_to_engage"),
            action_taken_by: text("action_taken_by"),
            converted: text("converted"),
            converted_by: text("converted_by"),
            is_archived: false,
            upload_date: self.upload_date,
            uploaded_by: self.uploaded_by.clone(),
        }
    }
}

fn optional(row: &RawRow, key: &str) -> Option<String> {
    row.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
