//! Shared ServiceNow REST types and endpoint constants

use serde::Deserialize;

use crate::models::{AttachmentRecord, OwnerLabel};

/// ServiceNow REST endpoint paths
pub struct SnowApi;

impl SnowApi {
    pub const ATTACHMENT_TABLE_ENDPOINT: &'static str = "/api/now/v2/table/sys_attachment";
    pub const TABLE_ENDPOINT: &'static str = "/api/now/v2/table";
    pub const ATTACHMENT_ENDPOINT: &'static str = "/api/now/v1/attachment";
}

/// Envelope of every table API response
#[derive(Debug, Deserialize)]
pub struct TableResponse<T> {
    pub result: T,
}

pub type AttachmentListResponse = TableResponse<Vec<AttachmentRecord>>;

pub type OwnerRecordResponse = TableResponse<OwnerRecord>;

/// The fields of an owner record needed to label its directory
#[derive(Debug, Deserialize)]
pub struct OwnerRecord {
    /// Task number, present on task-derived tables
    #[serde(default)]
    pub number: Option<String>,

    #[serde(default)]
    pub sys_id: Option<String>,
}

impl OwnerRecord {
    /// Task number when set, otherwise the record identifier
    pub fn label(self, requested_id: &str) -> OwnerLabel {
        match self.number {
            Some(number) if !number.trim().is_empty() => OwnerLabel::TaskNumber(number),
            _ => OwnerLabel::RecordId(
                self.sys_id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| requested_id.to_string()),
            ),
        }
    }
}
