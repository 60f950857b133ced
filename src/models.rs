use serde::{Deserialize, Deserializer};
use std::fmt;

/// Attachment metadata as returned by the `sys_attachment` table query.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AttachmentRecord {
    /// Attachment sys_id
    #[serde(rename = "sys_id")]
    pub id: String,

    /// Original file name; not unique and not filesystem-safe
    #[serde(rename = "file_name", default)]
    pub file_name: String,

    /// Table of the record this attachment belongs to
    #[serde(rename = "table_name", default)]
    pub owner_table: String,

    /// sys_id of the owning record inside `owner_table`
    #[serde(rename = "table_sys_id", default)]
    pub owner_record_id: String,

    /// Informational only; the table API serialises numbers as strings
    #[serde(rename = "size_bytes", default, deserialize_with = "lenient_u64")]
    pub size_bytes: u64,
}

/// Human-readable directory label for an owner record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerLabel {
    /// Task number such as `INC0010001`
    TaskNumber(String),
    /// Raw record identifier, used when the record has no number
    RecordId(String),
}

impl OwnerLabel {
    pub fn as_str(&self) -> &str {
        match self {
            OwnerLabel::TaskNumber(s) => s,
            OwnerLabel::RecordId(s) => s,
        }
    }
}

impl fmt::Display for OwnerLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-attachment pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentState {
    Listed,
    OwnerResolving,
    DirectoryReady,
    Downloading,
    Done,
    Failed,
}

impl AttachmentState {
    pub fn as_str(&self) -> &str {
        match self {
            AttachmentState::Listed => "listed",
            AttachmentState::OwnerResolving => "owner-resolving",
            AttachmentState::DirectoryReady => "directory-ready",
            AttachmentState::Downloading => "downloading",
            AttachmentState::Done => "done",
            AttachmentState::Failed => "failed",
        }
    }
}

/// Error classification reported for a failed attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Remote,
    MalformedResponse,
    Filesystem,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorKind::Remote => "RemoteError",
            ErrorKind::MalformedResponse => "MalformedResponseError",
            ErrorKind::Filesystem => "FilesystemError",
            ErrorKind::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts `"1234"`, `1234`, `""` or null.
fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        Text(String),
    }

    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(0),
        Some(NumberOrString::Number(n)) => Ok(n),
        Some(NumberOrString::Text(s)) if s.trim().is_empty() => Ok(0),
        Some(NumberOrString::Text(s)) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
