//! snowgrab: bulk download of ServiceNow attachments into per-record folders.
//!
//! ```text
//! <base>/<owner table>/<task number or record id>/<file name>[k].<ext>
//! ```

pub mod config;
pub mod downloader;
pub mod models;
pub mod paths;
pub mod servicenow;

pub use config::{Config, ConfigError, ConfigOverrides, InstanceConfig};
pub use downloader::{download_attachments, Downloader, FailedAttachment, RunSummary};
pub use models::{AttachmentRecord, ErrorKind, OwnerLabel};
pub use servicenow::{RecordClient, SnowError};
