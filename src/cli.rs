use clap::Parser;
use std::path::PathBuf;

use snowgrab::config::ConfigOverrides;

/// Command line flags; each one overrides the matching SNOWGRAB_* environment variable.
#[derive(Parser, Debug)]
#[command(name = "snowgrab")]
#[command(about = "Bulk-download ServiceNow attachments into per-record folders")]
#[command(version)]
pub struct Cli {
    /// Instance host name (e.g. dev1234.service-now.com) or base URL
    #[arg(long)]
    pub instance: Option<String>,

    /// User name for basic authentication
    #[arg(short, long)]
    pub username: Option<String>,

    /// Password for basic authentication
    #[arg(short, long)]
    pub password: Option<String>,

    /// Encoded query selecting attachments (passed through as-is)
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Base output directory [default: ./attachments]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Maximum number of attachments downloaded at once [default: 5]
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Look up each owner record once and share the label
    #[arg(long)]
    pub cache_owner_labels: bool,

    /// Leave partially downloaded files on disk when a download fails
    #[arg(long)]
    pub keep_partial_files: bool,
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            instance: self.instance.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            filter: self.filter.clone(),
            download_dir: self.output.clone(),
            log_file: self.log_file.clone(),
            concurrency: self.concurrency,
            cache_owner_labels: self.cache_owner_labels,
            keep_partial_files: self.keep_partial_files,
        }
    }
}
