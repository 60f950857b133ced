//! Integration test: attachment bodies that arrive slowly or incompletely.
//!
//! Uses a raw TCP server so the response body can be paced byte by byte or
//! cut short of its declared length.

mod common;

use common::raw_server::{self, Reply};
use snowgrab::{download_attachments, Config, ErrorKind, InstanceConfig, RecordClient, SnowError};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn config_for(base_url: &str, dir: &Path) -> Config {
    let mut config = Config::new(
        InstanceConfig {
            host: base_url.to_string(),
            username: "admin".to_string(),
            password: "secret".to_string(),
        },
        "table_name=incident",
    );
    config.download_dir = dir.to_path_buf();
    config.http.timeout_seconds = 1;
    config.retry.max_attempts = 1;
    config
}

#[tokio::test]
async fn body_slower_than_the_timeout_still_downloads() {
    let body: Vec<u8> = (b'a'..=b'z').chain(b'0'..=b'3').collect();
    let served = body.clone();
    let url = raw_server::start(move |path| match path {
        "/api/now/v1/attachment/a1/file" => Reply::Trickle {
            body: served.clone(),
            delay: Duration::from_millis(100),
        },
        _ => Reply::NotFound,
    });

    let temp_dir = TempDir::new().unwrap();
    let config = config_for(&url, temp_dir.path());
    let destination = temp_dir.path().join("slow.bin");

    // 30 bytes at 100ms each take three times the 1s timeout
    let written = RecordClient::new(&config)
        .unwrap()
        .stream_attachment("a1", &destination, &CancellationToken::new())
        .await
        .expect("steady trickle must not time out");
    assert_eq!(written, 30);
    assert_eq!(std::fs::read(&destination).unwrap(), body);
}

#[tokio::test]
async fn stalled_body_fails_with_idle_timeout() {
    let url = raw_server::start(|path| match path {
        "/api/now/v1/attachment/a1/file" => Reply::Trickle {
            body: b"xy".to_vec(),
            delay: Duration::from_millis(2500),
        },
        _ => Reply::NotFound,
    });

    let temp_dir = TempDir::new().unwrap();
    let config = config_for(&url, temp_dir.path());
    let err = RecordClient::new(&config)
        .unwrap()
        .stream_attachment("a1", &temp_dir.path().join("stalled.bin"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SnowError::IdleTimeout { .. }), "got {:?}", err);
    assert_eq!(err.kind(), ErrorKind::Remote);
}

/// Lists one attachment whose body closes after 10 of 100 declared bytes
fn truncating_instance() -> String {
    raw_server::start(|path| match path {
        "/api/now/v2/table/sys_attachment" => Reply::Json(
            r#"{"result": [{"sys_id": "a1", "file_name": "dump.bin", "table_name": "incident",
                "table_sys_id": "r1", "size_bytes": "100"}]}"#
                .to_string(),
        ),
        "/api/now/v2/table/incident/r1" => {
            Reply::Json(r#"{"result": {"number": "INC0010009", "sys_id": "r1"}}"#.to_string())
        }
        "/api/now/v1/attachment/a1/file" => Reply::Truncated {
            declared: 100,
            body: vec![7u8; 10],
        },
        _ => Reply::NotFound,
    })
}

#[tokio::test]
async fn truncated_body_is_removed_by_default() {
    let url = truncating_instance();
    let temp_dir = TempDir::new().unwrap();
    let config = config_for(&url, temp_dir.path());

    let summary = download_attachments(&config, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.completed, 0);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].kind, ErrorKind::Remote);

    let dir = temp_dir.path().join("incident/INC0010009");
    assert!(!dir.join("dump.bin").exists());
}

#[tokio::test]
async fn truncated_body_is_kept_when_configured() {
    let url = truncating_instance();
    let temp_dir = TempDir::new().unwrap();
    let mut config = config_for(&url, temp_dir.path());
    config.keep_partial_files = true;

    let summary = download_attachments(&config, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.failed.len(), 1);

    let kept = temp_dir.path().join("incident/INC0010009/dump.bin");
    assert_eq!(std::fs::read(kept).unwrap(), vec![7u8; 10]);
}
