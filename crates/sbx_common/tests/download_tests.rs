//! Chunked downloader against the mock forge.

mod common;

use common::{payload, Fault, MockForge};
use sbx_common::download::{DownloadError, DownloadOptions, Downloader};
use sbx_common::ErrorKind;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const FILE: &str = "caddy_2.8.4_linux_amd64.tar.gz";

fn options(chunk_size: u64) -> DownloadOptions {
    DownloadOptions {
        chunk_size,
        concurrent_chunks: 3,
        retry_count: 5,
        retry_delay: Duration::from_millis(10),
        request_timeout: Duration::from_secs(5),
        show_progress: false,
    }
}

async fn forge_with(bytes: Vec<u8>) -> (MockForge, String) {
    let forge = MockForge::start().await;
    forge.add_asset(FILE, bytes);
    let url = forge.asset_url("caddyserver", "caddy", "v2.8.4", FILE);
    (forge, url)
}

#[tokio::test]
async fn test_twelve_bytes_three_chunks() {
    let origin = b"hello, world".to_vec();
    let (forge, url) = forge_with(origin.clone()).await;
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("nested/dir/out.tar.gz");

    let report = Downloader::new(options(5))
        .unwrap()
        .download(&CancellationToken::new(), &url, &dest)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), origin);
    assert_eq!(report.size, 12);
    assert_eq!(report.chunks, 3);
    assert_eq!(report.bytes_counted, 12);
    assert_eq!(report.attempts, vec![1, 1, 1]);
    assert_eq!(forge.head_requests(), 1);
    for start in [0, 5, 10] {
        assert_eq!(forge.hits(start), 1, "range starting at {start}");
    }
    assert!(!temp.path().join("nested/dir/out.tar.gz.part").exists());
}

#[tokio::test]
async fn test_progress_conserved_across_truncated_retries() {
    let origin = payload(1000);
    let (forge, url) = forge_with(origin.clone()).await;
    // chunk 2 is cut short twice, the second time after resuming at 160
    forge.fail_range(128, Fault::Truncate, 1);
    forge.fail_range(160, Fault::Truncate, 1);
    forge.fail_range(960, Fault::Unavailable, 2);
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("out.bin");

    let report = Downloader::new(options(64))
        .unwrap()
        .download(&CancellationToken::new(), &url, &dest)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), origin);
    assert_eq!(report.chunks, 16);
    assert_eq!(report.bytes_counted, report.size);
    assert_eq!(report.attempts[2], 3);
    assert_eq!(forge.hits(176), 1);
    assert_eq!(report.attempts[15], 3);
}

#[tokio::test]
async fn test_retry_bound_is_k_plus_one() {
    let origin = payload(12);
    let (forge, url) = forge_with(origin.clone()).await;
    let k = 3;
    forge.fail_range(5, Fault::Unavailable, k);
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("out.bin");

    let report = Downloader::new(options(5))
        .unwrap()
        .download(&CancellationToken::new(), &url, &dest)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), origin);
    assert_eq!(forge.hits(5), k + 1);
    assert_eq!(report.attempts[1], k + 1);
    assert_eq!(forge.hits(0), 1);
    assert_eq!(forge.hits(10), 1);
}

#[tokio::test]
async fn test_exhausted_retries_fail_whole_download() {
    let (forge, url) = forge_with(payload(12)).await;
    forge.fail_range(0, Fault::Unavailable, 100);
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("out.bin");

    let mut opts = options(5);
    opts.retry_count = 3;
    let err = Downloader::new(opts)
        .unwrap()
        .download(&CancellationToken::new(), &url, &dest)
        .await
        .unwrap_err();

    match &err {
        DownloadError::Exhausted { chunk, attempts, .. } => {
            assert_eq!(*chunk, 0);
            assert_eq!(*attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.kind(), ErrorKind::Remote);
    assert_eq!(forge.hits(0), 3);
    assert!(!dest.exists());
    assert!(!temp.path().join("out.bin.part").exists());
}

#[tokio::test]
async fn test_misplaced_range_is_retried() {
    let origin = b"hello, world".to_vec();
    let (forge, url) = forge_with(origin.clone()).await;
    // five bytes from offset 0 instead of 5..=9
    forge.fail_range(5, Fault::WrongRange, 1);
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("out.tar.gz");

    let report = Downloader::new(options(5))
        .unwrap()
        .download(&CancellationToken::new(), &url, &dest)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), origin);
    assert_eq!(report.attempts, vec![1, 2, 1]);
    assert_eq!(report.bytes_counted, 12);
    assert_eq!(forge.hits(5), 2);
}

#[tokio::test]
async fn test_persistent_misplaced_range_fails() {
    let (forge, url) = forge_with(payload(12)).await;
    forge.fail_range(5, Fault::WrongRange, 100);
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("out.bin");

    let mut opts = options(5);
    opts.retry_count = 3;
    let err = Downloader::new(opts)
        .unwrap()
        .download(&CancellationToken::new(), &url, &dest)
        .await
        .unwrap_err();

    match &err {
        DownloadError::Exhausted { chunk, source, .. } => {
            assert_eq!(*chunk, 1);
            assert!(matches!(**source, DownloadError::RangeMismatch { .. }), "{source}");
            assert!(source.to_string().contains("bytes 0-4/12"), "{source}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(forge.hits(5), 3);
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_falls_back_to_ranged_size_lookup_without_head() {
    let origin = payload(300);
    let (forge, url) = forge_with(origin.clone()).await;
    forge.disable_head();
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("out.bin");

    let report = Downloader::new(options(100))
        .unwrap()
        .download(&CancellationToken::new(), &url, &dest)
        .await
        .unwrap();

    assert_eq!(report.size, 300);
    assert_eq!(std::fs::read(&dest).unwrap(), origin);
    // size lookup plus the first chunk
    assert_eq!(forge.hits(0), 2);
}

#[tokio::test]
async fn test_missing_asset_is_unknown_size() {
    let forge = MockForge::start().await;
    let url = forge.asset_url("caddyserver", "caddy", "v0.0.0", "nope.tar.gz");
    let temp = TempDir::new().unwrap();

    let err = Downloader::new(options(5))
        .unwrap()
        .download(&CancellationToken::new(), &url, &temp.path().join("out"))
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::UnknownSize { .. }), "{err}");
    assert_eq!(forge.total_hits(), 0);
}

#[tokio::test]
async fn test_cancellation_returns_promptly() {
    let (forge, url) = forge_with(payload(50)).await;
    forge.set_delay(Duration::from_secs(10));
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("out.bin");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = Downloader::new(options(10))
        .unwrap()
        .download(&cancel, &url, &dest)
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::Canceled), "{err}");
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_total_budget_times_out() {
    let (forge, url) = forge_with(payload(50)).await;
    forge.set_delay(Duration::from_secs(10));
    let temp = TempDir::new().unwrap();

    let started = Instant::now();
    let err = Downloader::new(options(10))
        .unwrap()
        .download_within(
            &CancellationToken::new(),
            &url,
            &temp.path().join("out.bin"),
            Duration::from_millis(300),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::TimedOut { .. }), "{err}");
    assert_eq!(err.kind(), ErrorKind::Canceled);
    assert!(started.elapsed() < Duration::from_secs(3));
}
