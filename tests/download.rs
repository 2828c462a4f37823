//! Mirror resolution and download failover tests.

mod common;

use common::{manifest, MockTransport, RecordingNotifier};
use filmsync::download::download_snapshot;
use filmsync::manifest::resolve_mirrors;
use filmsync::{Mirror, SyncError};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const M1: &str = "http://mirror1.test/Filmliste-akt.xz";
const M2: &str = "http://mirror2.test/Filmliste-akt.xz";
const M3: &str = "http://mirror3.test/Filmliste-akt.xz";

fn mirrors() -> Vec<Mirror> {
    [M1, M2, M3]
        .iter()
        .enumerate()
        .map(|(i, url)| Mirror {
            url: url.to_string(),
            priority: i as i64,
        })
        .collect()
}

#[tokio::test]
async fn test_fails_over_until_a_mirror_succeeds() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("Filmliste-akt.xz");
    let transport = MockTransport::new();
    transport.fail(M1);
    transport.fail(M2);
    transport.serve(M3, b"compressed film list".to_vec());
    let notifier = RecordingNotifier::new();

    let url = download_snapshot(
        &transport,
        &mirrors(),
        &dest,
        4,
        &CancellationToken::new(),
        &notifier,
    )
    .await
    .unwrap();

    assert_eq!(url, M3);
    assert_eq!(transport.attempts(), vec![M1, M2, M3]);
    assert_eq!(std::fs::read(&dest).unwrap(), b"compressed film list");
    assert!(notifier.count("update_download_progress") >= 3);
}

#[tokio::test]
async fn test_all_mirrors_failing_reports_last_url() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("Filmliste-akt.xz");
    let transport = MockTransport::new();
    for url in [M1, M2, M3] {
        transport.fail(url);
    }

    let result = download_snapshot(
        &transport,
        &mirrors(),
        &dest,
        8192,
        &CancellationToken::new(),
        &RecordingNotifier::new(),
    )
    .await;

    match result {
        Err(SyncError::Network { url, .. }) => assert_eq!(url, M3),
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(transport.attempts().len(), 3);
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_empty_mirror_list_is_a_network_error() {
    let dir = TempDir::new().unwrap();
    let result = download_snapshot(
        &MockTransport::new(),
        &[],
        &dir.path().join("Filmliste-akt.xz"),
        8192,
        &CancellationToken::new(),
        &RecordingNotifier::new(),
    )
    .await;

    assert!(matches!(result, Err(SyncError::Network { .. })));
}

#[tokio::test]
async fn test_cancelled_download_stops_without_failover() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("Filmliste-akt.xz");
    let transport = MockTransport::new();
    transport.serve(M1, vec![0u8; 1024]);
    transport.serve(M2, vec![0u8; 1024]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = download_snapshot(
        &transport,
        &mirrors(),
        &dest,
        64,
        &cancel,
        &RecordingNotifier::new(),
    )
    .await;

    assert!(matches!(result, Err(SyncError::Cancelled)));
    assert_eq!(transport.attempts(), vec![M1]);
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_stale_file_is_replaced() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("Filmliste-akt.xz");
    std::fs::write(&dest, b"left over from an earlier run").unwrap();
    let transport = MockTransport::new();
    transport.serve(M1, b"fresh".to_vec());

    download_snapshot(
        &transport,
        &mirrors(),
        &dest,
        8192,
        &CancellationToken::new(),
        &RecordingNotifier::new(),
    )
    .await
    .unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), b"fresh");
}

#[tokio::test]
async fn test_resolves_mirrors_in_priority_order() {
    let transport = MockTransport::new();
    transport.serve(
        "http://manifest.test/akt.xml",
        manifest(&[(M3, 5), (M1, 1), (M2, 1)]),
    );

    let mirrors = resolve_mirrors(&transport, "http://manifest.test/akt.xml", 0, 1)
        .await
        .unwrap();

    let urls: Vec<&str> = mirrors.iter().map(|m| m.url.as_str()).collect();
    assert_eq!(urls, vec![M1, M2, M3]);
}

#[tokio::test]
async fn test_manifest_fetch_is_retried() {
    let transport = MockTransport::new();
    transport.fail("http://manifest.test/akt.xml");

    let result = resolve_mirrors(&transport, "http://manifest.test/akt.xml", 2, 1).await;

    match result {
        Err(SyncError::Network { url, .. }) => assert_eq!(url, "http://manifest.test/akt.xml"),
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(transport.attempts().len(), 3);
}
