//! Runs in its own process: it signals itself.

use std::time::Duration;

use review_sync_service::shutdown::ShutdownSignals;

#[cfg(unix)]
#[tokio::test]
async fn test_sigterm_triggers_shutdown() {
    let mut signals = ShutdownSignals::install().unwrap();

    let status = std::process::Command::new("kill")
        .args(["-TERM", &std::process::id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let received = tokio::time::timeout(Duration::from_secs(5), signals.recv())
        .await
        .expect("SIGTERM should be observed")
        .unwrap();
    assert_eq!(received, "SIGTERM");
}
