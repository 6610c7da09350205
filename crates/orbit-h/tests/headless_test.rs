use orbit_engine::protocol::DomainTracker;
use orbit_engine::target::{LaunchOptions, Target, TargetEvent, TargetGuard};
use orbit_h::ChromiumLauncher;
use serde_json::json;
use serial_test::serial;
use std::time::Duration;

const PAGE: &str = "data:text/html,<html><head><title>Test Page</title></head><body><h1>Hello</h1></body></html>";

async fn launch(options: LaunchOptions) -> Option<TargetGuard> {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::INFO)
        .try_init()
        .ok();

    match TargetGuard::acquire(&ChromiumLauncher::default(), options).await {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Failed to launch browser (is Chromium installed?): {}", e);
            None
        }
    }
}

#[tokio::test]
#[serial]
async fn test_headless_lifecycle() {
    let Some(mut guard) = launch(LaunchOptions::headless().ephemeral()).await else {
        return;
    };
    let target = guard.target();
    let mut events = target.subscribe();

    let nav = target.navigate(PAGE).await.expect("Navigation failed");
    assert_eq!(nav.title, "Test Page");

    let title = target.evaluate("document.title").await.expect("Evaluate failed");
    assert_eq!(title, json!("Test Page"));

    let sum = target
        .evaluate("new Promise(r => setTimeout(() => r(1 + 2), 10))")
        .await
        .expect("Promise evaluation failed");
    assert_eq!(sum, json!(3));

    let png = target.screenshot().await.expect("Screenshot failed");
    assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));

    let navigated = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(TargetEvent::Navigated { url }) if url.starts_with("data:") => return true,
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
    })
    .await
    .unwrap_or(false);
    assert!(navigated, "expected a main-frame navigation event");

    guard.release().await.expect("Close failed");
}

#[tokio::test]
#[serial]
async fn test_raw_commands_and_domains() {
    let Some(mut guard) = launch(LaunchOptions::headless().ephemeral()).await else {
        return;
    };
    let target = guard.target();

    let mut domains = DomainTracker::new();
    domains
        .ensure_for_method(target, "Page.navigate")
        .await
        .expect("Page.enable failed");
    // Enabling twice is harmless.
    target.send("Page.enable", json!({})).await.expect("second Page.enable failed");

    target
        .send("Page.navigate", json!({ "url": PAGE }))
        .await
        .expect("Page.navigate failed");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(target.current_url().await.unwrap().starts_with("data:"));

    let err = target.send("Nope.missing", json!({})).await.unwrap_err();
    assert!(err.to_string().contains("Nope.missing"));

    guard.release().await.expect("Close failed");
}
