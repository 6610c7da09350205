mod common;

use common::fixtures::{recording, request_action};
use common::{MockHandle, MockLauncher, temp_store};
use orbit_common::action::{Action, ActionType};
use orbit_common::recording::SessionRecording;
use orbit_common::snapshot::StateSnapshot;
use orbit_engine::config::schema::ReplayConfig;
use orbit_engine::events::{EngineEvent, EventBus};
use orbit_engine::replay::{ReplayEngine, ReplayError, ReplayOptions, plan};
use orbit_engine::store::SessionStore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn fast_config() -> ReplayConfig {
    ReplayConfig {
        inter_action_delay_ms: 1,
        min_wait_ms: 1,
        command_timeout_ms: 1_000,
    }
}

fn engine(store: SessionStore, launcher: &MockLauncher) -> ReplayEngine {
    ReplayEngine::new(
        store,
        Arc::new(launcher.clone()),
        fast_config(),
        true,
        EventBus::new(),
    )
}

fn five_actions() -> Vec<Action> {
    vec![
        Action::navigation("https://app.test/login"),
        Action::protocol_command("Runtime.evaluate", json!({"expression": "1"})),
        Action::protocol_command("DOM.getDocument", json!({})),
        Action::wait(5),
        Action::protocol_command("Input.insertText", json!({"text": "hi"})),
    ]
}

async fn saved(store: &SessionStore, rec: SessionRecording) {
    store.save(&rec).await.unwrap();
}

#[tokio::test]
async fn test_replay_preserves_recorded_order() {
    let (_dir, store) = temp_store();
    saved(&store, recording("ordered", five_actions())).await;
    let launcher = MockLauncher::new();

    let result = engine(store, &launcher)
        .replay("ordered", ReplayOptions::default())
        .await
        .unwrap();

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.total_actions, 5);
    assert_eq!(result.actions_executed, 5);

    let target = launcher.last();
    let methods: Vec<String> = target
        .with(|s| s.methods())
        .into_iter()
        .filter(|m| m != "Page.captureScreenshot")
        .collect();
    assert_eq!(
        methods,
        vec!["navigate", "Runtime.evaluate", "DOM.getDocument", "Input.insertText"]
    );
    assert!(target.with(|s| s.closed));
}

#[tokio::test]
async fn test_domains_enabled_before_commands() {
    let (_dir, store) = temp_store();
    saved(&store, recording("domains", five_actions())).await;
    let launcher = MockLauncher::new();

    engine(store, &launcher)
        .replay("domains", ReplayOptions::default())
        .await
        .unwrap();

    let calls: Vec<String> = launcher.last().with(|s| s.calls.iter().map(|c| c.method.clone()).collect());
    let runtime_enable = calls.iter().position(|m| m == "Runtime.enable").unwrap();
    let runtime_eval = calls.iter().position(|m| m == "Runtime.evaluate").unwrap();
    assert!(runtime_enable < runtime_eval);
    assert_eq!(calls.iter().filter(|m| *m == "DOM.enable").count(), 1);
    // Input has no enable method.
    assert!(!calls.iter().any(|m| m == "Input.enable"));
}

#[tokio::test]
async fn test_single_action_index() {
    let (_dir, store) = temp_store();
    saved(&store, recording("indexed", five_actions())).await;
    let launcher = MockLauncher::new();

    let options = ReplayOptions {
        action_index: Some(2),
        skip_screenshots: true,
        ..Default::default()
    };
    let result = engine(store, &launcher).replay("indexed", options).await.unwrap();

    assert_eq!(result.total_actions, 1);
    assert_eq!(result.actions_executed, 1);
    assert_eq!(launcher.last().with(|s| s.methods()), vec!["DOM.getDocument"]);
}

#[tokio::test]
async fn test_action_index_out_of_range() {
    let (_dir, store) = temp_store();
    saved(&store, recording("short", five_actions())).await;
    let launcher = MockLauncher::new();

    let options = ReplayOptions {
        action_index: Some(5),
        ..Default::default()
    };
    let err = engine(store, &launcher).replay("short", options).await.unwrap_err();
    assert!(matches!(err, ReplayError::InvalidActionIndex { index: 5, total: 5 }));
    assert!(launcher.launched().is_empty());
}

#[tokio::test]
async fn test_zero_actions_is_invalid() {
    let (_dir, store) = temp_store();
    saved(&store, recording("empty", vec![])).await;
    let launcher = MockLauncher::new();

    let err = engine(store, &launcher)
        .replay("empty", ReplayOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ReplayError::InvalidRecording { .. }));
}

#[tokio::test]
async fn test_missing_session() {
    let (_dir, store) = temp_store();
    let launcher = MockLauncher::new();
    let err = engine(store, &launcher)
        .replay("nope", ReplayOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ReplayError::SessionNotFound(id) if id == "nope"));
}

#[tokio::test]
async fn test_failing_action_does_not_stop_replay() {
    let (_dir, store) = temp_store();
    saved(&store, recording("flaky", five_actions())).await;
    let launcher = MockLauncher::new();
    let handle = MockHandle::new();
    handle.with(|s| {
        s.fail_methods.insert("DOM.getDocument".into());
    });
    launcher.prepare(handle.clone());

    let result = engine(store, &launcher)
        .replay("flaky", ReplayOptions::default())
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].index, 2);
    assert_eq!(result.errors[0].action_type, ActionType::ProtocolCommand);
    assert_eq!(result.actions_executed, result.total_actions);
    // The action after the failure still ran.
    assert_eq!(handle.with(|s| s.count("Input.insertText")), 1);
}

#[tokio::test]
async fn test_inert_actions_are_skipped() {
    let (_dir, store) = temp_store();
    let actions = vec![
        request_action("r1", "https://app.test/api"),
        Action::navigation("https://app.test/"),
    ];
    saved(&store, recording("inert", actions)).await;
    let launcher = MockLauncher::new();

    let result = engine(store, &launcher)
        .replay(
            "inert",
            ReplayOptions {
                skip_screenshots: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.actions_executed, 2);
    assert_eq!(result.actions_skipped, 1);
    assert_eq!(launcher.last().with(|s| s.methods()), vec!["navigate"]);
}

#[tokio::test]
async fn test_screenshots_after_navigation_and_at_end() {
    let (_dir, store) = temp_store();
    saved(&store, recording("shots", five_actions())).await;
    let launcher = MockLauncher::new();

    let result = engine(store.clone(), &launcher)
        .replay("shots", ReplayOptions::default())
        .await
        .unwrap();
    assert_eq!(result.screenshots.len(), 2);

    let result = engine(store, &launcher)
        .replay(
            "shots",
            ReplayOptions {
                skip_screenshots: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(result.screenshots.is_empty());
}

#[tokio::test]
async fn test_dry_run_uses_ephemeral_target() {
    let (_dir, store) = temp_store();
    saved(&store, recording("dry", five_actions())).await;
    let launcher = MockLauncher::new();

    let result = engine(store, &launcher)
        .replay(
            "dry",
            ReplayOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(result.dry_run);
    let options = launcher.last().with(|s| s.launch_options).unwrap();
    assert!(!options.persistent);
    assert!(options.headless);
}

#[tokio::test]
async fn test_replay_does_not_mutate_recording() {
    let (_dir, store) = temp_store();
    saved(&store, recording("frozen", five_actions())).await;
    let path = store.path_for("frozen").unwrap();
    let before = tokio::fs::read_to_string(&path).await.unwrap();

    let launcher = MockLauncher::new();
    engine(store, &launcher)
        .replay(
            "frozen",
            ReplayOptions {
                speed_multiplier: 2.0,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), before);
}

#[tokio::test]
async fn test_replay_events_are_published() {
    let (_dir, store) = temp_store();
    saved(&store, recording("events", five_actions())).await;
    let launcher = MockLauncher::new();
    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    let engine = ReplayEngine::new(store, Arc::new(launcher.clone()), fast_config(), true, bus);

    engine.replay("events", ReplayOptions::default()).await.unwrap();

    let mut completed = 0;
    let mut finished = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            EngineEvent::ReplayActionCompleted { .. } => completed += 1,
            EngineEvent::ReplayFinished { success, .. } => finished = success,
            _ => {}
        }
    }
    assert_eq!(completed, 5);
    assert!(finished);
}

#[tokio::test]
async fn test_already_enabled_domains_do_not_fail_replay() {
    let (_dir, store) = temp_store();
    let actions = vec![
        Action::protocol_command("Page.enable", json!({})),
        Action::protocol_command("Runtime.evaluate", json!({"expression": "1"})),
    ];
    saved(&store, recording("reenabled", actions)).await;
    let launcher = MockLauncher::new();
    let handle = MockHandle::new();
    handle.with(|s| {
        s.already_enabled.insert("Page.enable".into());
        s.already_enabled.insert("Runtime.enable".into());
    });
    launcher.prepare(handle.clone());

    let result = engine(store, &launcher)
        .replay("reenabled", ReplayOptions::default())
        .await
        .unwrap();

    assert!(result.success, "errors: {:?}", result.errors);
    assert!(result.errors.is_empty());
    assert_eq!(result.actions_executed, 2);
    handle.with(|s| {
        assert_eq!(s.count("Runtime.enable"), 1);
        assert_eq!(s.count("Runtime.evaluate"), 1);
    });
}

#[tokio::test]
async fn test_initial_state_writes_are_published() {
    let (_dir, store) = temp_store();
    let mut rec = recording("stateful", vec![Action::navigation("https://app.test/home")]);
    let mut snapshot = StateSnapshot::empty("https://app.test/", "app.test", 1);
    snapshot.local_storage.insert("theme".into(), "dark".into());
    rec.initial_state = Some(snapshot);
    saved(&store, rec).await;
    let launcher = MockLauncher::new();
    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    let engine = ReplayEngine::new(store, Arc::new(launcher.clone()), fast_config(), true, bus);

    let result = engine.replay("stateful", ReplayOptions::default()).await.unwrap();

    assert!(result.success, "errors: {:?}", result.errors);
    let mut written = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let EngineEvent::StorageWritten { area, key } = event {
            written.push((area, key));
        }
    }
    assert_eq!(written, vec![("local".to_string(), "theme".to_string())]);
}

#[test]
fn test_speed_scaling_halves_waits_with_floor() {
    let rec = recording(
        "waits",
        vec![Action::wait(1_000), Action::wait(150), Action::navigation("https://a.test")],
    );
    let options = ReplayOptions {
        speed_multiplier: 2.0,
        ..Default::default()
    };
    let planned = plan(&rec, &options, Duration::from_millis(100)).unwrap();

    let waits: Vec<u64> = planned
        .iter()
        .filter_map(|p| match p.action.kind {
            orbit_common::action::ActionKind::Wait { duration } => Some(duration),
            _ => None,
        })
        .collect();
    assert_eq!(waits, vec![500, 100]);
    // Original recording untouched.
    assert!(matches!(
        rec.actions[0].kind,
        orbit_common::action::ActionKind::Wait { duration: 1_000 }
    ));
}
