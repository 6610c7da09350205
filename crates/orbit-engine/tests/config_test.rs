use orbit_engine::config::loader::{ConfigError, ConfigLoader};
use std::io::Write;

fn yaml_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_partial_file_keeps_defaults() {
    let file = yaml_file(
        r#"
optimizer:
  high_threshold: 0.9
recording:
  inactivity_ms: 5000
direct_call:
  interpreter: node
  file_extension: js
"#,
    );

    let config = ConfigLoader::load_from(file.path()).await.unwrap();
    assert_eq!(config.optimizer.high_threshold, 0.9);
    assert_eq!(config.optimizer.medium_threshold, 0.70);
    assert_eq!(config.recording.inactivity_ms, 5_000);
    assert_eq!(config.recording.max_duration_ms, 1_800_000);
    assert_eq!(config.direct_call.interpreter, "node");
    assert_eq!(config.direct_call.file_extension, "js");
    assert!(config.analyzer.command.is_none());
}

#[tokio::test]
async fn test_empty_mapping_is_default() {
    let file = yaml_file("{}\n");
    let config = ConfigLoader::load_from(file.path()).await.unwrap();
    assert_eq!(config.replay.min_wait_ms, orbit_engine::config::schema::ReplayConfig::default().min_wait_ms);
}

#[tokio::test]
async fn test_inverted_thresholds_are_invalid() {
    let file = yaml_file("optimizer:\n  high_threshold: 0.5\n  medium_threshold: 0.8\n");
    let err = ConfigLoader::load_from(file.path()).await.unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("medium_threshold")));
}

#[tokio::test]
async fn test_out_of_range_threshold_is_invalid() {
    let file = yaml_file("optimizer:\n  high_threshold: 1.5\n");
    assert!(matches!(
        ConfigLoader::load_from(file.path()).await.unwrap_err(),
        ConfigError::Invalid(_)
    ));
}

#[tokio::test]
async fn test_malformed_yaml() {
    let file = yaml_file("optimizer: [unclosed\n");
    assert!(matches!(
        ConfigLoader::load_from(file.path()).await.unwrap_err(),
        ConfigError::Parse(_)
    ));
}

#[tokio::test]
async fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = ConfigLoader::load_from(&dir.path().join("absent.yaml")).await.unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}
