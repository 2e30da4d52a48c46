//! Config file loading and layering.

use split_cache::{FailurePolicy, FlushConfig};
use split_flush::{load_flush_config, resolve_flush_config, FlushArgs};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_load_toml() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "flush.toml",
        r#"
size_threshold = 50
time_threshold = "2s"
poll_interval = "25ms"
failure_policy = "drop"
max_concurrent_flushes = 4
partition_batch_size = 10
"#,
    );

    let config = load_flush_config(&path).unwrap();
    assert_eq!(config.size_threshold, 50);
    assert_eq!(config.time_threshold(), Duration::from_secs(2));
    assert_eq!(config.poll_interval(), Duration::from_millis(25));
    assert_eq!(config.failure_policy, FailurePolicy::Drop);
    assert_eq!(config.max_concurrent_flushes, 4);
    assert_eq!(config.partition_batch_size, Some(10));
}

#[test]
fn test_load_yaml_with_millis() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "flush.yaml",
        "time_threshold_ms: 750\npoll_interval: 1m\n",
    );

    let config = load_flush_config(&path).unwrap();
    assert_eq!(config.size_threshold, 300);
    assert_eq!(config.time_threshold_ms, 750);
    assert_eq!(config.poll_interval(), Duration::from_secs(60));
    assert_eq!(config.failure_policy, FailurePolicy::Requeue);
}

#[test]
fn test_empty_file_gives_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "flush.toml", "");
    assert_eq!(load_flush_config(&path).unwrap(), FlushConfig::default());
}

#[test]
fn test_rejects_bad_files() {
    let dir = TempDir::new().unwrap();

    let zero = write(&dir, "zero.toml", "size_threshold = 0\n");
    let err = load_flush_config(&zero).unwrap_err();
    assert!(format!("{err:#}").contains("size_threshold"));

    let unknown = write(&dir, "unknown.toml", "size_treshold = 5\n");
    assert!(load_flush_config(&unknown).is_err());

    let bad_duration = write(&dir, "bad.yaml", "time_threshold: soon\n");
    assert!(load_flush_config(&bad_duration).is_err());

    let ini = write(&dir, "flush.ini", "size_threshold=5\n");
    assert!(load_flush_config(&ini).is_err());

    assert!(load_flush_config(&dir.path().join("missing.toml")).is_err());
}

#[test]
fn test_flags_override_file() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "flush.toml",
        "size_threshold = 50\ntime_threshold = \"1s\"\n",
    );
    let args = FlushArgs {
        size_threshold: Some(7),
        ..Default::default()
    };

    let config = resolve_flush_config(Some(&path), &args).unwrap();
    assert_eq!(config.size_threshold, 7);
    assert_eq!(config.time_threshold(), Duration::from_secs(1));
}
