use std::path::Path;
use std::time::Duration;

use fswatch_config::{ConfigError, FswatchConfig};
use fswatch_events::flags;
use tempfile::tempdir;

#[test]
fn parses_a_full_config() {
    let text = r#"
[publisher]
name = "fsevents"
flush_timeout_ms = 250
raw_queue_capacity = 128

[[subscriptions]]
path = "/tmp/"

[[subscriptions]]
path = "/var/log"
recursive = true
mask = ["removed", "created"]

[logging]
level = "debug"
json = true
stderr = false
"#;
    let config = FswatchConfig::from_toml_str(text).unwrap();

    assert_eq!(config.publisher.flush_timeout(), Duration::from_millis(250));
    assert_eq!(config.publisher.raw_queue_capacity, Some(128));
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json);
    assert!(!config.logging.stderr);

    let contexts = config.subscription_contexts().unwrap();
    assert_eq!(contexts.len(), 2);
    assert_eq!(contexts[0].path, Path::new("/tmp/"));
    assert!(!contexts[0].recursive);
    assert_eq!(contexts[0].mask, 0);
    assert!(contexts[1].recursive);
    assert_eq!(contexts[1].mask, flags::ITEM_REMOVED | flags::ITEM_CREATED);
}

#[test]
fn empty_document_yields_defaults() {
    let config = FswatchConfig::from_toml_str("").unwrap();
    assert_eq!(config, FswatchConfig::default());
}

#[test]
fn unknown_keys_are_rejected() {
    let err = FswatchConfig::from_toml_str("[publisher]\nlatency = 3\n").unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)), "{err:?}");

    let err = FswatchConfig::from_toml_str("[[subscriptions]]\npath = \"/tmp\"\nrecurse = true\n")
        .unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)), "{err:?}");
}

#[test]
fn semantic_errors_are_reported() {
    let err =
        FswatchConfig::from_toml_str("[publisher]\nflush_timeout_ms = 0\n").unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)), "{err:?}");

    let err = FswatchConfig::from_toml_str("[[subscriptions]]\npath = \"relative/dir\"\n")
        .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)), "{err:?}");

    let err = FswatchConfig::from_toml_str(
        "[[subscriptions]]\npath = \"/tmp\"\nmask = [\"created\", \"bogus\"]\n",
    )
    .unwrap_err();
    assert!(
        matches!(err, ConfigError::UnknownFlag { ref name, .. } if name == "bogus"),
        "{err:?}"
    );
}

#[test]
fn loads_from_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("fswatch.toml");
    std::fs::write(
        &path,
        "[[subscriptions]]\npath = \"/etc\"\nmask = [\"modified\"]\n",
    )
    .unwrap();

    let config = FswatchConfig::load_from_path(&path).unwrap();
    assert_eq!(config.subscriptions.len(), 1);
    assert_eq!(config.subscriptions[0].mask_bits().unwrap(), flags::ITEM_MODIFIED);
}

#[test]
fn missing_files_report_the_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("missing.toml");
    let err = FswatchConfig::load_from_path(&path).unwrap_err();
    match err {
        ConfigError::Io { path: reported, .. } => {
            assert_eq!(reported, path.display().to_string())
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn manual_backend_uses_the_configured_flush_timeout() {
    use fswatch_events::{EventFactory, PublisherRegistry};
    use std::sync::Arc;

    let config = FswatchConfig::from_toml_str("[publisher]\nflush_timeout_ms = 100\n").unwrap();
    let backend = config.publisher.manual_backend();
    let factory = EventFactory::new(
        &PublisherRegistry::with_builtin(),
        &config.publisher.name,
        Arc::new(backend),
    )
    .unwrap();
    assert_eq!(factory.publisher().name(), "fsevents");
    assert_eq!(factory.publisher().num_subscribed_paths(), 0);
}
