use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tollgate::cache::{CacheLayer, CacheMetricsRegistry, KeyValueStore, MemoryStore};
use tollgate::{Config, RetryExecutor, TollgateError};

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn file_settings_drive_the_retry_executor() {
    let file = write_config(
        r#"
        [retry]
        max_retries = 1
        initial_delay_ms = 1
        max_delay_ms = 2
        jitter_factor = 0.0
        "#,
    );
    let config = Config::load(Some(file.path())).unwrap();
    let policy = config.retry_policy().unwrap();
    assert_eq!(policy.max_attempts(), 2);

    let mut attempts = 0;
    let result: Result<(), String> = tokio_test::block_on(
        RetryExecutor::new(policy).execute_async(|| {
            attempts += 1;
            async { Err("down".to_owned()) }
        }),
    );
    assert_eq!(result, Err("down".to_owned()));
    assert_eq!(attempts, 2);
}

#[test]
fn file_settings_namespace_the_cache_layer() {
    let file = write_config(
        r#"
        [cache]
        key_prefix = "gw:"
        default_ttl_secs = 120
        "#,
    );
    let config = Config::load(Some(file.path())).unwrap();
    let store = Arc::new(MemoryStore::with_max_entries(config.cache.max_entries));
    let layer = CacheLayer::from_settings(
        store.clone(),
        Arc::new(CacheMetricsRegistry::new()),
        &config.cache,
    );

    tokio_test::block_on(async {
        assert!(layer.set("models", &["a", "b"], config.cache.default_ttl()).await);
        assert_eq!(store.get("gw:models").await.unwrap().as_deref(), Some(r#"["a","b"]"#));
        let ttl = layer.ttl("models").await.remaining();
        assert_eq!(ttl, Some(Duration::from_secs(120)));
    });
}

#[test]
fn malformed_file_names_the_path() {
    let file = write_config("[retry\nmax_retries = 2");
    let err = Config::load(Some(file.path())).unwrap_err();
    assert!(matches!(err, TollgateError::Configuration(_)));
    assert!(err.to_string().contains("Failed to parse config file"));
}

#[test]
fn invalid_policy_in_file_is_rejected() {
    let file = write_config("[retry]\njitter_factor = 1.5\n");
    assert!(Config::load(Some(file.path())).is_err());
}
