use std::{env, fs};

use hotshop_cache::CacheStrategy;
use hotshop_server::config::StorageBackend;
use hotshop_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("hotshop.toml");

    let toml_content = r#"
[redis]
enabled = false

[storage]
backend = "memory"

[cache]
strategy = "logical_expire"
null_ttl_secs = 60
lock_ttl_secs = 5

[cache.refresher]
core_workers = 2
max_workers = 4

[catalog]
shop_ttl_secs = 600
warm_shops = [1, 2]

[seckill]
consumer_workers = 2
preload_vouchers = [10]

[logging]
level = "debug"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert!(!cfg.redis.enabled);
    assert_eq!(cfg.storage.backend, StorageBackend::Memory);
    assert_eq!(cfg.cache.strategy, CacheStrategy::LogicalExpire);
    assert_eq!(cfg.cache.null_ttl_secs, 60);
    assert_eq!(cfg.cache.null_jitter_max_secs, 50);
    assert_eq!(cfg.cache.refresher.max_workers, 4);
    assert_eq!(cfg.catalog.warm_shops, vec![1, 2]);
    assert_eq!(cfg.seckill.preload_vouchers, vec![10]);
    assert!(cfg.seckill.compensate_on_publish_failure);
    assert_eq!(cfg.logging.level, "debug");

    // 2) Env override should win over file
    unsafe {
        env::set_var("HOTSHOP__SECKILL__CONSUMER_WORKERS", "6");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.seckill.consumer_workers, 6);
    unsafe {
        env::remove_var("HOTSHOP__SECKILL__CONSUMER_WORKERS");
    }

    // 3) Invalid config (core workers above max) should error
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[cache.refresher]
core_workers = 8
max_workers = 2
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("core_workers"), "{err}");
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("absent.toml");
    let cfg = load_config(path.to_str()).expect("defaults are valid");
    assert_eq!(cfg.cache.strategy, CacheStrategy::Mutex);
    assert_eq!(cfg.storage.backend, StorageBackend::Postgres);
}

#[test]
fn inverted_jitter_range_is_rejected() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("jitter.toml");
    fs::write(
        &path,
        r#"
[cache]
null_jitter_min_secs = 90
null_jitter_max_secs = 10
"#,
    )
    .expect("write toml");
    assert!(load_config(path.to_str()).is_err());
}
