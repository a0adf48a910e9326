//! Integration tests for the Redis-backed store.
//!
//! These tests use testcontainers to spin up a real Redis instance and are
//! ignored by default. Run them with `cargo test -- --ignored`.

use std::sync::LazyLock;
use std::time::Duration;

use hotshop_kv::script::arg;
use hotshop_kv::{AtomicScript, KeyTtl, KeyValueStore, KvError, LocalKeyspace, RedisConfig, RedisKvStore};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");
            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            (container, format!("redis://127.0.0.1:{host_port}"))
        })
        .await;
    url.clone()
}

async fn store() -> RedisKvStore {
    let config = RedisConfig {
        url: get_redis_url().await,
        ..Default::default()
    };
    RedisKvStore::connect(&config).await.expect("connect")
}

fn take_if_equal(ks: &mut LocalKeyspace, keys: &[String], args: &[String]) -> Result<i64, KvError> {
    let key = arg("take_if_equal", keys, 0)?;
    let expected = arg("take_if_equal", args, 0)?;
    if ks.get_string(key)?.as_deref() == Some(expected) {
        ks.delete(key);
        Ok(1)
    } else {
        Ok(0)
    }
}

static TAKE_IF_EQUAL: LazyLock<AtomicScript> = LazyLock::new(|| {
    AtomicScript::new(
        "take_if_equal",
        r"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            redis.call('DEL', KEYS[1])
            return 1
        end
        return 0
        ",
        take_if_equal,
    )
});

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_string_ops() {
    let store = store().await;
    store.set("it:k", "v", Some(Duration::from_secs(30))).await.unwrap();
    assert_eq!(store.get("it:k").await.unwrap().as_deref(), Some("v"));
    assert!(matches!(store.ttl("it:k").await.unwrap(), KeyTtl::Expires(_)));
    assert!(!store.set_nx("it:k", "w", Duration::from_secs(1)).await.unwrap());
    assert!(store.delete("it:k").await.unwrap());
    assert_eq!(store.ttl("it:k").await.unwrap(), KeyTtl::Missing);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_list_move_is_fifo() {
    let store = store().await;
    store
        .list_push("it:q", &["a".to_string(), "b".to_string()])
        .await
        .unwrap();
    let first = store
        .list_move("it:q", "it:q:processing", Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(first.as_deref(), Some("a"));
    assert_eq!(store.list_remove("it:q:processing", 1, "a").await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_script_matches_local_rendition() {
    let store = store().await;
    let keys = vec!["it:script".to_string()];
    store.set("it:script", "x", None).await.unwrap();
    assert_eq!(store.eval(&TAKE_IF_EQUAL, &keys, &["y".to_string()]).await.unwrap(), 0);
    assert_eq!(store.eval(&TAKE_IF_EQUAL, &keys, &["x".to_string()]).await.unwrap(), 1);
    assert_eq!(store.get("it:script").await.unwrap(), None);
}
