use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use layercake_core::cache::{CachePolicy, CachedGetter, CachedLayer};
use layercake_core::getter::{Env, MapEnv};
use layercake_core::{
    Config, Error, ErrorKind, GetterFailure, Getter, GetterLayer, GetterRequest, KeyExpansionLayer,
    LookupOptions, Resolution, StackView, StaticLayer,
};

struct SlowHome {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Getter for SlowHome {
    fn name(&self) -> &str {
        "slow-home"
    }

    async fn handle(
        &self,
        _request: &GetterRequest,
        _below: StackView<'_>,
    ) -> layercake_core::Result<Resolution> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(Resolution::hit("/home/slow"))
    }
}

struct Broken;

#[async_trait]
impl Getter for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    async fn handle(
        &self,
        request: &GetterRequest,
        _below: StackView<'_>,
    ) -> layercake_core::Result<Resolution> {
        Err(request.backend_error("broken", "connection refused"))
    }
}

fn files() -> Config {
    Config::builder()
        .name("files")
        .layer(StaticLayer::new("override.json", json!({"a": {"b": 3}})))
        .layer(StaticLayer::new("base.json", json!({"a": {"b": 1, "c": 2}})))
        .build()
        .unwrap()
}

#[tokio::test]
async fn topmost_hit_wins() {
    let config = files();
    assert_eq!(config.get("a.b").await.unwrap(), json!(3));
    assert_eq!(config.get("a.c").await.unwrap(), json!(2));
}

#[tokio::test]
async fn exhaustion() {
    let config = files();
    let err = config.get("g").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(matches!(err, Error::NotFound(ref key) if key == "g"));
    assert_eq!(config.get_or("g", Value::Null).await.unwrap(), Value::Null);
}

#[tokio::test]
async fn file_template_over_home_getter() {
    let getters = GetterLayer::new("getters")
        .bind(
            "home",
            Env::home().with_source(MapEnv::new().with("HOME", "/home/ada")),
        )
        .unwrap();
    let config = Config::builder()
        .layer(StaticLayer::new(
            "settings.json",
            json!({"overrides": "{{home}}/o.json"}),
        ))
        .layer(getters)
        .build()
        .unwrap();

    assert_eq!(
        config.get("overrides").await.unwrap(),
        json!("/home/ada/o.json")
    );
}

#[tokio::test]
async fn repeated_gets_agree() {
    let config = files();
    let first = config.get("a.b").await.unwrap();
    for _ in 0..5 {
        assert_eq!(config.get("a.b").await.unwrap(), first);
    }
}

#[tokio::test(start_paused = true)]
async fn cached_slow_getter_runs_once_for_concurrent_lookups() {
    let calls = Arc::new(AtomicUsize::new(0));
    let getter = CachedGetter::new(
        SlowHome {
            calls: calls.clone(),
        },
        CachePolicy::default(),
    );
    let config = Arc::new(
        Config::builder()
            .layer(GetterLayer::new("getters").bind("home", getter).unwrap())
            .build()
            .unwrap(),
    );

    let tasks = (0..8)
        .map(|_| {
            let config = config.clone();
            tokio::spawn(async move { config.get("home").await })
        })
        .collect::<Vec<_>>();
    for result in join_all(tasks).await {
        assert_eq!(result.unwrap().unwrap(), json!("/home/slow"));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn template_cycles_are_errors() {
    let config = Config::builder()
        .layer(StaticLayer::new("top", json!({"x": "{{y}}"})))
        .layer(StaticLayer::new("bottom", json!({"y": "{{x}}"})))
        .build()
        .unwrap();
    let err = config.get("x").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CyclicTemplate);
    assert!(config.get_or("x", "default").await.is_err());
}

#[tokio::test]
async fn getter_error_aborts_but_miss_falls_through() {
    let failing = Config::builder()
        .layer(GetterLayer::new("getters").bind("k", Broken).unwrap())
        .layer(StaticLayer::new("base", json!({"k": "from-file"})))
        .build()
        .unwrap();
    let err = failing.get("k").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Getter);
    match &err {
        Error::Layer { layer, path, .. } => {
            assert_eq!(layer, "getters");
            assert_eq!(path, "k");
        }
        other => panic!("unexpected error: {other}"),
    }

    let missing = Config::builder()
        .layer(
            GetterLayer::new("getters")
                .bind("k", Env::var("UNSET").with_source(MapEnv::new()))
                .unwrap(),
        )
        .layer(StaticLayer::new("base", json!({"k": "from-file"})))
        .build()
        .unwrap();
    assert_eq!(missing.get("k").await.unwrap(), json!("from-file"));
}

#[tokio::test(start_paused = true)]
async fn slow_getters_time_out() {
    let config = Config::builder()
        .layer(
            GetterLayer::new("getters")
                .bind(
                    "home",
                    SlowHome {
                        calls: Arc::new(AtomicUsize::new(0)),
                    },
                )
                .unwrap(),
        )
        .build()
        .unwrap();

    let options = LookupOptions::default().with_timeout(Duration::from_millis(50));
    let err = config.get_with("home", &options).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(matches!(
        err.getter_failure(),
        Some(GetterFailure::DeadlineExceeded(_))
    ));
}

#[tokio::test]
async fn cancelled_lookups_fail() {
    let config = Config::builder()
        .layer(
            GetterLayer::new("getters")
                .bind(
                    "home",
                    SlowHome {
                        calls: Arc::new(AtomicUsize::new(0)),
                    },
                )
                .unwrap(),
        )
        .build()
        .unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let options = LookupOptions::default().with_cancellation(token);
    let err = config.get_with("home", &options).await.unwrap_err();
    assert_eq!(err.getter_failure(), Some(&GetterFailure::Cancelled));
}

fn slow_home_layer(calls: &Arc<AtomicUsize>) -> GetterLayer {
    GetterLayer::new("getters")
        .bind(
            "home",
            SlowHome {
                calls: calls.clone(),
            },
        )
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn one_caller_timing_out_leaves_the_others_their_value() {
    let calls = Arc::new(AtomicUsize::new(0));
    let config = Config::builder()
        .layer(CachedLayer::new(slow_home_layer(&calls), CachePolicy::default()))
        .build()
        .unwrap();

    let hurried = LookupOptions::default().with_timeout(Duration::from_millis(20));
    let (first, rest) = tokio::join!(
        config.get_with("home", &hurried),
        join_all((0..4).map(|_| config.get("home"))),
    );

    assert_eq!(first.unwrap_err().kind(), ErrorKind::Timeout);
    for result in rest {
        assert_eq!(result.unwrap(), json!("/home/slow"));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn defaults_agree_with_and_without_a_cache() {
    let uncached = Config::builder()
        .layer(GetterLayer::new("getters").bind("k", Broken).unwrap())
        .build()
        .unwrap();
    let cached = Config::builder()
        .layer(
            GetterLayer::new("getters")
                .bind("k", CachedGetter::new(Broken, CachePolicy::default()))
                .unwrap(),
        )
        .build()
        .unwrap();
    for _ in 0..2 {
        assert_eq!(uncached.get_or("k", "default").await.unwrap(), json!("default"));
        assert_eq!(cached.get_or("k", "default").await.unwrap(), json!("default"));
    }

    let calls = Arc::new(AtomicUsize::new(0));
    let uncached = Config::builder()
        .layer(slow_home_layer(&calls))
        .build()
        .unwrap();
    let cached = Config::builder()
        .layer(CachedLayer::new(slow_home_layer(&calls), CachePolicy::default()))
        .build()
        .unwrap();
    let hurried = LookupOptions::default().with_timeout(Duration::from_millis(20));
    for config in [&uncached, &cached] {
        let value = config
            .get_or_with("home", "default", &hurried)
            .await
            .unwrap();
        assert_eq!(value, json!("default"));
        assert_eq!(
            config.get_or("home", "default").await.unwrap(),
            json!("/home/slow")
        );
    }
}

#[tokio::test]
async fn keys_can_name_their_entry_through_placeholders() {
    let config = Config::builder()
        .layer(KeyExpansionLayer::default())
        .layer(StaticLayer::new(
            "settings.json",
            json!({"region": "eu", "endpoints": {"eu": "https://eu.example", "us": "https://us.example"}}),
        ))
        .build()
        .unwrap();

    assert_eq!(
        config.get("endpoints.{{region}}").await.unwrap(),
        json!("https://eu.example")
    );
}
