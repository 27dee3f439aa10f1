//! Runs against a disposable Postgres container. Needs a Docker daemon:
//! `cargo test -p shorturl-storage -- --ignored`.

use std::time::Duration;

use shorturl_storage::{
    OwnerId, PostgresRepository, ReadRepository, Repository, ShortKey, StatsRepository,
    StorageError,
};
use shorturl_test_infra::postgres::{PostgresConfig, PostgresServer};
use sqlx::postgres::PgPoolOptions;

struct Fixture {
    _postgres: PostgresServer,
    repo: PostgresRepository,
}

impl Fixture {
    async fn start() -> Self {
        let postgres = PostgresServer::new(PostgresConfig::builder().build())
            .await
            .expect("start postgres");
        let url = postgres.database_url().await.expect("postgres url");
        let pool = connect_with_retry(&url).await;

        let repo = PostgresRepository::new(pool);
        repo.bootstrap().await.expect("create schema");

        Self {
            _postgres: postgres,
            repo,
        }
    }
}

async fn connect_with_retry(url: &str) -> sqlx::PgPool {
    let mut last_error = None;

    for _ in 0..20 {
        match PgPoolOptions::new().max_connections(5).connect(url).await {
            Ok(pool) => return pool,
            Err(err) => {
                last_error = Some(err);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }

    panic!("failed to connect postgres: {last_error:?}");
}

fn key(value: &str) -> ShortKey {
    ShortKey::new_unchecked(value)
}

fn owner(value: &str) -> OwnerId {
    OwnerId::new(value)
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn set_and_get_active_record() {
    let fixture = Fixture::start().await;

    let stored = fixture
        .repo
        .set(&owner("user1"), &key("abc12345"), "https://example.com")
        .await
        .unwrap();
    assert_eq!(stored, key("abc12345"));

    let got = fixture.repo.get(&key("abc12345")).await.unwrap();
    assert_eq!(got.original_url, "https://example.com");
    assert_eq!(got.short_key, key("abc12345"));
    assert!(!got.deleted);
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn bootstrap_is_idempotent() {
    let fixture = Fixture::start().await;

    fixture
        .repo
        .set(&owner("user1"), &key("abc12345"), "https://example.com")
        .await
        .unwrap();
    fixture.repo.bootstrap().await.unwrap();

    assert!(fixture.repo.get(&key("abc12345")).await.is_ok());
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn duplicate_url_returns_existing_key_as_conflict() {
    let fixture = Fixture::start().await;

    fixture
        .repo
        .set(&owner("user1"), &key("first"), "https://dup.com")
        .await
        .unwrap();

    for attempt in ["second", "third"] {
        let err = fixture
            .repo
            .set(&owner("user1"), &key(attempt), "https://dup.com")
            .await
            .unwrap_err();
        match err {
            StorageError::Conflict(existing) => assert_eq!(existing, key("first")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn reused_key_is_key_taken() {
    let fixture = Fixture::start().await;

    fixture
        .repo
        .set(&owner("user1"), &key("abc12345"), "https://one.example")
        .await
        .unwrap();

    let err = fixture
        .repo
        .set(&owner("user1"), &key("abc12345"), "https://two.example")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::KeyTaken(_)));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn get_unknown_key_is_not_found() {
    let fixture = Fixture::start().await;

    let err = fixture.repo.get(&key("missing")).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn delete_by_owner_tombstones_and_frees_url() {
    let fixture = Fixture::start().await;

    fixture
        .repo
        .set(&owner("user1"), &key("abc12345"), "https://example.com")
        .await
        .unwrap();
    fixture
        .repo
        .delete(&owner("user1"), &key("abc12345"))
        .await
        .unwrap();

    let got = fixture.repo.get(&key("abc12345")).await.unwrap();
    assert!(got.deleted);
    assert_eq!(got.original_url, "https://example.com");

    // the tombstoned row keeps its key but no longer reserves the url
    let stored = fixture
        .repo
        .set(&owner("user1"), &key("fresh"), "https://example.com")
        .await
        .unwrap();
    assert_eq!(stored, key("fresh"));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn delete_by_other_owner_is_ignored() {
    let fixture = Fixture::start().await;

    fixture
        .repo
        .set(&owner("user1"), &key("abc12345"), "https://example.com")
        .await
        .unwrap();
    fixture
        .repo
        .delete(&owner("intruder"), &key("abc12345"))
        .await
        .unwrap();

    assert!(!fixture.repo.get(&key("abc12345")).await.unwrap().deleted);
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn user_urls_and_stats() {
    let fixture = Fixture::start().await;

    for (k, u, o) in [
        ("k1", "https://1.example", "user1"),
        ("k2", "https://2.example", "user2"),
        ("k3", "https://3.example", "user1"),
    ] {
        fixture.repo.set(&owner(o), &key(k), u).await.unwrap();
    }
    fixture.repo.delete(&owner("user1"), &key("k1")).await.unwrap();

    let urls = fixture.repo.get_user_urls(&owner("user1")).await.unwrap();
    let keys: Vec<_> = urls.iter().map(|u| u.short_key.as_str()).collect();
    assert_eq!(keys, ["k1", "k3"]);
    assert!(urls[0].deleted);

    assert!(fixture
        .repo
        .get_user_urls(&owner("nobody"))
        .await
        .unwrap()
        .is_empty());

    assert_eq!(fixture.repo.count_urls().await.unwrap(), 2);
    assert_eq!(fixture.repo.count_users().await.unwrap(), 2);
    fixture.repo.ping().await.unwrap();
}
