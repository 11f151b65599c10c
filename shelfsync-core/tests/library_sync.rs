//! Integration tests for the library sync pipeline.
//!
//! A mock server plays the launcher, library and catalog services. The tests
//! drive [`LibrarySyncService`] end to end through the reqwest transport and a
//! file cache in a temporary directory.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use serde_json::json;
use shelfsync_core::{
    CachedLibrary, ClientCredentials, CredentialStore, Endpoints, FetchOptions, FileCache, Game,
    LibraryCache, LibraryFetcher, LibrarySyncService, MemoryStore, ReqwestTransport, Secret,
    SyncResult, TokenSession, auth::AuthClient, store::SESSION_KEY, token::format_expiry,
};
use tempfile::TempDir;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, header, method, path, query_param},
};

type Service = LibrarySyncService<MemoryStore, ReqwestTransport, FileCache>;

fn session_json(access: &str, expires_in: Duration) -> String {
    json!({
        "access_token": access,
        "refresh_token": format!("{access}-refresh"),
        "expires_at": format_expiry(Utc::now() + expires_in),
        "account_id": "account",
        "displayName": "TestPlayer"
    })
    .to_string()
}

async fn build_service(server: &MockServer, cache: FileCache, access_expires_in: Duration) -> Service {
    let store = MemoryStore::new();
    store
        .put(SESSION_KEY, &Secret::new(session_json("access", access_expires_in)))
        .await
        .unwrap();

    let endpoints = Endpoints::single_host(&server.uri());
    let transport =
        ReqwestTransport::new(StdDuration::from_secs(5), StdDuration::from_secs(5)).unwrap();
    let auth = AuthClient::new(
        transport.clone(),
        &endpoints,
        ClientCredentials::new("client", "secret"),
    )
    .unwrap();

    let session = TokenSession::new(store, auth);
    session.restore().await;

    let fetcher = LibraryFetcher::new(transport, &endpoints, FetchOptions::default()).unwrap();
    LibrarySyncService::new(Arc::new(session), fetcher, cache)
}

fn library_record(app: &str) -> serde_json::Value {
    json!({
        "appName": app,
        "namespace": "ns",
        "catalogItemId": format!("{app}-cid"),
        "sandboxType": "PUBLIC"
    })
}

async fn mount_assets(server: &MockServer, token: &str) {
    Mock::given(method("GET"))
        .and(path("/launcher/api/public/assets/Windows"))
        .and(query_param("label", "Live"))
        .and(header("authorization", format!("bearer {token}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"appName": "zeta", "labelName": "Live", "buildVersion": "3.1",
             "namespace": "ns", "catalogItemId": "zeta-cid"},
            {"appName": "Alpha", "labelName": "Live", "buildVersion": "1.0",
             "namespace": "ns", "catalogItemId": "Alpha-cid"}
        ])))
        .expect(1)
        .mount(server)
        .await;
}

/// Three library pages linked by cursors.
async fn mount_library_pages(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/library/api/public/items"))
        .and(query_param("cursor", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [library_record("beta")],
            "responseMetadata": {"nextCursor": "page-3"}
        })))
        .with_priority(1)
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/library/api/public/items"))
        .and(query_param("cursor", "page-3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [library_record("Season Pass")],
            "responseMetadata": {}
        })))
        .with_priority(1)
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/library/api/public/items"))
        .and(query_param("includeMetadata", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [library_record("zeta")],
            "responseMetadata": {"nextCursor": "page-2"}
        })))
        .with_priority(10)
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_catalog(server: &MockServer) {
    let items = [
        ("zeta-cid", json!({"title": "zeta", "developer": "Zeta Studio"})),
        ("Alpha-cid", json!({"title": "Alpha"})),
        ("beta-cid", json!({"description": "no title here"})),
        (
            "Season Pass-cid",
            json!({"title": "Season Pass", "categories": [{"path": "addons"}]}),
        ),
    ];
    for (id, item) in items {
        Mock::given(method("GET"))
            .and(path("/catalog/api/shared/namespace/ns/bulk/items"))
            .and(query_param("id", id))
            .and(query_param("country", "US"))
            .and(query_param("locale", "en"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ id: item })))
            .mount(server)
            .await;
    }
}

fn titles(games: &[Game]) -> Vec<&str> {
    games.iter().map(|g| g.title.as_str()).collect()
}

#[tokio::test]
async fn test_full_sync_then_cached() {
    let server = MockServer::start().await;
    mount_assets(&server, "access").await;
    mount_library_pages(&server).await;
    mount_catalog(&server).await;

    let dir = TempDir::new().unwrap();
    let cache_path = dir.path().join("library.json");
    let service = build_service(&server, FileCache::new(&cache_path), Duration::hours(2)).await;

    let games = match service.fetch_library(false).await {
        SyncResult::Success(games) => games,
        other => panic!("expected success, got {other:?}"),
    };

    // DLC dropped, titles sorted ignoring case; "beta" keeps its app name as title
    assert_eq!(titles(&games), vec!["Alpha", "beta", "zeta"]);

    let zeta = games.iter().find(|g| g.app_name == "zeta").unwrap();
    assert_eq!(zeta.build_version.as_deref(), Some("3.1"));
    assert_eq!(zeta.developer.as_deref(), Some("Zeta Studio"));

    let beta = games.iter().find(|g| g.app_name == "beta").unwrap();
    assert_eq!(beta.description.as_deref(), Some("no title here"));
    assert!(beta.build_version.is_none());

    assert!(cache_path.exists());

    // Fresh cache: no further requests (the mocks above expect exactly one call each)
    match service.fetch_library(false).await {
        SyncResult::Cached { games: cached, .. } => assert_eq!(cached, games),
        other => panic!("expected cached result, got {other:?}"),
    }
}

#[tokio::test]
async fn test_library_failure_falls_back_to_stale_cache() {
    let server = MockServer::start().await;
    mount_assets(&server, "access").await;
    Mock::given(method("GET"))
        .and(path("/library/api/public/items"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let cache = FileCache::new(dir.path().join("library.json"));
    let last_sync = Utc::now() - Duration::days(2);
    let old_games = vec![Game {
        app_name: "old".into(),
        title: "Old Game".into(),
        namespace: "ns".into(),
        catalog_item_id: "old-cid".into(),
        build_version: None,
        description: None,
        developer: None,
        key_images: None,
        is_dlc: false,
        platform: "Windows".into(),
    }];
    cache
        .save(&CachedLibrary::new(old_games.clone(), last_sync))
        .await
        .unwrap();

    let service = build_service(&server, cache, Duration::hours(2)).await;

    assert_eq!(
        service.fetch_library(true).await,
        SyncResult::Cached {
            games: old_games,
            last_sync,
        }
    );
}

#[tokio::test]
async fn test_library_failure_without_cache_is_error() {
    let server = MockServer::start().await;
    mount_assets(&server, "access").await;
    Mock::given(method("GET"))
        .and(path("/library/api/public/items"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let cache_path = dir.path().join("library.json");
    let service = build_service(&server, FileCache::new(&cache_path), Duration::hours(2)).await;

    match service.fetch_library(true).await {
        SyncResult::Error(message) => assert!(!message.is_empty()),
        other => panic!("expected error, got {other:?}"),
    }
    assert!(!cache_path.exists());
}

#[tokio::test]
async fn test_corrupt_cache_is_ignored() {
    let server = MockServer::start().await;
    mount_assets(&server, "access").await;
    Mock::given(method("GET"))
        .and(path("/library/api/public/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"records": []})))
        .mount(&server)
        .await;
    mount_catalog(&server).await;

    let dir = TempDir::new().unwrap();
    let cache_path = dir.path().join("library.json");
    std::fs::write(&cache_path, "{\"version\": 1, \"games\": [").unwrap();

    let service = build_service(&server, FileCache::new(&cache_path), Duration::hours(2)).await;

    assert!(matches!(
        service.fetch_library(false).await,
        SyncResult::Success(games) if games.len() == 2
    ));
    // The rewrite replaced the corrupt file
    assert!(service.last_sync().await.is_some());
}

#[tokio::test]
async fn test_expiring_session_is_refreshed_and_used() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/account/api/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=access-refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_string(session_json(
            "renewed",
            Duration::hours(8),
        )))
        .expect(1)
        .mount(&server)
        .await;
    mount_assets(&server, "renewed").await;
    Mock::given(method("GET"))
        .and(path("/library/api/public/items"))
        .and(header("authorization", "bearer renewed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"records": []})))
        .expect(1)
        .mount(&server)
        .await;
    mount_catalog(&server).await;

    let dir = TempDir::new().unwrap();
    // Five minutes left is inside the skew window, so restore refreshes first
    let service = build_service(
        &server,
        FileCache::new(dir.path().join("library.json")),
        Duration::minutes(5),
    )
    .await;

    assert!(matches!(
        service.fetch_library(true).await,
        SyncResult::Success(_)
    ));
}
