//! Integration tests for the import run: prepare, fetch, parse, select, save.
//!
//! Each test serves a feed from a wiremock server and imports it into its
//! own in-memory SQLite database.

use pretty_assertions::assert_eq;
use std::sync::atomic::Ordering;
use tempfile::TempDir;
use trailers::feed::{FetchError, Fetcher, FetcherOptions};
use trailers::import::{ImportError, Importer, DEFAULT_WINDOW};
use trailers::storage::{Database, NewTrailer, TableName};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Helpers
// ============================================================================

fn item_xml(title: &str, pub_date: &str, encoded: &str) -> String {
    format!(
        r#"
    <item>
        <title>{title}</title>
        <link>https://trailers.example.com/{title}/</link>
        <description>Description of {title}</description>
        <pubDate>{pub_date}</pubDate>
        <content:encoded><![CDATA[{encoded}]]></content:encoded>
    </item>"#
    )
}

fn trailer_item(prefix: &str, position: usize) -> String {
    item_xml(
        &format!("{}{}", prefix, position),
        "Fri, 11 Dec 2020 06:00:00 -0800",
        &format!(
            r#"<a href="/x"><img src="http://x/{}{}.jpg" width="65"></a>"#,
            prefix, position
        ),
    )
}

fn rss(items: &[String]) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
<channel>
    <title>Latest Movie Trailers</title>
    <link>https://trailers.example.com/</link>
    {}
</channel>
</rss>"#,
        items.concat()
    )
}

fn feed_of(prefix: &str, count: usize) -> String {
    let items: Vec<String> = (0..count).map(|i| trailer_item(prefix, i)).collect();
    rss(&items)
}

async fn serve(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("Content-Type", "application/rss+xml"),
        )
        .mount(server)
        .await;
}

async fn test_db() -> Database {
    Database::open(":memory:", TableName::parse("movie").unwrap())
        .await
        .unwrap()
}

fn test_importer(db: Database, dir: &TempDir) -> Importer {
    let fetcher = Fetcher::new(&FetcherOptions {
        cookie_jar: dir.path().join("cookie.txt"),
        ..FetcherOptions::default()
    })
    .unwrap();
    Importer::new(db, fetcher, DEFAULT_WINDOW)
}

async fn stored_titles(db: &Database) -> Vec<String> {
    db.list_trailers()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.title)
        .collect()
}

fn titles(prefix: &str, positions: impl Iterator<Item = usize>) -> Vec<String> {
    positions.map(|i| format!("{}{}", prefix, i)).collect()
}

async fn seed_stale_rows(db: &Database, count: usize) {
    for i in 0..count {
        db.insert_trailer(&NewTrailer {
            title: format!("stale{}", i),
            link: "https://old.example.com/".to_string(),
            description: "stale".to_string(),
            pub_date: chrono::DateTime::parse_from_rfc3339("2019-01-01T00:00:00+00:00").unwrap(),
            image: None,
        })
        .await
        .unwrap();
    }
}

// ============================================================================
// Window Selection
// ============================================================================

#[tokio::test]
async fn test_fifteen_items_keep_last_ten_in_reverse_order() {
    let server = MockServer::start().await;
    serve(&server, "/feed.rss", feed_of("T", 15)).await;
    let dir = tempfile::tempdir().unwrap();
    let importer = test_importer(test_db().await, &dir);

    let summary = importer
        .run(&format!("{}/feed.rss", server.uri()))
        .await
        .unwrap();

    assert_eq!(summary.parsed, 15);
    assert_eq!(summary.saved, 10);
    // Listed by ascending id = insertion order
    assert_eq!(
        stored_titles(importer.database()).await,
        titles("T", (5..15).rev())
    );
}

#[tokio::test]
async fn test_three_items_are_all_imported_in_reverse_order() {
    let server = MockServer::start().await;
    serve(&server, "/feed.rss", feed_of("T", 3)).await;
    let dir = tempfile::tempdir().unwrap();
    let importer = test_importer(test_db().await, &dir);

    let summary = importer
        .run(&format!("{}/feed.rss", server.uri()))
        .await
        .unwrap();

    assert_eq!(summary.saved, 3);
    assert_eq!(
        stored_titles(importer.database()).await,
        vec!["T2", "T1", "T0"]
    );
}

#[tokio::test]
async fn test_empty_feed_succeeds_with_empty_table() {
    let server = MockServer::start().await;
    serve(&server, "/feed.rss", feed_of("T", 0)).await;
    let dir = tempfile::tempdir().unwrap();
    let db = test_db().await;
    seed_stale_rows(&db, 2).await;
    let importer = test_importer(db, &dir);

    let summary = importer
        .run(&format!("{}/feed.rss", server.uri()))
        .await
        .unwrap();

    assert_eq!(summary.removed, 2);
    assert_eq!(summary.saved, 0);
    assert!(stored_titles(importer.database()).await.is_empty());
}

// ============================================================================
// Replace Semantics
// ============================================================================

#[tokio::test]
async fn test_second_run_replaces_first() {
    let server = MockServer::start().await;
    serve(&server, "/a.rss", feed_of("A", 12)).await;
    serve(&server, "/b.rss", feed_of("B", 4)).await;
    let dir = tempfile::tempdir().unwrap();
    let importer = test_importer(test_db().await, &dir);

    importer
        .run(&format!("{}/a.rss", server.uri()))
        .await
        .unwrap();
    assert_eq!(importer.database().list_trailers().await.unwrap().len(), 10);

    importer
        .run(&format!("{}/b.rss", server.uri()))
        .await
        .unwrap();
    assert_eq!(
        stored_titles(importer.database()).await,
        titles("B", (0..4).rev())
    );
}

#[tokio::test]
async fn test_failed_fetch_leaves_table_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let db = test_db().await;
    seed_stale_rows(&db, 3).await;
    let importer = test_importer(db, &dir);

    let err = importer.run(&server.uri()).await.unwrap_err();

    assert!(
        matches!(err, ImportError::Fetch(FetchError::EmptyResponse)),
        "got {:?}",
        err
    );
    assert!(stored_titles(importer.database()).await.is_empty());
}

#[tokio::test]
async fn test_unreachable_feed_leaves_table_empty() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db().await;
    seed_stale_rows(&db, 3).await;
    let importer = test_importer(db, &dir);

    let err = importer
        .run("http://127.0.0.1:1/feed.rss")
        .await
        .unwrap_err();

    assert!(
        matches!(err, ImportError::Fetch(FetchError::Transport(_))),
        "got {:?}",
        err
    );
    assert!(stored_titles(importer.database()).await.is_empty());
}

#[tokio::test]
async fn test_prepare_failure_skips_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(feed_of("T", 3)))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("trailers.db");
    let db_path = db_path.to_str().unwrap();
    let db = Database::open(db_path, TableName::parse("movie").unwrap())
        .await
        .unwrap();

    // Remove the table behind the importer's back
    let other = sqlx::SqlitePool::connect(&format!("sqlite:{}", db_path))
        .await
        .unwrap();
    sqlx::query("DROP TABLE movie").execute(&other).await.unwrap();
    other.close().await;

    let importer = test_importer(db, &dir);
    let err = importer.run(&server.uri()).await.unwrap_err();

    assert!(matches!(err, ImportError::PrepareFailed(_)), "got {:?}", err);
}

// ============================================================================
// Record Contents
// ============================================================================

#[tokio::test]
async fn test_saved_record_is_retrievable_unchanged() {
    let server = MockServer::start().await;
    let feed = rss(&[item_xml(
        "Dune",
        "Fri, 11 Dec 2020 06:00:00 -0800",
        r#"<img src="http://x/y.jpg">"#,
    )]);
    serve(&server, "/feed.rss", feed).await;
    let dir = tempfile::tempdir().unwrap();
    let importer = test_importer(test_db().await, &dir);

    importer
        .run(&format!("{}/feed.rss", server.uri()))
        .await
        .unwrap();

    let listed = importer.database().list_trailers().await.unwrap();
    assert_eq!(listed.len(), 1);
    let fetched = importer
        .database()
        .get_trailer(listed[0].id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(fetched, listed[0]);
    assert_eq!(fetched.title, "Dune");
    assert_eq!(fetched.link, "https://trailers.example.com/Dune/");
    assert_eq!(fetched.description, "Description of Dune");
    assert_eq!(fetched.pub_date.to_rfc3339(), "2020-12-11T06:00:00-08:00");
    assert_eq!(fetched.image.as_deref(), Some("http://x/y.jpg"));
}

#[tokio::test]
async fn test_item_without_image_src_is_saved_without_image() {
    let server = MockServer::start().await;
    let feed = rss(&[item_xml(
        "NoPoster",
        "Fri, 11 Dec 2020 06:00:00 -0800",
        "<p>Coming soon</p>",
    )]);
    serve(&server, "/feed.rss", feed).await;
    let dir = tempfile::tempdir().unwrap();
    let importer = test_importer(test_db().await, &dir);

    importer
        .run(&format!("{}/feed.rss", server.uri()))
        .await
        .unwrap();

    let listed = importer.database().list_trailers().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].image, None);
}

#[tokio::test]
async fn test_lookup_of_unknown_id_is_none() {
    let db = test_db().await;
    assert!(db.get_trailer(12345).await.unwrap().is_none());
}

// ============================================================================
// Partial Failure
// ============================================================================

#[tokio::test]
async fn test_malformed_item_is_skipped_not_fatal() {
    let server = MockServer::start().await;
    let mut items: Vec<String> = (0..3).map(|i| trailer_item("T", i)).collect();
    items.insert(1, "<item><title>broken &undefined; entity</title></item>".to_string());
    serve(&server, "/feed.rss", rss(&items)).await;
    let dir = tempfile::tempdir().unwrap();
    let importer = test_importer(test_db().await, &dir);

    let summary = importer
        .run(&format!("{}/feed.rss", server.uri()))
        .await
        .unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.saved, 3);
    assert_eq!(
        stored_titles(importer.database()).await,
        vec!["T2", "T1", "T0"]
    );
}

#[tokio::test]
async fn test_invalid_date_aborts_and_keeps_committed_rows() {
    let server = MockServer::start().await;
    let items = vec![
        trailer_item("T", 0),
        item_xml("Bad", "sometime next week", ""),
        trailer_item("T", 2),
    ];
    serve(&server, "/feed.rss", rss(&items)).await;
    let dir = tempfile::tempdir().unwrap();
    let importer = test_importer(test_db().await, &dir);

    let err = importer
        .run(&format!("{}/feed.rss", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::InvalidDate { .. }), "got {:?}", err);
    // T2 was saved before the bad item, T0 never reached
    assert_eq!(stored_titles(importer.database()).await, vec!["T2"]);
}

#[tokio::test]
async fn test_missing_required_field_aborts() {
    let server = MockServer::start().await;
    let items = vec![
        trailer_item("T", 0),
        "<item><title>No link</title><description>d</description><pubDate>Fri, 11 Dec 2020 06:00:00 -0800</pubDate></item>".to_string(),
    ];
    serve(&server, "/feed.rss", rss(&items)).await;
    let dir = tempfile::tempdir().unwrap();
    let importer = test_importer(test_db().await, &dir);

    let err = importer
        .run(&format!("{}/feed.rss", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::MissingField("link")), "got {:?}", err);
    assert!(stored_titles(importer.database()).await.is_empty());
}

#[tokio::test]
async fn test_item_without_encoded_content_aborts() {
    let server = MockServer::start().await;
    let items = vec![
        "<item><title>Plain</title><link>https://trailers.example.com/plain/</link><description>d</description><pubDate>Fri, 11 Dec 2020 06:00:00 -0800</pubDate></item>".to_string(),
        trailer_item("T", 1),
    ];
    serve(&server, "/feed.rss", rss(&items)).await;
    let dir = tempfile::tempdir().unwrap();
    let importer = test_importer(test_db().await, &dir);

    let err = importer
        .run(&format!("{}/feed.rss", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::MissingField("image")), "got {:?}", err);
    // T1 comes first in the selection and is already saved
    assert_eq!(stored_titles(importer.database()).await, vec!["T1"]);
}

#[tokio::test]
async fn test_cancelled_run_stops_before_saving() {
    let server = MockServer::start().await;
    serve(&server, "/feed.rss", feed_of("T", 5)).await;
    let dir = tempfile::tempdir().unwrap();
    let db = test_db().await;
    seed_stale_rows(&db, 2).await;
    let importer = test_importer(db, &dir);

    importer.cancel_flag().store(true, Ordering::SeqCst);
    let err = importer
        .run(&format!("{}/feed.rss", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::Cancelled { saved: 0 }), "got {:?}", err);
    assert!(stored_titles(importer.database()).await.is_empty());
}

// ============================================================================
// Cookies
// ============================================================================

#[tokio::test]
async fn test_import_writes_cookie_jar() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(feed_of("T", 1))
                .insert_header("Set-Cookie", "geo=RU; Path=/; Max-Age=86400"),
        )
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let importer = test_importer(test_db().await, &dir);

    importer.run(&server.uri()).await.unwrap();

    let jar = std::fs::read_to_string(dir.path().join("cookie.txt")).unwrap();
    assert!(jar.contains("geo\tRU"));
}
