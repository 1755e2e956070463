// End-to-end runs through SyncRunner

use bucketsync::error::SyncError;
use bucketsync::sync::{hash_bytes, TransferOperation};
use bucketsync::{SyncOptions, SyncRunner};
use std::path::Path;

use crate::common::{at, store, BuildDir};

fn options(root: &Path) -> SyncOptions {
    let mut options = SyncOptions::new(root, "www.example.com");
    options.delete = true;
    options
}

#[tokio::test]
async fn test_run_applies_plan() {
    let build = BuildDir::new();
    build.file("a.html", b"<h1>new</h1>", at(100));
    build.file("b.css", b"body { color: red }", at(200));
    let store = store();
    store.insert_at("b.css", b"body {}", at(100));
    store.insert_at("c.js", b"console.log(1)", at(0));

    let summary = SyncRunner::new(options(build.path()), store.clone()).run().await.unwrap();

    assert_eq!((summary.created, summary.updated, summary.deleted), (1, 1, 1));
    assert_eq!(summary.failed, 0);
    assert!(summary.is_success());
    assert_eq!(store.keys(), vec!["a.html", "b.css"]);
    assert_eq!(store.get("b.css").unwrap().body, b"body { color: red }");
}

#[tokio::test]
async fn test_excluded_paths_never_touched() {
    let build = BuildDir::new();
    build.file("index.html", b"hi", at(100));
    build.file("app.js.map", b"{}", at(100));
    build.file("drafts/post.html", b"wip", at(100));
    let store = store();
    store.insert_at("vendor.js.map", b"{}", at(0));
    store.insert_at("drafts/old.html", b"old", at(0));
    store.insert_at("stale.html", b"bye", at(0));

    let mut options = options(build.path());
    options.exclude = vec!["*.map".to_string(), "drafts".to_string()];

    let summary = SyncRunner::new(options, store.clone()).run().await.unwrap();

    assert_eq!(summary.created, 1);
    assert_eq!(summary.deleted, 1);
    assert_eq!(store.keys(), vec!["drafts/old.html", "index.html", "vendor.js.map"]);
}

#[tokio::test]
async fn test_dry_run_leaves_bucket_untouched() {
    let build = BuildDir::new();
    build.file("new.txt", b"n", at(100));
    build.file("changed.txt", b"v2", at(200));
    let store = store();
    store.insert_at("changed.txt", b"v1", at(100));
    store.insert_at("orphan.txt", b"o", at(100));

    let mut options = options(build.path());
    options.dry_run = true;
    let summary = SyncRunner::new(options, store.clone()).run().await.unwrap();

    assert!(summary.dry_run);
    assert_eq!((summary.created, summary.updated, summary.deleted), (1, 1, 1));
    assert_eq!(summary.bytes_uploaded, 0);
    assert_eq!(store.put_calls(), 0);
    assert_eq!(store.delete_calls(), 0);
    assert_eq!(store.get("changed.txt").unwrap().body, b"v1");
}

#[tokio::test]
async fn test_missing_build_dir_aborts_before_mutation() {
    let build = BuildDir::new();
    let store = store();
    store.insert_at("index.html", b"live", at(0));

    let options = options(&build.path().join("dist"));
    let err = SyncRunner::new(options, store.clone()).run().await.unwrap_err();

    assert!(matches!(err, SyncError::BuildDirNotFound { .. }));
    assert!(err.is_fatal());
    assert_eq!(store.put_calls(), 0);
    assert_eq!(store.delete_calls(), 0);
    assert!(store.contains("index.html"));
}

#[tokio::test]
async fn test_listing_failure_aborts_before_mutation() {
    let build = BuildDir::new();
    build.file("index.html", b"hi", at(100));
    let store = store();
    store.fail_listing();

    let err = SyncRunner::new(options(build.path()), store.clone()).run().await.unwrap_err();

    assert!(matches!(err, SyncError::RemoteListFailed { .. }));
    assert_eq!(store.put_calls(), 0);
}

#[tokio::test]
async fn test_per_file_failures_are_reported_with_paths() {
    let build = BuildDir::new();
    build.file("ok.txt", b"ok", at(100));
    build.file("bad.txt", b"bad", at(100));
    let store = store();
    store.insert_at("stuck.txt", b"s", at(0));
    store.fail_put("bad.txt");
    store.fail_delete("stuck.txt");

    let summary = SyncRunner::new(options(build.path()), store.clone()).run().await.unwrap();

    assert_eq!(summary.created, 1);
    assert_eq!(summary.failed, 2);
    let failed: Vec<(&str, TransferOperation)> =
        summary.failures.iter().map(|f| (f.path.as_str(), f.operation)).collect();
    assert_eq!(
        failed,
        vec![("bad.txt", TransferOperation::Create), ("stuck.txt", TransferOperation::Delete)]
    );
    assert!(!summary.is_success());
}

#[tokio::test]
async fn test_stat_failure_reported_as_evaluation_failure() {
    let build = BuildDir::new();
    build.file("feed.xml", b"<rss/>", at(200));
    let store = store();
    store.insert_at("feed.xml", b"<rss/>", at(100));
    store.hide_listing_metadata("feed.xml");
    store.fail_stat("feed.xml");

    let summary = SyncRunner::new(options(build.path()), store.clone()).run().await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures[0].operation, TransferOperation::Evaluate);
    assert_eq!(store.put_calls(), 0);
}

#[tokio::test]
async fn test_gzip_preference_end_to_end() {
    let build = BuildDir::new();
    build.file("app.js", b"const x = 1;", at(100));
    let compressed = build.gzip("app.js.gz", b"const x = 1;", at(100));
    let store = store();

    let mut options = options(build.path());
    options.prefer_gzip = true;
    let runner = SyncRunner::new(options, store.clone());

    let first = runner.run().await.unwrap();
    assert_eq!(first.created, 1);
    assert_eq!(store.keys(), vec!["app.js"]);
    let object = store.get("app.js").unwrap();
    assert_eq!(object.body, compressed);
    assert_eq!(object.etag, hash_bytes(&compressed));
    assert_eq!(object.content_encoding.as_deref(), Some("gzip"));

    let second = runner.run().await.unwrap();
    assert!(second.is_noop());
}

#[tokio::test]
async fn test_policies_from_config() {
    let build = BuildDir::new();
    build.file("index.html", b"<html></html>", at(100));
    let store = store();

    let toml = format!(
        "build_dir = {:?}\nbucket = \"b\"\n\n[caching_policies.\"text/html\"]\nmax_age = 0\nmust_revalidate = true\n",
        build.path().to_string_lossy()
    );
    let options = SyncOptions::from_toml(&toml).unwrap();

    SyncRunner::new(options, store.clone()).run().await.unwrap();

    assert_eq!(
        store.get("index.html").unwrap().cache_control.as_deref(),
        Some("max-age=0, must-revalidate")
    );
}

#[tokio::test]
async fn test_force_reuploads_unchanged_files() {
    let build = BuildDir::new();
    build.file("a.txt", b"a", at(100));
    let store = store();
    store.insert_at("a.txt", b"a", at(100));

    let mut options = options(build.path());
    options.force = true;
    let summary = SyncRunner::new(options, store.clone()).run().await.unwrap();

    assert_eq!(summary.updated, 1);
    assert_eq!(summary.skipped, 0);
    assert_eq!(store.put_calls(), 1);
}
