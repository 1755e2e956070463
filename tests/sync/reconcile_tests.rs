// Tests for the reconciliation engine against real build directories

use bucketsync::config::Concurrency;
use bucketsync::fs::{list_remote, MemoryStore};
use bucketsync::sync::{hash_bytes, ReconcileOptions, Reconciler, SyncPlan};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::common::{at, keys, store, BuildDir};

fn options() -> ReconcileOptions {
    ReconcileOptions {
        concurrency: Concurrency::uniform(4),
        ..Default::default()
    }
}

async fn reconcile(build: &BuildDir, store: &Arc<MemoryStore>, options: ReconcileOptions) -> SyncPlan {
    let local = build.index();
    let remote = list_remote(&**store).await.unwrap();
    Reconciler::new(store.clone(), options)
        .reconcile(&local, &remote)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_create_update_delete_partition() {
    let build = BuildDir::new();
    build.file("a.html", b"<h1>new</h1>", at(100));
    build.file("b.css", b"body { color: red }", at(200));
    let store = store();
    store.insert_at("b.css", b"body {}", at(100));
    store.insert_at("c.js", b"console.log(1)", at(0));

    let plan = reconcile(&build, &store, ReconcileOptions { delete_orphans: true, ..options() }).await;

    assert_eq!(keys(plan.to_create()), vec!["a.html"]);
    assert_eq!(keys(plan.to_update()), vec!["b.css"]);
    assert_eq!(keys(plan.to_delete()), vec!["c.js"]);
    assert!(plan.failures().is_empty());
}

#[tokio::test]
async fn test_identical_tree_is_noop() {
    let build = BuildDir::new();
    build.file("x.txt", b"same", at(100));
    let store = store();
    store.insert_at("x.txt", b"same", at(100));

    let plan = reconcile(&build, &store, ReconcileOptions { delete_orphans: true, ..options() }).await;

    assert!(plan.is_empty());
    assert_eq!(keys(plan.skipped()), vec!["x.txt"]);
}

#[tokio::test]
async fn test_orphans_kept_without_delete_flag() {
    let build = BuildDir::new();
    build.file("index.html", b"hi", at(100));
    let store = store();
    store.insert_at("legacy.html", b"old", at(0));

    let plan = reconcile(&build, &store, options()).await;

    assert_eq!(keys(plan.to_create()), vec!["index.html"]);
    assert!(plan.to_delete().is_empty());
}

#[tokio::test]
async fn test_newer_remote_skips_even_when_content_differs() {
    let build = BuildDir::new();
    build.file("page.html", b"local edit", at(100));
    let store = store();
    store.insert_at("page.html", b"remote edit", at(500));

    let plan = reconcile(&build, &store, options()).await;

    assert!(plan.is_empty());
    assert_eq!(keys(plan.skipped()), vec!["page.html"]);
}

#[tokio::test]
async fn test_touched_but_unchanged_file_is_skipped() {
    let build = BuildDir::new();
    build.file("logo.svg", b"<svg/>", at(900));
    let store = store();
    store.insert_at("logo.svg", b"<svg/>", at(100));

    let plan = reconcile(&build, &store, options()).await;

    assert!(plan.is_empty());
}

#[tokio::test]
async fn test_nested_paths_use_forward_slashes() {
    let build = BuildDir::new();
    build.file("blog/2024/post.html", b"post", at(100));
    build.file(".well-known/security.txt", b"contact", at(100));
    let store = store();

    let plan = reconcile(&build, &store, options()).await;

    assert_eq!(
        keys(plan.to_create()),
        vec![".well-known/security.txt", "blog/2024/post.html"]
    );
}

#[tokio::test]
async fn test_force_pushes_every_local_file() {
    for delete_orphans in [false, true] {
        let build = BuildDir::new();
        build.file("a.txt", b"a", at(100));
        build.file("b.txt", b"b", at(100));
        build.file("c/d.txt", b"d", at(100));
        let store = store();
        store.insert_at("a.txt", b"a", at(100));
        store.insert_at("b.txt", b"b", at(900));
        store.insert_at("orphan.txt", b"o", at(0));

        let plan = reconcile(
            &build,
            &store,
            ReconcileOptions { force: true, delete_orphans, ..options() },
        )
        .await;

        let pushed: BTreeSet<&str> = plan
            .to_create()
            .iter()
            .chain(plan.to_update())
            .map(String::as_str)
            .collect();
        assert_eq!(pushed, BTreeSet::from(["a.txt", "b.txt", "c/d.txt"]));
        assert!(plan.to_create().is_disjoint(plan.to_update()));
        assert_eq!(keys(plan.to_create()), vec!["c/d.txt"]);
        assert_eq!(plan.to_delete().contains("orphan.txt"), delete_orphans);
        assert_eq!(store.stat_calls(), 0);
    }
}

#[tokio::test]
async fn test_gzip_sibling_is_compared_and_folded() {
    let build = BuildDir::new();
    build.file("app.js", b"let answer = 42;", at(200));
    let compressed = build.gzip("app.js.gz", b"let answer = 42;", at(200));
    let store = store();
    store.insert_at("app.js", &compressed, at(100));

    let plan = reconcile(&build, &store, ReconcileOptions { prefer_gzip: true, delete_orphans: true, ..options() }).await;

    // Remote already holds the compressed bytes under the logical key
    assert!(plan.is_empty());
    assert!(!plan.to_create().contains("app.js.gz"));
}

#[tokio::test]
async fn test_gzip_sibling_change_updates_logical_key() {
    let build = BuildDir::new();
    build.file("app.js", b"let answer = 43;", at(200));
    build.gzip("app.js.gz", b"let answer = 43;", at(200));
    let store = store();
    store.insert_with_etag("app.js", b"stale", at(100), &hash_bytes(b"stale"));

    let plan = reconcile(&build, &store, ReconcileOptions { prefer_gzip: true, ..options() }).await;

    assert_eq!(keys(plan.to_update()), vec!["app.js"]);
    let source = plan.source_for("app.js").unwrap();
    assert!(source.gzip);
    assert!(source.path.ends_with("app.js.gz"));
}

#[tokio::test]
async fn test_without_gzip_preference_both_files_travel() {
    let build = BuildDir::new();
    build.file("app.js", b"x", at(100));
    build.gzip("app.js.gz", b"x", at(100));
    let store = store();

    let plan = reconcile(&build, &store, options()).await;

    assert_eq!(keys(plan.to_create()), vec!["app.js", "app.js.gz"]);
    assert!(!plan.source_for("app.js").unwrap().gzip);
}

#[tokio::test]
async fn test_sparse_listing_stats_the_key() {
    let build = BuildDir::new();
    build.file("feed.xml", b"<rss/>", at(100));
    let store = store();
    store.insert_at("feed.xml", b"<rss/>", at(100));
    store.hide_listing_metadata("feed.xml");

    let plan = reconcile(&build, &store, options()).await;

    assert!(plan.is_empty());
    assert_eq!(store.stat_calls(), 1);
}

#[tokio::test]
async fn test_reconcile_twice_gives_same_plan() {
    let build = BuildDir::new();
    build.file("a.txt", b"one", at(300));
    build.file("b.txt", b"two", at(300));
    let store = store();
    store.insert_at("a.txt", b"uno", at(100));
    store.insert_at("z.txt", b"zzz", at(100));
    let opts = ReconcileOptions { delete_orphans: true, ..options() };

    let first = reconcile(&build, &store, opts).await;
    let second = reconcile(&build, &store, opts).await;

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_evaluation_pool_respects_limit() {
    let build = BuildDir::new();
    let store = store();
    for i in 0..20 {
        let key = format!("posts/{}.html", i);
        build.file(&key, b"fresh", at(500));
        store.insert_at(&key, b"stale", at(100));
        store.hide_listing_metadata(&key);
    }
    let opts = ReconcileOptions {
        concurrency: Concurrency { evaluate: 3, ..Concurrency::uniform(8) },
        ..Default::default()
    };

    let plan = reconcile(&build, &store, opts).await;

    assert_eq!(plan.to_update().len(), 20);
    assert_eq!(store.stat_calls(), 20);
    assert!(store.max_in_flight() <= 3, "saw {} concurrent stats", store.max_in_flight());
    assert!(store.max_in_flight() > 1);
}
