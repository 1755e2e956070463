// Tests for applying plans to the store

use bucketsync::config::Concurrency;
use bucketsync::fs::list_remote;
use bucketsync::sync::{
    CachePolicy, PolicyTable, ReconcileOptions, Reconciler, RequestLimiter, TransferExecutor, TransferOperation,
};

use crate::common::{at, store, BuildDir};

fn options() -> ReconcileOptions {
    ReconcileOptions {
        delete_orphans: true,
        concurrency: Concurrency::uniform(4),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_single_failure_among_many() {
    let build = BuildDir::new();
    for i in 0..8 {
        build.file(&format!("page-{}.html", i), format!("page {}", i).as_bytes(), at(100));
    }
    let store = store();
    store.fail_put("page-3.html");

    let plan = Reconciler::new(store.clone(), options())
        .reconcile(&build.index(), &list_remote(&*store).await.unwrap())
        .await
        .unwrap();
    let report = TransferExecutor::new(store.clone(), PolicyTable::new(), 3)
        .execute_transfers(&plan)
        .await;

    assert_eq!(report.created.len(), 7);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, "page-3.html");
    assert_eq!(report.failures[0].operation, TransferOperation::Create);
    assert_eq!(store.keys().len(), 7);
    assert!(!store.contains("page-3.html"));
}

#[tokio::test]
async fn test_uploads_carry_policy_headers() {
    let build = BuildDir::new();
    build.file("index.html", b"<html></html>", at(100));
    build.file("img/logo.png", b"\x89PNG", at(100));
    build.file("data.bin", b"\x00\x01", at(100));
    let store = store();

    let mut policies = PolicyTable::new();
    policies.register("text/html", CachePolicy { no_cache: true, must_revalidate: true, ..Default::default() });
    policies.register("image/png", CachePolicy { max_age: Some(31536000), public: true, expires_in: Some(3600), ..Default::default() });

    let plan = Reconciler::new(store.clone(), options())
        .reconcile(&build.index(), &list_remote(&*store).await.unwrap())
        .await
        .unwrap();
    let report = TransferExecutor::new(store.clone(), policies, 2)
        .execute_transfers(&plan)
        .await;
    assert!(report.failures.is_empty());

    let html = store.get("index.html").unwrap();
    assert_eq!(html.content_type.as_deref(), Some("text/html"));
    assert_eq!(html.cache_control.as_deref(), Some("no-cache, must-revalidate"));
    assert_eq!(html.expires, None);
    assert!(html.public);

    let png = store.get("img/logo.png").unwrap();
    assert_eq!(png.content_type.as_deref(), Some("image/png"));
    assert_eq!(png.cache_control.as_deref(), Some("max-age=31536000, public"));
    assert!(png.expires.unwrap().ends_with(" GMT"));

    // No policy and no default: no extra headers
    let bin = store.get("data.bin").unwrap();
    assert_eq!(bin.cache_control, None);
    assert_eq!(bin.expires, None);
}

#[tokio::test]
async fn test_default_policy_applies_to_unlisted_types() {
    let build = BuildDir::new();
    build.file("style.css", b"a{}", at(100));
    let store = store();

    let mut policies = PolicyTable::new();
    policies.register_default(CachePolicy { max_age: Some(60), ..Default::default() });

    let plan = Reconciler::new(store.clone(), options())
        .reconcile(&build.index(), &list_remote(&*store).await.unwrap())
        .await
        .unwrap();
    TransferExecutor::new(store.clone(), policies, 1)
        .execute_transfers(&plan)
        .await;

    assert_eq!(store.get("style.css").unwrap().cache_control.as_deref(), Some("max-age=60"));
}

#[tokio::test]
async fn test_deletions_apply_under_rate_limit() {
    let build = BuildDir::new();
    build.file("keep.txt", b"k", at(100));
    let store = store();
    store.insert_at("keep.txt", b"k", at(100));
    store.insert_at("gone-1.txt", b"1", at(100));
    store.insert_at("gone-2.txt", b"2", at(100));

    let plan = Reconciler::new(store.clone(), options())
        .reconcile(&build.index(), &list_remote(&*store).await.unwrap())
        .await
        .unwrap();
    let report = TransferExecutor::new(store.clone(), PolicyTable::new(), 2)
        .with_limiter(RequestLimiter::new(Some(100)))
        .execute_deletions(&plan)
        .await;

    assert_eq!(report.deleted, vec!["gone-1.txt", "gone-2.txt"]);
    assert_eq!(store.keys(), vec!["keep.txt"]);
    assert_eq!(store.delete_calls(), 2);
}

#[tokio::test]
async fn test_transfer_pool_respects_limit() {
    let build = BuildDir::new();
    let store = store();
    for i in 0..20 {
        build.file(&format!("img/{}.png", i), b"\x89PNG", at(100));
        store.insert_at(&format!("old/{}.png", i), b"x", at(100));
    }

    let plan = Reconciler::new(store.clone(), options())
        .reconcile(&build.index(), &list_remote(&*store).await.unwrap())
        .await
        .unwrap();
    let executor = TransferExecutor::new(store.clone(), PolicyTable::new(), 4);

    let uploads = executor.execute_transfers(&plan).await;
    assert_eq!(uploads.created.len(), 20);
    assert!(store.max_in_flight() <= 4, "saw {} concurrent uploads", store.max_in_flight());
    assert!(store.max_in_flight() > 1);

    store.reset_max_in_flight();
    let deletions = executor.execute_deletions(&plan).await;
    assert_eq!(deletions.deleted.len(), 20);
    assert!(store.max_in_flight() <= 4, "saw {} concurrent deletes", store.max_in_flight());
    assert!(store.max_in_flight() > 1);
}
