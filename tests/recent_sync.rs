//! End-to-end sync tests against a mock Newznab indexer
//!
//! These tests run the full stack: reqwest over HTTP to a wiremock server,
//! the feed parser, the orchestrator and the SQLite store.

mod common;

use common::{Item, PAGE_SIZE, newznab_error, newznab_feed, open_orchestrator, provider};
use indexer_sync::{Event, FailureKind, FetchMode, ProviderId, RunOutcome, SearchCriteria};
use std::time::Duration;
use tempfile::NamedTempFile;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rss(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "application/rss+xml")
        .set_body_string(body)
}

async fn mount_page(server: &MockServer, offset: usize, items: &[Item], times: Option<u64>) {
    let mock = Mock::given(method("GET"))
        .and(path("/api"))
        .and(query_param("offset", offset.to_string()))
        .respond_with(rss(newznab_feed(&server.uri(), items)));
    let mock = match times {
        Some(n) => mock.up_to_n_times(n),
        None => mock,
    };
    mock.mount(server).await;
}

#[tokio::test]
async fn first_sync_sets_cursor_and_next_sync_stops_at_it() {
    let server = MockServer::start().await;
    let temp = NamedTempFile::new().unwrap();
    let (orchestrator, db) = open_orchestrator(temp.path()).await;
    let indexer = provider("example", &server.uri());

    // first run: one page only, there is no earlier sync point
    mount_page(
        &server,
        0,
        &[Item::new(3, 30), Item::new(2, 40), Item::new(1, 50)],
        Some(1),
    )
    .await;

    let first = orchestrator.fetch_recent(&indexer).await;
    assert!(first.is_success(), "{:?}", first.outcome);
    assert_eq!(first.releases.len(), 3);
    assert_eq!(first.fully_updated, Some(true));
    assert_eq!(first.releases[0].title, "Show.S01E03.1080p.WEB-DL");
    assert_eq!(first.releases[0].size, Some(2_147_483_648));
    assert_eq!(first.releases[0].provider, ProviderId::from("example"));

    let cursor = db
        .get_sync_cursor(&ProviderId::from("example"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cursor.download_url, Item::new(3, 30).download_url(&server.uri()));

    // second run: two new releases above the cursor release
    mount_page(
        &server,
        0,
        &[Item::new(5, 5), Item::new(4, 10), Item::new(3, 30)],
        None,
    )
    .await;

    let second = orchestrator.fetch_recent(&indexer).await;
    assert!(second.is_success());
    assert_eq!(second.fully_updated, Some(true));
    let titles: Vec<_> = second.releases.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(
        titles,
        vec!["Show.S01E05.1080p.WEB-DL", "Show.S01E04.1080p.WEB-DL"]
    );

    let cursor = db
        .get_sync_cursor(&ProviderId::from("example"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cursor.download_url, Item::new(5, 5).download_url(&server.uri()));

    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn unchanged_feed_keeps_the_cursor_as_is() {
    let server = MockServer::start().await;
    let temp = NamedTempFile::new().unwrap();
    let (orchestrator, db) = open_orchestrator(temp.path()).await;
    let indexer = provider("example", &server.uri());
    let id = ProviderId::from("example");

    mount_page(
        &server,
        0,
        &[Item::new(3, 30), Item::new(2, 40), Item::new(1, 50)],
        None,
    )
    .await;

    assert!(orchestrator.fetch_recent(&indexer).await.is_success());
    let cursor = db.get_sync_cursor(&id).await.unwrap().unwrap();

    let again = orchestrator.fetch_recent(&indexer).await;

    assert!(again.is_success(), "{:?}", again.outcome);
    assert!(again.releases.is_empty());
    assert_eq!(again.fully_updated, Some(true));
    assert_eq!(db.get_sync_cursor(&id).await.unwrap(), Some(cursor));
}

#[tokio::test]
async fn sync_pages_back_until_the_cursor() {
    let server = MockServer::start().await;
    let temp = NamedTempFile::new().unwrap();
    let (orchestrator, _db) = open_orchestrator(temp.path()).await;
    let indexer = provider("example", &server.uri());

    mount_page(&server, 0, &[Item::new(1, 120)], Some(1)).await;
    assert!(orchestrator.fetch_recent(&indexer).await.is_success());

    mount_page(
        &server,
        0,
        &[Item::new(7, 5), Item::new(6, 10), Item::new(5, 15)],
        None,
    )
    .await;
    mount_page(
        &server,
        PAGE_SIZE,
        &[Item::new(4, 20), Item::new(1, 120), Item::new(0, 130)],
        None,
    )
    .await;

    let report = orchestrator.fetch_recent(&indexer).await;

    assert!(report.is_success());
    assert_eq!(report.fully_updated, Some(true));
    assert_eq!(report.releases.len(), 4);
    assert!(
        report
            .releases
            .windows(2)
            .all(|pair| pair[0].publish_date >= pair[1].publish_date)
    );
    // one request for the first run, two for the second
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn rate_limit_disables_provider_across_restarts() {
    let server = MockServer::start().await;
    let temp = NamedTempFile::new().unwrap();
    let (orchestrator, _db) = open_orchestrator(temp.path()).await;
    let indexer = provider("example", &server.uri());
    let mut events = orchestrator.subscribe();

    Mock::given(method("GET"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1800"))
        .mount(&server)
        .await;

    let report = orchestrator.fetch_recent(&indexer).await;
    assert!(matches!(
        report.outcome,
        RunOutcome::Failed {
            kind: FailureKind::RateLimited,
            ..
        }
    ));

    match events.recv().await.unwrap() {
        Event::ProviderFailed {
            kind,
            disabled_until,
            ..
        } => {
            assert_eq!(kind, FailureKind::RateLimited);
            let remaining = disabled_until.unwrap() - chrono::Utc::now();
            assert!(remaining > chrono::Duration::minutes(29));
            assert!(remaining <= chrono::Duration::minutes(30));
        }
        other => panic!("expected ProviderFailed, got {other:?}"),
    }

    // a fresh orchestrator over the same database still honours the disable
    let (restarted, db) = open_orchestrator(temp.path()).await;
    let report = restarted.fetch_recent(&indexer).await;
    assert!(matches!(report.outcome, RunOutcome::Skipped { .. }));

    let status = db
        .get_provider_status(&ProviderId::from("example"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.last_failure_kind, Some(FailureKind::RateLimited));
    assert_eq!(status.consecutive_failures, 1);

    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn api_error_in_ok_response_is_an_auth_failure() {
    let server = MockServer::start().await;
    let temp = NamedTempFile::new().unwrap();
    let (orchestrator, db) = open_orchestrator(temp.path()).await;
    let indexer = provider("example", &server.uri());

    Mock::given(method("GET"))
        .and(path("/api"))
        .respond_with(rss(newznab_error(100, "Incorrect user credentials")))
        .mount(&server)
        .await;

    let report = orchestrator.fetch_recent(&indexer).await;

    match &report.outcome {
        RunOutcome::Failed { kind, message } => {
            assert_eq!(*kind, FailureKind::AuthFailure);
            assert!(message.contains("Incorrect user credentials"), "{message}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(
        db.get_sync_cursor(&ProviderId::from("example"))
            .await
            .unwrap()
            .is_none()
    );
    let status = db
        .get_provider_status(&ProviderId::from("example"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.escalation_level, 1);
}

#[tokio::test]
async fn server_error_mid_sync_keeps_first_page_and_cursor() {
    let server = MockServer::start().await;
    let temp = NamedTempFile::new().unwrap();
    let (orchestrator, db) = open_orchestrator(temp.path()).await;
    let indexer = provider("example", &server.uri());

    mount_page(&server, 0, &[Item::new(1, 120)], Some(1)).await;
    assert!(orchestrator.fetch_recent(&indexer).await.is_success());
    let before = db
        .get_sync_cursor(&ProviderId::from("example"))
        .await
        .unwrap();

    mount_page(
        &server,
        0,
        &[Item::new(4, 5), Item::new(3, 10), Item::new(2, 15)],
        None,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/api"))
        .and(query_param("offset", PAGE_SIZE.to_string()))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let report = orchestrator.fetch_recent(&indexer).await;

    assert!(matches!(
        report.outcome,
        RunOutcome::Failed {
            kind: FailureKind::ServerUnavailable,
            ..
        }
    ));
    assert_eq!(report.releases.len(), 3);
    let after = db
        .get_sync_cursor(&ProviderId::from("example"))
        .await
        .unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn search_returns_results_without_touching_the_cursor() {
    let server = MockServer::start().await;
    let temp = NamedTempFile::new().unwrap();
    let (orchestrator, db) = open_orchestrator(temp.path()).await;
    let indexer = provider("example", &server.uri());

    Mock::given(method("GET"))
        .and(path("/api"))
        .and(query_param("q", "show"))
        .and(query_param("offset", "0"))
        .respond_with(rss(newznab_feed(
            &server.uri(),
            &[Item::new(2, 10), Item::new(1, 20)],
        )))
        .mount(&server)
        .await;

    let criteria = SearchCriteria {
        query: Some("show".into()),
        ..Default::default()
    };
    let report = orchestrator.fetch_search(&indexer, &criteria).await;

    assert!(report.is_success(), "{:?}", report.outcome);
    assert_eq!(report.mode, FetchMode::Search);
    assert_eq!(report.fully_updated, None);
    assert_eq!(report.releases.len(), 2);
    assert!(
        db.get_sync_cursor(&ProviderId::from("example"))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_provider_reports_page_count() {
    let server = MockServer::start().await;
    let temp = NamedTempFile::new().unwrap();
    let (orchestrator, _db) = open_orchestrator(temp.path()).await;
    let indexer = provider("example", &server.uri());

    mount_page(&server, 0, &[Item::new(2, 10), Item::new(1, 20)], None).await;

    let count = tokio::time::timeout(Duration::from_secs(10), orchestrator.test_provider(&indexer))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(count, 2);
}
