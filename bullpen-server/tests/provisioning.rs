use axum::http::StatusCode;
use bullpen_config::BoardConfig;
use bullpen_core::{ConnectionDescriptor, JobStatus};
use serde_json::Value;

mod common;
use common::TestBackends;

#[tokio::test]
async fn bad_backend_does_not_take_down_good_board() {
    let backends = TestBackends::new();
    let good = TestBackends::memory(1);
    backends.add_queue(&good, "jobs");
    backends.scanner.refuse_host("down.internal");

    let server = backends
        .server(&[
            BoardConfig::new(
                "/a",
                ConnectionDescriptor::new("down.internal", 6379, 0),
            ),
            BoardConfig::new("/b", good),
        ])
        .await;

    let listing = server.get("/b/api/queues").await;
    listing.assert_status_ok();
    let body: Value = listing.json();
    assert_eq!(body["board"], "/b");
    assert_eq!(body["queues"][0]["name"], "jobs");

    let shell = server.get("/a").await;
    shell.assert_status_ok();
    assert!(shell.text().contains("No queues were found"));

    let empty: Value = server.get("/a/api/queues").await.json();
    assert_eq!(empty["queues"], serde_json::json!([]));

    server.get("/health").await.assert_status_ok();
}

#[tokio::test]
async fn failed_board_is_not_routed() {
    let backends = TestBackends::new();
    let server = backends
        .server(&[
            BoardConfig::new("/broken", ConnectionDescriptor::new("", 6379, 0)),
            BoardConfig::new("/fine", TestBackends::memory(1)),
        ])
        .await;

    server
        .get("/broken")
        .expect_failure()
        .await
        .assert_status(StatusCode::NOT_FOUND);
    server.get("/fine").await.assert_status_ok();
}

#[tokio::test]
async fn liveness_answers_when_every_board_failed() {
    let backends = TestBackends::new();
    let server = backends
        .server(&[
            BoardConfig::new("relative", TestBackends::memory(1)),
            BoardConfig::new("/x", ConnectionDescriptor::new("bad host", 6379, 0)),
        ])
        .await;

    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["boards_mounted"], 0);
    assert_eq!(body["boards_failed"], 2);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn liveness_answers_with_no_boards() {
    let server = TestBackends::new().server(&[]).await;
    let body: Value = server.get("/health").await.json();
    assert_eq!(body["boards_mounted"], 0);
    assert_eq!(body["boards_failed"], 0);
}

#[tokio::test]
async fn read_only_board_rejects_mutations_over_http() {
    let backends = TestBackends::new();
    let descriptor = TestBackends::memory(2);
    backends.add_queue(&descriptor, "mail");
    backends
        .factory
        .seed_job(&descriptor, "mail", JobStatus::Failed, "7");

    let server = backends
        .server(&[BoardConfig::new("/ro", descriptor.clone()).read_only(true)])
        .await;

    let listing: Value = server.get("/ro/api/queues").await.json();
    assert_eq!(listing["read_only"], true);

    for response in [
        server
            .put("/ro/api/queues/mail/jobs/7/retry")
            .expect_failure()
            .await,
        server.delete("/ro/api/queues/mail/jobs/7").expect_failure().await,
        server.put("/ro/api/queues/mail/pause").expect_failure().await,
        server.put("/ro/api/queues/mail/resume").expect_failure().await,
    ] {
        response.assert_status(StatusCode::FORBIDDEN);
        let body: Value = response.json();
        assert_eq!(body["error"]["status"], 403);
        assert!(
            body["error"]["message"]
                .as_str()
                .is_some_and(|m| m.contains("not permitted"))
        );
    }

    assert_eq!(
        backends.factory.job_status(&descriptor, "mail", "7"),
        Some(JobStatus::Failed)
    );
    assert!(!backends.factory.is_paused(&descriptor, "mail"));
}

#[tokio::test]
async fn boards_on_one_backend_are_independent() {
    let backends = TestBackends::new();
    let descriptor = TestBackends::memory(1);
    backends.add_queue(&descriptor, "shared");
    backends
        .factory
        .seed_job(&descriptor, "shared", JobStatus::Failed, "1");

    let server = backends
        .server(&[
            BoardConfig::new("/rw", descriptor.clone()),
            BoardConfig::new("/ro", descriptor.clone()).read_only(true),
        ])
        .await;

    server
        .put("/ro/api/queues/shared/jobs/1/retry")
        .expect_failure()
        .await
        .assert_status(StatusCode::FORBIDDEN);
    server
        .put("/rw/api/queues/shared/jobs/1/retry")
        .await
        .assert_status(StatusCode::NO_CONTENT);

    assert_eq!(
        backends.factory.job_status(&descriptor, "shared", "1"),
        Some(JobStatus::Waiting)
    );
}

#[tokio::test]
async fn discovery_connections_are_released() {
    let backends = TestBackends::new();
    let populated = TestBackends::memory(1);
    backends.add_queue(&populated, "q");
    backends.scanner.refuse_host("down.internal");

    backends
        .provision(&[
            BoardConfig::new("/populated", populated),
            BoardConfig::new("/empty", TestBackends::memory(5)),
            BoardConfig::new(
                "/down",
                ConnectionDescriptor::new("down.internal", 6379, 0),
            ),
        ])
        .await;

    assert_eq!(backends.scanner.opened(), 3);
    assert_eq!(backends.scanner.released(), 3);
}
