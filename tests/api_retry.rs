//! HTTP probe steps inside a full run: delivered non-2xx is an app bug
//! (Failed), an unreachable host is an engine problem (Erred).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use shortest_engine::api_runner::{ApiProbe, ApiRequestRunner, RetryPolicy};
use shortest_engine::cache::{ActionCache, MemoryCacheStore};
use shortest_engine::driver::{InMemoryDriver, PageSpec};
use shortest_engine::executor::ActionExecutor;
use shortest_engine::orchestrator::{Orchestrator, RunOptions, SharedDriverFactory, TestStatus};
use shortest_engine::planner::MockPlanner;
use shortest_engine::test_def::{TestBuilder, TestSuite};

fn probe(url: &str, expect_status: Option<u16>) -> ApiProbe {
    ApiProbe {
        method: "GET".into(),
        url: url.into(),
        headers: BTreeMap::new(),
        body: None,
        expect_status,
    }
}

fn orchestrator(policy: RetryPolicy) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(
        Arc::new(ActionCache::new(Arc::new(MemoryCacheStore::default()))),
        Arc::new(MockPlanner::passing()),
        ActionExecutor::default(),
        ApiRequestRunner::new(policy, Duration::from_millis(500)).unwrap(),
        RunOptions::default(),
    ))
}

fn drivers() -> Arc<SharedDriverFactory> {
    let pages = std::collections::HashMap::from([("/".to_string(), PageSpec::default())]);
    Arc::new(SharedDriverFactory(Arc::new(InMemoryDriver::new(pages, "/"))))
}

/// Serve `responses` canned HTTP responses on an ephemeral port, one per
/// connection, and return the base URL.
async fn canned_server(responses: Vec<&'static str>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        for response in responses {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn delivered_error_status_fails_without_retrying() {
    let base = canned_server(vec![
        "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 5\r\nconnection: close\r\n\r\nboom\n",
    ])
    .await;

    let suite = TestSuite::new("health").with_test(
        TestBuilder::new("health endpoint responds")
            .expect_api("the health endpoint returns ok", probe(&format!("{base}/health"), None))
            .build(),
    );

    let report = orchestrator(RetryPolicy {
        max_retries: 3,
        backoff_ms: 1,
    })
    .run_suite(&suite, drivers())
    .await;

    let verdict = &report.verdicts[0];
    assert_eq!(verdict.status, TestStatus::Failed);
    assert!(verdict.steps[0]
        .error
        .as_deref()
        .unwrap()
        .contains("expected 2xx, got 500"));
}

#[tokio::test]
async fn expected_status_makes_a_404_pass() {
    let base = canned_server(vec![
        "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
    ])
    .await;

    let suite = TestSuite::new("negative").with_test(
        TestBuilder::new("missing resource 404s")
            .expect_api(
                "a deleted resource is gone",
                probe(&format!("{base}/gone"), Some(404)),
            )
            .build(),
    );

    let report = orchestrator(RetryPolicy::default())
        .run_suite(&suite, drivers())
        .await;
    assert!(report.all_passed());
}

#[tokio::test]
async fn unreachable_host_errs_after_the_retry_budget() {
    // Port 9 (discard) refuses connections in test environments.
    let suite = TestSuite::new("down").with_test(
        TestBuilder::new("api is reachable")
            .expect_api("the api answers", probe("http://127.0.0.1:9/health", None))
            .build(),
    );

    let report = orchestrator(RetryPolicy {
        max_retries: 5,
        backoff_ms: 1,
    })
    .run_suite(&suite, drivers())
    .await;

    let verdict = &report.verdicts[0];
    assert_eq!(verdict.status, TestStatus::Erred);
    assert!(verdict.steps[0].error.as_deref().unwrap().contains("6 attempt"));
}

#[tokio::test]
async fn transient_transport_failure_recovers_within_budget() {
    // The server only answers the second connection attempt; the listener
    // is dropped after serving it.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    // Nothing listens on `addr` for the first attempt, then a fresh
    // listener picks the port back up.
    let url = format!("http://{addr}/health");
    let runner = ApiRequestRunner::new(
        RetryPolicy {
            max_retries: 4,
            backoff_ms: 50,
        },
        Duration::from_millis(500),
    )
    .unwrap();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let listener = TcpListener::bind(addr).await.unwrap();
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut buf = [0u8; 1024];
        let _ = socket.read(&mut buf).await;
        let _ = socket
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
            .await;
    });

    let response = runner.fetch(&probe(&url, None)).await.unwrap();
    assert_eq!(response.status, 200);
}
