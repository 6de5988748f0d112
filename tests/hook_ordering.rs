//! Suite lifecycle: beforeAll once, beforeEach per test, afterAll once at
//! the end regardless of what happened in between.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use shortest_engine::api_runner::{ApiRequestRunner, RetryPolicy};
use shortest_engine::cache::{ActionCache, MemoryCacheStore};
use shortest_engine::driver::{InMemoryDriver, PageSpec};
use shortest_engine::executor::ActionExecutor;
use shortest_engine::orchestrator::{Orchestrator, RunOptions, SharedDriverFactory, TestStatus};
use shortest_engine::planner::MockPlanner;
use shortest_engine::test_def::{hook, TestBuilder, TestSuite};

type Log = Arc<Mutex<Vec<String>>>;

fn logging_hook(log: &Log, label: &str) -> shortest_engine::test_def::Hook {
    let log = Arc::clone(log);
    let label = label.to_string();
    hook(move || {
        let log = Arc::clone(&log);
        let label = label.clone();
        async move {
            log.lock().push(label);
            Ok(())
        }
    })
}

fn failing_hook(message: &str) -> shortest_engine::test_def::Hook {
    let message = message.to_string();
    hook(move || {
        let message = message.clone();
        async move { Err(message) }
    })
}

fn orchestrator() -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(
        Arc::new(ActionCache::new(Arc::new(MemoryCacheStore::default()))),
        Arc::new(MockPlanner::passing()),
        ActionExecutor::default(),
        ApiRequestRunner::new(RetryPolicy::default(), Duration::from_secs(5)).unwrap(),
        RunOptions::default(),
    ))
}

fn drivers() -> Arc<SharedDriverFactory> {
    let mut pages = HashMap::new();
    pages.insert("/".to_string(), PageSpec::default());
    Arc::new(SharedDriverFactory(Arc::new(InMemoryDriver::new(pages, "/"))))
}

fn two_tests(log: &Log) -> TestSuite {
    TestSuite::new("lifecycle")
        .with_test(TestBuilder::new("first").expect("page renders").build())
        .with_test(TestBuilder::new("second").expect("page still renders").build())
        .with_before_all(logging_hook(log, "beforeAll"))
        .with_before_each(logging_hook(log, "beforeEach"))
        .with_after_all(logging_hook(log, "afterAll"))
}

#[tokio::test]
async fn parallel_tests_report_in_declaration_order() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(ActionCache::new(Arc::new(MemoryCacheStore::default()))),
        Arc::new(MockPlanner::passing()),
        ActionExecutor::default(),
        ApiRequestRunner::new(RetryPolicy::default(), Duration::from_secs(5)).unwrap(),
        RunOptions {
            parallelism: 2,
            ..RunOptions::default()
        },
    ));

    let report = orchestrator.run_suite(&two_tests(&log), drivers()).await;

    assert!(report.all_passed());
    let names: Vec<_> = report.verdicts.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["first", "second"]);
    // Scheduling never reorders the suite-level hooks.
    assert_eq!(log.lock().first().map(String::as_str), Some("beforeAll"));
    assert_eq!(log.lock().last().map(String::as_str), Some("afterAll"));
}

#[tokio::test]
async fn hooks_fire_in_declaration_order() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let report = orchestrator().run_suite(&two_tests(&log), drivers()).await;

    assert!(report.all_passed());
    assert_eq!(
        *log.lock(),
        vec!["beforeAll", "beforeEach", "beforeEach", "afterAll"]
    );
}

#[tokio::test]
async fn before_all_failure_errs_every_test_but_still_tears_down() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let suite = two_tests(&log).with_before_all(failing_hook("database unreachable"));

    let report = orchestrator().run_suite(&suite, drivers()).await;

    assert!(!report.all_passed());
    assert_eq!(report.verdicts.len(), 2);
    for verdict in &report.verdicts {
        assert_eq!(verdict.status, TestStatus::Erred);
        assert!(verdict.steps.is_empty());
        assert!(verdict
            .failure
            .as_deref()
            .unwrap()
            .contains("database unreachable"));
    }
    // No beforeEach ran, afterAll still did.
    assert_eq!(*log.lock(), vec!["afterAll"]);
}

#[tokio::test]
async fn after_all_failure_is_reported_without_touching_verdicts() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let suite = two_tests(&log).with_after_all(failing_hook("cleanup script missing"));

    let report = orchestrator().run_suite(&suite, drivers()).await;

    assert!(report.verdicts.iter().all(|v| v.status == TestStatus::Passed));
    assert!(!report.all_passed());
    assert!(report
        .teardown_error
        .as_deref()
        .unwrap()
        .contains("cleanup script missing"));
}

#[tokio::test]
async fn before_each_failure_errs_only_its_own_test() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let suite = two_tests(&log).with_before_each(failing_hook("fixture reset failed"));

    let report = orchestrator().run_suite(&suite, drivers()).await;

    let (passed, _, erred) = report.counts();
    assert_eq!(passed, 0);
    assert_eq!(erred, 2);
    for verdict in &report.verdicts {
        assert!(verdict
            .failure
            .as_deref()
            .unwrap()
            .contains("fixture reset failed"));
    }
}
