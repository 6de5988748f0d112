//! Planner-call retry bound: a failing call is retried `planner_retries`
//! times and no more, and a transient failure recovers on the retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use shortest_engine::api_runner::{ApiRequestRunner, RetryPolicy};
use shortest_engine::cache::{ActionCache, MemoryCacheStore};
use shortest_engine::driver::{InMemoryDriver, PageSpec};
use shortest_engine::errors::PlannerError;
use shortest_engine::executor::ActionExecutor;
use shortest_engine::orchestrator::{Orchestrator, RunOptions, SharedDriverFactory, TestStatus};
use shortest_engine::planner::{ActionPlanner, Judgment, MockPlanner, PlannedAction};
use shortest_engine::test_def::{TestBuilder, TestSuite};

fn orchestrator(planner: Arc<dyn ActionPlanner>, planner_retries: u32) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(
        Arc::new(ActionCache::new(Arc::new(MemoryCacheStore::default()))),
        planner,
        ActionExecutor::default(),
        ApiRequestRunner::new(RetryPolicy::default(), Duration::from_secs(5)).unwrap(),
        RunOptions {
            planner_retries,
            ..RunOptions::default()
        },
    ))
}

fn drivers() -> Arc<SharedDriverFactory> {
    let pages = HashMap::from([("/".to_string(), PageSpec::default())]);
    Arc::new(SharedDriverFactory(Arc::new(InMemoryDriver::new(pages, "/"))))
}

fn suite() -> TestSuite {
    TestSuite::new("flaky provider").with_test(
        TestBuilder::new("page renders")
            .expect("the home page renders")
            .build(),
    )
}

fn passing_turn() -> PlannedAction {
    MockPlanner::judgment_turn("page looks right", Judgment::passed("rendered"))
}

#[tokio::test]
async fn transient_planner_failure_recovers_on_the_retry() {
    let planner = Arc::new(MockPlanner::with_outcomes(vec![
        Err(PlannerError::Unreachable("connection reset".into())),
        Ok(passing_turn()),
    ]));

    let report = orchestrator(planner.clone(), 1)
        .run_suite(&suite(), drivers())
        .await;

    assert!(report.all_passed());
    assert_eq!(planner.calls(), 2);
}

#[tokio::test]
async fn exhausted_planner_retries_err_the_test() {
    // One retry allowed: two attempts total, the third scripted turn must
    // never be reached.
    let planner = Arc::new(MockPlanner::with_outcomes(vec![
        Err(PlannerError::Unreachable("connection reset".into())),
        Err(PlannerError::Provider {
            status: 529,
            detail: "overloaded".into(),
        }),
        Ok(passing_turn()),
    ]));

    let report = orchestrator(planner.clone(), 1)
        .run_suite(&suite(), drivers())
        .await;

    let verdict = &report.verdicts[0];
    assert_eq!(verdict.status, TestStatus::Erred);
    assert_eq!(planner.calls(), 2);
    assert!(verdict
        .failure
        .as_deref()
        .unwrap()
        .contains("status 529"));
}

#[tokio::test]
async fn zero_retries_fail_on_the_first_provider_error() {
    let planner = Arc::new(MockPlanner::with_outcomes(vec![
        Err(PlannerError::Unreachable("connection reset".into())),
        Ok(passing_turn()),
    ]));

    let report = orchestrator(planner.clone(), 0)
        .run_suite(&suite(), drivers())
        .await;

    assert_eq!(report.verdicts[0].status, TestStatus::Erred);
    assert_eq!(planner.calls(), 1);
}
