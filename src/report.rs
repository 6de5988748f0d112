//! Human-readable rendering of suite outcomes.
//!
//! Failed assertions (app bugs) and errored tests (engine, planner, or
//! driver problems) are reported distinctly because they call for
//! different responses.

use crate::orchestrator::{StepStatus, SuiteReport, TestStatus};

pub fn render(report: &SuiteReport) -> String {
    let mut out = String::new();
    let (passed, failed, erred) = report.counts();

    out.push_str(&format!("suite '{}'\n", report.name));
    for verdict in &report.verdicts {
        let marker = match verdict.status {
            TestStatus::Passed => "PASS",
            TestStatus::Failed => "FAIL",
            TestStatus::Erred => "ERROR",
        };
        out.push_str(&format!(
            "  [{marker}] {} ({}ms)\n",
            verdict.name, verdict.duration_ms
        ));
        for step in &verdict.steps {
            let step_marker = match step.status {
                StepStatus::Passed => "ok",
                StepStatus::Failed => "failed",
                StepStatus::Erred => "error",
            };
            let cached = if step.cache_hit { " (cached)" } else { "" };
            out.push_str(&format!(
                "      {} {}: {}{}\n",
                step_marker, step.kind, step.instruction, cached
            ));
            if step.status != StepStatus::Passed {
                let detail = step
                    .error
                    .as_deref()
                    .filter(|detail| !detail.is_empty())
                    .unwrap_or(&step.evidence);
                out.push_str(&format!("        evidence: {detail}\n"));
            }
        }
        if verdict.status != TestStatus::Passed {
            if let Some(failure) = &verdict.failure {
                out.push_str(&format!("      reason: {failure}\n"));
            }
        }
    }

    if let Some(teardown) = &report.teardown_error {
        out.push_str(&format!("  teardown error: {teardown}\n"));
    }
    out.push_str(&format!(
        "  {} passed, {} failed, {} errored\n",
        passed, failed, erred
    ));
    out
}
