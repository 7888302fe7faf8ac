//! `TestSuite`: validate → per-test-case activities → store result.

use sagaflow_core::engine::{ActivityCall, ParallelBlock, Step, WorkflowDefinition};

pub const VALIDATE_ACTIVITY: &str = "ValidateTestSuite";
pub const RUN_CASE_ACTIVITY: &str = "RunTestCase";
pub const STORE_RESULT_ACTIVITY: &str = "StoreTestSuiteResult";

/// Sequential runs halt at the first failing case; the engine appends a
/// `step_skipped` history event (reason "skipped due to previous failure")
/// for each case that never ran. Parallel runs every case regardless and
/// reports overall failure if any case failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    SequentialStopOnFailure,
    Parallel,
}

pub fn test_suite(test_cases: Vec<serde_json::Value>, execution: Execution) -> WorkflowDefinition {
    let mut def = WorkflowDefinition::new("TestSuite").with_step(Step::Validation(ActivityCall::new(
        "validate",
        VALIDATE_ACTIVITY,
        serde_json::json!({ "case_count": test_cases.len() }),
    )));

    def = match execution {
        Execution::SequentialStopOnFailure => {
            for (i, case) in test_cases.iter().enumerate() {
                def = def.with_step(Step::Activity(ActivityCall::new(
                    format!("case-{i}"),
                    RUN_CASE_ACTIVITY,
                    case.clone(),
                )));
            }
            def
        }
        Execution::Parallel => {
            let calls = test_cases
                .iter()
                .enumerate()
                .map(|(i, case)| ActivityCall::new(format!("case-{i}"), RUN_CASE_ACTIVITY, case.clone()))
                .collect();
            def.with_step(Step::Parallel(ParallelBlock::new("cases", calls))).continue_on_failure()
        }
    };

    def.with_step(Step::Activity(ActivityCall::new(
        "store",
        STORE_RESULT_ACTIVITY,
        serde_json::json!({}),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_suite_stops_on_failure_by_default() {
        let cases = vec![serde_json::json!({"name": "t1"}), serde_json::json!({"name": "t2"})];
        let def = test_suite(cases, Execution::SequentialStopOnFailure);
        assert!(def.stop_on_failure);
        assert_eq!(def.steps.len(), 4); // validate, case-0, case-1, store
    }

    #[test]
    fn parallel_suite_runs_every_case() {
        let cases = vec![serde_json::json!({"name": "t1"}), serde_json::json!({"name": "t2"})];
        let def = test_suite(cases, Execution::Parallel);
        assert!(!def.stop_on_failure);
        assert_eq!(def.steps.len(), 3); // validate, parallel cases, store
    }
}
