use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::error::JudgeError;
use crate::harness::{self, FunctionSignature, HarnessReport};
use crate::pipeline::{
    CompileOutcome, CompiledArtifact, ExecutionPipeline, ExecutionRequest, ExecutionResult,
    ExecutionStatus, RunLimits,
};

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    #[serde(default)]
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JudgeOptions {
    pub stop_on_first_failure: bool,
    pub time_limit_ms: Option<u64>,
    pub memory_limit_bytes: Option<u64>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseStatus {
    Passed,
    Failed,
    Error,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCaseResult {
    pub index: usize,
    pub status: CaseStatus,
    pub actual_output: String,
    pub error: Option<String>,
    pub execution: Option<ExecutionResult>,
}

impl TestCaseResult {
    fn skipped(index: usize) -> Self {
        Self {
            index,
            status: CaseStatus::Skipped,
            actual_output: String::new(),
            error: None,
            execution: None,
        }
    }

    fn errored(index: usize, execution: ExecutionResult) -> Self {
        Self {
            index,
            status: CaseStatus::Error,
            actual_output: execution.stdout.clone(),
            error: Some(execution.stderr.clone()).filter(|e| !e.is_empty()),
            execution: Some(execution),
        }
    }

    /// Verdict this case contributes, `None` when it passed or never ran
    pub fn category(&self) -> Option<Verdict> {
        match self.status {
            CaseStatus::Passed | CaseStatus::Skipped => None,
            CaseStatus::Failed => Some(Verdict::WrongAnswer),
            CaseStatus::Error => Some(match self.execution.as_ref().map(|e| e.status) {
                Some(ExecutionStatus::CompileError) => Verdict::CompileError,
                Some(ExecutionStatus::Timeout) => Verdict::TimeLimitExceeded,
                _ => Verdict::RuntimeError,
            }),
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    WrongAnswer,
    RuntimeError,
    CompileError,
    TimeLimitExceeded,
}

impl Verdict {
    fn severity(self) -> u8 {
        match self {
            Self::Accepted => 0,
            Self::WrongAnswer => 1,
            Self::TimeLimitExceeded => 2,
            Self::RuntimeError => 3,
            Self::CompileError => 4,
        }
    }
}

/// Most severe category among the attempted cases
///
/// CompileError beats RuntimeError beats TimeLimitExceeded beats WrongAnswer.
pub fn overall_verdict(results: &[TestCaseResult]) -> Verdict {
    results
        .iter()
        .filter_map(TestCaseResult::category)
        .max_by_key(|verdict| verdict.severity())
        .unwrap_or(Verdict::Accepted)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Judgment {
    pub verdict: Verdict,
    pub passed_count: usize,
    /// Attempted cases; skipped ones are not counted
    pub total_count: usize,
    pub case_results: Vec<TestCaseResult>,
    pub aggregate_time_ms: u64,
    pub peak_memory_bytes: u64,
    pub compile_time_ms: u64,
    pub compile_output: Option<String>,
}

impl Judgment {
    fn from_cases(
        case_results: Vec<TestCaseResult>,
        compile_time_ms: u64,
        compile_output: Option<String>,
    ) -> Self {
        let attempted = || {
            case_results
                .iter()
                .filter(|case| case.status != CaseStatus::Skipped)
        };
        let executions = || attempted().filter_map(|case| case.execution.as_ref());

        Self {
            verdict: overall_verdict(&case_results),
            passed_count: attempted()
                .filter(|case| case.status == CaseStatus::Passed)
                .count(),
            total_count: attempted().count(),
            aggregate_time_ms: executions().map(|e| e.run_time_ms).max().unwrap_or(0),
            peak_memory_bytes: executions().map(|e| e.memory_bytes).max().unwrap_or(0),
            compile_time_ms,
            compile_output,
            case_results,
        }
    }

    /// Every case shares the compiler's failure
    fn compile_failed(case_count: usize, failure: ExecutionResult) -> Self {
        let compile_time_ms = failure.compile_time_ms;
        let compile_output = (failure.status == ExecutionStatus::CompileError)
            .then(|| failure.stderr.clone());
        let results = (0..case_count)
            .map(|index| TestCaseResult::errored(index, failure.clone()))
            .collect();
        Self::from_cases(results, compile_time_ms, compile_output)
    }
}

/// Normalizes program output before comparison
///
/// Line endings become `\n`, trailing whitespace is dropped from every line, and
/// leading and trailing blank lines are removed. Interior blank lines are kept.
pub fn normalize_output(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = unified.split('\n').map(str::trim_end).collect();
    let first = lines.iter().position(|line| !line.is_empty());
    let last = lines.iter().rposition(|line| !line.is_empty());
    match (first, last) {
        (Some(first), Some(last)) => lines[first..=last].join("\n"),
        _ => String::new(),
    }
}

pub fn outputs_match(actual: &str, expected: &str) -> bool {
    normalize_output(actual) == normalize_output(expected)
}

async fn evaluate_case(
    pipeline: &ExecutionPipeline,
    artifact: &CompiledArtifact,
    index: usize,
    case: &TestCase,
    limits: RunLimits,
) -> TestCaseResult {
    let execution = pipeline.run(artifact, &case.input, limits).await;
    if execution.status != ExecutionStatus::Success {
        return TestCaseResult::errored(index, execution);
    }

    let status = if outputs_match(&execution.stdout, &case.expected_output) {
        CaseStatus::Passed
    } else {
        CaseStatus::Failed
    };
    TestCaseResult {
        index,
        status,
        actual_output: execution.stdout.clone(),
        error: None,
        execution: Some(execution),
    }
}

/// Marks everything after the first unsuccessful case as skipped
fn skip_after_first_failure(results: &mut [TestCaseResult]) {
    if let Some(first) = results
        .iter()
        .position(|case| case.status != CaseStatus::Passed)
    {
        for case in &mut results[first + 1..] {
            *case = TestCaseResult::skipped(case.index);
        }
    }
}

/// Runs submissions against test cases and aggregates a verdict
#[derive(Clone)]
pub struct Judge {
    pipeline: ExecutionPipeline,
}

impl Judge {
    pub fn new(pipeline: ExecutionPipeline) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &ExecutionPipeline {
        &self.pipeline
    }

    /// Judges a whole program that reads stdin and writes stdout
    ///
    /// The source is compiled once; every case runs against the same artifact.
    pub async fn judge(
        &self,
        source_code: &str,
        language_id: &str,
        cases: &[TestCase],
        options: JudgeOptions,
    ) -> Result<Judgment, JudgeError> {
        let language = self.pipeline.registry().resolve(language_id)?;
        if cases.is_empty() {
            return Err(JudgeError::NoTestCases);
        }

        let artifact = match self.pipeline.compile(&language, source_code).await {
            CompileOutcome::Ready(artifact) => artifact,
            CompileOutcome::Failed(failure) => {
                log::info!(
                    "{} submission failed to build, marking {} cases",
                    language.id,
                    cases.len()
                );
                return Ok(Judgment::compile_failed(cases.len(), failure));
            }
        };

        let limits = self.pipeline.limits_for(
            &language,
            options.time_limit_ms,
            options.memory_limit_bytes,
        );
        let results = if options.stop_on_first_failure {
            self.run_sequential(&artifact, cases, limits).await
        } else {
            self.run_concurrent(&artifact, cases, limits).await
        };

        let compile_output = Some(artifact.compiler_output().to_string()).filter(|o| !o.is_empty());
        let judgment = Judgment::from_cases(results, artifact.compile_time_ms(), compile_output);
        log::info!(
            "Judged {} submission: {:?} ({}/{})",
            language.id,
            judgment.verdict,
            judgment.passed_count,
            judgment.total_count
        );
        Ok(judgment)
    }

    async fn run_sequential(
        &self,
        artifact: &CompiledArtifact,
        cases: &[TestCase],
        limits: RunLimits,
    ) -> Vec<TestCaseResult> {
        let mut results = Vec::with_capacity(cases.len());
        let mut stopped = false;
        for (index, case) in cases.iter().enumerate() {
            if stopped {
                results.push(TestCaseResult::skipped(index));
                continue;
            }
            let result = evaluate_case(&self.pipeline, artifact, index, case, limits).await;
            stopped = result.status != CaseStatus::Passed;
            results.push(result);
        }
        results
    }

    async fn run_concurrent(
        &self,
        artifact: &Arc<CompiledArtifact>,
        cases: &[TestCase],
        limits: RunLimits,
    ) -> Vec<TestCaseResult> {
        let mut tasks = JoinSet::new();
        let mut task_index = HashMap::new();
        for (index, case) in cases.iter().enumerate() {
            let pipeline = self.pipeline.clone();
            let artifact = artifact.clone();
            let case = case.clone();
            let handle = tasks.spawn(async move {
                evaluate_case(&pipeline, &artifact, index, &case, limits).await
            });
            task_index.insert(handle.id(), index);
        }

        let mut slots: Vec<Option<TestCaseResult>> = vec![None; cases.len()];
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, result)) => {
                    let index = result.index;
                    slots[index] = Some(result);
                }
                Err(err) => {
                    log::error!("Test case task failed: {err}");
                    if let Some(&index) = task_index.get(&err.id()) {
                        slots[index] = Some(TestCaseResult::errored(
                            index,
                            ExecutionResult::environment_error(format!(
                                "Test case task failed: {err}"
                            )),
                        ));
                    }
                }
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    TestCaseResult::errored(
                        index,
                        ExecutionResult::environment_error("Test case produced no result"),
                    )
                })
            })
            .collect()
    }

    /// Judges a single function by wrapping it in a synthesized harness
    ///
    /// All cases run inside one program, so one crash or timeout fails every case.
    pub async fn judge_function(
        &self,
        user_code: &str,
        language_id: &str,
        signature: &FunctionSignature,
        cases: &[TestCase],
        options: JudgeOptions,
    ) -> Result<Judgment, JudgeError> {
        let language = self.pipeline.registry().resolve(language_id)?;
        if cases.is_empty() {
            return Err(JudgeError::NoTestCases);
        }
        let program = harness::synthesize(&language, signature, cases, user_code)?;

        let request = ExecutionRequest {
            source_code: program,
            language_id: language.id.clone(),
            stdin: String::new(),
            time_limit_ms: options.time_limit_ms,
            memory_limit_bytes: options.memory_limit_bytes,
        };
        let execution = self.pipeline.execute(&request).await;
        let compile_time_ms = execution.compile_time_ms;

        match execution.status {
            ExecutionStatus::CompileError => {
                return Ok(Judgment::compile_failed(cases.len(), execution));
            }
            ExecutionStatus::Success => {}
            _ => {
                let results = (0..cases.len())
                    .map(|index| TestCaseResult::errored(index, execution.clone()))
                    .collect();
                return Ok(Judgment::from_cases(results, compile_time_ms, None));
            }
        }

        let report = harness::parse_trailer(&execution.stdout);
        if report.is_none() {
            log::warn!("Harness for {} printed no results trailer", language.id);
        }
        let mut results: Vec<TestCaseResult> = cases
            .iter()
            .enumerate()
            .map(|(index, case)| function_case_result(index, case, report.as_ref(), &execution))
            .collect();
        if options.stop_on_first_failure {
            skip_after_first_failure(&mut results);
        }

        Ok(Judgment::from_cases(results, compile_time_ms, None))
    }
}

fn function_case_result(
    index: usize,
    case: &TestCase,
    report: Option<&HarnessReport>,
    execution: &ExecutionResult,
) -> TestCaseResult {
    let Some(case_report) = report.and_then(|report| report.case(index)) else {
        let mut error = String::from("No result reported for this test case");
        if !execution.stderr.trim().is_empty() {
            error.push_str(": ");
            error.push_str(execution.stderr.trim());
        }
        return TestCaseResult {
            index,
            status: CaseStatus::Error,
            actual_output: String::new(),
            error: Some(error),
            execution: Some(execution.clone()),
        };
    };

    let (status, actual_output) = match (&case_report.error, case_report.passed) {
        (Some(_), _) => (CaseStatus::Error, String::new()),
        (None, true) => (CaseStatus::Passed, harness::expected_output(case)),
        (None, false) => {
            let actual = case_report
                .actual
                .as_deref()
                .unwrap_or_default()
                .replace("\\n", "\n");
            // Runners compare raw text; apply the same normalization as stdin judging
            let expected = harness::expected_output(case);
            if normalize_output(&actual) == expected {
                (CaseStatus::Passed, expected)
            } else {
                (CaseStatus::Failed, actual)
            }
        }
    };
    TestCaseResult {
        index,
        status,
        actual_output,
        error: case_report.error.clone(),
        execution: Some(execution.clone()),
    }
}
