use actix_web::{HttpResponse, post, web};
use serde::{Deserialize, Serialize};

use super::{bad_request, ok};
use crate::harness::FunctionSignature;
use crate::judge::{CaseStatus, Judge, JudgeOptions, Judgment, TestCase, Verdict};
use crate::pipeline::{ExecutionPipeline, ExecutionRequest, ExecutionStatus};

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub input: String,
    pub time_limit: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub status: ExecutionStatus,
    pub output: String,
    pub error: String,
    pub execution_time: u64,
    pub memory_used: u64,
    pub exit_code: Option<i32>,
    pub compile_time: u64,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub stop_on_first_failure: bool,
    pub time_limit: Option<i64>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SubmitFunctionRequest {
    #[serde(flatten)]
    pub submission: SubmitRequest,
    pub function_signature: Option<FunctionSignature>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CaseResponse {
    pub index: usize,
    pub status: CaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time: u64,
    pub memory_used: u64,
    pub hidden: bool,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct JudgmentResponse {
    pub verdict: Verdict,
    pub passed_test_cases: usize,
    pub total_test_cases: usize,
    pub test_case_results: Vec<CaseResponse>,
    pub execution_time: u64,
    pub memory_used: u64,
    pub compile_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compile_output: Option<String>,
}

impl JudgmentResponse {
    /// Hidden cases keep their status but not their data
    fn new(judgment: Judgment, cases: &[TestCase]) -> Self {
        let test_case_results = judgment
            .case_results
            .into_iter()
            .map(|result| {
                let case = &cases[result.index];
                let shown = !case.hidden;
                let ran = result.status != CaseStatus::Skipped;
                let (execution_time, memory_used) = result
                    .execution
                    .as_ref()
                    .map_or((0, 0), |e| (e.run_time_ms, e.memory_bytes));
                CaseResponse {
                    index: result.index,
                    status: result.status,
                    input: shown.then(|| case.input.clone()),
                    expected_output: shown.then(|| case.expected_output.clone()),
                    actual_output: (shown && ran).then_some(result.actual_output),
                    error: result.error,
                    execution_time,
                    memory_used,
                    hidden: case.hidden,
                }
            })
            .collect();

        Self {
            verdict: judgment.verdict,
            passed_test_cases: judgment.passed_count,
            total_test_cases: judgment.total_count,
            test_case_results,
            execution_time: judgment.aggregate_time_ms,
            memory_used: judgment.peak_memory_bytes,
            compile_time: judgment.compile_time_ms,
            compile_output: judgment.compile_output,
        }
    }
}

fn validate_source(pipeline: &ExecutionPipeline, code: &str, language: &str) -> Result<(), String> {
    if code.trim().is_empty() {
        return Err("Code is required".to_string());
    }
    if language.trim().is_empty() {
        return Err("Language is required".to_string());
    }
    pipeline
        .registry()
        .resolve(language)
        .map_err(|e| e.to_string())?;

    let max_code_size = pipeline.limits().max_code_size.0;
    if code.len() as u64 > max_code_size {
        return Err(format!(
            "Code exceeds the maximum size of {max_code_size} bytes"
        ));
    }
    Ok(())
}

fn validate_stdin(pipeline: &ExecutionPipeline, input: &str) -> Result<(), String> {
    let max_stdin_size = pipeline.limits().max_stdin_size.0;
    if input.len() as u64 > max_stdin_size {
        return Err(format!(
            "Input exceeds the maximum size of {max_stdin_size} bytes"
        ));
    }
    Ok(())
}

fn validate_time_limit(time_limit: Option<i64>) -> Result<Option<u64>, String> {
    match time_limit {
        Some(ms) if ms <= 0 => Err("Time limit must be a positive number of milliseconds".to_string()),
        Some(ms) => Ok(Some(ms as u64)),
        None => Ok(None),
    }
}

fn validate_submission(
    pipeline: &ExecutionPipeline,
    submission: &SubmitRequest,
) -> Result<JudgeOptions, String> {
    validate_source(pipeline, &submission.code, &submission.language)?;
    let time_limit_ms = validate_time_limit(submission.time_limit)?;

    let max_test_cases = pipeline.limits().max_test_cases;
    if submission.test_cases.is_empty() {
        return Err("At least one test case is required".to_string());
    }
    if submission.test_cases.len() > max_test_cases {
        return Err(format!(
            "Too many test cases: at most {max_test_cases} are allowed"
        ));
    }
    for case in &submission.test_cases {
        validate_stdin(pipeline, &case.input)?;
    }

    Ok(JudgeOptions {
        stop_on_first_failure: submission.stop_on_first_failure,
        time_limit_ms,
        memory_limit_bytes: None,
    })
}

#[post("/execute/run")]
pub async fn run_handler(
    pipeline: web::Data<ExecutionPipeline>,
    body: web::Json<RunRequest>,
) -> HttpResponse {
    let body = body.into_inner();
    let validated = validate_source(&pipeline, &body.code, &body.language)
        .and_then(|_| validate_stdin(&pipeline, &body.input))
        .and_then(|_| validate_time_limit(body.time_limit));
    let time_limit_ms = match validated {
        Ok(time_limit_ms) => time_limit_ms,
        Err(message) => return bad_request(message),
    };

    let result = pipeline
        .execute(&ExecutionRequest {
            source_code: body.code,
            language_id: body.language,
            stdin: body.input,
            time_limit_ms,
            memory_limit_bytes: None,
        })
        .await;
    log::info!(
        "Run finished with {:?} in {} ms",
        result.status,
        result.run_time_ms
    );

    ok(RunResponse {
        status: result.status,
        output: result.stdout,
        error: result.stderr,
        execution_time: result.run_time_ms,
        memory_used: result.memory_bytes,
        exit_code: result.exit_code,
        compile_time: result.compile_time_ms,
    })
}

#[post("/execute/submit")]
pub async fn submit_handler(
    pipeline: web::Data<ExecutionPipeline>,
    judge: web::Data<Judge>,
    body: web::Json<SubmitRequest>,
) -> HttpResponse {
    let body = body.into_inner();
    let options = match validate_submission(&pipeline, &body) {
        Ok(options) => options,
        Err(message) => return bad_request(message),
    };

    match judge
        .judge(&body.code, &body.language, &body.test_cases, options)
        .await
    {
        Ok(judgment) => ok(JudgmentResponse::new(judgment, &body.test_cases)),
        Err(e) => bad_request(e.to_string()),
    }
}

#[post("/execute/submit-function")]
pub async fn submit_function_handler(
    pipeline: web::Data<ExecutionPipeline>,
    judge: web::Data<Judge>,
    body: web::Json<SubmitFunctionRequest>,
) -> HttpResponse {
    let SubmitFunctionRequest {
        submission,
        function_signature,
    } = body.into_inner();
    let options = match validate_submission(&pipeline, &submission) {
        Ok(options) => options,
        Err(message) => return bad_request(message),
    };
    let Some(signature) = function_signature.filter(|sig| !sig.name.trim().is_empty()) else {
        return bad_request("Function signature with a non-empty name is required");
    };

    match judge
        .judge_function(
            &submission.code,
            &submission.language,
            &signature,
            &submission.test_cases,
            options,
        )
        .await
    {
        Ok(judgment) => ok(JudgmentResponse::new(judgment, &submission.test_cases)),
        Err(e) => bad_request(e.to_string()),
    }
}
