use actix_web::{HttpResponse, get, web};
use serde::Serialize;
use serde_json::json;

use super::ok;
use crate::config::{SandboxBackend, SandboxConfig};
use crate::create_timestamp;
use crate::pipeline::ExecutionPipeline;

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LanguageInfo {
    pub id: String,
    pub display_name: String,
    pub file_extension: String,
    pub compiled: bool,
    pub function_mode: bool,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LimitsInfo {
    pub max_execution_time: u64,
    pub default_execution_time: u64,
    pub max_code_size: u64,
    pub max_stdin_size: u64,
    pub max_test_cases: usize,
    pub memory_limit: u64,
}

#[derive(Serialize, Debug)]
pub struct BinaryStatus {
    pub name: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct ToolchainStatus {
    pub language: String,
    pub available: bool,
    pub binaries: Vec<BinaryStatus>,
}

fn probe(binary: &str) -> BinaryStatus {
    let path = which::which(binary).ok();
    BinaryStatus {
        name: binary.to_string(),
        available: path.is_some(),
        path: path.map(|p| p.display().to_string()),
    }
}

#[get("/execute/languages")]
pub async fn languages_handler(pipeline: web::Data<ExecutionPipeline>) -> HttpResponse {
    let languages: Vec<LanguageInfo> = pipeline
        .registry()
        .list()
        .map(|spec| LanguageInfo {
            id: spec.id.clone(),
            display_name: spec.display_name.clone(),
            file_extension: spec.file_extension.clone(),
            compiled: spec.is_compiled(),
            function_mode: spec.harness.is_some(),
        })
        .collect();
    ok(languages)
}

#[get("/execute/limits")]
pub async fn limits_handler(pipeline: web::Data<ExecutionPipeline>) -> HttpResponse {
    let limits = pipeline.limits();
    ok(LimitsInfo {
        max_execution_time: limits.max_execution_time.0,
        default_execution_time: limits.default_execution_time.0,
        max_code_size: limits.max_code_size.0,
        max_stdin_size: limits.max_stdin_size.0,
        max_test_cases: limits.max_test_cases,
        memory_limit: limits.memory_limit.0,
    })
}

#[get("/execute/stats")]
pub async fn stats_handler(pipeline: web::Data<ExecutionPipeline>) -> HttpResponse {
    ok(pipeline.stats().snapshot())
}

#[get("/health")]
pub async fn health_handler() -> HttpResponse {
    ok(json!({
        "status": "ok",
        "timestamp": create_timestamp(),
    }))
}

/// Reports which toolchains the configured backend can reach
#[get("/health/compilers")]
pub async fn compilers_handler(
    pipeline: web::Data<ExecutionPipeline>,
    sandbox: web::Data<SandboxConfig>,
) -> HttpResponse {
    // Container images carry their own toolchains; only the runtime binary matters on the host
    let statuses: Vec<ToolchainStatus> = pipeline
        .registry()
        .list()
        .map(|spec| {
            let binaries: Vec<BinaryStatus> = match sandbox.backend {
                SandboxBackend::Container => vec![probe(&sandbox.docker_binary)],
                SandboxBackend::Process => spec
                    .toolchain_binaries()
                    .into_iter()
                    .map(|binary| probe(&binary))
                    .collect(),
            };
            ToolchainStatus {
                language: spec.id.clone(),
                available: binaries.iter().all(|b| b.available),
                binaries,
            }
        })
        .collect();

    let missing = statuses.iter().filter(|s| !s.available).count();
    if missing > 0 {
        log::warn!("{missing} language toolchains are unavailable");
    }
    ok(json!({
        "backend": sandbox.backend,
        "toolchains": statuses,
    }))
}
