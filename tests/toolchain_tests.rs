//! End-to-end judging against real toolchains; each test is a no-op when its toolchain is missing

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

use codejudge::config::{Config, SandboxConfig};
use codejudge::engine::Engine;
use codejudge::harness::FunctionSignature;
use codejudge::judge::{CaseStatus, JudgeOptions, TestCase, Verdict};
use codejudge::pipeline::{ExecutionRequest, ExecutionStatus};

fn available(binary: &str) -> bool {
    let found = which::which(binary).is_ok();
    if !found {
        eprintln!("skipping: {binary} not found");
    }
    found
}

fn start_engine() -> (Engine, TempDir) {
    let root = tempfile::tempdir().unwrap();
    let config = Config {
        sandbox: SandboxConfig {
            workers: Some(2),
            workspace_root: Some(root.path().to_path_buf()),
            ..Default::default()
        },
        ..Default::default()
    };
    (Engine::start(&config).unwrap(), root)
}

fn case(input: &str, expected_output: &str) -> TestCase {
    TestCase {
        input: input.to_string(),
        expected_output: expected_output.to_string(),
        hidden: false,
    }
}

#[tokio::test]
async fn test_python_stdin_program() {
    if !available("python3") {
        return;
    }
    let (engine, _root) = start_engine();

    let code = "a, b = map(int, input().split())\nprint(a + b)";
    let judgment = engine
        .judge()
        .judge(
            code,
            "python",
            &[case("1 2", "3"), case("5 7", "12")],
            JudgeOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(judgment.verdict, Verdict::Accepted);
    assert_eq!((judgment.passed_count, judgment.total_count), (2, 2));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_python_exception_is_runtime_error() {
    if !available("python3") {
        return;
    }
    let (engine, _root) = start_engine();

    let result = engine
        .pipeline()
        .execute(&ExecutionRequest {
            source_code: "raise ValueError('bad input')".to_string(),
            language_id: "python".to_string(),
            ..Default::default()
        })
        .await;

    assert_eq!(result.status, ExecutionStatus::RuntimeError);
    assert!(result.stderr.contains("ValueError"));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_python_function_mode() {
    if !available("python3") {
        return;
    }
    let (engine, _root) = start_engine();

    let code = r#"
class Solution:
    def twoSum(self, nums, target):
        seen = {}
        for i, n in enumerate(nums):
            if target - n in seen:
                return [seen[target - n], i]
            seen[n] = i
"#;
    let signature: FunctionSignature = serde_json::from_value(json!({
        "name": "twoSum",
        "parameters": ["nums", "target"]
    }))
    .unwrap();
    let cases = [
        case("[2,7,11,15]\n9", "[0, 1]"),
        case("[3,2,4]\n6", "[1,2]"),
        case("[3,3]\n6", "[0,2]"),
    ];

    let judgment = engine
        .judge()
        .judge_function(code, "python", &signature, &cases, JudgeOptions::default())
        .await
        .unwrap();

    assert_eq!(judgment.verdict, Verdict::WrongAnswer);
    assert_eq!((judgment.passed_count, judgment.total_count), (2, 3));
    let statuses: Vec<CaseStatus> = judgment.case_results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![CaseStatus::Passed, CaseStatus::Passed, CaseStatus::Failed]
    );
    assert_eq!(judgment.case_results[2].actual_output, "[0,1]");
    engine.shutdown().await;
}

#[tokio::test]
async fn test_c_compile_error_and_function_mode() {
    if !available("gcc") {
        return;
    }
    let (engine, _root) = start_engine();

    let broken = engine
        .judge()
        .judge(
            "int main(void) { return undeclared; }",
            "c",
            &[case("", ""), case("", "")],
            JudgeOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(broken.verdict, Verdict::CompileError);
    assert!(broken.compile_output.unwrap().contains("undeclared"));

    let signature: FunctionSignature =
        serde_json::from_value(json!({ "name": "add" })).unwrap();
    let judgment = engine
        .judge()
        .judge_function(
            "int add(int a, int b) { return a + b; }",
            "c",
            &signature,
            &[case("1\n2", "3"), case("-4\n10", "6")],
            JudgeOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(judgment.verdict, Verdict::Accepted);
    assert_eq!(judgment.passed_count, 2);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_cpp_stdin_program() {
    if !available("g++") {
        return;
    }
    let (engine, _root) = start_engine();

    let code = r#"
#include <iostream>
int main() {
    long long a, b;
    std::cin >> a >> b;
    std::cout << a * b << "\n";
}
"#;
    let judgment = engine
        .judge()
        .judge(
            code,
            "cpp",
            &[case("3 4", "12"), case("100000 100000", "10000000000")],
            JudgeOptions {
                time_limit_ms: Some(2_000),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(judgment.verdict, Verdict::Accepted);
    assert!(judgment.compile_time_ms > 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_javascript_literal_print() {
    if !available("node") {
        return;
    }
    let (engine, _root) = start_engine();

    let result = engine
        .pipeline()
        .execute(&ExecutionRequest {
            source_code: "console.log('Hello, World!');".to_string(),
            language_id: "javascript".to_string(),
            ..Default::default()
        })
        .await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.stdout, "Hello, World!\n");
    engine.shutdown().await;
}

#[tokio::test]
async fn test_java_literal_print() {
    if !available("javac") || !available("java") {
        return;
    }
    let (engine, _root) = start_engine();

    let code = r#"
public class Main {
    public static void main(String[] args) {
        System.out.println("Hello, World!");
    }
}
"#;
    let result = engine
        .pipeline()
        .execute(&ExecutionRequest {
            source_code: code.to_string(),
            language_id: "java".to_string(),
            time_limit_ms: Some(10_000),
            ..Default::default()
        })
        .await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.stdout, "Hello, World!\n");
    engine.shutdown().await;
}

fn two_sum_cases() -> [TestCase; 3] {
    [
        case("[2,7,11,15]\n9", "[0,1]"),
        case("[3,2,4]\n6", "[1, 2]"),
        case("[3,3]\n6", "[0,1]"),
    ]
}

async fn assert_two_sum_accepted(engine: &Engine, language: &str, code: &str) {
    let signature: FunctionSignature =
        serde_json::from_value(json!({ "name": "twoSum" })).unwrap();
    let judgment = engine
        .judge()
        .judge_function(
            code,
            language,
            &signature,
            &two_sum_cases(),
            JudgeOptions {
                time_limit_ms: Some(10_000),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(judgment.verdict, Verdict::Accepted, "{language}: {judgment:?}");
    assert_eq!((judgment.passed_count, judgment.total_count), (3, 3));
}

/// The first case divides by zero; the second must still pass
async fn assert_fault_is_isolated(engine: &Engine, language: &str, code: &str) {
    let signature: FunctionSignature =
        serde_json::from_value(json!({ "name": "divide" })).unwrap();
    let judgment = engine
        .judge()
        .judge_function(
            code,
            language,
            &signature,
            &[case("0", "0"), case("2", "5")],
            JudgeOptions {
                time_limit_ms: Some(10_000),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let statuses: Vec<CaseStatus> = judgment.case_results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![CaseStatus::Error, CaseStatus::Passed],
        "{language}: {judgment:?}"
    );
    assert!(judgment.case_results[0].error.is_some());
    assert_eq!(judgment.case_results[1].actual_output, "5");
    assert_eq!(judgment.verdict, Verdict::RuntimeError);
}

#[tokio::test]
async fn test_cpp_function_mode() {
    if !available("g++") {
        return;
    }
    let (engine, _root) = start_engine();

    let two_sum = r#"
class Solution {
public:
    vector<int> twoSum(vector<int>& nums, int target) {
        unordered_map<int, int> seen;
        for (int i = 0; i < (int) nums.size(); ++i) {
            auto it = seen.find(target - nums[i]);
            if (it != seen.end()) return {it->second, i};
            seen[nums[i]] = i;
        }
        return {};
    }
};
"#;
    assert_two_sum_accepted(&engine, "cpp", two_sum).await;

    let divide = r#"
int divide(int x) {
    if (x == 0) throw std::domain_error("division by zero");
    return 10 / x;
}
"#;
    assert_fault_is_isolated(&engine, "cpp", divide).await;
    engine.shutdown().await;
}

#[tokio::test]
async fn test_java_function_mode() {
    if !available("javac") || !available("java") {
        return;
    }
    let (engine, _root) = start_engine();

    let two_sum = r#"
import java.util.HashMap;
import java.util.Map;

class Solution {
    public int[] twoSum(int[] nums, int target) {
        Map<Integer, Integer> seen = new HashMap<>();
        for (int i = 0; i < nums.length; i++) {
            Integer j = seen.get(target - nums[i]);
            if (j != null) return new int[]{j, i};
            seen.put(nums[i], i);
        }
        return new int[0];
    }
}
"#;
    assert_two_sum_accepted(&engine, "java", two_sum).await;

    let divide = "class Solution { public int divide(int x) { return 10 / x; } }";
    assert_fault_is_isolated(&engine, "java", divide).await;
    engine.shutdown().await;
}

#[tokio::test]
async fn test_javascript_function_mode() {
    if !available("node") {
        return;
    }
    let (engine, _root) = start_engine();

    let two_sum = r#"
function twoSum(nums, target) {
    const seen = new Map();
    for (let i = 0; i < nums.length; i++) {
        if (seen.has(target - nums[i])) return [seen.get(target - nums[i]), i];
        seen.set(nums[i], i);
    }
    return [];
}
"#;
    assert_two_sum_accepted(&engine, "javascript", two_sum).await;

    let divide = r#"
function divide(x) {
    if (x === 0) throw new RangeError("division by zero");
    return 10 / x;
}
"#;
    assert_fault_is_isolated(&engine, "javascript", divide).await;
    engine.shutdown().await;
}

#[tokio::test]
async fn test_python_and_c_fault_isolation() {
    if available("python3") {
        let (engine, _root) = start_engine();
        assert_fault_is_isolated(&engine, "python", "def divide(x):\n    return 10 // x\n").await;
        engine.shutdown().await;
    }
    if available("gcc") {
        let (engine, _root) = start_engine();
        let divide = "#include <stdlib.h>\n\nint divide(int x) {\n    if (x == 0) abort();\n    return 10 / x;\n}\n";
        assert_fault_is_isolated(&engine, "c", divide).await;
        engine.shutdown().await;
    }
}
