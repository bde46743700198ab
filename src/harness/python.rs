use regex::Regex;

use super::{ArgValue, Dialect, HarnessProgram, float_literal, json_string};

const PRELUDE: &str = "import sys\nfrom typing import *\n\n";

const RUNNER: &str = r#"

def _harness_format(value):
    if isinstance(value, bool):
        return "true" if value else "false"
    if value is None:
        return "null"
    if isinstance(value, (list, tuple)):
        return "[" + ",".join(_harness_format(item) for item in value) + "]"
    return str(value)


def _harness_target():
    solution = globals().get("Solution")
    if isinstance(solution, type) and hasattr(solution, "__NAME__"):
        return getattr(solution(), "__NAME__")
    return globals()["__NAME__"]


_HARNESS_CASES = [
__CASES__
]


def _harness_main():
    results = []
    for args, expected, _, _ in _HARNESS_CASES:
        try:
            actual = _harness_format(_harness_target()(*args))
            results.append((actual == expected, actual, None))
        except BaseException as exc:
            results.append((False, "", type(exc).__name__ + ": " + str(exc)))
    passed = sum(1 for ok, _, _ in results if ok)
    lines = ["TEST_RESULTS: %d/%d" % (passed, len(results))]
    for index, (case, (ok, actual, error)) in enumerate(zip(_HARNESS_CASES, results), start=1):
        if ok:
            lines.append("Test %d: PASS" % index)
            continue
        lines.append("Test %d: FAIL" % index)
        lines.append("  Input: " + case[2])
        lines.append("  Expected: " + case[3])
        if error is None:
            lines.append("  Actual: " + actual.replace("\n", "\\n"))
        else:
            lines.append("  Error: " + error.replace("\n", "\\n"))
    sys.stdout.write("\n".join(lines) + "\n")
    sys.stdout.flush()


_harness_main()
"#;

pub(super) struct Python;

impl Dialect for Python {
    fn defines_function(&self, code: &str, name: &str) -> bool {
        let pattern = format!(
            r"(?m)^[ \t]*(?:async[ \t]+)?def[ \t]+{}[ \t]*\(",
            regex::escape(name)
        );
        Regex::new(&pattern).is_ok_and(|re| re.is_match(code))
    }

    fn render(&self, program: &HarnessProgram) -> String {
        let cases: Vec<String> = program
            .cases
            .iter()
            .map(|case| {
                let args: Vec<String> = case.args.iter().map(literal).collect();
                format!(
                    "    ([{}], {}, {}, {}),",
                    args.join(", "),
                    json_string(&case.expected),
                    json_string(&case.shown_input),
                    json_string(&case.shown_expected),
                )
            })
            .collect();

        let runner = RUNNER
            .replace("__NAME__", &program.function.name)
            .replace("__CASES__", &cases.join("\n"));
        format!("{PRELUDE}{}\n{runner}", program.user_code.trim_end())
    }
}

fn literal(value: &ArgValue) -> String {
    match value {
        ArgValue::Int(n) => n.to_string(),
        ArgValue::Float(f) => float_literal(*f),
        ArgValue::Bool(true) => "True".to_string(),
        ArgValue::Bool(false) => "False".to_string(),
        ArgValue::Str(s) => json_string(s),
        ArgValue::Null => "None".to_string(),
        ArgValue::List(items) => {
            let inner: Vec<String> = items.iter().map(literal).collect();
            format!("[{}]", inner.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{FunctionSignature, synthesize};
    use crate::judge::TestCase;
    use crate::language::LanguageRegistry;

    #[test]
    fn test_detects_methods_and_functions() {
        assert!(Python.defines_function("def twoSum(nums, target):\n    pass", "twoSum"));
        assert!(Python.defines_function(
            "class Solution:\n    def twoSum(self, nums, target):\n        pass",
            "twoSum"
        ));
        assert!(!Python.defines_function("twoSum = lambda a: a", "twoSum"));
        assert!(!Python.defines_function("def twoSumAll(x): pass", "twoSum"));
    }

    #[test]
    fn test_render_embeds_cases() {
        let registry = LanguageRegistry::builtin();
        let python = registry.resolve("python").unwrap();
        let program = synthesize(
            &python,
            &FunctionSignature {
                name: "twoSum".to_string(),
                ..Default::default()
            },
            &[TestCase {
                input: "[2,7,11,15]\n9".to_string(),
                expected_output: "[0, 1]".to_string(),
                hidden: false,
            }],
            "def twoSum(nums, target):\n    return [0, 1]\n",
        )
        .unwrap();

        assert!(program.starts_with("import sys\n"));
        assert!(program.contains("def twoSum(nums, target):"));
        assert!(program.contains(r#"    ([[2, 7, 11, 15], 9], "[0,1]", "[2,7,11,15]\\n9", "[0,1]"),"#));
        assert!(program.contains(r#"hasattr(solution, "twoSum")"#));
        assert!(!program.contains("__NAME__"));
    }

    #[test]
    fn test_literals() {
        assert_eq!(literal(&ArgValue::Bool(true)), "True");
        assert_eq!(literal(&ArgValue::Null), "None");
        assert_eq!(
            literal(&ArgValue::List(vec![ArgValue::Float(1.0), ArgValue::Str("a\"".into())])),
            r#"[1.0, "a\""]"#
        );
    }
}
