use regex::Regex;

use super::{ArgValue, Dialect, HarnessProgram, float_literal, json_string};

const RUNNER: &str = r#"

function __harnessFormat(value) {
  if (Array.isArray(value)) return "[" + value.map(__harnessFormat).join(",") + "]";
  if (value === null || value === undefined) return "null";
  if (typeof value === "boolean") return value ? "true" : "false";
  return String(value);
}

function __harnessTarget() {
  if (typeof __NAME__ === "function") return __NAME__;
  if (typeof Solution === "function") {
    const solution = new Solution();
    if (typeof solution.__NAME__ === "function") return solution.__NAME__.bind(solution);
  }
  if (typeof module !== "undefined" && module.exports && typeof module.exports.__NAME__ === "function") {
    return module.exports.__NAME__;
  }
  throw new ReferenceError("__NAME__ is not defined");
}

const __harnessCases = [
__CASES__
];

(function __harnessMain() {
  const results = __harnessCases.map(([args, expected]) => {
    try {
      const actual = __harnessFormat(__harnessTarget()(...args));
      return { ok: actual === expected, actual, error: null };
    } catch (err) {
      const message = err && err.name ? err.name + ": " + err.message : String(err);
      return { ok: false, actual: "", error: message };
    }
  });
  const passed = results.filter((result) => result.ok).length;
  const lines = ["TEST_RESULTS: " + passed + "/" + results.length];
  results.forEach((result, i) => {
    const [, , shownInput, shownExpected] = __harnessCases[i];
    if (result.ok) {
      lines.push("Test " + (i + 1) + ": PASS");
      return;
    }
    lines.push("Test " + (i + 1) + ": FAIL");
    lines.push("  Input: " + shownInput);
    lines.push("  Expected: " + shownExpected);
    if (result.error === null) {
      lines.push("  Actual: " + result.actual.replace(/\n/g, "\\n"));
    } else {
      lines.push("  Error: " + result.error.replace(/\n/g, "\\n"));
    }
  });
  process.stdout.write(lines.join("\n") + "\n");
})();
"#;

pub(super) struct JavaScript;

impl Dialect for JavaScript {
    fn defines_function(&self, code: &str, name: &str) -> bool {
        let name = regex::escape(name);
        let pattern = [
            format!(r"\bfunction\s*\*?\s*{name}\s*\("),
            format!(r"\b(?:const|let|var)\s+{name}\s*="),
            format!(r"(?m)^\s*(?:async\s+)?(?:static\s+)?{name}\s*\([^)]*\)\s*\{{"),
            format!(r"\bexports\.{name}\s*="),
        ]
        .join("|");
        Regex::new(&pattern).is_ok_and(|re| re.is_match(code))
    }

    fn render(&self, program: &HarnessProgram) -> String {
        let cases: Vec<String> = program
            .cases
            .iter()
            .map(|case| {
                let args: Vec<String> = case.args.iter().map(literal).collect();
                format!(
                    "  [[{}], {}, {}, {}],",
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
        format!("{}\n{runner}", program.user_code.trim_end())
    }
}

fn literal(value: &ArgValue) -> String {
    match value {
        ArgValue::Int(n) => n.to_string(),
        ArgValue::Float(f) => float_literal(*f),
        ArgValue::Bool(b) => b.to_string(),
        ArgValue::Str(s) => json_string(s),
        ArgValue::Null => "null".to_string(),
        ArgValue::List(items) => {
            let inner: Vec<String> = items.iter().map(literal).collect();
            format!("[{}]", inner.join(", "))
        }
    }
}
