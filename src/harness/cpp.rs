use std::sync::LazyLock;

use regex::Regex;

use super::{
    ArgValue, Dialect, HarnessProgram, TypeShape, c_char, c_string, c_string_list, fill_template,
    float_literal, signature,
};

static SOLUTION_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:class|struct)\s+Solution\b").expect("valid class regex"));

const PRELUDE: &str = "#include <bits/stdc++.h>\nusing namespace std;\n\n";

const RUNNER: &str = r#"

namespace harness {
string format(const string& value) { return value; }
string format(const char* value) { return value == nullptr ? string("null") : string(value); }
string format(bool value) { return value ? "true" : "false"; }
string format(char value) { return string(1, value); }
template <typename T> string format(const vector<T>& values);
template <typename T> string format(const T& value) {
    ostringstream out;
    out << value;
    return out.str();
}
template <typename T> string format(const vector<T>& values) {
    string out = "[";
    bool first = true;
    for (const auto& item : values) {
        if (!first) out += ",";
        first = false;
        out += format(item);
    }
    return out + "]";
}
string escape(const string& text) {
    string out;
    for (char c : text) {
        if (c == '\n') out += "\\n";
        else out += c;
    }
    return out;
}
}  // namespace harness

int main() {
    vector<string> inputs = { __INPUTS__ };
    vector<string> expected = { __EXPECTED__ };
    vector<string> shownExpected = { __SHOWN_EXPECTED__ };
    vector<string> actual(expected.size());
    vector<string> errors(expected.size());
    vector<bool> failed(expected.size(), false);
__CALLS__
    size_t passed = 0;
    for (size_t i = 0; i < expected.size(); ++i) {
        if (!failed[i] && actual[i] == expected[i]) ++passed;
    }
    cout << "TEST_RESULTS: " << passed << "/" << expected.size() << "\n";
    for (size_t i = 0; i < expected.size(); ++i) {
        bool ok = !failed[i] && actual[i] == expected[i];
        cout << "Test " << (i + 1) << (ok ? ": PASS" : ": FAIL") << "\n";
        if (ok) continue;
        cout << "  Input: " << inputs[i] << "\n";
        cout << "  Expected: " << shownExpected[i] << "\n";
        if (failed[i]) cout << "  Error: " << harness::escape(errors[i]) << "\n";
        else cout << "  Actual: " << harness::escape(actual[i]) << "\n";
    }
    cout.flush();
    return 0;
}
"#;

pub(super) struct Cpp;

impl Dialect for Cpp {
    fn defines_function(&self, code: &str, name: &str) -> bool {
        signature::extract(code, name).is_some()
    }

    fn render(&self, program: &HarnessProgram) -> String {
        let function = &program.function;
        let target = if SOLUTION_TYPE.is_match(program.user_code) {
            format!("Solution().{}", function.name)
        } else {
            function.name.clone()
        };
        let returns_void = function
            .return_type
            .as_deref()
            .is_some_and(|ty| parse_type(ty) == TypeShape::Void);

        let mut calls = String::new();
        for (index, case) in program.cases.iter().enumerate() {
            calls.push_str("    try {\n");
            let mut names = Vec::with_capacity(case.args.len());
            for (j, arg) in case.args.iter().enumerate() {
                let shape = function
                    .params
                    .get(j)
                    .and_then(|param| param.type_name.as_deref())
                    .map(parse_type)
                    .filter(|shape| *shape != TypeShape::Unknown)
                    .unwrap_or_else(|| TypeShape::infer(arg));
                let name = format!("harness_arg{j}");
                calls.push_str(&format!(
                    "        {} {name} = {};\n",
                    type_name(&shape),
                    literal(arg, &shape)
                ));
                names.push(name);
            }
            let call = format!("{target}({})", names.join(", "));
            if returns_void {
                calls.push_str(&format!(
                    "        {call};\n        actual[{index}] = \"null\";\n"
                ));
            } else {
                calls.push_str(&format!(
                    "        actual[{index}] = harness::format({call});\n"
                ));
            }
            calls.push_str(&format!(
                "    }} catch (const exception& error) {{\n        failed[{index}] = true;\n        errors[{index}] = error.what();\n    }} catch (...) {{\n        failed[{index}] = true;\n        errors[{index}] = \"unknown exception\";\n    }}\n"
            ));
        }

        let inputs = c_string_list(&program.cases, |case| case.shown_input.as_str());
        let expected = c_string_list(&program.cases, |case| case.expected.as_str());
        let shown_expected = c_string_list(&program.cases, |case| case.shown_expected.as_str());
        let runner = fill_template(
            RUNNER,
            &[
                ("__INPUTS__", inputs.as_str()),
                ("__EXPECTED__", expected.as_str()),
                ("__SHOWN_EXPECTED__", shown_expected.as_str()),
                ("__CALLS__", calls.as_str()),
            ],
        );
        format!("{PRELUDE}{}\n{runner}", program.user_code.trim_end())
    }
}

fn parse_type(text: &str) -> TypeShape {
    let cleaned: String = text
        .replace("const", " ")
        .replace("std::", "")
        .replace(['&', '*'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if let Some(inner) = cleaned
        .strip_prefix("vector<")
        .and_then(|rest| rest.strip_suffix('>'))
    {
        return TypeShape::Array(Box::new(parse_type(inner)));
    }
    match cleaned.as_str() {
        "int" | "short" | "unsigned" | "unsigned int" => TypeShape::Int,
        "long" | "long long" | "long int" | "int64_t" | "size_t" => TypeShape::Long,
        "double" | "float" => TypeShape::Double,
        "bool" => TypeShape::Bool,
        "string" => TypeShape::Str,
        "char" => TypeShape::Char,
        "void" => TypeShape::Void,
        _ => TypeShape::Unknown,
    }
}

fn type_name(shape: &TypeShape) -> String {
    match shape {
        TypeShape::Int | TypeShape::Unknown | TypeShape::Void => "int".to_string(),
        TypeShape::Long => "long long".to_string(),
        TypeShape::Double => "double".to_string(),
        TypeShape::Bool => "bool".to_string(),
        TypeShape::Str => "string".to_string(),
        TypeShape::Char => "char".to_string(),
        TypeShape::Array(inner) | TypeShape::Collection(inner) => {
            format!("vector<{}>", type_name(inner))
        }
    }
}

fn literal(value: &ArgValue, shape: &TypeShape) -> String {
    if let Some(element) = shape.element() {
        let items: &[ArgValue] = match value {
            ArgValue::List(items) => items,
            _ => &[],
        };
        let rendered: Vec<String> = items.iter().map(|item| literal(item, element)).collect();
        return format!("{{{}}}", rendered.join(", "));
    }
    match (shape, value) {
        (TypeShape::Long, ArgValue::Int(n)) => format!("{n}LL"),
        (TypeShape::Double, ArgValue::Int(n)) => format!("{n}.0"),
        (TypeShape::Double, ArgValue::Float(f)) => float_literal(*f),
        (TypeShape::Int | TypeShape::Long, ArgValue::Float(f)) => format!("{}", *f as i64),
        (_, ArgValue::Int(n)) if *shape != TypeShape::Bool && *shape != TypeShape::Str => {
            n.to_string()
        }
        (TypeShape::Bool, ArgValue::Bool(b)) => b.to_string(),
        (TypeShape::Bool, ArgValue::Int(n)) => (*n != 0).to_string(),
        (TypeShape::Char, ArgValue::Str(s)) => c_char(s.chars().next().unwrap_or('\0')),
        (TypeShape::Str, ArgValue::Str(s)) => c_string(s),
        (TypeShape::Str, other) => c_string(&other.canonical()),
        (TypeShape::Bool, _) => "false".to_string(),
        _ => "0".to_string(),
    }
}
