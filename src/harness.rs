//! Function-mode harness synthesis
//!
//! Turns a bare user function plus raw test cases into one self-contained
//! program that calls the function once per case and reports the results
//! through a `TEST_RESULTS:` trailer on stdout.

mod c;
mod cpp;
mod java;
mod javascript;
mod python;
mod signature;
mod trailer;
mod value;

pub use trailer::{CaseReport, HarnessReport, parse_trailer};
pub use value::{ArgValue, TypeShape, parse_case_input};

use serde::{Deserialize, Serialize};

use crate::error::JudgeError;
use crate::judge::{TestCase, normalize_output};
use crate::language::LanguageSpec;

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HarnessDialect {
    Python,
    JavaScript,
    Java,
    Cpp,
    C,
}

impl HarnessDialect {
    fn is_statically_typed(self) -> bool {
        matches!(self, Self::Java | Self::Cpp | Self::C)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSignature {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub return_type: Option<String>,
}

/// Accepts either `"nums"` or `{"name": "nums", "type": "int[]"}`
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(from = "ParameterRepr")]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ParameterRepr {
    Name(String),
    Full {
        name: String,
        #[serde(default, rename = "type")]
        type_name: Option<String>,
    },
}

impl From<ParameterRepr> for Parameter {
    fn from(repr: ParameterRepr) -> Self {
        match repr {
            ParameterRepr::Name(name) => Self {
                name,
                type_name: None,
            },
            ParameterRepr::Full { name, type_name } => Self { name, type_name },
        }
    }
}

/// Signature with gaps filled in from the user's source where possible
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedSignature {
    pub name: String,
    pub params: Vec<Parameter>,
    pub return_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HarnessCase {
    pub args: Vec<ArgValue>,
    /// Expected output as the harness compares it
    pub expected: String,
    /// Single-line renderings for the trailer
    pub shown_input: String,
    pub shown_expected: String,
}

impl HarnessCase {
    fn new(case: &TestCase) -> Self {
        let expected = expected_output(case);
        Self {
            args: parse_case_input(&case.input),
            shown_input: escape_newlines(case.input.trim()),
            shown_expected: escape_newlines(&expected),
            expected,
        }
    }
}

pub(crate) struct HarnessProgram<'a> {
    pub user_code: &'a str,
    pub function: ResolvedSignature,
    pub cases: Vec<HarnessCase>,
}

pub(crate) trait Dialect {
    /// Whether `code` defines a callable named `name`
    fn defines_function(&self, code: &str, name: &str) -> bool;

    fn render(&self, program: &HarnessProgram) -> String;
}

fn dialect(kind: HarnessDialect) -> &'static dyn Dialect {
    match kind {
        HarnessDialect::Python => &python::Python,
        HarnessDialect::JavaScript => &javascript::JavaScript,
        HarnessDialect::Java => &java::Java,
        HarnessDialect::Cpp => &cpp::Cpp,
        HarnessDialect::C => &c::C,
    }
}

/// Builds the complete harness program for `user_code`
pub fn synthesize(
    language: &LanguageSpec,
    signature: &FunctionSignature,
    cases: &[TestCase],
    user_code: &str,
) -> Result<String, JudgeError> {
    let kind = language
        .harness
        .ok_or_else(|| JudgeError::NoHarness(language.id.clone()))?;
    let dialect = dialect(kind);

    let name = signature.name.trim();
    if !is_identifier(name) || !dialect.defines_function(user_code, name) {
        return Err(JudgeError::Extraction {
            name: name.to_string(),
            language: language.display_name.clone(),
        });
    }

    let program = HarnessProgram {
        user_code,
        function: resolve_signature(kind, signature, user_code),
        cases: cases.iter().map(HarnessCase::new).collect(),
    };
    log::debug!(
        "Synthesizing {} harness for `{name}` with {} cases",
        language.id,
        program.cases.len()
    );
    Ok(dialect.render(&program))
}

/// What a correct function's formatted return value must equal for this case
pub fn expected_output(case: &TestCase) -> String {
    canonical_expected(&normalize_output(&case.expected_output))
}

fn resolve_signature(
    kind: HarnessDialect,
    signature: &FunctionSignature,
    user_code: &str,
) -> ResolvedSignature {
    let name = signature.name.trim().to_string();
    let extracted = kind
        .is_statically_typed()
        .then(|| signature::extract(user_code, &name))
        .flatten();

    let params = match &extracted {
        Some(found) if signature.parameters.is_empty() => found.params.clone(),
        _ => signature
            .parameters
            .iter()
            .enumerate()
            .map(|(i, param)| Parameter {
                name: param.name.clone(),
                type_name: param.type_name.clone().or_else(|| {
                    extracted
                        .as_ref()
                        .and_then(|found| found.params.get(i))
                        .and_then(|found| found.type_name.clone())
                }),
            })
            .collect(),
    };

    ResolvedSignature {
        name,
        params,
        return_type: signature
            .return_type
            .clone()
            .or_else(|| extracted.map(|found| found.return_type)),
    }
}

/// Rewrites a one-line list expectation into the harness's canonical form
///
/// Lists containing floats are left alone since each runtime prints floats differently.
fn canonical_expected(expected: &str) -> String {
    if expected.contains('\n') || !expected.starts_with('[') {
        return expected.to_string();
    }
    match parse_case_input(expected).as_slice() {
        [value @ ArgValue::List(_)] if !value.contains_float() => value.canonical(),
        _ => expected.to_string(),
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Substitutes `__KEY__` markers in one pass, so substituted text is never rescanned
pub(crate) fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    loop {
        let next = values
            .iter()
            .filter_map(|(key, value)| rest.find(key).map(|at| (at, *key, *value)))
            .min_by_key(|(at, _, _)| *at);
        let Some((at, key, value)) = next else {
            out.push_str(rest);
            return out;
        };
        out.push_str(&rest[..at]);
        out.push_str(value);
        rest = &rest[at + key.len()..];
    }
}

pub(crate) fn escape_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").replace('\n', "\\n")
}

/// JSON string literal, valid in Python and JavaScript
pub(crate) fn json_string(text: &str) -> String {
    serde_json::Value::from(text).to_string()
}

/// String literal valid in C, C++ and Java
pub(crate) fn c_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        push_c_escaped(&mut out, ch, '"');
    }
    out.push('"');
    out
}

/// Comma-separated C-style literals, one per case
pub(crate) fn c_string_list(cases: &[HarnessCase], select: fn(&HarnessCase) -> &str) -> String {
    let literals: Vec<String> = cases.iter().map(|case| c_string(select(case))).collect();
    literals.join(", ")
}

pub(crate) fn c_char(ch: char) -> String {
    let mut out = String::from("'");
    push_c_escaped(&mut out, ch, '\'');
    out.push('\'');
    out
}

fn push_c_escaped(out: &mut String, ch: char, quote: char) {
    match ch {
        '\\' => out.push_str("\\\\"),
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        c if c == quote => {
            out.push('\\');
            out.push(c);
        }
        c if (c as u32) < 0x20 || c == '\x7f' => out.push_str(&format!("\\{:03o}", c as u32)),
        c => out.push(c),
    }
}

/// Float literal that stays a float in every supported language
pub(crate) fn float_literal(value: f64) -> String {
    format!("{value:?}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::LanguageRegistry;
    use pretty_assertions::assert_eq;

    fn case(input: &str, expected: &str) -> TestCase {
        TestCase {
            input: input.to_string(),
            expected_output: expected.to_string(),
            hidden: false,
        }
    }

    fn signature(name: &str) -> FunctionSignature {
        FunctionSignature {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_function_is_extraction_error() {
        let registry = LanguageRegistry::builtin();
        let python = registry.resolve("python").unwrap();
        let err = synthesize(
            &python,
            &signature("twoSum"),
            &[case("[1]\n1", "[0]")],
            "def threeSum(nums):\n    return []\n",
        )
        .unwrap_err();
        assert_eq!(
            err,
            JudgeError::Extraction {
                name: "twoSum".to_string(),
                language: "Python".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_name_is_extraction_error() {
        let registry = LanguageRegistry::builtin();
        let python = registry.resolve("python").unwrap();
        let result = synthesize(&python, &signature("two sum"), &[], "def two(): pass");
        assert!(matches!(result, Err(JudgeError::Extraction { .. })));
    }

    #[test]
    fn test_language_without_harness() {
        let registry = LanguageRegistry::builtin();
        let mut shell = registry.resolve("python").unwrap().as_ref().clone();
        shell.id = "shell".to_string();
        shell.harness = None;
        let result = synthesize(&shell, &signature("f"), &[], "f() { :; }");
        assert_eq!(result.unwrap_err(), JudgeError::NoHarness("shell".to_string()));
    }

    #[test]
    fn test_parameters_accept_both_forms() {
        let signature: FunctionSignature = serde_json::from_str(
            r#"{"name": "twoSum", "parameters": ["nums", {"name": "target", "type": "int"}], "returnType": "int[]"}"#,
        )
        .unwrap();
        assert_eq!(signature.parameters[0].type_name, None);
        assert_eq!(signature.parameters[1].type_name.as_deref(), Some("int"));
        assert_eq!(signature.return_type.as_deref(), Some("int[]"));
    }

    #[test]
    fn test_signature_filled_from_source() {
        let code = "class Solution {\n    public int[] twoSum(int[] nums, int target) {\n        return new int[]{0, 1};\n    }\n}\n";
        let resolved = resolve_signature(HarnessDialect::Java, &signature("twoSum"), code);
        assert_eq!(resolved.return_type.as_deref(), Some("int[]"));
        assert_eq!(resolved.params.len(), 2);
        assert_eq!(resolved.params[0].type_name.as_deref(), Some("int[]"));
        assert_eq!(resolved.params[1].name, "target");
    }

    #[test]
    fn test_single_line_java_class_synthesizes() {
        let registry = LanguageRegistry::builtin();
        let java = registry.resolve("java").unwrap();
        let code = "class Solution { public int f(int x) { return x; } }";
        assert!(synthesize(&java, &signature("f"), &[case("3", "3")], code).is_ok());

        let resolved = resolve_signature(HarnessDialect::Java, &signature("f"), code);
        assert_eq!(resolved.return_type.as_deref(), Some("int"));
        assert_eq!(resolved.params[0].type_name.as_deref(), Some("int"));
    }

    #[test]
    fn test_expected_output_is_canonical() {
        assert_eq!(expected_output(&case("", "[0, 1]\n")), "[0,1]");
        assert_eq!(expected_output(&case("", " [\"a\", \"b\"] ")), "[a,b]");
        assert_eq!(expected_output(&case("", "[1.5, 2]")), "[1.5, 2]");
        assert_eq!(expected_output(&case("", "true\r\n\r\n")), "true");
    }

    #[test]
    fn test_fill_template_single_pass() {
        let filled = fill_template(
            "a __X__ b __Y__ __X__",
            &[("__X__", "__Y__"), ("__Y__", "y")],
        );
        assert_eq!(filled, "a __Y__ b y __Y__");
    }

    #[test]
    fn test_literal_escaping() {
        assert_eq!(c_string("a\"b\\c\nd\u{1}"), "\"a\\\"b\\\\c\\nd\\001\"");
        assert_eq!(c_char('\''), "'\\''");
        assert_eq!(json_string("a\"b\n"), "\"a\\\"b\\n\"");
        assert_eq!(float_literal(3.0), "3.0");
        assert_eq!(float_literal(0.25), "0.25");
    }
}
