use std::sync::LazyLock;

use regex::Regex;

use super::{
    ArgValue, Dialect, HarnessProgram, TypeShape, c_char, c_string, c_string_list, fill_template,
    float_literal, signature,
};

static PUBLIC_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bpublic\s+((?:final\s+|abstract\s+)*class\b)").expect("valid class regex"));
static CLASS_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bclass\s+([A-Za-z_$][\w$]*)").expect("valid class name regex"));

const RUNNER: &str = r#"

public class Main {
    private static String format(Object value) {
        if (value == null) return "null";
        if (value instanceof int[]) return format(Arrays.stream((int[]) value).boxed().toArray());
        if (value instanceof long[]) return format(Arrays.stream((long[]) value).boxed().toArray());
        if (value instanceof double[]) return format(Arrays.stream((double[]) value).boxed().toArray());
        if (value instanceof boolean[]) {
            boolean[] items = (boolean[]) value;
            Object[] boxed = new Object[items.length];
            for (int i = 0; i < items.length; i++) boxed[i] = items[i];
            return format(boxed);
        }
        if (value instanceof char[]) {
            char[] items = (char[]) value;
            Object[] boxed = new Object[items.length];
            for (int i = 0; i < items.length; i++) boxed[i] = items[i];
            return format(boxed);
        }
        if (value instanceof Object[]) {
            StringBuilder out = new StringBuilder("[");
            Object[] items = (Object[]) value;
            for (int i = 0; i < items.length; i++) {
                if (i > 0) out.append(",");
                out.append(format(items[i]));
            }
            return out.append("]").toString();
        }
        if (value instanceof Collection) return format(((Collection<?>) value).toArray());
        return String.valueOf(value);
    }

    private static String escape(String text) {
        return text.replace("\n", "\\n");
    }

    public static void main(String[] harnessArgs) {
        String[] inputs = { __INPUTS__ };
        String[] expected = { __EXPECTED__ };
        String[] shownExpected = { __SHOWN_EXPECTED__ };
        String[] actual = new String[expected.length];
        String[] errors = new String[expected.length];
__CALLS__
        int passed = 0;
        for (int i = 0; i < expected.length; i++) {
            if (errors[i] == null && expected[i].equals(actual[i])) passed++;
        }
        StringBuilder out = new StringBuilder();
        out.append("TEST_RESULTS: ").append(passed).append("/").append(expected.length).append("\n");
        for (int i = 0; i < expected.length; i++) {
            boolean ok = errors[i] == null && expected[i].equals(actual[i]);
            out.append("Test ").append(i + 1).append(ok ? ": PASS" : ": FAIL").append("\n");
            if (ok) continue;
            out.append("  Input: ").append(inputs[i]).append("\n");
            out.append("  Expected: ").append(shownExpected[i]).append("\n");
            if (errors[i] == null) {
                out.append("  Actual: ").append(escape(actual[i])).append("\n");
            } else {
                out.append("  Error: ").append(escape(errors[i])).append("\n");
            }
        }
        System.out.print(out);
        System.out.flush();
    }
}
"#;

pub(super) struct Java;

impl Dialect for Java {
    fn defines_function(&self, code: &str, name: &str) -> bool {
        signature::extract(code, name).is_some()
    }

    fn render(&self, program: &HarnessProgram) -> String {
        let (imports, body) = split_imports(program.user_code);
        let (class_name, body) = solution_class(&body);

        let function = &program.function;
        let returns_void = function
            .return_type
            .as_deref()
            .is_some_and(|ty| parse_type(ty) == TypeShape::Void);

        let mut calls = String::new();
        for (index, case) in program.cases.iter().enumerate() {
            calls.push_str("        try {\n");
            let mut names = Vec::with_capacity(case.args.len());
            for (j, arg) in case.args.iter().enumerate() {
                let shape = function
                    .params
                    .get(j)
                    .and_then(|param| param.type_name.as_deref())
                    .map(parse_type)
                    .filter(|shape| *shape != TypeShape::Unknown)
                    .unwrap_or_else(|| TypeShape::infer(arg));
                let name = format!("harnessArg{j}");
                calls.push_str(&format!(
                    "            {} {name} = {};\n",
                    type_name(&shape),
                    literal(arg, &shape)
                ));
                names.push(name);
            }
            let call = format!("new {class_name}().{}({})", function.name, names.join(", "));
            if returns_void {
                calls.push_str(&format!(
                    "            {call};\n            actual[{index}] = \"null\";\n"
                ));
            } else {
                calls.push_str(&format!("            actual[{index}] = format({call});\n"));
            }
            calls.push_str(&format!(
                "        }} catch (Throwable error) {{\n            errors[{index}] = error.toString();\n        }}\n"
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

        let mut out = String::from("import java.util.*;\nimport java.util.stream.*;\n");
        for import in imports {
            out.push_str(&import);
            out.push('\n');
        }
        out.push('\n');
        out.push_str(body.trim_end());
        out.push('\n');
        out.push_str(&runner);
        out
    }
}

/// Separates `import` lines (dropping any `package` line) from the rest of the source
fn split_imports(code: &str) -> (Vec<String>, String) {
    let mut imports = Vec::new();
    let mut body = String::with_capacity(code.len());
    for line in code.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("import ") {
            imports.push(trimmed.trim_end().to_string());
        } else if !trimmed.starts_with("package ") {
            body.push_str(line);
            body.push('\n');
        }
    }
    (imports, body)
}

/// Class to instantiate, with the source rewritten so it can share a file with `Main`
fn solution_class(body: &str) -> (String, String) {
    let body = PUBLIC_CLASS.replace_all(body, "$1").into_owned();
    let names: Vec<&str> = CLASS_NAME
        .captures_iter(&body)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();

    let class_name = if names.contains(&"Solution") {
        Some("Solution".to_string())
    } else {
        names.first().map(|name| name.to_string())
    };
    match class_name {
        Some(name) => (name, body),
        None => (
            "Solution".to_string(),
            format!("class Solution {{\n{}}}\n", body),
        ),
    }
}

fn parse_type(text: &str) -> TypeShape {
    let text = text.trim().trim_start_matches("final ").trim();
    if let Some(inner) = text.strip_suffix("[]") {
        return TypeShape::Array(Box::new(parse_type(inner)));
    }
    if let Some(rest) = text
        .strip_prefix("List<")
        .or_else(|| text.strip_prefix("ArrayList<"))
        .and_then(|rest| rest.strip_suffix('>'))
    {
        return TypeShape::Collection(Box::new(parse_type(rest)));
    }
    match text {
        "int" | "Integer" | "short" | "Short" | "byte" | "Byte" => TypeShape::Int,
        "long" | "Long" => TypeShape::Long,
        "double" | "Double" | "float" | "Float" => TypeShape::Double,
        "boolean" | "Boolean" => TypeShape::Bool,
        "String" => TypeShape::Str,
        "char" | "Character" => TypeShape::Char,
        "void" => TypeShape::Void,
        _ => TypeShape::Unknown,
    }
}

fn type_name(shape: &TypeShape) -> String {
    match shape {
        TypeShape::Int => "int".to_string(),
        TypeShape::Long => "long".to_string(),
        TypeShape::Double => "double".to_string(),
        TypeShape::Bool => "boolean".to_string(),
        TypeShape::Str => "String".to_string(),
        TypeShape::Char => "char".to_string(),
        TypeShape::Array(inner) => format!("{}[]", type_name(inner)),
        TypeShape::Collection(inner) => format!("List<{}>", boxed_name(inner)),
        TypeShape::Void | TypeShape::Unknown => "Object".to_string(),
    }
}

fn boxed_name(shape: &TypeShape) -> String {
    match shape {
        TypeShape::Int => "Integer".to_string(),
        TypeShape::Long => "Long".to_string(),
        TypeShape::Double => "Double".to_string(),
        TypeShape::Bool => "Boolean".to_string(),
        TypeShape::Char => "Character".to_string(),
        other => type_name(other),
    }
}

fn literal(value: &ArgValue, shape: &TypeShape) -> String {
    match shape {
        TypeShape::Array(inner) => format!("new {}{}", type_name(shape), array_init(value, inner)),
        TypeShape::Collection(inner) => match value {
            ArgValue::List(items) if !items.is_empty() => {
                format!("new ArrayList<>({})", as_list(items, inner))
            }
            _ => "new ArrayList<>()".to_string(),
        },
        _ => scalar(value, shape),
    }
}

fn array_init(value: &ArgValue, element: &TypeShape) -> String {
    let items: &[ArgValue] = match value {
        ArgValue::List(items) => items,
        _ => &[],
    };
    let rendered: Vec<String> = items
        .iter()
        .map(|item| match element {
            TypeShape::Array(inner) => array_init(item, inner),
            TypeShape::Collection(_) => literal(item, element),
            _ => scalar(item, element),
        })
        .collect();
    format!("{{{}}}", rendered.join(", "))
}

fn as_list(items: &[ArgValue], element: &TypeShape) -> String {
    let rendered: Vec<String> = items
        .iter()
        .map(|item| match (element, item) {
            (TypeShape::Collection(inner), ArgValue::List(nested)) if !nested.is_empty() => {
                as_list(nested, inner)
            }
            (TypeShape::Collection(_), _) => format!("new ArrayList<{}>()", boxed_name(element)),
            _ => literal(item, element),
        })
        .collect();
    format!("Arrays.asList({})", rendered.join(", "))
}

fn scalar(value: &ArgValue, shape: &TypeShape) -> String {
    match (shape, value) {
        (TypeShape::Int, ArgValue::Int(n)) => n.to_string(),
        (TypeShape::Int, ArgValue::Float(f)) => format!("{}", *f as i64),
        (TypeShape::Long, ArgValue::Int(n)) => format!("{n}L"),
        (TypeShape::Long, ArgValue::Float(f)) => format!("{}L", *f as i64),
        (TypeShape::Double, ArgValue::Int(n)) => format!("{n}.0"),
        (TypeShape::Double, ArgValue::Float(f)) => float_literal(*f),
        (TypeShape::Bool, ArgValue::Bool(b)) => b.to_string(),
        (TypeShape::Bool, ArgValue::Int(n)) => (*n != 0).to_string(),
        (TypeShape::Char, ArgValue::Str(s)) => c_char(s.chars().next().unwrap_or('\0')),
        (TypeShape::Str, ArgValue::Str(s)) => c_string(s),
        (TypeShape::Str, other) => c_string(&other.canonical()),
        (_, ArgValue::Null) => "null".to_string(),
        (TypeShape::Int | TypeShape::Long | TypeShape::Double, _) => "0".to_string(),
        (TypeShape::Bool, _) => "false".to_string(),
        (_, other) => c_string(&other.canonical()),
    }
}
