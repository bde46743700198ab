use super::{
    ArgValue, Dialect, HarnessCase, HarnessProgram, Parameter, ResolvedSignature, TypeShape,
    c_char, c_string, c_string_list, fill_template, float_literal, signature,
};

const PRELUDE: &str = "#define _GNU_SOURCE\n#include <limits.h>\n#include <math.h>\n#include <setjmp.h>\n#include <signal.h>\n#include <stdbool.h>\n#include <stdio.h>\n#include <stdlib.h>\n#include <string.h>\n\n";

const RUNNER: &str = r#"

#define HARNESS_CASES __COUNT__
#define HARNESS_BUFFER 65536

static sigjmp_buf harness_guard;
static volatile sig_atomic_t harness_signal = 0;
static char harness_alt_stack[1 << 16];
static char harness_actual[HARNESS_CASES][HARNESS_BUFFER];
static char harness_errors[HARNESS_CASES][256];
static int harness_failed[HARNESS_CASES];

static void harness_on_fault(int sig) {
    harness_signal = sig;
    siglongjmp(harness_guard, 1);
}

static void harness_install_guards(void) {
    stack_t alt;
    alt.ss_sp = harness_alt_stack;
    alt.ss_size = sizeof harness_alt_stack;
    alt.ss_flags = 0;
    sigaltstack(&alt, NULL);

    struct sigaction action;
    memset(&action, 0, sizeof action);
    action.sa_handler = harness_on_fault;
    sigemptyset(&action.sa_mask);
    action.sa_flags = SA_ONSTACK | SA_NODEFER;
    sigaction(SIGSEGV, &action, NULL);
    sigaction(SIGFPE, &action, NULL);
    sigaction(SIGBUS, &action, NULL);
    sigaction(SIGILL, &action, NULL);
    sigaction(SIGABRT, &action, NULL);
}

static void harness_append(char* out, size_t cap, const char* text) {
    size_t used = strlen(out);
    if (used + 1 < cap) snprintf(out + used, cap - used, "%s", text);
}

static void harness_format_long(char* out, size_t cap, long long value) { snprintf(out, cap, "%lld", value); }
static void harness_format_double(char* out, size_t cap, double value) { snprintf(out, cap, "%g", value); }
static void harness_format_bool(char* out, size_t cap, bool value) { snprintf(out, cap, "%s", value ? "true" : "false"); }
static void harness_format_char(char* out, size_t cap, char value) { snprintf(out, cap, "%c", value); }
static void harness_format_string(char* out, size_t cap, const char* value) { snprintf(out, cap, "%s", value ? value : "null"); }

#define HARNESS_ARRAY_FORMATTER(name, type, render)                           \
    static void name(char* out, size_t cap, const type* values, int size) {  \
        char item[64];                                                       \
        out[0] = '\0';                                                       \
        harness_append(out, cap, "[");                                       \
        for (int i = 0; values != NULL && i < size; i++) {                   \
            if (i > 0) harness_append(out, cap, ",");                        \
            render;                                                          \
            harness_append(out, cap, item);                                  \
        }                                                                    \
        harness_append(out, cap, "]");                                       \
    }

HARNESS_ARRAY_FORMATTER(harness_format_int_array, int, snprintf(item, sizeof item, "%d", values[i]))
HARNESS_ARRAY_FORMATTER(harness_format_long_array, long long, snprintf(item, sizeof item, "%lld", values[i]))
HARNESS_ARRAY_FORMATTER(harness_format_double_array, double, snprintf(item, sizeof item, "%g", values[i]))
HARNESS_ARRAY_FORMATTER(harness_format_bool_array, bool, snprintf(item, sizeof item, "%s", values[i] ? "true" : "false"))
HARNESS_ARRAY_FORMATTER(harness_format_char_array, char, snprintf(item, sizeof item, "%c", values[i]))

static void harness_format_string_array(char* out, size_t cap, char* const* values, int size) {
    out[0] = '\0';
    harness_append(out, cap, "[");
    for (int i = 0; values != NULL && i < size; i++) {
        if (i > 0) harness_append(out, cap, ",");
        harness_append(out, cap, values[i] ? values[i] : "null");
    }
    harness_append(out, cap, "]");
}

static void harness_format_int_matrix(char* out, size_t cap, int* const* rows, int size, const int* cols) {
    char item[32];
    out[0] = '\0';
    harness_append(out, cap, "[");
    for (int r = 0; rows != NULL && r < size; r++) {
        if (r > 0) harness_append(out, cap, ",");
        harness_append(out, cap, "[");
        int width = cols != NULL ? cols[r] : 0;
        for (int c = 0; rows[r] != NULL && c < width; c++) {
            if (c > 0) harness_append(out, cap, ",");
            snprintf(item, sizeof item, "%d", rows[r][c]);
            harness_append(out, cap, item);
        }
        harness_append(out, cap, "]");
    }
    harness_append(out, cap, "]");
}

static void harness_print_escaped(const char* text) {
    for (const char* p = text; *p; p++) {
        if (*p == '\n') fputs("\\n", stdout);
        else putchar(*p);
    }
    putchar('\n');
}

int main(void) {
    static const char* harness_inputs[] = { __INPUTS__ };
    static const char* harness_expected[] = { __EXPECTED__ };
    static const char* harness_shown_expected[] = { __SHOWN_EXPECTED__ };
    harness_install_guards();
__CALLS__
    int harness_passed = 0;
    for (int i = 0; i < HARNESS_CASES; i++) {
        if (!harness_failed[i] && strcmp(harness_actual[i], harness_expected[i]) == 0) harness_passed++;
    }
    printf("TEST_RESULTS: %d/%d\n", harness_passed, HARNESS_CASES);
    for (int i = 0; i < HARNESS_CASES; i++) {
        int ok = !harness_failed[i] && strcmp(harness_actual[i], harness_expected[i]) == 0;
        printf("Test %d: %s\n", i + 1, ok ? "PASS" : "FAIL");
        if (ok) continue;
        printf("  Input: %s\n", harness_inputs[i]);
        printf("  Expected: %s\n", harness_shown_expected[i]);
        if (harness_failed[i]) {
            fputs("  Error: ", stdout);
            harness_print_escaped(harness_errors[i]);
        } else {
            fputs("  Actual: ", stdout);
            harness_print_escaped(harness_actual[i]);
        }
    }
    fflush(stdout);
    return 0;
}
"#;

pub(super) struct C;

impl Dialect for C {
    fn defines_function(&self, code: &str, name: &str) -> bool {
        signature::extract(code, name).is_some()
    }

    fn render(&self, program: &HarnessProgram) -> String {
        let calls: String = program
            .cases
            .iter()
            .enumerate()
            .map(|(index, case)| render_case(&program.function, index, case))
            .collect();

        let count = program.cases.len().max(1).to_string();
        let inputs = c_string_list(&program.cases, |case| case.shown_input.as_str());
        let expected = c_string_list(&program.cases, |case| case.expected.as_str());
        let shown_expected = c_string_list(&program.cases, |case| case.shown_expected.as_str());
        let runner = fill_template(
            RUNNER,
            &[
                ("__COUNT__", count.as_str()),
                ("__INPUTS__", inputs.as_str()),
                ("__EXPECTED__", expected.as_str()),
                ("__SHOWN_EXPECTED__", shown_expected.as_str()),
                ("__CALLS__", calls.as_str()),
            ],
        );
        format!("{PRELUDE}{}\n{runner}", program.user_code.trim_end())
    }
}

/// Declarations and call arguments for one case
#[derive(Default)]
struct CallPlan {
    decls: String,
    args: Vec<String>,
}

impl CallPlan {
    fn declare(&mut self, j: usize, value: &ArgValue, shape: &TypeShape) {
        let name = format!("harness_arg{j}");
        match shape {
            TypeShape::Array(inner) if matches!(**inner, TypeShape::Array(_)) => {
                let element = inner.element().cloned().unwrap_or(TypeShape::Int);
                let rows = list_items(value);
                let mut row_names = Vec::with_capacity(rows.len());
                let mut widths = Vec::with_capacity(rows.len());
                for (r, row) in rows.iter().enumerate() {
                    let row_name = format!("{name}_row{r}");
                    self.decls
                        .push_str(&array_decl(&type_name(&element), &row_name, row, &element));
                    widths.push(list_items(row).len().to_string());
                    row_names.push(row_name);
                }
                let pointer = format!("{}*", type_name(&element));
                if row_names.is_empty() {
                    self.line(format!("{pointer} {name}[1] = {{NULL}};"));
                    self.line(format!("int {name}_cols[1] = {{0}};"));
                } else {
                    self.line(format!("{pointer} {name}[] = {{{}}};", row_names.join(", ")));
                    self.line(format!("int {name}_cols[] = {{{}}};", widths.join(", ")));
                }
                self.line(format!("int {name}_size = {};", rows.len()));
            }
            TypeShape::Array(inner) => {
                let rows = list_items(value);
                self.decls
                    .push_str(&array_decl(&type_name(inner), &name, value, inner));
                self.line(format!("int {name}_size = {};", rows.len()));
            }
            TypeShape::Str => {
                let text = match value {
                    ArgValue::Str(s) => s.clone(),
                    other => other.canonical(),
                };
                self.line(format!("char {name}[] = {};", c_string(&text)));
            }
            _ => self.line(format!("{} {name} = {};", type_name(shape), scalar(value, shape))),
        }
        self.args.push(name);
    }

    fn line(&mut self, text: String) {
        self.decls.push_str("        ");
        self.decls.push_str(&text);
        self.decls.push('\n');
    }
}

fn render_case(function: &ResolvedSignature, index: usize, case: &HarnessCase) -> String {
    let mut plan = CallPlan::default();
    let return_shape = function
        .return_type
        .as_deref()
        .map(parse_type)
        .unwrap_or(TypeShape::Int);

    if function.params.is_empty() {
        for (j, value) in case.args.iter().enumerate() {
            let shape = TypeShape::infer(value);
            plan.declare(j, value, &shape);
            if matches!(shape, TypeShape::Array(_)) {
                plan.args.push(format!("harness_arg{j}_size"));
            }
        }
        if matches!(return_shape, TypeShape::Array(_)) {
            plan.args.push("&harness_return_size".to_string());
        }
    } else {
        let params = &function.params;
        let mut next_value = 0;
        let mut p = 0;
        while p < params.len() {
            let param = &params[p];
            p += 1;
            if is_return_columns(param) {
                plan.args.push("&harness_return_columns".to_string());
                continue;
            }
            if is_return_size(param) {
                plan.args.push("&harness_return_size".to_string());
                continue;
            }
            let Some(value) = case.args.get(next_value) else {
                plan.args.push("0".to_string());
                continue;
            };
            let j = next_value;
            next_value += 1;

            let shape = param_shape(param)
                .filter(|shape| *shape != TypeShape::Unknown)
                .unwrap_or_else(|| TypeShape::infer(value));
            plan.declare(j, value, &shape);

            if matches!(shape, TypeShape::Array(_)) && params.get(p).is_some_and(is_size_param) {
                plan.args.push(format!("harness_arg{j}_size"));
                p += 1;
                if shape.element().is_some_and(|inner| inner.element().is_some())
                    && params.get(p).is_some_and(is_column_sizes)
                {
                    plan.args.push(format!("harness_arg{j}_cols"));
                    p += 1;
                }
            }
        }
    }

    let call = format!("{}({})", function.name, plan.args.join(", "));
    let actual = format!("harness_actual[{index}], HARNESS_BUFFER");
    let result = match &return_shape {
        TypeShape::Void => format!("        {call};\n        harness_format_string({actual}, \"null\");\n"),
        TypeShape::Str => format!(
            "        const char* harness_result = {call};\n        harness_format_string({actual}, harness_result);\n"
        ),
        TypeShape::Array(inner) => match &**inner {
            TypeShape::Array(_) => format!(
                "        int** harness_result = {call};\n        harness_format_int_matrix({actual}, harness_result, harness_return_size, harness_return_columns);\n"
            ),
            TypeShape::Str => format!(
                "        char** harness_result = {call};\n        harness_format_string_array({actual}, harness_result, harness_return_size);\n"
            ),
            element => format!(
                "        {}* harness_result = {call};\n        {}({actual}, harness_result, harness_return_size);\n",
                type_name(element),
                array_formatter(element)
            ),
        },
        scalar_shape => format!(
            "        {} harness_result = {call};\n        {}({actual}, harness_result);\n",
            type_name(scalar_shape),
            scalar_formatter(scalar_shape)
        ),
    };

    format!(
        "    if (sigsetjmp(harness_guard, 1) == 0) {{\n{}        int harness_return_size = 0;\n        int* harness_return_columns = NULL;\n        (void) harness_return_columns;\n{result}    }} else {{\n        harness_failed[{index}] = 1;\n        snprintf(harness_errors[{index}], sizeof harness_errors[{index}], \"%s (signal %d)\", strsignal(harness_signal), (int) harness_signal);\n    }}\n",
        plan.decls
    )
}

fn param_shape(param: &Parameter) -> Option<TypeShape> {
    param.type_name.as_deref().map(parse_type)
}

fn is_return_size(param: &Parameter) -> bool {
    let name = param.name.to_ascii_lowercase();
    let pointer = param_shape(param) == Some(TypeShape::Array(Box::new(TypeShape::Int)));
    (name.starts_with("return") && name.ends_with("size"))
        || (pointer && name.contains("return") && !name.contains("col"))
}

fn is_return_columns(param: &Parameter) -> bool {
    let name = param.name.to_ascii_lowercase();
    name.contains("return") && name.contains("col")
}

fn is_size_param(param: &Parameter) -> bool {
    let scalar = matches!(
        param_shape(param),
        None | Some(TypeShape::Int) | Some(TypeShape::Long)
    );
    let name = param.name.to_ascii_lowercase();
    scalar
        && (name == "n"
            || ["size", "len", "length", "count", "num"]
                .iter()
                .any(|suffix| name.ends_with(suffix)))
}

fn is_column_sizes(param: &Parameter) -> bool {
    param.name.to_ascii_lowercase().contains("col")
        && param_shape(param) == Some(TypeShape::Array(Box::new(TypeShape::Int)))
}

fn parse_type(text: &str) -> TypeShape {
    let cleaned = text
        .replace("const", " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let stars = cleaned.chars().filter(|c| *c == '*').count();
    let base = cleaned.trim_end_matches(['*', ' ']).trim();
    let base = match base {
        "int" | "short" | "unsigned" | "unsigned int" => TypeShape::Int,
        "long" | "long long" | "long int" | "int64_t" | "size_t" => TypeShape::Long,
        "double" | "float" => TypeShape::Double,
        "bool" | "_Bool" => TypeShape::Bool,
        "char" => TypeShape::Char,
        "void" => TypeShape::Void,
        _ => TypeShape::Unknown,
    };
    match (base, stars) {
        (shape, 0) => shape,
        (TypeShape::Char, 1) => TypeShape::Str,
        (TypeShape::Char, 2) => TypeShape::Array(Box::new(TypeShape::Str)),
        (TypeShape::Void | TypeShape::Unknown, _) => TypeShape::Unknown,
        (shape, 1) => TypeShape::Array(Box::new(shape)),
        (TypeShape::Int, 2) => TypeShape::Array(Box::new(TypeShape::Array(Box::new(TypeShape::Int)))),
        _ => TypeShape::Unknown,
    }
}

fn type_name(shape: &TypeShape) -> String {
    match shape {
        TypeShape::Long => "long long".to_string(),
        TypeShape::Double => "double".to_string(),
        TypeShape::Bool => "bool".to_string(),
        TypeShape::Char => "char".to_string(),
        TypeShape::Str => "char*".to_string(),
        TypeShape::Array(inner) | TypeShape::Collection(inner) => format!("{}*", type_name(inner)),
        TypeShape::Int | TypeShape::Void | TypeShape::Unknown => "int".to_string(),
    }
}

fn scalar_formatter(shape: &TypeShape) -> &'static str {
    match shape {
        TypeShape::Double => "harness_format_double",
        TypeShape::Bool => "harness_format_bool",
        TypeShape::Char => "harness_format_char",
        _ => "harness_format_long",
    }
}

fn array_formatter(element: &TypeShape) -> &'static str {
    match element {
        TypeShape::Long => "harness_format_long_array",
        TypeShape::Double => "harness_format_double_array",
        TypeShape::Bool => "harness_format_bool_array",
        TypeShape::Char => "harness_format_char_array",
        _ => "harness_format_int_array",
    }
}

fn list_items(value: &ArgValue) -> &[ArgValue] {
    match value {
        ArgValue::List(items) => items,
        _ => &[],
    }
}

fn array_decl(element_type: &str, name: &str, value: &ArgValue, element: &TypeShape) -> String {
    let items = list_items(value);
    if items.is_empty() {
        return format!("        {element_type} {name}[1] = {{0}};\n");
    }
    let rendered: Vec<String> = items
        .iter()
        .map(|item| match element {
            TypeShape::Str => c_string(&match item {
                ArgValue::Str(s) => s.clone(),
                other => other.canonical(),
            }),
            _ => scalar(item, element),
        })
        .collect();
    format!(
        "        {element_type} {name}[] = {{{}}};\n",
        rendered.join(", ")
    )
}

fn scalar(value: &ArgValue, shape: &TypeShape) -> String {
    match (shape, value) {
        (TypeShape::Long, ArgValue::Int(n)) => format!("{n}LL"),
        (TypeShape::Double, ArgValue::Int(n)) => format!("{n}.0"),
        (TypeShape::Double, ArgValue::Float(f)) => float_literal(*f),
        (TypeShape::Bool, ArgValue::Bool(b)) => b.to_string(),
        (TypeShape::Bool, ArgValue::Int(n)) => (*n != 0).to_string(),
        (TypeShape::Char, ArgValue::Str(s)) => c_char(s.chars().next().unwrap_or('\0')),
        (_, ArgValue::Int(n)) => n.to_string(),
        (_, ArgValue::Float(f)) => format!("{}", *f as i64),
        (_, ArgValue::Bool(b)) => u8::from(*b).to_string(),
        _ => "0".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{FunctionSignature, synthesize};
    use crate::judge::TestCase;
    use crate::language::LanguageRegistry;
    use pretty_assertions::assert_eq;

    fn render(code: &str, name: &str, input: &str) -> String {
        let registry = LanguageRegistry::builtin();
        let c = registry.resolve("c").unwrap();
        synthesize(
            &c,
            &FunctionSignature {
                name: name.to_string(),
                ..Default::default()
            },
            &[TestCase {
                input: input.to_string(),
                expected_output: "[0,1]".to_string(),
                hidden: false,
            }],
            code,
        )
        .unwrap()
    }

    #[test]
    fn test_types() {
        assert_eq!(parse_type("int*"), TypeShape::Array(Box::new(TypeShape::Int)));
        assert_eq!(parse_type("const char *"), TypeShape::Str);
        assert_eq!(
            parse_type("int**"),
            TypeShape::Array(Box::new(TypeShape::Array(Box::new(TypeShape::Int))))
        );
        assert_eq!(parse_type("long long"), TypeShape::Long);
        assert_eq!(parse_type("void*"), TypeShape::Unknown);
    }

    #[test]
    fn test_two_sum_pairs_sizes() {
        let code = "int* twoSum(int* nums, int numsSize, int target, int* returnSize) {\n    int* out = malloc(2 * sizeof(int));\n    out[0] = 0; out[1] = 1;\n    *returnSize = 2;\n    return out;\n}\n";
        let program = render(code, "twoSum", "[2,7,11,15]\n9");

        assert!(program.starts_with("#define _GNU_SOURCE\n"));
        assert!(program.contains("        int harness_arg0[] = {2, 7, 11, 15};\n"));
        assert!(program.contains("        int harness_arg0_size = 4;\n"));
        assert!(program.contains("        int harness_arg1 = 9;\n"));
        assert!(program.contains(
            "int* harness_result = twoSum(harness_arg0, harness_arg0_size, harness_arg1, &harness_return_size);"
        ));
        assert!(program.contains(
            "harness_format_int_array(harness_actual[0], HARNESS_BUFFER, harness_result, harness_return_size);"
        ));
        assert!(program.contains("#define HARNESS_CASES 1\n"));
    }

    #[test]
    fn test_scalar_function() {
        let program = render("long long add(int a, int b) {\n    return a + b;\n}\n", "add", "1\n2");
        assert!(program.contains("long long harness_result = add(harness_arg0, harness_arg1);"));
        assert!(program.contains("harness_format_long(harness_actual[0], HARNESS_BUFFER, harness_result);"));
    }

    #[test]
    fn test_matrix_param() {
        let code = "int sum(int** grid, int gridSize, int* gridColSize) {\n    return 0;\n}\n";
        let program = render(code, "sum", "[[1,2],[3]]");
        assert!(program.contains("        int harness_arg0_row0[] = {1, 2};\n"));
        assert!(program.contains("        int* harness_arg0[] = {harness_arg0_row0, harness_arg0_row1};\n"));
        assert!(program.contains("        int harness_arg0_cols[] = {2, 1};\n"));
        assert!(program.contains("sum(harness_arg0, harness_arg0_size, harness_arg0_cols)"));
    }

    #[test]
    fn test_string_param() {
        let code = "bool isPalindrome(const char* s) {\n    return true;\n}\n";
        let program = render(code, "isPalindrome", "\"a\\\"b\"");
        assert!(program.contains("        char harness_arg0[] = \"a\\\"b\";\n"));
        assert!(program.contains("bool harness_result = isPalindrome(harness_arg0);"));
        assert!(program.contains("harness_format_bool(harness_actual[0], HARNESS_BUFFER, harness_result);"));
    }
}
