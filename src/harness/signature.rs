//! Recovers parameter and return types from function definitions in C-family source.

use std::sync::LazyLock;

use regex::Regex;

use super::Parameter;

const MODIFIERS: &[&str] = &[
    "public",
    "private",
    "protected",
    "static",
    "final",
    "inline",
    "virtual",
    "synchronized",
    "extern",
    "constexpr",
    "abstract",
];

static PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*?)\s*\b([A-Za-z_]\w*)\s*(\[\s*\])?$").expect("valid parameter regex")
});

static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/|//[^\n]*").expect("valid comment regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExtractedSignature {
    pub return_type: String,
    pub params: Vec<Parameter>,
}

/// Finds the definition of `name` in Java, C++ or C source
///
/// Only definitions are matched: the parameter list must be followed by a body.
pub(crate) fn extract(code: &str, name: &str) -> Option<ExtractedSignature> {
    // A declaration starts a line or follows `{`, `;`, `}` or an access label,
    // optionally behind annotations, and may break lines anywhere before the body
    let pattern = format!(
        r"(?m)(?:^|[{{;}}:])\s*(?:@[\w.]+(?:\([^)]*\))?\s+)*([A-Za-z_][\w<>\[\],:\s*&]*?)\s*\b{}\s*\(([^)]*)\)[^;{{()]*\{{",
        regex::escape(name)
    );
    let definition = Regex::new(&pattern).ok()?;
    let code = COMMENT.replace_all(code, " ");

    definition.captures_iter(&code).find_map(|caps| {
        let return_type = clean_type(&caps[1]);
        if return_type.is_empty() || return_type == "return" || return_type == "new" {
            return None;
        }
        Some(ExtractedSignature {
            return_type,
            params: split_params(&caps[2]),
        })
    })
}

fn clean_type(raw: &str) -> String {
    let words: Vec<&str> = raw
        .split_whitespace()
        .filter(|word| !MODIFIERS.contains(&word.trim_end_matches(':')))
        .collect();
    normalize_pointers(&words.join(" "))
}

/// `int *` and `int*` are the same type
fn normalize_pointers(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.trim().chars() {
        if matches!(ch, '*' | '&') {
            while out.ends_with(' ') {
                out.pop();
            }
        }
        out.push(ch);
    }
    out
}

fn split_params(list: &str) -> Vec<Parameter> {
    let list = list.trim();
    if list.is_empty() || list == "void" {
        return Vec::new();
    }

    let mut params = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, ch) in list.char_indices() {
        match ch {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                params.extend(parse_param(&list[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    params.extend(parse_param(&list[start..]));
    params
}

fn parse_param(raw: &str) -> Option<Parameter> {
    let without_default = raw.split('=').next().unwrap_or(raw).trim();
    let caps = PARAM.captures(without_default)?;
    let mut type_name = clean_type(&caps[1]);
    if caps.get(3).is_some() {
        type_name.push('*');
    }
    type_name = type_name
        .split_whitespace()
        .filter(|word| *word != "const")
        .collect::<Vec<_>>()
        .join(" ");
    Some(Parameter {
        name: caps[2].to_string(),
        type_name: (!type_name.is_empty()).then_some(normalize_pointers(&type_name)),
    })
}
