use serde_json::Value;

/// One function argument parsed from a line of test input
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Null,
    List(Vec<ArgValue>),
}

impl ArgValue {
    pub fn contains_float(&self) -> bool {
        match self {
            Self::Float(_) => true,
            Self::List(items) => items.iter().any(Self::contains_float),
            _ => false,
        }
    }

    /// The text a harness prints for this value: `[a,b]`, lowercase booleans, bare strings
    pub fn canonical(&self) -> String {
        match self {
            Self::Int(n) => n.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Str(s) => s.clone(),
            Self::Null => "null".to_string(),
            Self::List(items) => {
                let inner: Vec<String> = items.iter().map(Self::canonical).collect();
                format!("[{}]", inner.join(","))
            }
        }
    }

    fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::Str(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from_json).collect()),
            other @ Value::Object(_) => Self::Str(other.to_string()),
        }
    }
}

/// Static type of an argument or return value, declared or inferred
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeShape {
    Int,
    Long,
    Double,
    Bool,
    Str,
    Char,
    Array(Box<TypeShape>),
    /// A growable list such as Java's `List<T>`
    Collection(Box<TypeShape>),
    Void,
    Unknown,
}

impl TypeShape {
    pub fn infer(value: &ArgValue) -> Self {
        match value {
            ArgValue::Int(n) if i32::try_from(*n).is_ok() => Self::Int,
            ArgValue::Int(_) => Self::Long,
            ArgValue::Float(_) => Self::Double,
            ArgValue::Bool(_) => Self::Bool,
            ArgValue::Str(_) => Self::Str,
            ArgValue::Null => Self::Unknown,
            ArgValue::List(items) => Self::Array(Box::new(Self::infer_elements(items))),
        }
    }

    fn infer_elements(items: &[ArgValue]) -> Self {
        items
            .iter()
            .filter(|item| **item != ArgValue::Null)
            .map(Self::infer)
            .reduce(Self::unify)
            .unwrap_or(Self::Int)
    }

    fn unify(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (Self::Int, Self::Long) | (Self::Long, Self::Int) => Self::Long,
            (Self::Int | Self::Long | Self::Double, Self::Int | Self::Long | Self::Double) => {
                Self::Double
            }
            (Self::Array(a), Self::Array(b)) => Self::Array(Box::new(a.unify(*b))),
            (a, _) => a,
        }
    }

    /// Element type of an array or collection
    pub fn element(&self) -> Option<&TypeShape> {
        match self {
            Self::Array(inner) | Self::Collection(inner) => Some(inner),
            _ => None,
        }
    }
}

/// Parses test input into arguments, one non-blank line per argument
///
/// Bracketed lines are JSON arrays when they parse as such, otherwise comma-separated
/// tokens. Numeric-looking lines become numbers; JSON-quoted lines are unquoted.
pub fn parse_case_input(input: &str) -> Vec<ArgValue> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> ArgValue {
    if line.starts_with('[') && line.ends_with(']') {
        return match serde_json::from_str::<Value>(line) {
            Ok(array @ Value::Array(_)) => ArgValue::from_json(array),
            _ => split_list(&line[1..line.len() - 1]),
        };
    }
    if let Some(number) = parse_number(line) {
        return number;
    }
    if line.len() >= 2
        && line.starts_with('"')
        && line.ends_with('"')
        && let Ok(Value::String(s)) = serde_json::from_str(line)
    {
        return ArgValue::Str(s);
    }
    ArgValue::Str(line.to_string())
}

fn split_list(inner: &str) -> ArgValue {
    if inner.trim().is_empty() {
        return ArgValue::List(Vec::new());
    }
    ArgValue::List(
        inner
            .split(',')
            .map(str::trim)
            .map(|token| {
                parse_number(token).unwrap_or_else(|| ArgValue::Str(unquote(token).to_string()))
            })
            .collect(),
    )
}

fn unquote(token: &str) -> &str {
    for quote in ['"', '\''] {
        if token.len() >= 2 && token.starts_with(quote) && token.ends_with(quote) {
            return &token[1..token.len() - 1];
        }
    }
    token
}

fn parse_number(token: &str) -> Option<ArgValue> {
    let numeric = token.chars().any(|c| c.is_ascii_digit())
        && token
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'));
    if !numeric {
        return None;
    }
    token.parse::<i64>().map(ArgValue::Int).ok().or_else(|| {
        token
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(ArgValue::Float)
    })
}
