use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

static HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^TEST_RESULTS:\s*(\d+)/(\d+)$").expect("valid header regex"));
static CASE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Test (\d+): (PASS|FAIL)$").expect("valid case regex"));
static DETAIL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+(Input|Expected|Actual|Error):\s?(.*)$").expect("valid detail regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CaseReport {
    pub passed: bool,
    pub input: Option<String>,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub error: Option<String>,
}

/// Parsed `TEST_RESULTS:` block; cases are keyed by their 1-based number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessReport {
    pub passed: usize,
    pub total: usize,
    pub cases: BTreeMap<usize, CaseReport>,
}

impl HarnessReport {
    /// Report for the case at 0-based `index`
    pub fn case(&self, index: usize) -> Option<&CaseReport> {
        self.cases.get(&(index + 1))
    }
}

/// Reads the last trailer in `stdout`; anything the user printed before it is ignored
pub fn parse_trailer(stdout: &str) -> Option<HarnessReport> {
    let lines: Vec<&str> = stdout.lines().map(str::trim_end).collect();
    let start = lines.iter().rposition(|line| HEADER.is_match(line))?;
    let header = HEADER.captures(lines[start])?;

    let mut report = HarnessReport {
        passed: header[1].parse().ok()?,
        total: header[2].parse().ok()?,
        cases: BTreeMap::new(),
    };

    let mut current = None;
    for line in &lines[start + 1..] {
        if let Some(caps) = CASE_LINE.captures(line) {
            let Ok(number) = caps[1].parse::<usize>() else {
                current = None;
                continue;
            };
            report.cases.insert(
                number,
                CaseReport {
                    passed: &caps[2] == "PASS",
                    ..Default::default()
                },
            );
            current = Some(number);
            continue;
        }

        let Some(caps) = DETAIL_LINE.captures(line) else {
            continue;
        };
        let Some(case) = current.and_then(|number| report.cases.get_mut(&number)) else {
            continue;
        };
        let value = Some(caps[2].to_string());
        match &caps[1] {
            "Input" => case.input = value,
            "Expected" => case.expected = value,
            "Actual" => case.actual = value,
            _ => case.error = value,
        }
    }

    Some(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_mixed_results() {
        let stdout = "debug print\nTEST_RESULTS: 1/3\nTest 1: PASS\nTest 2: FAIL\n  Input: [1,2]\\n3\n  Expected: [0,1]\n  Actual: [1,0]\nTest 3: FAIL\n  Input: []\\n0\n  Expected: []\n  Error: IndexError: list index out of range\n";
        let report = parse_trailer(stdout).unwrap();
        assert_eq!(report.passed, 1);
        assert_eq!(report.total, 3);
        assert!(report.case(0).unwrap().passed);

        let second = report.case(1).unwrap();
        assert!(!second.passed);
        assert_eq!(second.input.as_deref(), Some("[1,2]\\n3"));
        assert_eq!(second.actual.as_deref(), Some("[1,0]"));
        assert_eq!(second.error, None);

        let third = report.case(2).unwrap();
        assert_eq!(
            third.error.as_deref(),
            Some("IndexError: list index out of range")
        );
        assert_eq!(report.case(3), None);
    }

    #[test]
    fn test_last_trailer_wins() {
        let stdout = "TEST_RESULTS: 0/1\nTest 1: FAIL\nTEST_RESULTS: 1/1\nTest 1: PASS\n";
        let report = parse_trailer(stdout).unwrap();
        assert_eq!(report.passed, 1);
        assert!(report.case(0).unwrap().passed);
    }

    #[test]
    fn test_missing_trailer() {
        assert_eq!(parse_trailer("just output\n"), None);
        assert_eq!(parse_trailer(""), None);
    }

    #[test]
    fn test_empty_actual_value() {
        let report = parse_trailer("TEST_RESULTS: 0/1\r\nTest 1: FAIL\r\n  Actual: \r\n").unwrap();
        assert_eq!(report.case(0).unwrap().actual.as_deref(), Some(""));
    }
}
