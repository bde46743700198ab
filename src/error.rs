use thiserror::Error;

/// Caller-facing failures detected before anything is executed
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JudgeError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Language {0} does not support function submissions")]
    NoHarness(String),

    #[error("No function named `{name}` found in the submitted {language} code")]
    Extraction { name: String, language: String },

    #[error("At least one test case is required")]
    NoTestCases,
}
