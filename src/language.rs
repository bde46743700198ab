use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::MilliSecond;
use crate::error::JudgeError;
use crate::harness::HarnessDialect;

/// Name substituted for `%OUTPUT%` in compile and run commands
pub const ARTIFACT_NAME: &str = "main";

/// How to turn source text into a running program for one language
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct LanguageSpec {
    pub id: String,
    pub display_name: String,
    pub file_extension: String,
    pub source_file_name: String,
    #[serde(default)]
    pub compile_command: Option<Vec<String>>,
    pub run_command: Vec<String>,
    #[serde(default = "default_compile_timeout")]
    pub compile_timeout: MilliSecond,
    #[serde(default = "default_run_timeout")]
    pub run_timeout: MilliSecond,
    #[serde(default)]
    pub isolation_profile: IsolationProfile,
    /// Shown when the toolchain binary cannot be found
    #[serde(default)]
    pub remediation: String,
    #[serde(default)]
    pub harness: Option<HarnessDialect>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct IsolationProfile {
    /// Container image used by the container backend
    pub image: String,
    pub max_processes: u32,
    /// Whether the memory limit is also enforced as an address-space rlimit.
    /// Runtimes that reserve large virtual regions up front (JVM, V8) turn this off.
    pub limit_address_space: bool,
}

impl Default for IsolationProfile {
    fn default() -> Self {
        Self {
            image: "debian:stable-slim".to_string(),
            max_processes: 64,
            limit_address_space: true,
        }
    }
}

fn default_compile_timeout() -> MilliSecond {
    MilliSecond(30_000)
}

fn default_run_timeout() -> MilliSecond {
    MilliSecond(10_000)
}

impl LanguageSpec {
    pub fn is_compiled(&self) -> bool {
        self.compile_command.is_some()
    }

    /// Whether a successful compile must leave `ARTIFACT_NAME` behind
    pub fn produces_artifact(&self) -> bool {
        self.compile_command
            .as_ref()
            .is_some_and(|cmd| cmd.iter().any(|arg| arg.contains("%OUTPUT%")))
    }

    pub fn compile_argv(&self) -> Option<Vec<String>> {
        self.compile_command
            .as_ref()
            .map(|cmd| apply_template(cmd, &self.source_file_name))
    }

    pub fn run_argv(&self) -> Vec<String> {
        apply_template(&self.run_command, &self.source_file_name)
    }

    /// Host binaries this language needs, used by the toolchain health check
    pub fn toolchain_binaries(&self) -> Vec<String> {
        self.compile_command
            .iter()
            .chain(std::iter::once(&self.run_command))
            .filter_map(|cmd| cmd.first())
            .filter(|program| !program.contains("%OUTPUT%") && !program.starts_with("./"))
            .cloned()
            .collect()
    }
}

/// Substitutes `%INPUT%` with the source file and `%OUTPUT%` with the artifact name
pub fn apply_template(command: &[String], source_file: &str) -> Vec<String> {
    command
        .iter()
        .map(|arg| {
            arg.replace("%INPUT%", source_file)
                .replace("%OUTPUT%", ARTIFACT_NAME)
        })
        .collect()
}

/// The set of languages the engine accepts, immutable after startup
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    languages: Vec<Arc<LanguageSpec>>,
}

impl LanguageRegistry {
    pub fn builtin() -> Self {
        Self::from_specs(builtin_languages())
    }

    pub fn from_specs(specs: Vec<LanguageSpec>) -> Self {
        Self {
            languages: specs.into_iter().map(Arc::new).collect(),
        }
    }

    /// Built-in languages with configured entries replacing those that share an id
    pub fn with_overrides(overrides: Vec<LanguageSpec>) -> Self {
        let mut specs = builtin_languages();
        for spec in overrides {
            match specs
                .iter_mut()
                .find(|existing| existing.id.eq_ignore_ascii_case(&spec.id))
            {
                Some(existing) => {
                    log::info!("Overriding built-in language {}", existing.id);
                    *existing = spec;
                }
                None => specs.push(spec),
            }
        }
        Self::from_specs(specs)
    }

    /// Case-insensitive lookup by id
    pub fn resolve(&self, id: &str) -> Result<Arc<LanguageSpec>, JudgeError> {
        self.languages
            .iter()
            .find(|spec| spec.id.eq_ignore_ascii_case(id.trim()))
            .cloned()
            .ok_or_else(|| JudgeError::UnsupportedLanguage(id.to_string()))
    }

    pub fn list(&self) -> impl Iterator<Item = &LanguageSpec> {
        self.languages.iter().map(|spec| spec.as_ref())
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.languages.iter().map(|spec| spec.id.as_str())
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

fn builtin_languages() -> Vec<LanguageSpec> {
    vec![
        LanguageSpec {
            id: "python".to_string(),
            display_name: "Python".to_string(),
            file_extension: ".py".to_string(),
            source_file_name: "main.py".to_string(),
            compile_command: None,
            run_command: argv(&["python3", "%INPUT%"]),
            compile_timeout: default_compile_timeout(),
            run_timeout: MilliSecond(10_000),
            isolation_profile: IsolationProfile {
                image: "python:3.11-alpine".to_string(),
                ..Default::default()
            },
            remediation: "Python 3 is not installed or `python3` is not on PATH. \
                Install Python 3 from your package manager or https://www.python.org/downloads/"
                .to_string(),
            harness: Some(HarnessDialect::Python),
        },
        LanguageSpec {
            id: "javascript".to_string(),
            display_name: "JavaScript (Node.js)".to_string(),
            file_extension: ".js".to_string(),
            source_file_name: "main.js".to_string(),
            compile_command: None,
            run_command: argv(&["node", "%INPUT%"]),
            compile_timeout: default_compile_timeout(),
            run_timeout: MilliSecond(10_000),
            isolation_profile: IsolationProfile {
                image: "node:18-alpine".to_string(),
                limit_address_space: false,
                ..Default::default()
            },
            remediation: "Node.js is not installed or `node` is not on PATH. \
                Install Node.js from https://nodejs.org/"
                .to_string(),
            harness: Some(HarnessDialect::JavaScript),
        },
        LanguageSpec {
            id: "java".to_string(),
            display_name: "Java".to_string(),
            file_extension: ".java".to_string(),
            source_file_name: "Main.java".to_string(),
            compile_command: Some(argv(&["javac", "-encoding", "UTF-8", "%INPUT%"])),
            run_command: argv(&["java", "-cp", ".", "-Xss64m", "Main"]),
            compile_timeout: default_compile_timeout(),
            run_timeout: MilliSecond(15_000),
            isolation_profile: IsolationProfile {
                image: "eclipse-temurin:17-jdk-alpine".to_string(),
                max_processes: 128,
                limit_address_space: false,
            },
            remediation: "A Java JDK is not installed or `javac`/`java` are not on PATH. \
                Install OpenJDK 17 or newer"
                .to_string(),
            harness: Some(HarnessDialect::Java),
        },
        LanguageSpec {
            id: "cpp".to_string(),
            display_name: "C++".to_string(),
            file_extension: ".cpp".to_string(),
            source_file_name: "main.cpp".to_string(),
            compile_command: Some(argv(&[
                "g++", "-O2", "-std=c++17", "-o", "%OUTPUT%", "%INPUT%",
            ])),
            run_command: argv(&["./%OUTPUT%"]),
            compile_timeout: default_compile_timeout(),
            run_timeout: MilliSecond(15_000),
            isolation_profile: IsolationProfile {
                image: "gcc:13".to_string(),
                ..Default::default()
            },
            remediation: "The GNU C++ compiler is not installed or `g++` is not on PATH. \
                Install it with `apt install g++` or your platform's build tools"
                .to_string(),
            harness: Some(HarnessDialect::Cpp),
        },
        LanguageSpec {
            id: "c".to_string(),
            display_name: "C".to_string(),
            file_extension: ".c".to_string(),
            source_file_name: "main.c".to_string(),
            compile_command: Some(argv(&[
                "gcc", "-O2", "-std=gnu11", "-o", "%OUTPUT%", "%INPUT%", "-lm",
            ])),
            run_command: argv(&["./%OUTPUT%"]),
            compile_timeout: default_compile_timeout(),
            run_timeout: MilliSecond(15_000),
            isolation_profile: IsolationProfile {
                image: "gcc:13".to_string(),
                ..Default::default()
            },
            remediation: "The GNU C compiler is not installed or `gcc` is not on PATH. \
                Install it with `apt install gcc` or your platform's build tools"
                .to_string(),
            harness: Some(HarnessDialect::C),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resolve_is_case_insensitive() {
        let registry = LanguageRegistry::builtin();
        assert_eq!(registry.resolve("Python").unwrap().id, "python");
        assert_eq!(registry.resolve("CPP").unwrap().id, "cpp");
    }

    #[test]
    fn test_resolve_unknown_language() {
        let registry = LanguageRegistry::builtin();
        assert_eq!(
            registry.resolve("cobol").unwrap_err(),
            JudgeError::UnsupportedLanguage("cobol".to_string())
        );
    }

    #[test]
    fn test_template_substitution() {
        let registry = LanguageRegistry::builtin();
        let cpp = registry.resolve("cpp").unwrap();
        assert_eq!(
            cpp.compile_argv().unwrap(),
            vec!["g++", "-O2", "-std=c++17", "-o", "main", "main.cpp"]
        );
        assert_eq!(cpp.run_argv(), vec!["./main"]);
        assert!(cpp.produces_artifact());

        let java = registry.resolve("java").unwrap();
        assert!(java.is_compiled());
        assert!(!java.produces_artifact());
    }

    #[test]
    fn test_overrides_replace_and_extend() {
        let mut python = LanguageRegistry::builtin()
            .resolve("python")
            .unwrap()
            .as_ref()
            .clone();
        python.run_command = argv(&["pypy3", "%INPUT%"]);
        let mut shell = python.clone();
        shell.id = "shell".to_string();
        shell.run_command = argv(&["/bin/sh", "%INPUT%"]);

        let registry = LanguageRegistry::with_overrides(vec![python, shell]);
        assert_eq!(registry.resolve("python").unwrap().run_argv(), vec!["pypy3", "main.py"]);
        assert!(registry.resolve("shell").is_ok());
        assert_eq!(registry.ids().count(), 6);
    }

    #[test]
    fn test_toolchain_binaries() {
        let registry = LanguageRegistry::builtin();
        assert_eq!(registry.resolve("c").unwrap().toolchain_binaries(), vec!["gcc"]);
        assert_eq!(
            registry.resolve("java").unwrap().toolchain_binaries(),
            vec!["javac", "java"]
        );
    }
}
