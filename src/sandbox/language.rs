use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[serde(alias = "GO")]
    Go,
    #[serde(alias = "py", alias = "PY", alias = "PYTHON")]
    Python,
    #[serde(alias = "js", alias = "JS", alias = "JAVASCRIPT")]
    JavaScript,
    #[serde(alias = "rs", alias = "RUST")]
    Rust,
    #[serde(alias = "C")]
    C,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Go => "go",
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Rust => "rust",
            Language::C => "c",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "go" | "golang" => Ok(Self::Go),
            "py" | "python" | "python3" => Ok(Self::Python),
            "js" | "javascript" | "node" => Ok(Self::JavaScript),
            "rs" | "rust" => Ok(Self::Rust),
            "c" => Ok(Self::C),
            other => Err(EngineError::UnsupportedLanguage(other.to_string())),
        }
    }
}

/// How a language turns a source file into something runnable.
#[derive(Debug, Clone)]
pub struct LanguageSpec {
    pub source_name: &'static str,
    pub compile: Option<CompileStep>,
    pub interpreter: Option<&'static str>,
}

#[derive(Debug, Clone)]
pub struct CompileStep {
    pub program: &'static str,
    /// Arguments run from inside the workspace; `{src}` and `{bin}` are substituted.
    pub args: &'static [&'static str],
    pub binary_name: &'static str,
}

impl CompileStep {
    pub fn render_args(&self, source_name: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| match *arg {
                "{src}" => source_name.to_string(),
                "{bin}" => self.binary_name.to_string(),
                other => other.to_string(),
            })
            .collect()
    }
}

impl LanguageSpec {
    pub fn for_language(language: Language) -> Self {
        match language {
            Language::Go => Self {
                source_name: "main.go",
                compile: Some(CompileStep {
                    program: "go",
                    args: &["build", "-o", "{bin}", "{src}"],
                    binary_name: "main_bin",
                }),
                interpreter: None,
            },
            Language::Python => Self {
                source_name: "main.py",
                compile: None,
                interpreter: Some("python3"),
            },
            Language::JavaScript => Self {
                source_name: "main.js",
                compile: None,
                interpreter: Some("node"),
            },
            Language::Rust => Self {
                source_name: "main.rs",
                compile: Some(CompileStep {
                    program: "rustc",
                    args: &["-O", "-o", "{bin}", "{src}"],
                    binary_name: "main_bin",
                }),
                interpreter: None,
            },
            Language::C => Self {
                source_name: "main.c",
                compile: Some(CompileStep {
                    program: "gcc",
                    args: &["-O2", "-o", "{bin}", "{src}"],
                    binary_name: "main_bin",
                }),
                interpreter: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Language, LanguageSpec};
    use crate::error::EngineError;

    #[test]
    fn parses_room_and_judge_spellings() {
        assert_eq!("GO".parse::<Language>().ok(), Some(Language::Go));
        assert_eq!("py".parse::<Language>().ok(), Some(Language::Python));
        assert_eq!(" JavaScript ".parse::<Language>().ok(), Some(Language::JavaScript));
        assert!(matches!(
            "cobol".parse::<Language>(),
            Err(EngineError::UnsupportedLanguage(name)) if name == "cobol"
        ));
    }

    #[test]
    fn deserializes_aliases() {
        let lang: Language = serde_json::from_str("\"PY\"").unwrap();
        assert_eq!(lang, Language::Python);
        assert_eq!(serde_json::to_string(&Language::Go).unwrap(), "\"go\"");
    }

    #[test]
    fn compile_args_substitute_paths() {
        let spec = LanguageSpec::for_language(Language::Go);
        let step = spec.compile.unwrap();
        assert_eq!(
            step.render_args(spec.source_name),
            vec!["build", "-o", "main_bin", "main.go"]
        );
        assert!(LanguageSpec::for_language(Language::Python).compile.is_none());
        assert!(LanguageSpec::for_language(Language::C).compile.is_some());
    }
}
