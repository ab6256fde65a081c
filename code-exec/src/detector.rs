//! Source language detection
//!
//! The bundled detector is a heuristic classifier, not a parser: it looks for
//! a handful of tell-tale substrings and resolves overlaps with a fixed
//! priority order. Anything stronger can be plugged in through
//! [`LanguageDetector`].

use regex::Regex;
use std::sync::LazyLock;

use crate::types::Language;

/// Maps source text to a language tag
pub trait LanguageDetector: Send + Sync {
    /// Must be total: anything unrecognized is [`Language::Unknown`]
    fn detect(&self, source: &str) -> Language;
}

static PYTHON_PRINT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*print\(").expect("valid print regex"));

static SHELL_SHEBANG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^#!\s*/(?:usr/)?bin/(?:env\s+)?(?:ba|da|k|z)?sh\b")
        .expect("valid shebang regex")
});

/// First match wins: Java, C++, Node, Python, Bash
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicDetector;

impl HeuristicDetector {
    pub fn new() -> Self {
        Self
    }

    fn is_java(source: &str) -> bool {
        source.contains("import java") || source.contains("public static void main")
    }

    fn is_cpp(source: &str) -> bool {
        source.contains("#include") && source.contains("int main")
    }

    fn is_node(source: &str) -> bool {
        source.contains("console.log") || source.contains("function(")
    }

    fn is_python(source: &str) -> bool {
        source.contains("def ") || source.contains("import ") || PYTHON_PRINT_RE.is_match(source)
    }

    fn is_bash(source: &str) -> bool {
        source.trim().starts_with("echo") || SHELL_SHEBANG_RE.is_match(source)
    }
}

impl LanguageDetector for HeuristicDetector {
    fn detect(&self, source: &str) -> Language {
        if Self::is_java(source) {
            Language::Java
        } else if Self::is_cpp(source) {
            Language::Cpp
        } else if Self::is_node(source) {
            Language::Node
        } else if Self::is_python(source) {
            Language::Python
        } else if Self::is_bash(source) {
            Language::Bash
        } else {
            Language::Unknown
        }
    }
}
