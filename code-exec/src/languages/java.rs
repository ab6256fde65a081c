use regex::Regex;
use std::sync::LazyLock;

use super::{Arg, CommandTemplate, SourceNaming, ToolchainRecipe};
use crate::types::Language;

const DEFAULT_CLASS: &str = "Main";

static PUBLIC_CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bpublic\s+(?:(?:final|abstract|strictfp)\s+)*class\s+([A-Za-z_$][A-Za-z0-9_$]*)")
        .expect("valid public class regex")
});

static CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bclass\s+([A-Za-z_$][A-Za-z0-9_$]*)").expect("valid class regex")
});

static MAIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bstatic\s+void\s+main\b").expect("valid main regex"));

/// Class name the source must be saved and launched under.
///
/// `javac` insists a public class lives in a file of the same name, so that
/// wins. Without one, the last class declared before `static void main` is
/// used, then the first declared class, then `Main`.
pub fn java_class_name(source: &str) -> String {
    if let Some(caps) = PUBLIC_CLASS_RE.captures(source) {
        return caps[1].to_string();
    }

    if let Some(main) = MAIN_RE.find(source) {
        if let Some(caps) = CLASS_RE.captures_iter(&source[..main.start()]).last() {
            return caps[1].to_string();
        }
    }

    CLASS_RE
        .captures(source)
        .map(|caps| caps[1].to_string())
        .unwrap_or_else(|| DEFAULT_CLASS.to_string())
}

pub(super) fn recipe() -> ToolchainRecipe {
    ToolchainRecipe {
        language: Language::Java,
        source_extension: "java",
        source_naming: SourceNaming::JavaPublicClass,
        build_steps: vec![CommandTemplate::tool(
            "javac",
            vec![
                Arg::MemoryFlag {
                    prefix: "-J-Xmx",
                    suffix: "m",
                },
                Arg::Literal("-d"),
                Arg::Literal("."),
                Arg::Source,
            ],
        )
        .with_runtime_memory_flag()],
        run_step: CommandTemplate::tool(
            "java",
            vec![
                Arg::MemoryFlag {
                    prefix: "-Xmx",
                    suffix: "m",
                },
                Arg::Literal("-cp"),
                Arg::Literal("."),
                Arg::Stem,
            ],
        )
        .with_runtime_memory_flag(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::{MemoryEnforcement, Program};

    #[test]
    fn test_public_class_wins() {
        let source = r#"
            class Helper {}
            public final class Greeter {
                public static void main(String[] args) {}
            }
        "#;
        assert_eq!(java_class_name(source), "Greeter");
    }

    #[test]
    fn test_class_enclosing_main() {
        let source = r#"
            class Helper { int x; }
            class App {
                static void main(String[] args) {}
            }
        "#;
        assert_eq!(java_class_name(source), "App");
    }

    #[test]
    fn test_classes_after_main_are_ignored() {
        let source = r#"
            class First {}
            class Runner { static void main(String[] a) {} }
            class Later {}
        "#;
        assert_eq!(java_class_name(source), "Runner");
    }

    #[test]
    fn test_fallbacks() {
        assert_eq!(java_class_name("class Only {}"), "Only");
        assert_eq!(java_class_name("interface Nothing {}"), "Main");
    }

    #[test]
    fn test_recipe_shape() {
        let recipe = recipe();
        assert_eq!(recipe.source_extension, "java");
        assert_eq!(recipe.build_steps.len(), 1);
        assert_eq!(recipe.build_steps[0].program, Program::Tool("javac"));
        assert_eq!(recipe.run_step.program, Program::Tool("java"));
        assert_eq!(recipe.run_step.memory, MemoryEnforcement::RuntimeFlag);
        assert_eq!(recipe.required_tools(), vec!["javac", "java"]);
        assert_eq!(recipe.source_stem("public class Foo {}"), "Foo");
    }
}
