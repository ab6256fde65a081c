//! Build/run recipes for each supported language

mod bash;
mod cpp;
mod java;
mod node;
mod python;

pub use java::java_class_name;

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use which::which;

use crate::types::Language;

/// Executable a command starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Program {
    /// Host tool looked up on `PATH` when the step runs
    Tool(&'static str),
    /// Output of the recipe's build steps
    Artifact,
}

/// One argument of a command, possibly filled in per request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Literal(&'static str),
    /// Absolute path of the materialized source file
    Source,
    /// Source file name without its extension
    Stem,
    /// Absolute path of the build output
    Artifact,
    /// `prefix` + heap size in MiB + `suffix`, e.g. `-Xmx256m` for a 512 MiB cap
    MemoryFlag {
        prefix: &'static str,
        suffix: &'static str,
    },
}

/// How a command's memory cap is enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryEnforcement {
    /// `RLIMIT_AS` on the process
    AddressSpace,
    /// The runtime takes the cap as a flag; `RLIMIT_AS` would break its
    /// up-front virtual reservations
    RuntimeFlag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    pub program: Program,
    pub args: Vec<Arg>,
    pub memory: MemoryEnforcement,
}

impl CommandTemplate {
    pub fn tool(name: &'static str, args: Vec<Arg>) -> Self {
        Self {
            program: Program::Tool(name),
            args,
            memory: MemoryEnforcement::AddressSpace,
        }
    }

    pub fn artifact(args: Vec<Arg>) -> Self {
        Self {
            program: Program::Artifact,
            args,
            memory: MemoryEnforcement::AddressSpace,
        }
    }

    pub fn with_runtime_memory_flag(mut self) -> Self {
        self.memory = MemoryEnforcement::RuntimeFlag;
        self
    }

    /// Fill in the placeholders; never goes through a shell
    pub fn render_args(&self, paths: &SourcePaths, memory_mb: u64) -> Vec<OsString> {
        self.args
            .iter()
            .map(|arg| match arg {
                Arg::Literal(s) => OsString::from(s),
                Arg::Source => paths.source.clone().into_os_string(),
                Arg::Stem => OsString::from(&paths.stem),
                Arg::Artifact => paths.artifact.clone().into_os_string(),
                Arg::MemoryFlag { prefix, suffix } => {
                    OsString::from(format!("{}{}{}", prefix, heap_megabytes(memory_mb), suffix))
                }
            })
            .collect()
    }
}

/// Heap given to a managed runtime under a memory cap. The other half stays
/// under `RLIMIT_DATA` for buffers, thread stacks and the runtime itself.
fn heap_megabytes(memory_mb: u64) -> u64 {
    (memory_mb / 2).max(1)
}

/// How the source file is named inside the sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceNaming {
    Fixed(&'static str),
    /// Named after the public class so `javac` accepts it
    JavaPublicClass,
}

/// Per-request paths a template is rendered against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePaths {
    pub source: PathBuf,
    pub stem: String,
    pub artifact: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainRecipe {
    pub language: Language,
    pub source_extension: &'static str,
    pub source_naming: SourceNaming,
    pub build_steps: Vec<CommandTemplate>,
    pub run_step: CommandTemplate,
}

pub(crate) const ARTIFACT_NAME: &str = "program";

impl ToolchainRecipe {
    pub fn is_compiled(&self) -> bool {
        !self.build_steps.is_empty()
    }

    pub fn source_stem(&self, source: &str) -> String {
        match &self.source_naming {
            SourceNaming::Fixed(stem) => stem.to_string(),
            SourceNaming::JavaPublicClass => java_class_name(source),
        }
    }

    pub fn source_paths(&self, sandbox_dir: &Path, source: &str) -> SourcePaths {
        let stem = self.source_stem(source);
        SourcePaths {
            source: sandbox_dir.join(format!("{}.{}", stem, self.source_extension)),
            stem,
            artifact: sandbox_dir.join(ARTIFACT_NAME),
        }
    }

    /// Host tools every step of this recipe needs
    pub fn required_tools(&self) -> Vec<&'static str> {
        let mut tools = Vec::new();
        for step in self.build_steps.iter().chain(std::iter::once(&self.run_step)) {
            if let Program::Tool(name) = step.program {
                if !tools.contains(&name) {
                    tools.push(name);
                }
            }
        }
        tools
    }
}

/// Read-only table of recipes, one per supported language
#[derive(Debug, Clone)]
pub struct ToolchainRegistry {
    recipes: HashMap<Language, ToolchainRecipe>,
}

impl ToolchainRegistry {
    pub fn standard() -> Self {
        let recipes = [
            python::recipe(),
            cpp::recipe(),
            java::recipe(),
            bash::recipe(),
            node::recipe(),
        ]
        .into_iter()
        .map(|recipe| (recipe.language, recipe))
        .collect();

        Self { recipes }
    }

    pub fn lookup(&self, language: Language) -> Option<&ToolchainRecipe> {
        self.recipes.get(&language)
    }

    /// Languages with a recipe, in detection priority order
    pub fn languages(&self) -> Vec<Language> {
        Language::SUPPORTED
            .into_iter()
            .filter(|language| self.recipes.contains_key(language))
            .collect()
    }

    /// Tools a language needs that are not installed on this host
    pub fn missing_tools(&self, language: Language) -> Vec<&'static str> {
        self.lookup(language)
            .map(|recipe| {
                recipe
                    .required_tools()
                    .into_iter()
                    .filter(|tool| !check_command(tool))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for ToolchainRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

pub(crate) fn check_command(cmd: &str) -> bool {
    which(cmd).is_ok()
}

#[cfg(test)]
pub(crate) fn skip_if_not_available(tools: &[&str]) -> bool {
    let missing: Vec<_> = tools
        .iter()
        .filter(|tool| which(**tool).is_err())
        .map(|s| (*s).to_string())
        .collect();

    if !missing.is_empty() {
        eprintln!("Skipping test: {} not available", missing.join(", "));
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_supported_language_has_one_recipe() {
        let registry = ToolchainRegistry::standard();
        for language in Language::SUPPORTED {
            let recipe = registry.lookup(language).expect("recipe");
            assert_eq!(recipe.language, language);
        }
        assert!(registry.lookup(Language::Unknown).is_none());
        assert_eq!(registry.languages(), Language::SUPPORTED.to_vec());
    }

    #[test]
    fn test_only_compiled_languages_have_build_steps() {
        let registry = ToolchainRegistry::standard();
        let compiled: Vec<_> = registry
            .languages()
            .into_iter()
            .filter(|l| registry.lookup(*l).unwrap().is_compiled())
            .collect();
        assert_eq!(compiled, vec![Language::Java, Language::Cpp]);
    }

    #[test]
    fn test_render_args_fills_placeholders() {
        let template = CommandTemplate::tool(
            "tool",
            vec![
                Arg::Literal("-x"),
                Arg::Source,
                Arg::Stem,
                Arg::Artifact,
                Arg::MemoryFlag {
                    prefix: "-m",
                    suffix: "k",
                },
            ],
        );
        let paths = SourcePaths {
            source: PathBuf::from("/sb/main.src"),
            stem: "main".to_string(),
            artifact: PathBuf::from("/sb/program"),
        };

        let args = template.render_args(&paths, 64);
        assert_eq!(
            args,
            vec![
                OsString::from("-x"),
                OsString::from("/sb/main.src"),
                OsString::from("main"),
                OsString::from("/sb/program"),
                OsString::from("-m32k"),
            ]
        );
    }

    #[test]
    fn test_source_with_shell_metacharacters_stays_one_argument() {
        let recipe = ToolchainRegistry::standard()
            .lookup(Language::Java)
            .cloned()
            .unwrap();
        let paths = recipe.source_paths(Path::new("/sb"), "class A {} ; rm -rf / ;");
        assert_eq!(paths.stem, "A");
        assert_eq!(paths.source, PathBuf::from("/sb/A.java"));
    }

    #[test]
    fn test_missing_tools_for_unknown_is_empty() {
        let registry = ToolchainRegistry::standard();
        assert!(registry.missing_tools(Language::Unknown).is_empty());
    }
}
