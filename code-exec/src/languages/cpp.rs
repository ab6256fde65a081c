use super::{Arg, CommandTemplate, SourceNaming, ToolchainRecipe};
use crate::types::Language;

pub(super) fn recipe() -> ToolchainRecipe {
    ToolchainRecipe {
        language: Language::Cpp,
        source_extension: "cpp",
        source_naming: SourceNaming::Fixed("main"),
        build_steps: vec![CommandTemplate::tool(
            "g++",
            vec![
                Arg::Literal("-std=c++17"),
                Arg::Literal("-O2"),
                Arg::Literal("-o"),
                Arg::Artifact,
                Arg::Source,
            ],
        )],
        run_step: CommandTemplate::artifact(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::{skip_if_not_available, Program};
    use crate::sandbox::{Isolation, Sandbox, StepLimits, Termination};
    use std::path::PathBuf;

    #[test]
    fn test_recipe_shape() {
        let recipe = recipe();
        assert!(recipe.is_compiled());
        assert_eq!(recipe.run_step.program, Program::Artifact);
        assert_eq!(recipe.required_tools(), vec!["g++"]);

        let paths = recipe.source_paths(&PathBuf::from("/sb"), "int main() {}");
        assert_eq!(paths.source, PathBuf::from("/sb/main.cpp"));
        assert_eq!(paths.artifact, PathBuf::from("/sb/program"));
    }

    #[tokio::test]
    async fn test_cpp_compilation() {
        if skip_if_not_available(&["g++"]) {
            return;
        }

        let root = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(root.path(), Isolation::None).unwrap();
        let recipe = recipe();
        let source = r#"
            #include <iostream>
            int main() {
                std::cout << "Hello, World!" << std::endl;
                return 0;
            }
        "#;
        let paths = recipe.source_paths(sandbox.root(), source);
        sandbox.write_source(&paths.source, source).await.unwrap();

        let build = &recipe.build_steps[0];
        let compiler = which::which("g++").unwrap();
        let output = sandbox
            .run_step(
                &compiler,
                &build.render_args(&paths, 2048),
                &StepLimits::for_build(&Default::default(), build.memory),
            )
            .await
            .unwrap();

        assert!(matches!(output.termination, Termination::Exited(s) if s.success()));
        assert!(paths.artifact.exists());
    }
}
