use super::{Arg, CommandTemplate, SourceNaming, ToolchainRecipe};
use crate::types::Language;

pub(super) fn recipe() -> ToolchainRecipe {
    ToolchainRecipe {
        language: Language::Bash,
        source_extension: "sh",
        source_naming: SourceNaming::Fixed("main"),
        build_steps: Vec::new(),
        run_step: CommandTemplate::tool("bash", vec![Arg::Source]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_recipe_shape() {
        let recipe = recipe();
        assert!(!recipe.is_compiled());
        let paths = recipe.source_paths(Path::new("/sb"), "echo hi");
        assert_eq!(paths.source, Path::new("/sb/main.sh"));
        assert_eq!(
            recipe.run_step.render_args(&paths, 512),
            vec![std::ffi::OsString::from("/sb/main.sh")]
        );
    }
}
