use super::{Arg, CommandTemplate, SourceNaming, ToolchainRecipe};
use crate::types::Language;

pub(super) fn recipe() -> ToolchainRecipe {
    ToolchainRecipe {
        language: Language::Python,
        source_extension: "py",
        source_naming: SourceNaming::Fixed("main"),
        build_steps: Vec::new(),
        run_step: CommandTemplate::tool("python3", vec![Arg::Source]),
    }
}
