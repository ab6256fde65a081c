use super::{Arg, CommandTemplate, SourceNaming, ToolchainRecipe};
use crate::types::Language;

pub(super) fn recipe() -> ToolchainRecipe {
    ToolchainRecipe {
        language: Language::Node,
        source_extension: "js",
        source_naming: SourceNaming::Fixed("main"),
        build_steps: Vec::new(),
        run_step: CommandTemplate::tool(
            "node",
            vec![
                Arg::MemoryFlag {
                    prefix: "--max-old-space-size=",
                    suffix: "",
                },
                Arg::Source,
            ],
        )
        .with_runtime_memory_flag(),
    }
}
