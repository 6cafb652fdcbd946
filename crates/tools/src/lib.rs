//! Built-in tool implementations for LocalForge.
//!
//! Tools give the agent the ability to act on the local machine:
//! read, write, list, search and delete files, run shell commands,
//! and search the web.

pub mod filesystem;
pub mod terminal;
pub mod web_search;

use std::sync::Arc;

use localforge_config::AppConfig;
use localforge_core::tool::ToolRegistry;
use tracing::debug;

pub use filesystem::{
    DeleteFileTool, ListDirectoryTool, ReadFileTool, Sandbox, SearchFilesTool, WriteFileTool,
    filesystem_tools,
};
pub use terminal::ExecuteCommandTool;
pub use web_search::WebSearchTool;

/// Build the registry of enabled tool groups from configuration.
pub fn build_registry(config: &AppConfig) -> ToolRegistry {
    let tools = &config.tools;
    let mut registry = ToolRegistry::new();

    if tools.filesystem.enabled {
        for tool in filesystem_tools(Sandbox::from_config(&tools.filesystem)) {
            registry.register(tool);
        }
    }
    if tools.terminal.enabled {
        registry.register(Arc::new(ExecuteCommandTool::from_config(&tools.terminal)));
    }
    if tools.web_search.enabled {
        registry.register(Arc::new(WebSearchTool::from_config(&tools.web_search)));
    }

    debug!(tools = ?registry.names(), "Built tool registry");
    registry
}
