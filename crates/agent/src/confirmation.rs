//! Confirmation gate: which tool calls need a human's approval, and how to
//! describe them.
//!
//! The gate is advisory. The loop announces gated calls with a
//! `tool_confirmation_needed` event and then executes them anyway.

use std::collections::BTreeSet;

use localforge_config::ToolsConfig;
use serde_json::Value;

/// Characters of file content shown in a write preview.
const PREVIEW_CHARS: usize = 200;

/// Static policy deciding which calls are gated.
#[derive(Debug, Clone, Default)]
pub struct ConfirmationPolicy {
    confirm_commands: bool,
    gated_tools: BTreeSet<String>,
}

impl ConfirmationPolicy {
    pub fn new<I, S>(confirm_commands: bool, gated_tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            confirm_commands,
            gated_tools: gated_tools.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(tools: &ToolsConfig) -> Self {
        Self::new(
            tools.terminal.require_confirmation,
            tools.filesystem.require_confirmation_for.iter().cloned(),
        )
    }

    /// Whether this call should be announced before it runs.
    pub fn requires_confirmation(&self, tool_name: &str, _input: &Value) -> bool {
        (tool_name == "execute_command" && self.confirm_commands)
            || self.gated_tools.contains(tool_name)
    }
}

/// Short human-readable description of a pending call.
pub fn confirmation_message(tool_name: &str, input: &Value) -> String {
    match tool_name {
        "execute_command" => {
            let mut msg = format!("Run command: `{}`", input["command"].as_str().unwrap_or(""));
            if let Some(dir) = input["working_dir"].as_str() {
                msg.push_str(&format!("\nWorking directory: {dir}"));
            }
            msg
        }
        "write_file" => {
            let path = input["path"].as_str().unwrap_or("");
            let mode = input["mode"].as_str().unwrap_or("overwrite");
            let content = input["content"].as_str().unwrap_or("");
            let mut preview: String = content.chars().take(PREVIEW_CHARS).collect();
            if content.chars().count() > PREVIEW_CHARS {
                preview.push_str("...");
            }
            format!("Write to file: {path} (mode: {mode})\nPreview: {preview}")
        }
        "delete_file" => format!(
            "Delete file: {}\nThis action cannot be undone.",
            input["path"].as_str().unwrap_or("")
        ),
        other => format!("Execute tool '{other}'"),
    }
}
