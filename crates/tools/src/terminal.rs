//! Terminal tool: run a shell command with a timeout and blocked patterns.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use localforge_config::TerminalToolConfig;
use localforge_core::error::ToolError;
use localforge_core::tool::Tool;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, warn};

pub struct ExecuteCommandTool {
    blocked_patterns: Vec<String>,
    default_timeout_secs: u64,
}

impl ExecuteCommandTool {
    pub fn new(blocked_patterns: Vec<String>, default_timeout_secs: u64) -> Self {
        Self {
            blocked_patterns,
            default_timeout_secs,
        }
    }

    pub fn from_config(config: &TerminalToolConfig) -> Self {
        Self::new(config.blocked_patterns.clone(), config.timeout_seconds)
    }
}

fn shell(command: &str) -> Command {
    if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}

/// `Exit code: N` followed by stdout and a `[stderr]` section.
fn format_output(exit_code: i32, stdout: &[u8], stderr: &[u8]) -> String {
    let mut parts = Vec::new();
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);
    if !stdout.trim().is_empty() {
        parts.push(stdout.trim_end().to_string());
    }
    if !stderr.trim().is_empty() {
        parts.push(format!("[stderr]\n{}", stderr.trim_end()));
    }
    let body = if parts.is_empty() {
        "(no output)".to_string()
    } else {
        parts.join("\n")
    };
    format!("Exit code: {exit_code}\n{body}")
}

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its exit code, stdout and stderr. \
         Use for running scripts, build tools, git commands, etc."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Working directory for the command (default: home directory)"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default: from config)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let command = input["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'command' argument".into()))?;

        if let Err(blocked) = localforge_security::check_command(command, &self.blocked_patterns) {
            warn!(command = %command, pattern = %blocked.pattern, "Blocked command");
            return Err(ToolError::denied(self.name(), blocked));
        }

        let working_dir = localforge_security::expand_tilde(input["working_dir"].as_str().unwrap_or("~"));
        if !std::path::Path::new(&working_dir).is_dir() {
            return Err(ToolError::execution(
                self.name(),
                format!("working directory not found: {working_dir}"),
            ));
        }

        let timeout_secs = input["timeout"]
            .as_u64()
            .filter(|t| *t > 0)
            .unwrap_or(self.default_timeout_secs);

        debug!(command = %command, working_dir = %working_dir, timeout_secs, "Executing command");

        let child = shell(command)
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::execution(self.name(), e))?;

        let output = tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
            .await
            .map_err(|_| ToolError::Timeout {
                tool_name: self.name().to_string(),
                timeout_secs,
            })?
            .map_err(|e| ToolError::execution(self.name(), e))?;

        let code = output.status.code().unwrap_or(-1);
        if code != 0 {
            debug!(command = %command, exit_code = code, "Command exited with failure");
        }
        Ok(format_output(code, &output.stdout, &output.stderr))
    }
}
