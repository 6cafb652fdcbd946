//! Filesystem tools: read, write, list, search and delete files.
//!
//! Every path goes through the sandbox in `localforge-security` before any
//! I/O happens, so the model can only touch the configured roots.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use localforge_config::FilesystemToolConfig;
use localforge_core::error::ToolError;
use localforge_core::tool::Tool;
use regex::RegexBuilder;
use serde_json::Value;
use tracing::debug;
use walkdir::WalkDir;

/// Hard cap on entries returned by `search_files`.
pub const MAX_SEARCH_RESULTS: usize = 100;

/// Directories content search never descends into.
const SKIPPED_DIRS: &[&str] = &[".git", "node_modules", "target", "__pycache__", ".venv"];

/// Allowed roots and size limit shared by every filesystem tool.
#[derive(Debug, Clone)]
pub struct Sandbox {
    allowed_paths: Vec<String>,
    max_file_bytes: u64,
}

impl Sandbox {
    pub fn new(allowed_paths: Vec<String>, max_file_size_mb: u64) -> Self {
        Self {
            allowed_paths,
            max_file_bytes: max_file_size_mb.saturating_mul(1024 * 1024),
        }
    }

    pub fn from_config(config: &FilesystemToolConfig) -> Self {
        Self::new(config.allowed_paths.clone(), config.max_file_size_mb)
    }

    fn check(&self, tool: &str, path: &str) -> Result<PathBuf, ToolError> {
        localforge_security::validate_path(path, &self.allowed_paths)
            .map_err(|e| ToolError::denied(tool, e.to_string()))
    }
}

/// All five filesystem tools over one sandbox.
pub fn filesystem_tools(sandbox: Sandbox) -> Vec<Arc<dyn Tool>> {
    let sandbox = Arc::new(sandbox);
    vec![
        Arc::new(ReadFileTool::new(sandbox.clone())),
        Arc::new(WriteFileTool::new(sandbox.clone())),
        Arc::new(ListDirectoryTool::new(sandbox.clone())),
        Arc::new(SearchFilesTool::new(sandbox.clone())),
        Arc::new(DeleteFileTool::new(sandbox)),
    ]
}

fn required_str<'a>(input: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    input[key]
        .as_str()
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}

// --- read_file ---

pub struct ReadFileTool {
    sandbox: Arc<Sandbox>,
}

impl ReadFileTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file. Returns the file content."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or ~ path to the file"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let path = self.sandbox.check(self.name(), required_str(&input, "path")?)?;

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|_| ToolError::execution(self.name(), format!("file not found: {}", path.display())))?;
        if !meta.is_file() {
            return Err(ToolError::execution(self.name(), format!("not a file: {}", path.display())));
        }
        if meta.len() > self.sandbox.max_file_bytes {
            return Err(ToolError::execution(
                self.name(),
                format!(
                    "file too large ({} bytes, max {} MB)",
                    meta.len(),
                    self.sandbox.max_file_bytes / (1024 * 1024)
                ),
            ));
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ToolError::execution(self.name(), e.to_string()))?;
        String::from_utf8(bytes).map_err(|_| {
            ToolError::execution(self.name(), "cannot decode file as UTF-8; it may be a binary file")
        })
    }
}

// --- write_file ---

pub struct WriteFileTool {
    sandbox: Arc<Sandbox>,
}

impl WriteFileTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file and any missing parent directories."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or ~ path to the file"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write"
                },
                "mode": {
                    "type": "string",
                    "enum": ["overwrite", "append"],
                    "description": "Write mode (default: overwrite)",
                    "default": "overwrite"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let path = self.sandbox.check(self.name(), required_str(&input, "path")?)?;
        let content = required_str(&input, "content")?;
        let append = match input["mode"].as_str().unwrap_or("overwrite") {
            "overwrite" => false,
            "append" => true,
            other => {
                return Err(ToolError::InvalidArguments(format!(
                    "mode must be 'overwrite' or 'append', got '{other}'"
                )));
            }
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::execution(self.name(), e.to_string()))?;
        }

        let written = if append {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| ToolError::execution(self.name(), e.to_string()))?;
            file.write_all(content.as_bytes()).await
        } else {
            tokio::fs::write(&path, content).await
        };
        written.map_err(|e| ToolError::execution(self.name(), e.to_string()))?;

        let chars = content.chars().count();
        debug!(path = %path.display(), chars, append, "Wrote file");
        Ok(if append {
            format!("Successfully appended {chars} characters to {}", path.display())
        } else {
            format!("Successfully wrote {chars} characters to {}", path.display())
        })
    }
}

// --- list_directory ---

pub struct ListDirectoryTool {
    sandbox: Arc<Sandbox>,
}

impl ListDirectoryTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{bytes} bytes")
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{:.1} MB", b / (KB * KB))
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the contents of a directory with file sizes and types."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or ~ path to the directory (default: current directory)",
                    "default": "."
                },
                "show_hidden": {
                    "type": "boolean",
                    "description": "Include entries starting with '.' (default: false)",
                    "default": false
                }
            }
        })
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let path = self.sandbox.check(self.name(), input["path"].as_str().unwrap_or("."))?;
        let show_hidden = input["show_hidden"].as_bool().unwrap_or(false);

        if !path.is_dir() {
            return Err(ToolError::execution(
                self.name(),
                format!("not a directory: {}", path.display()),
            ));
        }

        let mut reader = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| ToolError::execution(self.name(), e.to_string()))?;

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| ToolError::execution(self.name(), e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !show_hidden && name.starts_with('.') {
                continue;
            }
            match entry.metadata().await {
                Ok(meta) if meta.is_dir() => dirs.push(name),
                Ok(meta) => files.push((name, meta.len())),
                Err(_) => files.push((name, 0)),
            }
        }

        if dirs.is_empty() && files.is_empty() {
            return Ok("(empty directory)".into());
        }

        dirs.sort();
        files.sort();
        let lines: Vec<String> = dirs
            .into_iter()
            .map(|d| format!("[DIR]  {d}/"))
            .chain(
                files
                    .into_iter()
                    .map(|(f, size)| format!("[FILE] {f} ({})", format_size(size))),
            )
            .collect();

        Ok(format!("Contents of {}:\n{}", path.display(), lines.join("\n")))
    }
}

// --- search_files ---

pub struct SearchFilesTool {
    sandbox: Arc<Sandbox>,
}

impl SearchFilesTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

fn glob_search(root: &Path, pattern: &str) -> Result<Vec<String>, ToolError> {
    let escaped_root = glob::Pattern::escape(&root.to_string_lossy());
    let full = format!("{escaped_root}/{}", pattern.trim_start_matches('/'));
    let paths = glob::glob(&full)
        .map_err(|e| ToolError::InvalidArguments(format!("invalid glob pattern: {e}")))?;

    Ok(paths
        .filter_map(Result::ok)
        .filter(|p| p.starts_with(root))
        .take(MAX_SEARCH_RESULTS)
        .map(|p| p.display().to_string())
        .collect())
}

fn content_search(root: &Path, pattern: &str, max_file_bytes: u64) -> Vec<String> {
    // Plain text that isn't a valid regex is matched literally.
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .or_else(|_| {
            RegexBuilder::new(&regex::escape(pattern))
                .case_insensitive(true)
                .build()
        });
    let Ok(regex) = regex else {
        return Vec::new();
    };

    let mut results = Vec::new();
    let walker = WalkDir::new(root).follow_links(false).into_iter().filter_entry(|e| {
        !(e.file_type().is_dir()
            && e.depth() > 0
            && SKIPPED_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
    });

    for entry in walker.filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.metadata().map(|m| m.len() > max_file_bytes).unwrap_or(true) {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        for (i, line) in text.lines().enumerate() {
            if regex.is_match(line) {
                results.push(format!("{}:{}: {}", entry.path().display(), i + 1, line.trim()));
                if results.len() >= MAX_SEARCH_RESULTS {
                    return results;
                }
            }
        }
    }
    results
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Find files by glob pattern (e.g. '**/*.rs'), or search file contents with a case-insensitive regex."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to search in"
                },
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern relative to the directory, or a regex for content search"
                },
                "search_type": {
                    "type": "string",
                    "enum": ["glob", "content"],
                    "description": "Match file names (glob) or file contents (content). Default: glob",
                    "default": "glob"
                }
            },
            "required": ["path", "pattern"]
        })
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let root = self.sandbox.check(self.name(), required_str(&input, "path")?)?;
        let pattern = required_str(&input, "pattern")?.to_string();
        let content_mode = match input["search_type"].as_str().unwrap_or("glob") {
            "glob" => false,
            "content" => true,
            other => {
                return Err(ToolError::InvalidArguments(format!(
                    "search_type must be 'glob' or 'content', got '{other}'"
                )));
            }
        };

        if !root.is_dir() {
            return Err(ToolError::execution(
                self.name(),
                format!("not a directory: {}", root.display()),
            ));
        }

        let max_bytes = self.sandbox.max_file_bytes;
        let search_root = root.clone();
        let search_pattern = pattern.clone();
        let results = tokio::task::spawn_blocking(move || {
            if content_mode {
                Ok(content_search(&search_root, &search_pattern, max_bytes))
            } else {
                glob_search(&search_root, &search_pattern)
            }
        })
        .await
        .map_err(|e| ToolError::execution("search_files", e.to_string()))??;

        if results.is_empty() {
            return Ok(if content_mode {
                format!("No matches for '{pattern}' in {}", root.display())
            } else {
                format!("No files found matching '{pattern}' in {}", root.display())
            });
        }

        let mut out = format!("Found {} result(s):\n{}", results.len(), results.join("\n"));
        if results.len() >= MAX_SEARCH_RESULTS {
            out.push_str(&format!("\n(results limited to {MAX_SEARCH_RESULTS})"));
        }
        Ok(out)
    }
}

// --- delete_file ---

pub struct DeleteFileTool {
    sandbox: Arc<Sandbox>,
}

impl DeleteFileTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a single file. This cannot be undone."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or ~ path to the file to delete"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let path = self.sandbox.check(self.name(), required_str(&input, "path")?)?;

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|_| ToolError::execution(self.name(), format!("file not found: {}", path.display())))?;
        if meta.is_dir() {
            return Err(ToolError::execution(
                self.name(),
                format!("'{}' is a directory; only files can be deleted", path.display()),
            ));
        }

        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| ToolError::execution(self.name(), e.to_string()))?;
        debug!(path = %path.display(), "Deleted file");
        Ok(format!("Deleted: {}", path.display()))
    }
}
