//! Security policies for LocalForge tools.
//!
//! Provides:
//! - **Path validation**: filesystem sandboxing to the configured roots
//! - **Command screening**: blocked-pattern checks for shell execution

pub mod command;
pub mod path;

pub use command::{check_command, CommandBlocked};
pub use path::{expand_tilde, resolve, validate_path, PathValidationError};
