//! Command screening for the shell tool.

/// Returned when a command contains a blocked pattern.
#[derive(Debug, thiserror::Error)]
#[error("Command blocked by security policy (matches '{pattern}')")]
pub struct CommandBlocked {
    pub pattern: String,
}

/// Reject `command` if it contains any of `blocked_patterns`, ignoring case.
pub fn check_command(command: &str, blocked_patterns: &[String]) -> Result<(), CommandBlocked> {
    let lowered = command.to_lowercase();
    match blocked_patterns
        .iter()
        .find(|p| !p.is_empty() && lowered.contains(&p.to_lowercase()))
    {
        Some(pattern) => Err(CommandBlocked {
            pattern: pattern.clone(),
        }),
        None => Ok(()),
    }
}
