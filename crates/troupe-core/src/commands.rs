//! Chat commands handled before the completion pipeline.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Clear the conversation history.
    Reset,
}

/// Parse `text` as a command. Only the first word counts; it is matched
/// case-insensitively and may carry a `@botname` suffix.
pub fn parse_command(text: &str) -> Option<Command> {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let word = trimmed.split_whitespace().next()?;
    let name = word.split('@').next().unwrap_or(word);

    match name.to_lowercase().as_str() {
        "/reset" => Some(Command::Reset),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reset() {
        assert_eq!(parse_command("/reset"), Some(Command::Reset));
        assert_eq!(parse_command("  /RESET  "), Some(Command::Reset));
        assert_eq!(parse_command("/reset@troupe_bot"), Some(Command::Reset));
        assert_eq!(parse_command("/reset now please"), Some(Command::Reset));
    }

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(parse_command("hello /reset"), None);
        assert_eq!(parse_command("reset"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn unknown_command_passes_through() {
        assert_eq!(parse_command("/resetting"), None);
        assert_eq!(parse_command("/help"), None);
    }
}
