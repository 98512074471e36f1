//! Typed construction of server → client reliable commands.
//!
//! Every reliable command is a single text line the client tokenizes:
//! a command name followed by bare or quoted arguments. [`CommandBuilder`]
//! validates each argument as it is added, so a built [`ServerCommand`]
//! always tokenizes back into the arguments it was built from and always
//! fits the reliable command bound.

use std::fmt;

use crate::{MAX_STRING_CHARS, ProtocolError};

/// Longest text a [`ServerCommand`] may carry. Two bytes are kept free
/// for the client's own framing.
pub const MAX_COMMAND_LEN: usize = MAX_STRING_CHARS - 2;

/// Config string values longer than this are split into `bcs` fragments.
pub const MAX_CONFIG_STRING_CHUNK: usize = MAX_STRING_CHARS - 24;

/// A validated reliable command line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerCommand {
    text: String,
}

impl ServerCommand {
    /// Starts a command named `name`.
    pub fn builder(name: &str) -> CommandBuilder {
        CommandBuilder {
            text: name.to_string(),
            error: None,
        }
    }

    /// `print "<text>"`: console text on the client.
    pub fn print(text: &str) -> Result<Self, ProtocolError> {
        Self::builder("print").quoted(text).build()
    }

    /// `chat "<text>"`: chat area text on the client.
    pub fn chat(text: &str) -> Result<Self, ProtocolError> {
        Self::builder("chat").quoted(text).build()
    }

    /// `disconnect "<reason>"`: the last thing a dropped client receives.
    pub fn disconnect(reason: &str) -> Result<Self, ProtocolError> {
        Self::builder("disconnect").quoted(reason).build()
    }

    /// `map_restart`: tells the client a warm restart has happened.
    pub fn map_restart() -> Self {
        Self {
            text: "map_restart\n".to_string(),
        }
    }

    /// Config string update. Long values are split into
    /// `bcs0` / `bcs1` / `bcs2` fragments the client reassembles.
    ///
    /// # Errors
    /// [`ProtocolError::ReservedCharacter`] if `value` contains `"`.
    pub fn config_string(index: usize, value: &str) -> Result<Vec<Self>, ProtocolError> {
        if value.len() <= MAX_CONFIG_STRING_CHUNK {
            let cmd = Self::builder("cs").arg(index).quoted(value).build()?;
            return Ok(vec![cmd]);
        }

        let chunks = split_at_char_boundaries(value, MAX_CONFIG_STRING_CHUNK);
        let last = chunks.len() - 1;
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let name = match i {
                    0 => "bcs0",
                    i if i == last => "bcs2",
                    _ => "bcs1",
                };
                Self::builder(name).arg(index).quoted(chunk).build()
            })
            .collect()
    }

    /// Wraps text that is already a complete command line, such as a
    /// command typed by an operator.
    ///
    /// # Errors
    /// [`ProtocolError::TooLong`] past [`MAX_COMMAND_LEN`].
    pub fn raw(text: impl Into<String>) -> Result<Self, ProtocolError> {
        let text = text.into();
        if text.len() > MAX_COMMAND_LEN {
            return Err(ProtocolError::TooLong {
                what: "server command",
                limit: MAX_COMMAND_LEN,
            });
        }
        Ok(Self { text })
    }

    /// The command name.
    pub fn name(&self) -> &str {
        self.text.split_ascii_whitespace().next().unwrap_or("")
    }

    /// The full command line.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Consumes the command, returning its text.
    pub fn into_string(self) -> String {
        self.text
    }
}

impl fmt::Display for ServerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl AsRef<str> for ServerCommand {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

// ---------------------------------------------------------------------------
// CommandBuilder
// ---------------------------------------------------------------------------

/// Builder returned by [`ServerCommand::builder`].
///
/// The first invalid argument is remembered and reported by
/// [`build`](Self::build), so calls can be chained without checking
/// each one.
#[derive(Debug)]
#[must_use]
pub struct CommandBuilder {
    text: String,
    error: Option<ProtocolError>,
}

impl CommandBuilder {
    /// Appends a bare token. It may not contain whitespace or `"`.
    pub fn arg(mut self, value: impl fmt::Display) -> Self {
        let value = value.to_string();
        if value.is_empty()
            || value.contains('"')
            || value.bytes().any(|b| b <= b' ')
        {
            self.fail(ProtocolError::InvalidMessage(format!(
                "bare argument {value:?} would not tokenize"
            )));
            return self;
        }
        self.text.push(' ');
        self.text.push_str(&value);
        self
    }

    /// Appends a quoted argument. It may contain spaces and newlines but
    /// not `"`.
    pub fn quoted(mut self, value: &str) -> Self {
        if value.contains('"') {
            self.fail(ProtocolError::ReservedCharacter {
                field: "quoted argument",
                value: value.to_string(),
            });
            return self;
        }
        self.text.push_str(" \"");
        self.text.push_str(value);
        self.text.push('"');
        self
    }

    /// Finishes the command.
    ///
    /// # Errors
    /// The first argument error, or [`ProtocolError::TooLong`] past
    /// [`MAX_COMMAND_LEN`].
    pub fn build(self) -> Result<ServerCommand, ProtocolError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        ServerCommand::raw(self.text)
    }

    fn fail(&mut self, err: ProtocolError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

fn split_at_char_boundaries(s: &str, max: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = s;
    while !rest.is_empty() {
        let mut end = max.min(rest.len());
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (head, tail) = rest.split_at(end);
        chunks.push(head);
        rest = tail;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Args;

    #[test]
    fn test_print_quotes_text() {
        let cmd = ServerCommand::print("Visor timed out\n").unwrap();
        assert_eq!(cmd.as_str(), "print \"Visor timed out\n\"");
        assert_eq!(cmd.name(), "print");
    }

    #[test]
    fn test_built_command_tokenizes_back() {
        let cmd = ServerCommand::builder("cs")
            .arg(12)
            .quoted("two words")
            .build()
            .unwrap();

        let args = Args::tokenize(cmd.as_str());
        assert_eq!(args.command(), "cs");
        assert_eq!(args.argv(1), "12");
        assert_eq!(args.argv(2), "two words");
    }

    #[test]
    fn test_quoted_rejects_embedded_quote() {
        let err = ServerCommand::chat("say \"hi\"").unwrap_err();
        assert!(matches!(err, ProtocolError::ReservedCharacter { .. }));
    }

    #[test]
    fn test_bare_arg_rejects_whitespace() {
        let err = ServerCommand::builder("cs").arg("a b").build().unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidMessage(_)));
    }

    #[test]
    fn test_first_error_wins() {
        let err = ServerCommand::builder("x")
            .quoted("\"")
            .arg("")
            .build()
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ReservedCharacter { .. }));
    }

    #[test]
    fn test_build_rejects_overlong_command() {
        let long = "x".repeat(MAX_COMMAND_LEN);
        let err = ServerCommand::print(&long).unwrap_err();
        assert!(matches!(err, ProtocolError::TooLong { .. }));
    }

    #[test]
    fn test_short_config_string_is_single_cs() {
        let cmds = ServerCommand::config_string(5, "12000").unwrap();
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].as_str(), "cs 5 \"12000\"");
    }

    #[test]
    fn test_long_config_string_splits_into_bcs_fragments() {
        let value = "v".repeat(MAX_CONFIG_STRING_CHUNK * 2 + 10);
        let cmds = ServerCommand::config_string(1, &value).unwrap();

        let names: Vec<_> = cmds.iter().map(ServerCommand::name).collect();
        assert_eq!(names, ["bcs0", "bcs1", "bcs2"]);

        let rebuilt: String = cmds
            .iter()
            .map(|c| Args::tokenize(c.as_str()).argv(2).to_string())
            .collect();
        assert_eq!(rebuilt, value);
    }

    #[test]
    fn test_two_fragment_config_string_has_no_middle() {
        let value = "v".repeat(MAX_CONFIG_STRING_CHUNK + 1);
        let cmds = ServerCommand::config_string(0, &value).unwrap();
        let names: Vec<_> = cmds.iter().map(ServerCommand::name).collect();
        assert_eq!(names, ["bcs0", "bcs2"]);
    }

    #[test]
    fn test_map_restart_text() {
        assert_eq!(ServerCommand::map_restart().as_str(), "map_restart\n");
    }
}
