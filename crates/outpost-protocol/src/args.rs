//! Command-line tokenizer shared by out-of-band requests, rcon, client
//! commands and the operator console.
//!
//! Tokens are separated by whitespace (any byte `<= ' '`). A `"` starts a
//! quoted token that runs to the next `"` and may contain spaces. `//`
//! ends the line and `/* ... */` is skipped.

use std::fmt;

/// Upper bound on tokens kept from a single line.
pub const MAX_TOKENS: usize = 1024;

/// A tokenized command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    argv: Vec<String>,
}

impl Args {
    /// Splits `line` into tokens.
    pub fn tokenize(line: &str) -> Self {
        let bytes = line.as_bytes();
        let mut argv = Vec::new();
        let mut i = 0;

        while argv.len() < MAX_TOKENS {
            // skip whitespace and comments
            loop {
                while i < bytes.len() && bytes[i] <= b' ' {
                    i += 1;
                }
                if i >= bytes.len() {
                    return Self { argv };
                }
                if bytes[i..].starts_with(b"//") {
                    return Self { argv };
                }
                if bytes[i..].starts_with(b"/*") {
                    match find(&bytes[i + 2..], b"*/") {
                        Some(end) => i += 2 + end + 2,
                        None => return Self { argv },
                    }
                    continue;
                }
                break;
            }

            if bytes[i] == b'"' {
                let start = i + 1;
                let end = bytes[start..]
                    .iter()
                    .position(|&b| b == b'"')
                    .map_or(bytes.len(), |p| start + p);
                argv.push(line[start..end].to_string());
                i = (end + 1).min(bytes.len());
                continue;
            }

            let start = i;
            while i < bytes.len()
                && bytes[i] > b' '
                && bytes[i] != b'"'
                && !bytes[i..].starts_with(b"//")
                && !bytes[i..].starts_with(b"/*")
            {
                i += 1;
            }
            argv.push(line[start..i].to_string());
        }

        Self { argv }
    }

    /// Reads the first line of an out-of-band payload and tokenizes it.
    ///
    /// Reading stops at the first `\n` or NUL. Bytes outside printable
    /// ASCII and `%` are replaced by `.`, so nothing downstream ever sees
    /// a format directive or invalid UTF-8.
    pub fn from_datagram(payload: &[u8]) -> Self {
        Self::tokenize(&read_line(payload))
    }

    /// Number of tokens.
    pub fn argc(&self) -> usize {
        self.argv.len()
    }

    /// Token `n`, or `""` past the end.
    pub fn argv(&self, n: usize) -> &str {
        self.argv.get(n).map_or("", String::as_str)
    }

    /// The command name (token 0).
    pub fn command(&self) -> &str {
        self.argv(0)
    }

    /// Every token after the command, joined with single spaces.
    pub fn args(&self) -> String {
        self.args_from(1)
    }

    /// Tokens from `n` onward, joined with single spaces.
    pub fn args_from(&self, n: usize) -> String {
        self.argv.get(n..).map_or_else(String::new, |rest| rest.join(" "))
    }

    /// Whether the line held no tokens.
    pub fn is_empty(&self) -> bool {
        self.argv.is_empty()
    }

    /// Iterates over all tokens, the command included.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.argv.iter().map(String::as_str)
    }
}

impl fmt::Display for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.args_from(0))
    }
}

/// Decodes the first line of a datagram payload as sanitized text.
pub fn read_line(payload: &[u8]) -> String {
    payload
        .iter()
        .take_while(|&&b| b != 0 && b != b'\n')
        .map(|&b| match b {
            b'%' => '.',
            b if b > 127 => '.',
            b => b as char,
        })
        .collect()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
