//! Info strings: the `\key\value\key\value` blobs used for user info,
//! server info and query responses.
//!
//! Keys compare case-insensitively. Keys and values may not contain the
//! characters the text protocol reserves, and the rendered string is kept
//! under [`MAX_INFO_STRING`](crate::MAX_INFO_STRING) bytes.

use std::fmt;

use crate::{MAX_INFO_STRING, ProtocolError};

/// Characters that would break tokenization or info-string framing.
pub const RESERVED_CHARS: [char; 3] = ['\\', ';', '"'];

/// Whether `s` contains any of [`RESERVED_CHARS`].
pub fn has_reserved_chars(s: &str) -> bool {
    s.contains(&RESERVED_CHARS[..])
}

/// An ordered set of key/value pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoString {
    pairs: Vec<(String, String)>,
    limit: usize,
}

impl InfoString {
    /// An empty info string bounded by [`MAX_INFO_STRING`].
    pub fn new() -> Self {
        Self::with_limit(MAX_INFO_STRING)
    }

    /// An empty info string with a custom byte bound. System info uses a
    /// larger one because it is split across several reliable commands.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            pairs: Vec::new(),
            limit,
        }
    }

    /// Parses `\k\v...`. A trailing key without a value gets `""`.
    /// Duplicate keys keep the first occurrence.
    pub fn parse(s: &str) -> Self {
        let mut info = Self::new();
        let mut parts = s.strip_prefix('\\').unwrap_or(s).split('\\');
        while let Some(key) = parts.next() {
            let value = parts.next().unwrap_or("");
            if key.is_empty() || info.contains_key(key) {
                continue;
            }
            info.pairs.push((key.to_string(), value.to_string()));
        }
        info
    }

    /// The value for `key`, or `""` when it is absent.
    pub fn get(&self, key: &str) -> &str {
        self.pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map_or("", |(_, v)| v.as_str())
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k.eq_ignore_ascii_case(key))
    }

    /// Sets `key` to `value`, replacing any previous value in place.
    /// An empty value removes the key.
    ///
    /// # Errors
    /// - [`ProtocolError::ReservedCharacter`] if either side contains `\`, `;` or `"`.
    /// - [`ProtocolError::TooLong`] if the result would exceed the bound.
    ///   The info string is left unchanged.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ProtocolError> {
        if has_reserved_chars(key) {
            return Err(ProtocolError::ReservedCharacter {
                field: "info key",
                value: key.to_string(),
            });
        }
        if has_reserved_chars(value) {
            return Err(ProtocolError::ReservedCharacter {
                field: "info value",
                value: value.to_string(),
            });
        }

        if value.is_empty() {
            self.remove(key);
            return Ok(());
        }

        let existing = self.pairs.iter().position(|(k, _)| k.eq_ignore_ascii_case(key));
        let old_len = existing.map_or(0, |i| pair_len(&self.pairs[i].0, &self.pairs[i].1));
        if self.rendered_len() - old_len + pair_len(key, value) >= self.limit {
            return Err(ProtocolError::TooLong {
                what: "info string",
                limit: self.limit,
            });
        }

        match existing {
            Some(i) => self.pairs[i].1 = value.to_string(),
            None => self.pairs.push((key.to_string(), value.to_string())),
        }
        Ok(())
    }

    /// Removes `key` if present.
    pub fn remove(&mut self, key: &str) {
        self.pairs.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
    }

    /// Iterates over pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether there are no pairs.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Byte length of the rendered string.
    pub fn rendered_len(&self) -> usize {
        self.pairs.iter().map(|(k, v)| pair_len(k, v)).sum()
    }

    /// Operator-facing listing: one `key value` line per pair with keys
    /// padded to 20 columns.
    pub fn print(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.pairs {
            out.push_str(&format!("{k:<20}{v}\n"));
        }
        out
    }
}

impl Default for InfoString {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InfoString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in &self.pairs {
            write!(f, "\\{k}\\{v}")?;
        }
        Ok(())
    }
}

fn pair_len(key: &str, value: &str) -> usize {
    key.len() + value.len() + 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_get_case_insensitive() {
        let info = InfoString::parse(r"\name\Visor\Protocol\26");
        assert_eq!(info.get("name"), "Visor");
        assert_eq!(info.get("protocol"), "26");
        assert_eq!(info.get("missing"), "");
        assert_eq!(info.len(), 2);
    }

    #[test]
    fn test_parse_without_leading_backslash_and_dangling_key() {
        let info = InfoString::parse(r"name\Visor\rate");
        assert_eq!(info.get("name"), "Visor");
        assert!(info.contains_key("rate"));
        assert_eq!(info.get("rate"), "");
    }

    #[test]
    fn test_display_round_trips_order() {
        let mut info = InfoString::new();
        info.set("challenge", "abc").unwrap();
        info.set("protocol", "26").unwrap();
        assert_eq!(info.to_string(), r"\challenge\abc\protocol\26");
        assert_eq!(InfoString::parse(&info.to_string()), info);
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut info = InfoString::parse(r"\a\1\b\2");
        info.set("A", "3").unwrap();
        assert_eq!(info.to_string(), r"\a\3\b\2");
    }

    #[test]
    fn test_set_empty_value_removes() {
        let mut info = InfoString::parse(r"\a\1\b\2");
        info.set("a", "").unwrap();
        assert_eq!(info.to_string(), r"\b\2");
    }

    #[test]
    fn test_set_rejects_reserved_characters() {
        let mut info = InfoString::new();
        for bad in ["a\\b", "semi;colon", "quo\"te"] {
            assert!(matches!(
                info.set("key", bad),
                Err(ProtocolError::ReservedCharacter { .. })
            ));
        }
        assert!(info.set("k;", "v").is_err());
        assert!(info.is_empty());
    }

    #[test]
    fn test_set_enforces_length_bound() {
        let mut info = InfoString::with_limit(16);
        info.set("key", "value").unwrap(); // 10 bytes
        let err = info.set("other", "xx").unwrap_err(); // +9 = 19
        assert!(matches!(err, ProtocolError::TooLong { limit: 16, .. }));
        assert_eq!(info.len(), 1);

        // replacing shrinks the old pair first
        info.set("key", "longer").unwrap();
        assert_eq!(info.get("key"), "longer");
    }

    #[test]
    fn test_print_pads_keys() {
        let info = InfoString::parse(r"\sv_hostname\box");
        assert_eq!(info.print(), format!("{:<20}box\n", "sv_hostname"));
    }

    #[test]
    fn test_has_reserved_chars() {
        assert!(has_reserved_chars("a;b"));
        assert!(!has_reserved_chars("plain text"));
    }
}
