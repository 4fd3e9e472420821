//! Command line parameter access for command handlers
//!
//! Splits a single job or console line into its command word and
//! parameters. Two parameter styles are recognised:
//! - Classic words: `G1 X10.5 E0.42 F1800` (letter followed by value)
//! - Extended words: `EXCLUDE_OBJECT NAME=part_1` (`KEY=VALUE` pairs)
//!
//! Only what the handlers in this workspace need is parsed here; full
//! command-language validation belongs to the host dispatcher.

use crate::error::CommandError;
use std::collections::BTreeMap;

/// A parsed command line
#[derive(Debug, Clone, PartialEq)]
pub struct CommandLine {
    raw: String,
    name: String,
    params: BTreeMap<String, String>,
}

impl CommandLine {
    /// Parse a line into a command
    ///
    /// Returns `None` for blank lines and comment-only lines.
    pub fn parse(line: &str) -> Option<Self> {
        let code = match line.find(';') {
            Some(pos) => &line[..pos],
            None => line,
        };
        let code = code.trim();
        if code.is_empty() {
            return None;
        }

        let mut words = code.split_whitespace();
        let name = words.next()?.to_uppercase();
        let classic = is_classic_word(&name);

        let mut params = BTreeMap::new();
        for word in words {
            if let Some((key, value)) = word.split_once('=') {
                params.insert(key.to_uppercase(), value.to_string());
            } else if classic {
                let mut chars = word.chars();
                if let Some(letter) = chars.next() {
                    params.insert(
                        letter.to_ascii_uppercase().to_string(),
                        chars.as_str().to_string(),
                    );
                }
            }
        }

        Some(Self {
            raw: line.trim_end().to_string(),
            name,
            params,
        })
    }

    /// The original line text
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The upper-cased command word
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All parameters keyed by upper-cased name
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Whether a parameter is present
    pub fn has(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    /// Get a raw parameter value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|s| s.as_str())
    }

    /// Get a required parameter value
    pub fn require(&self, key: &str) -> Result<&str, CommandError> {
        self.get(key).ok_or_else(|| CommandError::MissingParameter {
            command: self.raw.clone(),
            param: key.to_string(),
        })
    }

    /// Get an optional floating point parameter
    pub fn get_float(&self, key: &str) -> Result<Option<f64>, CommandError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Some)
                .ok_or_else(|| self.malformed(key, "expected a number")),
        }
    }

    /// Get an optional integer parameter
    pub fn get_int(&self, key: &str) -> Result<Option<i64>, CommandError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value
                .parse::<i64>()
                .map(Some)
                .map_err(|_| self.malformed(key, "expected an integer")),
        }
    }

    /// Build a malformed parameter error for this line
    pub fn malformed(&self, key: &str, reason: impl Into<String>) -> CommandError {
        CommandError::MalformedParameter {
            command: self.raw.clone(),
            param: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Classic words are a single letter followed by a number (`G1`, `M104`)
fn is_classic_word(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {
            let rest = chars.as_str();
            !rest.is_empty() && rest.parse::<f64>().is_ok()
        }
        _ => false,
    }
}
