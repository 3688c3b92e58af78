//! Tokenized view of a candidate shell command.
//!
//! A [`Command`] keeps the raw string exactly as received (that is what gets
//! executed and persisted) alongside a word-split view used by the policy
//! rules. Splitting follows POSIX shell quoting closely enough to see through
//! `'quoted'`, `"quoted"` and `back\ slashed` words; it does not expand
//! anything.

use std::fmt;

use thiserror::Error;

/// Why a raw command string could not be tokenized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
    #[error("command is empty")]
    Empty,
    #[error("unterminated {0} quote")]
    UnterminatedQuote(char),
    #[error("trailing backslash")]
    TrailingEscape,
}

/// An immutable candidate command: raw text plus its parsed words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    raw: String,
    tokens: Vec<String>,
}

impl Command {
    /// Parse a raw command string.
    ///
    /// Leading and trailing whitespace is ignored for tokenizing but the raw
    /// string is kept verbatim.
    pub fn parse(raw: impl Into<String>) -> Result<Self, CommandParseError> {
        let raw = raw.into();
        let tokens = tokenize(&raw)?;
        if tokens.is_empty() {
            return Err(CommandParseError::Empty);
        }
        Ok(Self { raw, tokens })
    }

    /// The command exactly as submitted.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The first word.
    pub fn program(&self) -> &str {
        &self.tokens[0]
    }

    /// The program with any leading directory stripped (`/usr/bin/fio` -> `fio`).
    pub fn program_name(&self) -> &str {
        let program = self.program();
        program.rsplit('/').next().unwrap_or(program)
    }

    /// Every word after the program.
    pub fn args(&self) -> &[String] {
        &self.tokens[1..]
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Values of a `--name=value` or `--name value` long flag, in order.
    ///
    /// A flag given without any value yields an empty string, so callers can
    /// tell "absent" (no entries) from "present but empty".
    pub fn flag_values(&self, name: &str) -> Vec<&str> {
        let mut values = Vec::new();
        let mut args = self.args().iter().peekable();
        while let Some(arg) = args.next() {
            let Some(rest) = arg.strip_prefix(name) else {
                continue;
            };
            if let Some(value) = rest.strip_prefix('=') {
                values.push(value);
            } else if rest.is_empty() {
                match args.peek() {
                    Some(next) if !next.starts_with('-') => {
                        values.push(next.as_str());
                        args.next();
                    }
                    _ => values.push(""),
                }
            }
        }
        values
    }

    /// Whether a long flag appears at all, with or without a value.
    pub fn has_flag(&self, name: &str) -> bool {
        self.args().iter().any(|arg| {
            arg.strip_prefix(name)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('='))
        })
    }

    /// Arguments that do not start with `-`.
    pub fn bare_words(&self) -> Vec<&str> {
        self.args()
            .iter()
            .filter(|arg| !arg.starts_with('-'))
            .map(String::as_str)
            .collect()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn tokenize(input: &str) -> Result<Vec<String>, CommandParseError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => current.push(inner),
                        None => return Err(CommandParseError::UnterminatedQuote('\'')),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\' | '$' | '`')) => current.push(escaped),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => return Err(CommandParseError::UnterminatedQuote('"')),
                        },
                        Some(inner) => current.push(inner),
                        None => return Err(CommandParseError::UnterminatedQuote('"')),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => return Err(CommandParseError::TrailingEscape),
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    tokens.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            other => {
                in_word = true;
                current.push(other);
            }
        }
    }

    if in_word {
        tokens.push(current);
    }
    Ok(tokens)
}
