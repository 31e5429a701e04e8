//! ADO/ODBC-style connection strings.
//!
//! The raw string is passed through to native drivers verbatim. The parsed
//! form is used for validation, driver selection and masked logging.

use crate::error::{DbError, DbResult};

/// Keys whose values are hidden by [`ConnectionString::masked`].
const SECRET_KEYS: &[&str] = &["password", "pwd", "user password", "accesstoken"];

/// A parsed `key=value;` connection string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionString {
    raw: String,
    pairs: Vec<(String, String)>,
}

impl ConnectionString {
    /// Parse a connection string.
    ///
    /// Values may be wrapped in `{...}`, `'...'` or `"..."`, in which case they may
    /// contain `;`. A doubled closing delimiter inside a wrapped value is an escaped
    /// delimiter. Keys are trimmed and compared case-insensitively. Later duplicates
    /// win on lookup.
    pub fn parse(raw: impl Into<String>) -> DbResult<Self> {
        let raw = raw.into();
        let mut pairs = Vec::new();
        let mut chars = raw.chars().peekable();

        loop {
            // Key
            let mut key = String::new();
            while let Some(&c) = chars.peek() {
                if c == '=' || c == ';' {
                    break;
                }
                key.push(c);
                chars.next();
            }
            match chars.next() {
                None => {
                    if !key.trim().is_empty() {
                        return Err(DbError::invalid_argument(format!(
                            "connection string segment '{}' has no value",
                            key.trim()
                        )));
                    }
                    break;
                }
                Some(';') => {
                    if !key.trim().is_empty() {
                        return Err(DbError::invalid_argument(format!(
                            "connection string segment '{}' has no value",
                            key.trim()
                        )));
                    }
                    continue;
                }
                Some(_) => {}
            }
            let key = key.trim().to_string();
            if key.is_empty() {
                return Err(DbError::invalid_argument(
                    "connection string contains a value without a key",
                ));
            }

            // Skip leading whitespace before the value
            while chars.peek().is_some_and(|c| c.is_whitespace()) {
                chars.next();
            }

            // Value
            let mut value = String::new();
            let closing = match chars.peek() {
                Some('{') => Some('}'),
                Some('\'') => Some('\''),
                Some('"') => Some('"'),
                _ => None,
            };
            if let Some(close) = closing {
                chars.next();
                let mut terminated = false;
                while let Some(c) = chars.next() {
                    if c == close {
                        if chars.peek() == Some(&close) {
                            value.push(close);
                            chars.next();
                            continue;
                        }
                        terminated = true;
                        break;
                    }
                    value.push(c);
                }
                if !terminated {
                    return Err(DbError::invalid_argument(format!(
                        "unterminated value for connection string key '{key}'"
                    )));
                }
                // Only whitespace may follow the closing delimiter
                for c in chars.by_ref() {
                    if c == ';' {
                        break;
                    }
                    if !c.is_whitespace() {
                        return Err(DbError::invalid_argument(format!(
                            "unexpected '{c}' after quoted value of '{key}'"
                        )));
                    }
                }
            } else {
                for c in chars.by_ref() {
                    if c == ';' {
                        break;
                    }
                    value.push(c);
                }
                value = value.trim().to_string();
            }

            pairs.push((key, value));
        }

        Ok(Self { raw, pairs })
    }

    /// The string exactly as supplied.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.raw.trim().is_empty()
    }

    /// Case-insensitive lookup; the last occurrence wins.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// First key from `keys` that is present.
    pub fn get_any(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get(k))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Get a display-safe version of the connection string (credentials masked).
    pub fn masked(&self) -> String {
        self.pairs
            .iter()
            .map(|(k, v)| {
                if SECRET_KEYS.iter().any(|s| k.eq_ignore_ascii_case(s)) {
                    format!("{k}=****")
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl std::str::FromStr for ConnectionString {
    type Err = DbError;

    fn from_str(s: &str) -> DbResult<Self> {
        Self::parse(s)
    }
}
