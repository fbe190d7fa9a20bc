//! Command Replies
//!
//! [`Reply`] is what the engine hands back for every command. It mirrors the
//! shapes a Redis client understands, so a network layer can serialize it
//! directly, and its `Display` impl prints it the way `redis-cli` does.
//!
//! ```text
//! Ok            OK
//! Status(s)     PONG, string, ...
//! Nil           (nil)
//! Integer(n)    (integer) n
//! Bulk(b)       "b"
//! Array(v)      1) ... 2) ...
//! Error(s)      (error) ERR ...    -- only inside EXEC results
//! Queued        QUEUED
//! ```

use crate::types::string::format_float;
use bytes::Bytes;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Status(String),
    Nil,
    Integer(i64),
    Bulk(Bytes),
    Array(Vec<Reply>),
    /// A failed command inside an EXEC result list.
    Error(String),
    Queued,
}

impl Reply {
    pub fn status(s: impl Into<String>) -> Self {
        Reply::Status(s.into())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(data.into())
    }

    /// A bulk reply, or nil when absent.
    pub fn optional(data: Option<Bytes>) -> Self {
        data.map_or(Reply::Nil, Reply::Bulk)
    }

    pub fn float(value: f64) -> Self {
        Reply::Bulk(Bytes::from(format_float(value)))
    }

    pub fn integer(n: impl TryInto<i64>) -> Self {
        Reply::Integer(n.try_into().unwrap_or(i64::MAX))
    }

    /// An array of bulk strings.
    pub fn bulks(items: impl IntoIterator<Item = Bytes>) -> Self {
        Reply::Array(items.into_iter().map(Reply::Bulk).collect())
    }

    /// Returns true if this value is nil.
    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    /// Returns true if this value is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Attempts to extract the inner integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Attempts to extract the inner bytes from a bulk reply.
    pub fn as_bulk(&self) -> Option<&Bytes> {
        match self {
            Reply::Bulk(b) => Some(b),
            _ => None,
        }
    }

    /// Attempts to extract the inner array.
    pub fn as_array(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Consumes self and returns the inner array if this is an Array variant.
    pub fn into_array(self) -> Option<Vec<Reply>> {
        match self {
            Reply::Array(items) => Some(items),
            _ => None,
        }
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        match self {
            Reply::Ok => write!(f, "OK"),
            Reply::Status(s) => write!(f, "{}", s),
            Reply::Nil => write!(f, "(nil)"),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Bulk(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            Reply::Error(s) => write!(f, "(error) {}", s),
            Reply::Queued => write!(f, "QUEUED"),
            Reply::Array(items) if items.is_empty() => write!(f, "(empty array)"),
            Reply::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                        write!(f, "{:width$}", "", width = depth * 3)?;
                    }
                    write!(f, "{}) ", i + 1)?;
                    item.fmt_indented(f, depth + 1)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

impl From<Option<Bytes>> for Reply {
    fn from(value: Option<Bytes>) -> Self {
        Reply::optional(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_scalars() {
        assert_eq!(Reply::Ok.to_string(), "OK");
        assert_eq!(Reply::Integer(-3).to_string(), "(integer) -3");
        assert_eq!(Reply::Nil.to_string(), "(nil)");
        assert_eq!(Reply::bulk("hi").to_string(), "\"hi\"");
        assert_eq!(Reply::bulk(vec![0xff, 0xfe]).to_string(), "(binary data, 2 bytes)");
        assert_eq!(Reply::Error("ERR x".into()).to_string(), "(error) ERR x");
    }

    #[test]
    fn test_display_nested_array() {
        let reply = Reply::Array(vec![
            Reply::bulk("a"),
            Reply::Array(vec![Reply::Integer(1), Reply::Integer(2)]),
        ]);
        assert_eq!(
            reply.to_string(),
            "1) \"a\"\n2) 1) (integer) 1\n   2) (integer) 2"
        );
        assert_eq!(Reply::Array(vec![]).to_string(), "(empty array)");
    }

    #[test]
    fn test_helpers() {
        assert_eq!(Reply::float(1.5), Reply::bulk("1.5"));
        assert_eq!(Reply::optional(None), Reply::Nil);
        assert_eq!(Reply::integer(7usize).as_integer(), Some(7));
        assert_eq!(
            Reply::bulks(vec![Bytes::from("x")]).into_array(),
            Some(vec![Reply::bulk("x")])
        );
    }
}
