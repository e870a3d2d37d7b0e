//! RESP (Redis Serialization Protocol) Data Types
//!
//! This module defines the request and response types that cross the wire.
//!
//! ## Protocol Format
//!
//! Each RESP type starts with a type prefix byte:
//! - `+` Simple String
//! - `-` Error
//! - `:` Integer
//! - `$` Bulk String
//! - `*` Array
//!
//! All types are terminated with CRLF (`\r\n`).
//!
//! ## Examples
//!
//! Simple String: `+OK\r\n`
//! Error: `-ERR unknown command\r\n`
//! Integer: `:1000\r\n`
//! Bulk String: `$5\r\nhello\r\n`
//! Array: `*2\r\n$3\r\nGET\r\n$4\r\nname\r\n`
//! Null Bulk String: `$-1\r\n`
//! Null Array: `*-1\r\n`

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A single decoded argument of a request.
///
/// With the default flattening array mode every argument is a
/// [`Value::String`]. [`Value::Array`] only shows up when the parser is
/// configured with [`ArrayMode::Nested`](crate::protocol::ArrayMode::Nested).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A bulk string or inline token. Binary safe.
    String(Bytes),

    /// A nested multi-bulk array.
    Array(Vec<Value>),
}

impl Value {
    /// Creates a string value.
    pub fn string(data: impl Into<Bytes>) -> Self {
        Value::String(data.into())
    }

    /// Returns the value as UTF-8 text, if it is a string holding valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(b) => std::str::from_utf8(b).ok(),
            Value::Array(_) => None,
        }
    }

    /// Returns the raw bytes of a string value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(b) => Some(b),
            Value::Array(_) => None,
        }
    }

    /// Returns the elements of an array value.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            Value::String(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            Value::Array(values) => {
                write!(f, "[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// A decoded client request.
///
/// The command name keeps the case the client sent; dispatch uppercases a
/// copy for lookup only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// The command name, never empty.
    pub command: String,

    /// Remaining elements, in wire order.
    pub arguments: Vec<Value>,
}

impl Request {
    /// Creates a request with no arguments.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            arguments: Vec::new(),
        }
    }

    /// Creates a request with the given arguments.
    pub fn with_arguments(command: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            command: command.into(),
            arguments,
        }
    }

    /// Returns the argument at `index` as UTF-8 text.
    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.arguments.get(index).and_then(Value::as_str)
    }

    /// Returns the argument at `index` as raw bytes.
    pub fn arg_bytes(&self, index: usize) -> Option<&[u8]> {
        self.arguments.get(index).and_then(Value::as_bytes)
    }
}

/// A response to be written back to a client.
///
/// This is a closed set; serialization matches on it exhaustively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Simple strings cannot contain CRLF characters.
    /// Format: `+<string>\r\n`
    String(String),

    /// Format: `-<error message>\r\n`
    Error(String),

    /// 64-bit signed integers.
    /// Format: `:<integer>\r\n`
    Integer(i64),

    /// Binary-safe strings.
    /// Format: `$<length>\r\n<data>\r\n`
    BulkString(Bytes),

    /// Null bulk string: `$-1\r\n`
    Null,

    /// `None` is the null array (`*-1\r\n`), which clients must be able to
    /// tell apart from `Some(vec![])` (`*0\r\n`).
    /// Format: `*<count>\r\n<element1><element2>...`
    Array(Option<Vec<Response>>),
}

impl Response {
    /// Creates a new simple string response.
    ///
    /// # Example
    /// ```
    /// use flashresp::protocol::types::Response;
    /// let ok = Response::string("OK");
    /// ```
    pub fn string(s: impl Into<String>) -> Self {
        Response::String(s.into())
    }

    /// Creates a new error response.
    ///
    /// # Example
    /// ```
    /// use flashresp::protocol::types::Response;
    /// let err = Response::error("ERR unknown command");
    /// ```
    pub fn error(s: impl Into<String>) -> Self {
        Response::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        Response::Integer(n)
    }

    /// Creates a new bulk string response.
    ///
    /// # Example
    /// ```
    /// use flashresp::protocol::types::Response;
    /// use bytes::Bytes;
    /// let bulk = Response::bulk_string(Bytes::from("hello"));
    /// ```
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        Response::BulkString(data.into())
    }

    pub fn null() -> Self {
        Response::Null
    }

    /// Creates a non-null array response.
    pub fn array(values: Vec<Response>) -> Self {
        Response::Array(Some(values))
    }

    /// Creates the null array response.
    pub fn null_array() -> Self {
        Response::Array(None)
    }

    /// Common response for successful operations
    pub fn ok() -> Self {
        Response::String("OK".to_string())
    }

    /// Serializes the response to bytes for sending over the wire.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.serialize_into(&mut buf);
        buf.to_vec()
    }

    /// Serializes the response into an existing buffer.
    ///
    /// This is what the connection loop uses so the pooled write buffer is
    /// reused between responses.
    pub fn serialize_into(&self, buf: &mut BytesMut) {
        match self {
            Response::String(s) => {
                buf.put_u8(prefix::SIMPLE_STRING);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Response::Error(s) => {
                buf.put_u8(prefix::ERROR);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Response::Integer(n) => {
                buf.put_u8(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Response::BulkString(data) => {
                buf.put_u8(prefix::BULK_STRING);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            Response::Null => {
                buf.put_u8(prefix::BULK_STRING);
                buf.extend_from_slice(b"-1");
                buf.extend_from_slice(CRLF);
            }
            Response::Array(None) => {
                buf.put_u8(prefix::ARRAY);
                buf.extend_from_slice(b"-1");
                buf.extend_from_slice(CRLF);
            }
            Response::Array(Some(values)) => {
                buf.put_u8(prefix::ARRAY);
                buf.extend_from_slice(values.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    /// Returns true for the null bulk string and the null array.
    pub fn is_null(&self) -> bool {
        matches!(self, Response::Null | Response::Array(None))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }
}

/// Serializes a single response into a fresh byte vector.
pub fn serialize_response(response: impl Into<Response>) -> Vec<u8> {
    response.into().serialize()
}

/// An absent response is written as the null bulk string.
impl<T: Into<Response>> From<Option<T>> for Response {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Response::Null,
        }
    }
}

impl From<i64> for Response {
    fn from(n: i64) -> Self {
        Response::Integer(n)
    }
}

impl From<Bytes> for Response {
    fn from(data: Bytes) -> Self {
        Response::BulkString(data)
    }
}

impl From<Vec<Response>> for Response {
    fn from(values: Vec<Response>) -> Self {
        Response::Array(Some(values))
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::String(s) => write!(f, "\"{}\"", s),
            Response::Error(s) => write!(f, "(error) {}", s),
            Response::Integer(n) => write!(f, "(integer) {}", n),
            Response::BulkString(data) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    write!(f, "\"{}\"", s)
                } else {
                    write!(f, "(binary data, {} bytes)", data.len())
                }
            }
            Response::Null | Response::Array(None) => write!(f, "(nil)"),
            Response::Array(Some(values)) => {
                if values.is_empty() {
                    write!(f, "(empty array)")
                } else {
                    writeln!(f)?;
                    for (i, v) in values.iter().enumerate() {
                        writeln!(f, "{}) {}", i + 1, v)?;
                    }
                    Ok(())
                }
            }
        }
    }
}
