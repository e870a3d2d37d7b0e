//! Incremental RESP Request Parser
//!
//! This module decodes client requests out of a connection's read buffer.
//!
//! ## How the Parser Works
//!
//! The parser reads from a buffer and returns either:
//! - `Ok(Some((request, consumed)))` - Decoded one request, `consumed` bytes were used
//! - `Ok(None)` - Need more data, the request is incomplete
//! - `Err(ParseError)` - Invalid protocol data
//!
//! This design allows the caller to:
//! 1. Append incoming network data to a buffer
//! 2. Call `parse()` to attempt parsing
//! 3. If successful, advance the buffer by `consumed` bytes
//! 4. If incomplete, wait for more data
//! 5. If error, report it and disconnect the client
//!
//! ## Request Grammar
//!
//! The first byte of the first line selects the framing:
//!
//! - `+PING\r\n` - a command with no arguments
//! - `$4\r\nPING\r\n` - a single bulk string used as the command
//! - `*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n` - a multi-bulk command
//! - anything else - an inline command split on single spaces
//!
//! Lines end at `\n`; a preceding `\r` is stripped. Bulk payloads must be
//! followed by exactly `\r\n`.

use crate::protocol::types::{prefix, Request, Value, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during request parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// A length or count field is not a non-negative integer
    #[error("invalid length: {0:?}")]
    InvalidLength(String),

    /// A bulk payload was not followed by CRLF
    #[error("invalid bulk string: missing CRLF terminator")]
    MissingTerminator,

    /// The first element of a multi-bulk request is not a string
    #[error("command type is not string: {0}")]
    NonStringCommand(String),

    /// An array element starts with something other than `*` or `$`
    #[error("invalid first byte in line {0:?}")]
    UnexpectedElement(String),

    /// The request carried no command name
    #[error("empty command")]
    EmptyCommand,

    /// The command name is not valid UTF-8
    #[error("invalid UTF-8 in command: {0}")]
    InvalidUtf8(String),

    /// The bulk string exceeds the maximum allowed size
    #[error("bulk string too large: {size} bytes (max: {max})")]
    BulkTooLarge { size: usize, max: usize },

    /// No line terminator within the allowed line length
    #[error("line too long: no newline within {0} bytes")]
    LineTooLong(usize),

    /// Arrays are nested deeper than allowed
    #[error("maximum nesting depth exceeded: {0}")]
    NestingTooDeep(usize),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Longest header or inline line accepted (64 KB, the Redis inline limit)
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Maximum array nesting depth (prevent stack overflow)
pub const MAX_NESTING_DEPTH: usize = 32;

/// How sub-arrays inside a multi-bulk request are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArrayMode {
    /// Splice a sub-array's elements into the parent at its position.
    /// `*2\r\n$1\r\na\r\n*2\r\n$1\r\nb\r\n$1\r\nc\r\n` decodes to `a b c`.
    #[default]
    Flatten,

    /// Keep each sub-array as a single [`Value::Array`].
    Nested,
}

/// A RESP request parser.
///
/// Multi-bulk requests that arrive in pieces are decoded incrementally:
/// after `Ok(None)` the parser remembers how far it got, so the next call
/// must be given the same bytes with more appended.
///
/// # Example
///
/// ```ignore
/// use flashresp::protocol::parser::RequestParser;
/// use bytes::{Buf, BytesMut};
///
/// let mut parser = RequestParser::new();
/// let mut buffer = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n"[..]);
///
/// if let Some((request, consumed)) = parser.parse(&buffer)? {
///     buffer.advance(consumed);
///     println!("Parsed: {:?}", request);
/// }
/// ```
#[derive(Debug)]
pub struct RequestParser {
    mode: ArrayMode,
    max_bulk_size: usize,
    /// Multi-bulk request decoded part way
    pending: Option<PendingArray>,
}

/// Progress through a multi-bulk request that is not fully buffered yet.
#[derive(Debug)]
struct PendingArray {
    /// Open arrays, outermost first
    frames: Vec<Frame>,
    /// Bytes of the request decoded so far
    offset: usize,
}

#[derive(Debug)]
struct Frame {
    remaining: usize,
    items: Vec<Value>,
}

impl Frame {
    fn new(count: usize) -> Self {
        Self {
            remaining: count,
            items: Vec::with_capacity(count.min(64)),
        }
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    /// Creates a parser that flattens nested arrays.
    pub fn new() -> Self {
        Self::with_mode(ArrayMode::Flatten)
    }

    pub fn with_mode(mode: ArrayMode) -> Self {
        Self {
            mode,
            max_bulk_size: MAX_BULK_SIZE,
            pending: None,
        }
    }

    /// Rejects bulk strings declared longer than `max` as soon as their
    /// header is read.
    pub fn with_max_bulk_size(mut self, max: usize) -> Self {
        self.max_bulk_size = max;
        self
    }

    pub fn mode(&self) -> ArrayMode {
        self.mode
    }

    pub fn max_bulk_size(&self) -> usize {
        self.max_bulk_size
    }

    /// Attempts to decode one request from the front of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
        let mut state = match self.pending.take() {
            Some(pending) if pending.offset <= buf.len() => pending,
            _ => {
                let (line, consumed) = match read_line(buf)? {
                    Some(found) => found,
                    None => return Ok(None),
                };

                let first = match line.first() {
                    Some(b) => *b,
                    None => return Err(ParseError::EmptyCommand),
                };

                match first {
                    prefix::SIMPLE_STRING => {
                        return Ok(Some((Request::new(command_name(&line[1..])?), consumed)))
                    }
                    prefix::BULK_STRING => {
                        let length = parse_length(&line[1..])?;
                        return match read_bulk(&buf[consumed..], length, self.max_bulk_size)? {
                            Some((data, used)) => {
                                Ok(Some((Request::new(command_name(&data)?), consumed + used)))
                            }
                            None => Ok(None),
                        };
                    }
                    prefix::ARRAY => PendingArray {
                        frames: vec![Frame::new(parse_length(&line[1..])?)],
                        offset: consumed,
                    },
                    _ => return Ok(Some((parse_inline(line)?, consumed))),
                }
            }
        };

        match self.read_array(buf, &mut state)? {
            Some(elements) => Ok(Some((into_request(elements)?, state.offset))),
            None => {
                self.pending = Some(state);
                Ok(None)
            }
        }
    }

    /// Decodes array elements from `buf` starting at `state.offset`.
    ///
    /// Returns the outermost array's elements once it is complete, or
    /// `None` if `buf` ends early. `state` then records the progress made.
    fn read_array(&self, buf: &[u8], state: &mut PendingArray) -> ParseResult<Option<Vec<Value>>> {
        loop {
            let Some(frame) = state.frames.last_mut() else {
                return Err(ParseError::EmptyCommand);
            };

            if frame.remaining == 0 {
                let items = std::mem::take(&mut frame.items);
                state.frames.pop();
                match state.frames.last_mut() {
                    None => return Ok(Some(items)),
                    Some(parent) => match self.mode {
                        ArrayMode::Flatten => parent.items.extend(items),
                        ArrayMode::Nested => parent.items.push(Value::Array(items)),
                    },
                }
                continue;
            }

            let (line, used) = match read_line(&buf[state.offset..])? {
                Some(found) => found,
                None => return Ok(None),
            };

            match line.first() {
                Some(&prefix::ARRAY) => {
                    let count = parse_length(&line[1..])?;
                    frame.remaining -= 1;
                    if state.frames.len() >= MAX_NESTING_DEPTH {
                        return Err(ParseError::NestingTooDeep(MAX_NESTING_DEPTH));
                    }
                    state.offset += used;
                    state.frames.push(Frame::new(count));
                }
                Some(&prefix::BULK_STRING) => {
                    let length = parse_length(&line[1..])?;
                    let body = &buf[state.offset + used..];
                    match read_bulk(body, length, self.max_bulk_size)? {
                        Some((data, len)) => {
                            frame.items.push(Value::String(data));
                            frame.remaining -= 1;
                            state.offset += used + len;
                        }
                        None => return Ok(None),
                    }
                }
                _ => {
                    return Err(ParseError::UnexpectedElement(
                        String::from_utf8_lossy(line).into_owned(),
                    ))
                }
            }
        }
    }
}

/// Finds the next line in `buf`.
///
/// Returns the line without its terminator and the number of bytes used
/// including the terminator. Only the first [`MAX_LINE_LENGTH`] bytes are
/// searched for the terminator.
#[inline]
fn read_line(buf: &[u8]) -> ParseResult<Option<(&[u8], usize)>> {
    let window = &buf[..buf.len().min(MAX_LINE_LENGTH + 1)];
    match window.iter().position(|&b| b == b'\n') {
        Some(newline) => {
            let line = &buf[..newline];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            Ok(Some((line, newline + 1)))
        }
        None if buf.len() > MAX_LINE_LENGTH => Err(ParseError::LineTooLong(MAX_LINE_LENGTH)),
        None => Ok(None),
    }
}

/// Reads `length` payload bytes followed by CRLF.
fn read_bulk(buf: &[u8], length: usize, max: usize) -> ParseResult<Option<(Bytes, usize)>> {
    if length > max {
        return Err(ParseError::BulkTooLarge { size: length, max });
    }

    let total_needed = length + CRLF.len();
    if buf.len() < total_needed {
        return Ok(None);
    }

    if &buf[length..total_needed] != CRLF {
        return Err(ParseError::MissingTerminator);
    }

    Ok(Some((Bytes::copy_from_slice(&buf[..length]), total_needed)))
}

fn parse_length(field: &[u8]) -> ParseResult<usize> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| ParseError::InvalidLength(String::from_utf8_lossy(field).into_owned()))
}

fn command_name(raw: &[u8]) -> ParseResult<String> {
    if raw.is_empty() {
        return Err(ParseError::EmptyCommand);
    }
    std::str::from_utf8(raw)
        .map(str::to_owned)
        .map_err(|e| ParseError::InvalidUtf8(e.to_string()))
}

/// Splits a decoded multi-bulk sequence into command and arguments.
fn into_request(elements: Vec<Value>) -> ParseResult<Request> {
    let mut elements = elements.into_iter();
    let command = match elements.next() {
        Some(Value::String(data)) => command_name(&data)?,
        Some(other) => return Err(ParseError::NonStringCommand(other.to_string())),
        None => return Err(ParseError::EmptyCommand),
    };
    Ok(Request::with_arguments(command, elements.collect()))
}

/// Inline commands are split on single spaces with no quoting, so
/// `SET  k` carries an empty first argument.
fn parse_inline(line: &[u8]) -> ParseResult<Request> {
    let mut tokens = line.split(|&b| b == b' ');
    let command = command_name(tokens.next().unwrap_or_default())?;
    let arguments = tokens
        .map(|token| Value::String(Bytes::copy_from_slice(token)))
        .collect();
    Ok(Request::with_arguments(command, arguments))
}

/// Helper function to parse a single request from bytes.
///
/// This is a convenience function for simple use cases.
pub fn parse_request(buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
    RequestParser::new().parse(buf)
}
