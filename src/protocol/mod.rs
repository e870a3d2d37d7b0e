//! RESP Protocol Implementation
//!
//! This module provides the wire side of the engine: decoding requests and
//! encoding responses for the Redis Serialization Protocol (RESP).
//!
//! ## Modules
//!
//! - `types`: `Request`, `Value` and the `Response` enum with its serialization
//! - `parser`: incremental request parser
//! - `writer`: `ResponseWriter`, the per-connection response facade
//!
//! ## Example
//!
//! ```ignore
//! use flashresp::protocol::{parse_request, Response};
//! use bytes::Bytes;
//!
//! // Parsing incoming data
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (request, consumed) = parse_request(data).unwrap().unwrap();
//!
//! // Creating responses
//! let response = Response::bulk_string(Bytes::from("Ariz"));
//! let bytes = response.serialize();
//! ```

pub mod parser;
pub mod types;
pub mod writer;

// Re-export commonly used types for convenience
pub use parser::{parse_request, ArrayMode, ParseError, ParseResult, RequestParser};
pub use types::{serialize_response, Request, Response, Value};
pub use writer::ResponseWriter;
