//! Response Writer
//!
//! [`ResponseWriter`] is what handlers and the bad-request callback use to
//! answer a client. Each call serializes one response into the
//! connection's pooled write buffer, writes it to the socket and flushes.
//! Nothing is batched across calls, so a response is on the wire as soon
//! as its write returns.

use crate::connection::pool::PooledBuffer;
use crate::protocol::types::Response;
use bytes::Bytes;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Per-connection facade for writing responses.
pub struct ResponseWriter {
    sink: Box<dyn AsyncWrite + Unpin + Send>,
    buf: PooledBuffer,
    bytes_written: u64,
}

impl ResponseWriter {
    /// Creates a writer over `sink`, serializing through `buf`.
    pub fn new<W>(sink: W, buf: PooledBuffer) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            sink: Box::new(sink),
            buf,
            bytes_written: 0,
        }
    }

    /// Writes and flushes one response.
    ///
    /// Accepts anything convertible into a [`Response`]; `None` is written
    /// as the null bulk string.
    pub async fn write_response(&mut self, response: impl Into<Response>) -> io::Result<()> {
        let response = response.into();

        self.buf.clear();
        response.serialize_into(&mut self.buf);

        self.sink.write_all(&self.buf).await?;
        self.sink.flush().await?;

        let len = self.buf.len();
        self.bytes_written += len as u64;
        self.buf.clear();

        trace!(bytes = len, "Sent response");
        Ok(())
    }

    /// Writes a simple string: `+<value>\r\n`
    pub async fn write_string(&mut self, value: impl Into<String>) -> io::Result<()> {
        self.write_response(Response::String(value.into())).await
    }

    /// Writes an error: `-<value>\r\n`
    pub async fn write_error(&mut self, value: impl Into<String>) -> io::Result<()> {
        self.write_response(Response::Error(value.into())).await
    }

    pub async fn write_int(&mut self, value: i64) -> io::Result<()> {
        self.write_response(Response::Integer(value)).await
    }

    pub async fn write_bulk_string(&mut self, value: impl Into<Bytes>) -> io::Result<()> {
        self.write_response(Response::BulkString(value.into())).await
    }

    pub async fn write_null(&mut self) -> io::Result<()> {
        self.write_response(Response::Null).await
    }

    /// Writes an array; `None` is the null array.
    pub async fn write_array(&mut self, values: Option<Vec<Response>>) -> io::Result<()> {
        self.write_response(Response::Array(values)).await
    }

    /// Total bytes this writer has put on the wire.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn writer_over(mock: tokio_test::io::Mock) -> ResponseWriter {
        ResponseWriter::new(mock, PooledBuffer::unpooled(64))
    }

    #[tokio::test]
    async fn test_each_write_reaches_the_sink() {
        let mock = Builder::new()
            .write(b"+OK\r\n")
            .write(b"-ERR boom\r\n")
            .write(b":42\r\n")
            .write(b"$5\r\nhello\r\n")
            .write(b"$-1\r\n")
            .build();
        let mut writer = writer_over(mock);

        writer.write_string("OK").await.unwrap();
        writer.write_error("ERR boom").await.unwrap();
        writer.write_int(42).await.unwrap();
        writer.write_bulk_string("hello").await.unwrap();
        writer.write_null().await.unwrap();

        assert_eq!(writer.bytes_written(), 5 + 11 + 5 + 11 + 5);
    }

    #[tokio::test]
    async fn test_absent_response_writes_null() {
        let mock = Builder::new().write(b"$-1\r\n").build();
        let mut writer = writer_over(mock);
        writer.write_response(None::<Response>).await.unwrap();
    }

    #[tokio::test]
    async fn test_arrays() {
        let mock = Builder::new()
            .write(b"*-1\r\n")
            .write(b"*0\r\n")
            .write(b"*2\r\n:1\r\n+two\r\n")
            .build();
        let mut writer = writer_over(mock);

        writer.write_array(None).await.unwrap();
        writer.write_array(Some(vec![])).await.unwrap();
        writer
            .write_array(Some(vec![Response::integer(1), Response::string("two")]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_write_error_propagates() {
        let mock = Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            .build();
        let mut writer = writer_over(mock);

        let err = writer.write_string("OK").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(writer.bytes_written(), 0);
    }
}
