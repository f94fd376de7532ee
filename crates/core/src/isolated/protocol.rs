//! Wire protocol between a parent and its isolated worker.
//!
//! Frames are length-prefixed JSON:
//! - 4 bytes: big-endian body length
//! - N bytes: JSON body
//!
//! Each connection carries exactly one request (parent to child) and one
//! response (child to parent).

#![allow(clippy::cast_possible_truncation)]

use crate::computation::TaskArgs;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Maximum frame body size (64MB).
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// What the child should run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Echoed back in the response.
    pub request_id: Uuid,
    /// Registry module defining the computation.
    pub module: String,
    /// Computation name.
    pub name: String,
    /// Computation version the parent keyed its cache with.
    pub version: String,
    /// Task arguments.
    pub args: TaskArgs,
}

/// What the child produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResponse {
    /// The computation returned a value.
    Completed {
        /// Request this answers.
        request_id: Uuid,
        /// Computed value.
        value: serde_json::Value,
        /// Time the computation took inside the child.
        elapsed: Duration,
    },
    /// The computation could not be resolved, failed, or panicked.
    Failed {
        /// Request this answers.
        request_id: Uuid,
        /// Human-readable reason.
        diagnostic: String,
    },
}

impl ExecutionResponse {
    /// Request this response answers.
    #[must_use]
    pub const fn request_id(&self) -> Uuid {
        match self {
            Self::Completed { request_id, .. } | Self::Failed { request_id, .. } => *request_id,
        }
    }
}

impl ExecutionRequest {
    /// Write this request to a stream.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or I/O fails.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> io::Result<()> {
        write_frame(writer, self).await
    }

    /// Read a request from a stream.
    ///
    /// # Errors
    ///
    /// Returns an error if I/O or deserialization fails.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Self> {
        read_frame(reader).await
    }
}

impl ExecutionResponse {
    /// Write this response to a stream.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or I/O fails.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> io::Result<()> {
        write_frame(writer, self).await
    }

    /// Read a response from a stream.
    ///
    /// # Errors
    ///
    /// Returns an error if I/O or deserialization fails.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Self> {
        read_frame(reader).await
    }
}

async fn write_frame<T: Serialize, W: AsyncWrite + Unpin>(
    writer: &mut W,
    body: &T,
) -> io::Result<()> {
    let json =
        serde_json::to_vec(body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    if json.len() > MAX_FRAME_SIZE as usize {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
    }
    let len = json.len() as u32;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&json).await?;
    writer.flush().await?;

    Ok(())
}

async fn read_frame<T: DeserializeOwned, R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<T> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);

    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;

    serde_json::from_slice(&buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;
    use tokio::io::BufReader;

    fn request() -> ExecutionRequest {
        ExecutionRequest {
            request_id: Uuid::new_v4(),
            module: "demo".into(),
            name: "double".into(),
            version: "1".into(),
            args: TaskArgs::positional([1, 2]),
        }
    }

    #[tokio::test]
    async fn test_request_write_read() {
        let msg = request();

        let mut buf = Vec::new();
        msg.write_to(&mut buf).await.unwrap();
        assert_eq!(
            u32::from_be_bytes(buf[..4].try_into().unwrap()) as usize,
            buf.len() - 4
        );

        let mut reader = BufReader::new(Cursor::new(buf));
        let read = ExecutionRequest::read_from(&mut reader).await.unwrap();
        assert_eq!(read, msg);
    }

    #[tokio::test]
    async fn test_failed_response_write_read() {
        let id = Uuid::new_v4();
        let msg = ExecutionResponse::Failed {
            request_id: id,
            diagnostic: "division by zero".into(),
        };

        let mut buf = Vec::new();
        msg.write_to(&mut buf).await.unwrap();
        let mut reader = BufReader::new(Cursor::new(buf));
        let read = ExecutionResponse::read_from(&mut reader).await.unwrap();

        assert_eq!(read.request_id(), id);
        match read {
            ExecutionResponse::Failed { diagnostic, .. } => {
                assert_eq!(diagnostic, "division by zero");
            }
            other => panic!("expected a failure, got {other:?}"),
        }
    }

    #[test]
    fn test_response_wire_shape() {
        let msg = ExecutionResponse::Completed {
            request_id: Uuid::nil(),
            value: json!(4),
            elapsed: Duration::from_millis(1500),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["status"], "completed");
        assert_eq!(value["value"], 4);
        assert_eq!(value["elapsed"]["secs"], 1);
    }

    #[tokio::test]
    async fn test_read_frame_too_large() {
        // Length header larger than MAX_FRAME_SIZE
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_SIZE + 1).to_be_bytes());
        buf.extend_from_slice(&[0u8; 100]);

        let mut reader = BufReader::new(Cursor::new(buf));
        let err = ExecutionResponse::read_from(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("frame too large"));
    }

    #[tokio::test]
    async fn test_read_invalid_json() {
        let invalid_json = b"not valid json";
        let mut buf = Vec::new();
        buf.extend_from_slice(&(invalid_json.len() as u32).to_be_bytes());
        buf.extend_from_slice(invalid_json);

        let mut reader = BufReader::new(Cursor::new(buf));
        let err = ExecutionRequest::read_from(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_truncated_frame_is_eof() {
        let mut buf = Vec::new();
        request().write_to(&mut buf).await.unwrap();
        buf.truncate(buf.len() - 3);

        let mut reader = BufReader::new(Cursor::new(buf));
        let err = ExecutionRequest::read_from(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
