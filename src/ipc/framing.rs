//! Content-Length message framing for agent frames.
//!
//! Same header scheme as the Language Server Protocol, which gives reliable
//! message boundaries over a stream socket.
//!
//! # Wire Format
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <message-body>
//! ```
//!
//! Header names are matched case-insensitively and both CRLF and LF line
//! endings are accepted.

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame body size (16MB). Agent payloads are result pages, not bulk data.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Read one Content-Length framed message.
///
/// Returns `Ok(None)` on a clean EOF before any header byte, so the caller
/// can tell an orderly close from a truncated frame.
///
/// # Errors
///
/// Returns an error if:
/// - The stream ends in the middle of a frame
/// - No Content-Length header is found
/// - Content-Length exceeds [`MAX_MESSAGE_SIZE`]
/// - The body is not valid UTF-8
pub async fn read_message<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;

    loop {
        let mut line = String::new();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .context("Failed to read header line")?;

        if bytes_read == 0 {
            if saw_header {
                return Err(anyhow!("Connection closed mid-frame"));
            }
            return Ok(None);
        }
        saw_header = true;

        let trimmed = line.trim();

        // Empty line ends the header block
        if trimmed.is_empty() {
            break;
        }

        if let Some((key, value)) = trimmed.split_once(':') {
            if key.trim().eq_ignore_ascii_case("Content-Length") {
                let value = value.trim();
                content_length = Some(
                    value
                        .parse()
                        .with_context(|| format!("Invalid Content-Length value: {}", value))?,
                );
            }
        }
    }

    let size = content_length.ok_or_else(|| anyhow!("Missing Content-Length header"))?;

    if size > MAX_MESSAGE_SIZE {
        return Err(anyhow!(
            "Message size {} exceeds maximum {} bytes",
            size,
            MAX_MESSAGE_SIZE
        ));
    }

    let mut body = vec![0u8; size];
    reader
        .read_exact(&mut body)
        .await
        .context("Failed to read message body")?;

    String::from_utf8(body)
        .map(Some)
        .context("Message body is not valid UTF-8")
}

/// Write one Content-Length framed message and flush it.
pub async fn write_message<W>(writer: &mut W, body: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body_bytes = body.as_bytes();
    let header = format!("Content-Length: {}\r\n\r\n", body_bytes.len());

    writer
        .write_all(header.as_bytes())
        .await
        .context("Failed to write message header")?;

    writer
        .write_all(body_bytes)
        .await
        .context("Failed to write message body")?;

    writer.flush().await.context("Failed to flush message")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::BufReader;
    use tokio::net::UnixStream;
    use tokio::time::timeout;

    /// Test timeout to prevent hanging tests.
    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let (agent, mut client) = UnixStream::pair().expect("Failed to create socket pair");

        let message = r#"{"type":"call","id":1,"event":"node:topology","args":[]}"#;
        write_message(&mut client, message)
            .await
            .expect("Write failed");

        let mut reader = BufReader::new(agent);
        let received = timeout(TEST_TIMEOUT, read_message(&mut reader))
            .await
            .expect("Test timed out")
            .expect("Read failed");

        assert_eq!(received.as_deref(), Some(message));
    }

    #[tokio::test]
    async fn test_read_missing_content_length() {
        let (agent, mut client) = UnixStream::pair().expect("Failed to create socket pair");

        client
            .write_all(b"Content-Type: application/json\r\n\r\n")
            .await
            .expect("Write failed");
        drop(client);

        let mut reader = BufReader::new(agent);
        let result = timeout(TEST_TIMEOUT, read_message(&mut reader))
            .await
            .expect("Test timed out");

        let err_msg = result.unwrap_err().to_string();
        assert!(
            err_msg.contains("Missing Content-Length"),
            "Expected 'Missing Content-Length' error, got: {}",
            err_msg
        );
    }

    #[tokio::test]
    async fn test_read_lf_and_lowercase_header() {
        let (agent, mut client) = UnixStream::pair().expect("Failed to create socket pair");

        let body = r#"{"type":"link_closed"}"#;
        let raw = format!("content-length: {}\n\n{}", body.len(), body);
        client
            .write_all(raw.as_bytes())
            .await
            .expect("Write failed");

        let mut reader = BufReader::new(agent);
        let received = timeout(TEST_TIMEOUT, read_message(&mut reader))
            .await
            .expect("Test timed out")
            .expect("Read failed");

        assert_eq!(received.as_deref(), Some(body));
    }

    #[tokio::test]
    async fn test_read_rejects_oversized_message() {
        let (agent, mut client) = UnixStream::pair().expect("Failed to create socket pair");

        let raw = format!("Content-Length: {}\r\n\r\n", MAX_MESSAGE_SIZE + 1);
        client
            .write_all(raw.as_bytes())
            .await
            .expect("Write failed");

        let mut reader = BufReader::new(agent);
        let result = timeout(TEST_TIMEOUT, read_message(&mut reader))
            .await
            .expect("Test timed out");

        let err_msg = result.unwrap_err().to_string();
        assert!(
            err_msg.contains("exceeds maximum"),
            "Expected size error, got: {}",
            err_msg
        );
    }

    #[tokio::test]
    async fn test_clean_eof_is_none() {
        let (agent, client) = UnixStream::pair().expect("Failed to create socket pair");
        drop(client);

        let mut reader = BufReader::new(agent);
        let result = timeout(TEST_TIMEOUT, read_message(&mut reader))
            .await
            .expect("Test timed out")
            .expect("Clean EOF should not be an error");

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_error() {
        let (agent, mut client) = UnixStream::pair().expect("Failed to create socket pair");

        client
            .write_all(b"Content-Length: 10\r\n")
            .await
            .expect("Write failed");
        drop(client);

        let mut reader = BufReader::new(agent);
        let result = timeout(TEST_TIMEOUT, read_message(&mut reader))
            .await
            .expect("Test timed out");

        assert!(result.unwrap_err().to_string().contains("mid-frame"));
    }
}
