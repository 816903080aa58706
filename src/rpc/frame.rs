//! Newline-delimited JSON frames exchanged with the worker.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, Lines};

/// Frames larger than this are treated as a protocol violation.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Client call expecting exactly one `Response` or `Error` with the same id.
    Request {
        id: u64,
        method: String,
        args: Vec<Value>,
    },
    /// Client message with no reply.
    Notify { method: String, args: Vec<Value> },
    /// Worker reply: the `(success, payload)` pair for call `id`.
    Response {
        id: u64,
        success: bool,
        #[serde(default)]
        payload: Vec<Value>,
    },
    /// Worker could not dispatch call `id` at all.
    Error { id: u64, message: String },
    Heartbeat,
}

impl Frame {
    /// Serialize as a single line, newline included.
    pub fn encode(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn decode(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

/// Read the next well-formed frame. Blank and malformed lines are skipped;
/// `Ok(None)` means the peer closed the stream. Cancel safe.
pub async fn next_frame<R>(lines: &mut Lines<R>) -> std::io::Result<Option<Frame>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let Some(line) = lines.next_line().await? else {
            return Ok(None);
        };
        if line.len() > MAX_FRAME_BYTES {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("frame of {} bytes exceeds limit", line.len()),
            ));
        }
        if line.trim().is_empty() {
            continue;
        }
        match Frame::decode(&line) {
            Ok(frame) => return Ok(Some(frame)),
            Err(e) => {
                tracing::warn!("skipping malformed frame from worker: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[test]
    fn request_wire_shape() {
        let frame = Frame::Request {
            id: 7,
            method: "encrypt".into(),
            args: vec![json!("/in"), json!("/out")],
        };
        let line = frame.encode().unwrap();
        assert!(line.ends_with('\n'));
        let value: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(
            value,
            json!({"type": "request", "id": 7, "method": "encrypt", "args": ["/in", "/out"]})
        );
    }

    #[test]
    fn response_payload_defaults_to_empty() {
        let frame = Frame::decode(r#"{"type":"response","id":3,"success":true}"#).unwrap();
        assert_eq!(
            frame,
            Frame::Response {
                id: 3,
                success: true,
                payload: vec![]
            }
        );
    }

    #[tokio::test]
    async fn next_frame_skips_noise_and_reports_eof() {
        let mock = tokio_test::io::Builder::new()
            .read(b"\n")
            .read(b"not json\n")
            .read(b"{\"type\":\"heartbeat\"}\n")
            .read(
                b"{\"type\":\"response\",\"id\":1,\"success\":false,\
                  \"payload\":[\"bad path\"]}\n",
            )
            .build();
        let mut lines = BufReader::new(mock).lines();

        assert_eq!(next_frame(&mut lines).await.unwrap(), Some(Frame::Heartbeat));
        assert_eq!(
            next_frame(&mut lines).await.unwrap(),
            Some(Frame::Response {
                id: 1,
                success: false,
                payload: vec![json!("bad path")]
            })
        );
        assert_eq!(next_frame(&mut lines).await.unwrap(), None);
    }

    #[tokio::test]
    async fn next_frame_joins_split_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"{\"type\":\"error\",")
            .read(b"\"id\":9,\"message\":\"unknown method\"}\n")
            .build();
        let mut lines = BufReader::new(mock).lines();

        assert_eq!(
            next_frame(&mut lines).await.unwrap(),
            Some(Frame::Error {
                id: 9,
                message: "unknown method".into()
            })
        );
    }
}
