//! Newline-delimited JSON codec.
//!
//! Uses LinesCodec for framing + serde_json for serialization.
//! Works over any AsyncRead/AsyncWrite (TCP sockets, pipes, in-memory duplex).

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// Default upper bound on a single frame.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame exceeds {max} bytes")]
    FrameTooLarge { max: usize },

    #[error("invalid request: frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid request: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CodecError {
    /// True when the peer sent bytes we could not turn into a message, as
    /// opposed to the transport itself failing.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::FrameTooLarge { .. } | Self::InvalidUtf8 | Self::Json(_)
        )
    }
}

/// Codec that frames messages with a trailing `\n` and serializes with JSON.
///
/// Wraps LinesCodec and adds serde_json serialization. Bytes still
/// unterminated when the stream ends are dropped, never decoded.
pub struct JsonLinesCodec<T> {
    inner: LinesCodec,
    max_frame_bytes: usize,
    _phantom: PhantomData<T>,
}

impl<T> Default for JsonLinesCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JsonLinesCodec<T> {
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_frame_bytes),
            max_frame_bytes,
            _phantom: PhantomData,
        }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    fn map_lines_error(&self, err: LinesCodecError) -> CodecError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => CodecError::FrameTooLarge {
                max: self.max_frame_bytes,
            },
            // LinesCodec reports a non-UTF-8 line as InvalidData after
            // consuming it.
            LinesCodecError::Io(e) if e.kind() == io::ErrorKind::InvalidData => {
                CodecError::InvalidUtf8
            }
            LinesCodecError::Io(e) => CodecError::Io(e),
        }
    }
}

impl<T: DeserializeOwned> Decoder for JsonLinesCodec<T> {
    type Item = T;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let line = match self.inner.decode(src) {
            Ok(Some(line)) => line,
            Ok(None) => return Ok(None),
            Err(e) => return Err(self.map_lines_error(e)),
        };
        tracing::trace!(frame_size_bytes = line.len(), "Decoding frame");
        let item = serde_json::from_str(&line)?;
        Ok(Some(item))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        if !src.is_empty() {
            tracing::debug!(
                unterminated_bytes = src.len(),
                "Peer closed mid-frame, discarding"
            );
            src.clear();
        }
        Ok(None)
    }
}

impl<T: Serialize> Encoder<T> for JsonLinesCodec<T> {
    type Error = CodecError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_string(&item)?;
        tracing::trace!(frame_size_bytes = json.len(), "Encoding frame");
        if json.len() > self.max_frame_bytes {
            return Err(CodecError::FrameTooLarge {
                max: self.max_frame_bytes,
            });
        }
        self.inner
            .encode(json, dst)
            .map_err(|e| self.map_lines_error(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::{Arguments, Command, Outcome, WireResponse};
    use serde_json::json;

    fn args(value: serde_json::Value) -> Arguments {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn codec_roundtrip_command() {
        let mut codec = JsonLinesCodec::<Command>::new();
        let mut buf = BytesMut::new();

        let cmd = Command::new("echo", args(json!({"x": 5, "nested": {"list": [1, 2]}})));
        codec.encode(cmd.clone(), &mut buf).unwrap();
        assert_eq!(buf.last(), Some(&b'\n'));

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, cmd);
        assert!(buf.is_empty());
    }

    #[test]
    fn codec_encodes_response_as_single_line() {
        let mut codec = JsonLinesCodec::<WireResponse>::new();
        let mut buf = BytesMut::new();

        let wire = Outcome::success(json!({"text": "line one\nline two"})).into_wire();
        codec.encode(wire, &mut buf).unwrap();

        let newlines = buf.iter().filter(|b| **b == b'\n').count();
        assert_eq!(newlines, 1);
        assert_eq!(buf.last(), Some(&b'\n'));
    }

    #[test]
    fn decode_waits_for_terminator() {
        let mut codec = JsonLinesCodec::<Command>::new();
        let mut buf = BytesMut::from(&br#"{"tool":"echo","argu"#[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"ments\":{}}\n");
        let cmd = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(cmd.tool, "echo");
    }

    #[test]
    fn decode_tolerates_crlf() {
        let mut codec = JsonLinesCodec::<Command>::new();
        let mut buf = BytesMut::from(&b"{\"tool\":\"ping\"}\r\n"[..]);
        let cmd = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(cmd.tool, "ping");
    }

    #[test]
    fn decode_rejects_malformed_json() {
        let mut codec = JsonLinesCodec::<Command>::new();
        let mut buf = BytesMut::from(&b"{not json}\n"[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(err.is_decode_error());
        assert!(matches!(err, CodecError::Json(_)));
    }

    #[test]
    fn decode_rejects_missing_tool() {
        let mut codec = JsonLinesCodec::<Command>::new();
        let mut buf = BytesMut::from(&b"{\"arguments\":{}}\n"[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(err.is_decode_error());
        assert!(err.to_string().contains("tool"));
    }

    #[test]
    fn decode_rejects_oversize_frame() {
        let mut codec = JsonLinesCodec::<Command>::with_max_frame_bytes(16);
        let mut buf = BytesMut::from(&b"{\"tool\":\"a_rather_long_tool_name\"}\n"[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge { max: 16 }));
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        let mut codec = JsonLinesCodec::<Command>::new();
        let mut buf = BytesMut::from(&b"{\"tool\":\"\xff\xfe\"}\n{\"tool\":\"ok\"}\n"[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, CodecError::InvalidUtf8));
        assert!(err.is_decode_error());

        // The bad line is consumed; the next frame is intact.
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().tool, "ok");
    }

    #[test]
    fn decode_eof_discards_unterminated_bytes() {
        let mut codec = JsonLinesCodec::<Command>::new();
        let mut buf = BytesMut::from(&b"{\"tool\":\"echo\"}"[..]);
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_yields_frames_in_order() {
        let mut codec = JsonLinesCodec::<Command>::new();
        let mut buf = BytesMut::from(&b"{\"tool\":\"a\"}\n{\"tool\":\"b\"}\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().tool, "a");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().tool, "b");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
