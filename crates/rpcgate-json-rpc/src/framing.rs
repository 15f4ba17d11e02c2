//! Stream framing shared by the streaming transports.
//!
//! Two codecs are provided for `tokio_util::codec::{FramedRead, FramedWrite}`:
//! [`MessageLineCodec`] for newline-delimited JSON (HTTP/2 streams) and
//! [`GrpcFrameCodec`] for gRPC length-prefixed frames whose payload is a
//! protobuf message with a single `bytes body = 1` field holding the JSON.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message as _;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::codec::{encode, parse};
use crate::error::{DecodeError, EncodeError};
use crate::message::Message;

/// Default cap on a single frame
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// gRPC method path of the bidirectional message stream
pub const GRPC_STREAM_PATH: &str = "/rpcgate.Gateway/OpenStream";

const GRPC_HEADER_LEN: usize = 5;

/// Protobuf payload of every gRPC frame: `message Envelope { bytes body = 1; }`
#[derive(Clone, PartialEq, prost::Message)]
pub struct Envelope {
    /// One encoded JSON-RPC message
    #[prost(bytes = "bytes", tag = "1")]
    pub body: Bytes,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {0} bytes exceeds the limit")]
    TooLarge(usize),

    #[error("compressed gRPC frames are not supported")]
    Compressed,

    #[error("malformed protobuf payload: {0}")]
    Protobuf(#[from] prost::DecodeError),

    #[error("protobuf encode error: {0}")]
    ProtobufEncode(#[from] prost::EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl From<LinesCodecError> for FrameError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::Io(e) => FrameError::Io(e),
            LinesCodecError::MaxLineLengthExceeded => FrameError::TooLarge(0),
        }
    }
}

/// One JSON message per line; blank lines are skipped
#[derive(Debug)]
pub struct MessageLineCodec {
    lines: LinesCodec,
}

impl MessageLineCodec {
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
        }
    }
}

impl Default for MessageLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageLineCodec {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        while let Some(line) = self.lines.decode(src)? {
            let line = line.trim();
            if !line.is_empty() {
                return Ok(Some(parse(line.as_bytes())?));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        while let Some(line) = self.lines.decode_eof(src)? {
            let line = line.trim();
            if !line.is_empty() {
                return Ok(Some(parse(line.as_bytes())?));
            }
        }
        Ok(None)
    }
}

impl Encoder<Message> for MessageLineCodec {
    type Error = FrameError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), FrameError> {
        let bytes = encode(&msg)?;
        dst.reserve(bytes.len() + 1);
        dst.put_slice(&bytes);
        dst.put_u8(b'\n');
        Ok(())
    }
}

/// Encode a message as a single newline-terminated frame
pub fn encode_line(msg: &Message) -> Result<Bytes, FrameError> {
    let mut buf = BytesMut::new();
    MessageLineCodec::new().encode(msg.clone(), &mut buf)?;
    Ok(buf.freeze())
}

/// gRPC length-prefixed frames carrying one JSON message each
#[derive(Debug)]
pub struct GrpcFrameCodec {
    max_frame_size: usize,
}

impl GrpcFrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for GrpcFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for GrpcFrameCodec {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        if src.len() < GRPC_HEADER_LEN {
            return Ok(None);
        }
        if src[0] != 0 {
            return Err(FrameError::Compressed);
        }
        let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if len > self.max_frame_size {
            return Err(FrameError::TooLarge(len));
        }
        if src.len() < GRPC_HEADER_LEN + len {
            src.reserve(GRPC_HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(GRPC_HEADER_LEN);
        let envelope = Envelope::decode(src.split_to(len).freeze())?;
        Ok(Some(parse(&envelope.body)?))
    }
}

impl Encoder<Message> for GrpcFrameCodec {
    type Error = FrameError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), FrameError> {
        let envelope = Envelope {
            body: Bytes::from(encode(&msg)?),
        };
        let len = envelope.encoded_len();
        if len > self.max_frame_size {
            return Err(FrameError::TooLarge(len));
        }
        dst.reserve(GRPC_HEADER_LEN + len);
        dst.put_u8(0);
        dst.put_u32(len as u32);
        envelope.encode(dst)?;
        Ok(())
    }
}

/// Encode a message as a single gRPC frame
pub fn encode_grpc_frame(msg: &Message) -> Result<Bytes, FrameError> {
    let mut buf = BytesMut::new();
    GrpcFrameCodec::new().encode(msg.clone(), &mut buf)?;
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use prost::Message as _;

    use super::*;
    use crate::types::RequestId;
    use serde_json::json;

    #[test]
    fn test_lines_split_across_chunks() {
        let mut codec = MessageLineCodec::new();
        let mut buf = BytesMut::from(&b"{\"id\":1,\"method\":\"a\"}\n\n{\"method\""[..]);

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.must_id(), &RequestId::from(1i64));
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b":\"b\"}");
        let last = codec.decode_eof(&mut buf).unwrap().unwrap();
        assert!(last.is_notify());
        assert_eq!(last.must_method(), "b");
    }

    #[test]
    fn test_bad_line_is_decode_error() {
        let mut codec = MessageLineCodec::new();
        let mut buf = BytesMut::from(&b"not json\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameError::Decode(DecodeError::Json(_)))
        ));
    }

    #[test]
    fn test_encode_line_terminates_frame() {
        let line = encode_line(&Message::result(1i64, json!(1991))).unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);
    }

    #[test]
    fn test_grpc_frame_layout() {
        let msg = Message::request(1i64, "echoAny", vec![json!(1991), json!(1992)]);
        let frame = encode_grpc_frame(&msg).unwrap();
        let json = encode(&msg).unwrap();

        assert_eq!(frame[0], 0);
        let len = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
        assert_eq!(len, frame.len() - 5);
        // field 1, wire type 2
        assert_eq!(frame[5], 0x0A);
        assert!(frame.ends_with(&json));
        let envelope = Envelope::decode(frame.slice(5..)).unwrap();
        assert_eq!(&envelope.body[..], &json[..]);
    }

    #[test]
    fn test_grpc_partial_frames() {
        let msg = Message::notify("tick", vec![json!("x".repeat(300))]);
        let frame = encode_grpc_frame(&msg).unwrap();

        let mut codec = GrpcFrameCodec::new();
        let mut buf = BytesMut::from(&frame[..3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&frame[3..200]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&frame[200..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unknown_protobuf_fields_skipped() {
        let mut payload = BytesMut::new();
        // field 2, varint 150
        payload.put_slice(&[0x10, 0x96, 0x01]);
        payload.put_slice(&Envelope { body: Bytes::from_static(b"{\"method\":\"tick\"}") }.encode_to_vec());
        // field 3, length-delimited
        payload.put_slice(&[0x1A, 0x02, 0xFF, 0xFF]);

        let mut frame = BytesMut::new();
        frame.put_u8(0);
        frame.put_u32(payload.len() as u32);
        frame.put_slice(&payload);
        let msg = GrpcFrameCodec::new().decode(&mut frame).unwrap().unwrap();
        assert_eq!(msg.must_method(), "tick");
    }

    #[test]
    fn test_truncated_envelope_rejected() {
        // body claims 16 bytes, carries 2
        let mut frame = BytesMut::from(&[0u8, 0, 0, 0, 4, 0x0A, 0x10, b'{', b'}'][..]);
        assert!(matches!(
            GrpcFrameCodec::new().decode(&mut frame),
            Err(FrameError::Protobuf(_))
        ));
    }

    #[tokio::test]
    async fn test_framed_read_over_chunked_io() {
        use futures::StreamExt;
        use tokio_util::codec::FramedRead;

        let first = Message::request(1i64, "echoAny", vec![json!(1991), json!(1992)]);
        let second = Message::notify("tick", vec![json!(2)]);
        let mut wire = BytesMut::new();
        wire.put_slice(&encode_grpc_frame(&first).unwrap());
        wire.put_slice(&encode_grpc_frame(&second).unwrap());

        // frame boundaries deliberately fall inside reads
        let io = tokio_test::io::Builder::new()
            .read(&wire[..4])
            .read(&wire[4..30])
            .read(&wire[30..])
            .build();
        let mut frames = FramedRead::new(io, GrpcFrameCodec::new());

        assert_eq!(frames.next().await.unwrap().unwrap(), first);
        assert_eq!(frames.next().await.unwrap().unwrap(), second);
        assert!(frames.next().await.is_none());
    }

    #[test]
    fn test_compressed_flag_rejected() {
        let mut codec = GrpcFrameCodec::new();
        let mut buf = BytesMut::from(&[1u8, 0, 0, 0, 0][..]);
        assert!(matches!(codec.decode(&mut buf), Err(FrameError::Compressed)));
    }
}
