//! DISTB01 frame protocol.
//!
//! A hybrid frame-based protocol inspired by MDP (Majordomo Protocol) for ZMQ
//! messaging. Enables routing without deserialization, efficient heartbeats,
//! and native binary payloads, carrying the call-orchestrator's header block
//! (§3) instead of a fixed message catalog.
//!
//! ## Wire Format
//!
//! A DISTB01 message is a 7-frame ZMQ multipart message:
//!
//! ```text
//! Frame 0: Protocol version    "DISTB01" (7 bytes)
//! Frame 1: Command             2 bytes (big-endian u16)
//! Frame 2: Content-Type        2 bytes (big-endian u16)
//! Frame 3: Request ID          16 bytes (UUID) - the call identifier (§3)
//! ─── fixed-width above / variable-width below ───
//! Frame 4: Method name          UTF-8 string (variable)
//! Frame 5: Traceparent          UTF-8 string (variable, or empty)
//! Frame 6: Body                 bytes (interpretation per Content-Type)
//! ```
//!
//! The request header (`sender_name`, `sender_id`, `build_id`, `checksum`)
//! from §3 is not a separate frame - it travels inside the msgpack-encoded
//! body alongside the application payload (see [`crate::envelope`]), so the
//! core never needs to special-case it at the framing layer.
//!
//! ## ROUTER Socket Handling
//!
//! When using ROUTER sockets, ZMQ prepends identity frame(s). We scan for
//! `DISTB01` to find frame 0, preserving identity frames for reply routing.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

/// Protocol version - bump on breaking changes.
pub const PROTOCOL_VERSION: &[u8] = b"DISTB01";

/// Number of frames in a DISTB01 message (excluding identity prefix).
pub const FRAME_COUNT: usize = 7;

/// Command types for the DISTB01 protocol (2 bytes, big-endian).
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Request from caller to peer (maps to §4.D's `call`).
    Request = 0x0001,
    /// Reply from peer back to caller.
    Reply = 0x0002,
    /// Bidirectional liveness probe (§4.C).
    Heartbeat = 0x0003,
    /// Graceful shutdown notification.
    Disconnect = 0x0004,
}

impl Command {
    pub fn from_u16(value: u16) -> Result<Self, FrameError> {
        match value {
            0x0001 => Ok(Command::Request),
            0x0002 => Ok(Command::Reply),
            0x0003 => Ok(Command::Heartbeat),
            0x0004 => Ok(Command::Disconnect),
            other => Err(FrameError::InvalidCommand(other)),
        }
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// Content type for body interpretation (2 bytes, big-endian).
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// No body (heartbeats, simple acks).
    Empty = 0x0000,
    /// MsgPack-encoded payload.
    MsgPack = 0x0001,
    /// Dispatched exception (§4.F step 4, §4.D classification).
    Exception = 0x0002,
}

impl ContentType {
    pub fn from_u16(value: u16) -> Result<Self, FrameError> {
        match value {
            0x0000 => Ok(ContentType::Empty),
            0x0001 => Ok(ContentType::MsgPack),
            0x0002 => Ok(ContentType::Exception),
            other => Err(FrameError::InvalidContentType(other)),
        }
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// A parsed DISTB01 multipart ZMQ message.
#[derive(Debug, Clone)]
pub struct Frame {
    pub command: Command,
    pub content_type: ContentType,
    /// The call identifier (§3: "a fresh 128-bit identifier at creation").
    pub request_id: Uuid,
    pub method: String,
    pub traceparent: Option<String>,
    pub body: Bytes,
}

/// Errors during frame parsing.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid protocol version: expected DISTB01")]
    InvalidProtocol,
    #[error("missing frame: {0}")]
    MissingFrame(&'static str),
    #[error("invalid command: {0:#06x}")]
    InvalidCommand(u16),
    #[error("invalid content type: {0:#06x}")]
    InvalidContentType(u16),
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("invalid UUID in request ID")]
    InvalidUuid,
    #[error("msgpack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
    #[error("msgpack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),
    #[error("content type mismatch: expected {expected:?}, got {actual:?}")]
    ContentTypeMismatch {
        expected: ContentType,
        actual: ContentType,
    },
    #[error("frame too short: expected {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },
}

impl Frame {
    /// Parse a list of frame bytes into a `Frame`.
    pub fn from_frames(frames: &[Bytes]) -> Result<Self, FrameError> {
        let (_, frame) = Self::from_frames_with_identity(frames)?;
        Ok(frame)
    }

    /// Parse frames, returning identity frames separately (for ROUTER socket
    /// replies).
    pub fn from_frames_with_identity(frames: &[Bytes]) -> Result<(Vec<Bytes>, Self), FrameError> {
        let proto_idx = frames
            .iter()
            .position(|f| f.as_ref() == PROTOCOL_VERSION)
            .ok_or(FrameError::InvalidProtocol)?;

        let identity: Vec<Bytes> = frames[..proto_idx].to_vec();
        let body_frames = &frames[proto_idx..];
        if body_frames.len() < FRAME_COUNT {
            return Err(FrameError::MissingFrame("insufficient frames after DISTB01"));
        }

        let cmd_frame = &body_frames[1];
        if cmd_frame.len() < 2 {
            return Err(FrameError::FrameTooShort {
                expected: 2,
                actual: cmd_frame.len(),
            });
        }
        let command = Command::from_u16(u16::from_be_bytes([cmd_frame[0], cmd_frame[1]]))?;

        let ctype_frame = &body_frames[2];
        if ctype_frame.len() < 2 {
            return Err(FrameError::FrameTooShort {
                expected: 2,
                actual: ctype_frame.len(),
            });
        }
        let content_type =
            ContentType::from_u16(u16::from_be_bytes([ctype_frame[0], ctype_frame[1]]))?;

        let reqid_frame = &body_frames[3];
        if reqid_frame.len() < 16 {
            return Err(FrameError::FrameTooShort {
                expected: 16,
                actual: reqid_frame.len(),
            });
        }
        let request_id =
            Uuid::from_slice(&reqid_frame[..16]).map_err(|_| FrameError::InvalidUuid)?;

        let method = std::str::from_utf8(&body_frames[4])
            .map_err(|_| FrameError::InvalidUtf8("method"))?
            .to_string();

        let trace_bytes = &body_frames[5];
        let traceparent = if trace_bytes.is_empty() {
            None
        } else {
            Some(
                std::str::from_utf8(trace_bytes)
                    .map_err(|_| FrameError::InvalidUtf8("traceparent"))?
                    .to_string(),
            )
        };

        let body = body_frames[6].clone();

        Ok((
            identity,
            Frame {
                command,
                content_type,
                request_id,
                method,
                traceparent,
                body,
            },
        ))
    }

    /// Serialize to a list of frame bytes (7 frames).
    pub fn to_frames(&self) -> Vec<Bytes> {
        let mut frames = Vec::with_capacity(FRAME_COUNT);

        frames.push(Bytes::from_static(PROTOCOL_VERSION));

        let mut cmd_buf = BytesMut::with_capacity(2);
        cmd_buf.put_u16(self.command.to_u16());
        frames.push(cmd_buf.freeze());

        let mut ctype_buf = BytesMut::with_capacity(2);
        ctype_buf.put_u16(self.content_type.to_u16());
        frames.push(ctype_buf.freeze());

        frames.push(Bytes::copy_from_slice(self.request_id.as_bytes()));
        frames.push(Bytes::from(self.method.clone()));
        frames.push(
            self.traceparent
                .as_ref()
                .map(|t| Bytes::from(t.clone()))
                .unwrap_or_else(Bytes::new),
        );
        frames.push(self.body.clone());

        frames
    }

    /// Serialize with identity prefix (for ROUTER socket replies).
    pub fn to_frames_with_identity(&self, identity: &[Bytes]) -> Vec<Bytes> {
        let mut frames = identity.to_vec();
        frames.extend(self.to_frames());
        frames
    }

    /// Create a heartbeat frame (ContentType::Empty, no body) for a given
    /// call identifier - the heartbeat supervisor dispatches it through the
    /// same orchestrator path as any other call (§4.C).
    pub fn heartbeat(method: &str, request_id: Uuid) -> Self {
        Self {
            command: Command::Heartbeat,
            content_type: ContentType::Empty,
            request_id,
            method: method.to_string(),
            traceparent: None,
            body: Bytes::new(),
        }
    }

    /// Create a request frame with a msgpack-encoded body.
    pub fn request<T: Serialize>(
        method: &str,
        request_id: Uuid,
        payload: &T,
    ) -> Result<Self, FrameError> {
        let body = rmp_serde::to_vec_named(payload)?;
        Ok(Self {
            command: Command::Request,
            content_type: ContentType::MsgPack,
            request_id,
            method: method.to_string(),
            traceparent: None,
            body: Bytes::from(body),
        })
    }

    /// Create a request frame from an already-encoded msgpack body. Used by
    /// the transport reactor, which only ever handles bytes the orchestrator
    /// has already serialized with the request header attached.
    pub fn request_with_body(method: &str, request_id: Uuid, body: Bytes) -> Self {
        Self {
            command: Command::Request,
            content_type: ContentType::MsgPack,
            request_id,
            method: method.to_string(),
            traceparent: None,
            body,
        }
    }

    /// Create a reply frame with a msgpack-encoded body.
    pub fn reply<T: Serialize>(request_id: Uuid, payload: &T) -> Result<Self, FrameError> {
        let body = rmp_serde::to_vec_named(payload)?;
        Ok(Self {
            command: Command::Reply,
            content_type: ContentType::MsgPack,
            request_id,
            method: String::new(),
            traceparent: None,
            body: Bytes::from(body),
        })
    }

    /// Create a reply frame from an already-encoded msgpack body (the
    /// Server Dispatcher already has the handler's encoded response bytes
    /// and doesn't need to reserialize them).
    pub fn reply_with_body(request_id: Uuid, body: Bytes) -> Self {
        Self {
            command: Command::Reply,
            content_type: ContentType::MsgPack,
            request_id,
            method: String::new(),
            traceparent: None,
            body,
        }
    }

    /// Create a reply frame carrying a dispatched exception (§4.F step 4).
    pub fn exception(request_id: Uuid, message: &str) -> Self {
        Self {
            command: Command::Reply,
            content_type: ContentType::Exception,
            request_id,
            method: String::new(),
            traceparent: None,
            body: Bytes::from(message.to_string()),
        }
    }

    pub fn disconnect(method: &str) -> Self {
        Self {
            command: Command::Disconnect,
            content_type: ContentType::Empty,
            request_id: Uuid::new_v4(),
            method: method.to_string(),
            traceparent: None,
            body: Bytes::new(),
        }
    }

    pub fn with_traceparent(mut self, traceparent: impl Into<String>) -> Self {
        self.traceparent = Some(traceparent.into());
        self
    }

    /// Extract a typed payload from the msgpack body (checks content_type).
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        if self.content_type != ContentType::MsgPack {
            return Err(FrameError::ContentTypeMismatch {
                expected: ContentType::MsgPack,
                actual: self.content_type,
            });
        }
        Ok(rmp_serde::from_slice(&self.body)?)
    }

    /// Read back the dispatched-exception message, if this frame carries one.
    pub fn exception_message(&self) -> Option<&str> {
        if self.content_type == ContentType::Exception {
            std::str::from_utf8(&self.body).ok()
        } else {
            None
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.command == Command::Heartbeat
    }

    pub fn is_exception(&self) -> bool {
        self.content_type == ContentType::Exception
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::RequestHeader;
    use pretty_assertions::assert_eq;

    #[test]
    fn command_roundtrip() {
        assert_eq!(Command::Request.to_u16(), 0x0001);
        assert_eq!(Command::from_u16(0x0003).unwrap(), Command::Heartbeat);
        assert!(Command::from_u16(0xFFFF).is_err());
    }

    #[test]
    fn content_type_roundtrip() {
        assert_eq!(ContentType::from_u16(0x0000).unwrap(), ContentType::Empty);
        assert!(ContentType::from_u16(0xFFFF).is_err());
    }

    #[test]
    fn heartbeat_roundtrip() {
        let id = Uuid::new_v4();
        let frame = Frame::heartbeat("Heartbeat", id);
        let frames = frame.to_frames();
        assert_eq!(frames.len(), FRAME_COUNT);
        assert_eq!(frames[0].as_ref(), PROTOCOL_VERSION);

        let parsed = Frame::from_frames(&frames).unwrap();
        assert_eq!(parsed.command, Command::Heartbeat);
        assert_eq!(parsed.content_type, ContentType::Empty);
        assert_eq!(parsed.request_id, id);
        assert!(parsed.body.is_empty());
    }

    #[test]
    fn request_with_header_roundtrip() {
        #[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
        struct Wire {
            header: RequestHeader,
            payload: String,
        }

        let id = Uuid::new_v4();
        let wire = Wire {
            header: RequestHeader::new("master-1", "sender-abc", "build-42", &b"hello"[..]),
            payload: "hello".to_string(),
        };
        let frame = Frame::request("Echo", id, &wire).unwrap();
        let frames = frame.to_frames();
        let parsed = Frame::from_frames(&frames).unwrap();
        assert_eq!(parsed.method, "Echo");

        let recovered: Wire = parsed.payload().unwrap();
        assert_eq!(recovered, wire);
    }

    #[test]
    fn exception_frame_roundtrip() {
        let id = Uuid::new_v4();
        let frame = Frame::exception(id, "build-id mismatch");
        let frames = frame.to_frames();
        let parsed = Frame::from_frames(&frames).unwrap();
        assert_eq!(parsed.content_type, ContentType::Exception);
        assert_eq!(parsed.exception_message(), Some("build-id mismatch"));
    }

    #[test]
    fn content_type_mismatch_error() {
        let frame = Frame::heartbeat("Heartbeat", Uuid::new_v4());
        let result: Result<String, _> = frame.payload();
        assert!(matches!(
            result,
            Err(FrameError::ContentTypeMismatch {
                expected: ContentType::MsgPack,
                actual: ContentType::Empty
            })
        ));
    }

    #[test]
    fn identity_prefix_handling() {
        let frame = Frame::heartbeat("Heartbeat", Uuid::new_v4());
        let id1 = Bytes::from_static(b"\x00\x01\x02\x03");
        let id2 = Bytes::from_static(b"worker-123");

        let with_id = frame.to_frames_with_identity(&[id1.clone(), id2.clone()]);
        assert_eq!(with_id.len(), FRAME_COUNT + 2);

        let (identity, parsed) = Frame::from_frames_with_identity(&with_id).unwrap();
        assert_eq!(identity, vec![id1, id2]);
        assert_eq!(parsed.command, Command::Heartbeat);
    }

    #[test]
    fn disconnect_frame() {
        let frame = Frame::disconnect("shutdown");
        let frames = frame.to_frames();
        let parsed = Frame::from_frames(&frames).unwrap();
        assert_eq!(parsed.command, Command::Disconnect);
    }

    #[test]
    fn traceparent_roundtrip() {
        let traceparent = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";
        let frame = Frame::heartbeat("Heartbeat", Uuid::new_v4()).with_traceparent(traceparent);
        let frames = frame.to_frames();
        let parsed = Frame::from_frames(&frames).unwrap();
        assert_eq!(parsed.traceparent.as_deref(), Some(traceparent));
    }
}
