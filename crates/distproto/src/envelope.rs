//! The request header that rides along on every call (§3).
//!
//! Four fields carry across the wire on every call: `sender_name` and
//! `sender_id` are informational/correlation-only, `build_id` is the
//! cooperative build-session identity check (§4.D, §4.F step 2), and
//! `checksum` is a payload checksum the sender assigns and the receiver
//! verifies (§4.F step 3).

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

/// Common prefix of every payload, carried inside the msgpack body next to
/// the application payload (the framing layer in [`crate::frame`] only
/// carries the call identifier and method name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub sender_name: String,
    pub sender_id: String,
    pub build_id: String,
    pub checksum: Checksum,
}

impl RequestHeader {
    /// Build a header for an outgoing request, computing the checksum over
    /// `payload_bytes` (the already-encoded application payload).
    pub fn new(
        sender_name: impl Into<String>,
        sender_id: impl Into<String>,
        build_id: impl Into<String>,
        payload_bytes: &[u8],
    ) -> Self {
        Self {
            sender_name: sender_name.into(),
            sender_id: sender_id.into(),
            build_id: build_id.into(),
            checksum: Checksum::of(payload_bytes),
        }
    }

    /// §4.F step 2: verify the header's `build_id` against the receiver's
    /// current build session.
    pub fn matches_build(&self, expected_build_id: &str) -> bool {
        self.build_id == expected_build_id
    }

    /// §4.F step 3: verify the header's checksum against the actual payload
    /// bytes the receiver decoded.
    pub fn verify_checksum(&self, payload_bytes: &[u8]) -> bool {
        self.checksum == Checksum::of(payload_bytes)
    }
}

/// A payload checksum, computed with BLAKE3 (already a dependency via
/// `cas::hash::ContentHash`, reused here rather than adding a second hashing
/// crate for the same job). Truncated to 64 bits - this is a
/// corruption/mismatch detector, not a content address, so collision
/// resistance requirements are far looser than CAS's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(u64);

impl Checksum {
    pub fn of(bytes: &[u8]) -> Self {
        let digest = blake3::hash(bytes);
        let word = digest.as_bytes()[..8].try_into().expect("8 bytes");
        Self(u64::from_le_bytes(word))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// The sender identity derived once from the first call identifier and held
/// for the connection manager's lifetime (§3: "sender_id - short opaque
/// string tied to the connection manager's lifetime").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderId(String);

impl SenderId {
    /// Derive a sender id from the first call identifier issued by a manager.
    pub fn derive_from(first_call_id: uuid::Uuid) -> Self {
        Self(first_call_id.simple().to_string()[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SenderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors decoding an [`Envelope`] from a frame body.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope body truncated")]
    Truncated,
    #[error("header decode error: {0}")]
    HeaderDecode(#[from] rmp_serde::decode::Error),
}

/// The on-wire request envelope: the header (§3) plus the already-encoded
/// application payload, concatenated with a length prefix rather than
/// nested inside one msgpack value. This lets the Server Dispatcher (§4.F)
/// verify the header and the payload checksum without first knowing (or
/// deserializing into) the application's response type - it only ever
/// needs `payload_bytes` as an opaque slice until it hands them to the
/// registered method handler.
pub struct Envelope {
    pub header: RequestHeader,
    pub payload_bytes: Vec<u8>,
}

impl Envelope {
    pub fn encode(&self) -> Vec<u8> {
        let header_bytes =
            rmp_serde::to_vec_named(&self.header).expect("RequestHeader is always serializable");
        let mut buf = BytesMut::with_capacity(4 + header_bytes.len() + self.payload_bytes.len());
        buf.put_u32(header_bytes.len() as u32);
        buf.put_slice(&header_bytes);
        buf.put_slice(&self.payload_bytes);
        buf.to_vec()
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Self, EnvelopeError> {
        if bytes.len() < 4 {
            return Err(EnvelopeError::Truncated);
        }
        let header_len = bytes.get_u32() as usize;
        if bytes.len() < header_len {
            return Err(EnvelopeError::Truncated);
        }
        let (header_bytes, payload_bytes) = bytes.split_at(header_len);
        let header: RequestHeader = rmp_serde::from_slice(header_bytes)?;
        Ok(Self {
            header,
            payload_bytes: payload_bytes.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn checksum_is_deterministic() {
        let a = Checksum::of(b"hello world");
        let b = Checksum::of(b"hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn checksum_detects_corruption() {
        let a = Checksum::of(b"hello world");
        let b = Checksum::of(b"hello worle");
        assert_ne!(a, b);
    }

    #[test]
    fn header_round_trip_verification() {
        let payload = b"pip build request body";
        let header = RequestHeader::new("master-1", "sender-aaaa", "build-2026.07", payload);

        assert!(header.matches_build("build-2026.07"));
        assert!(!header.matches_build("build-other"));
        assert!(header.verify_checksum(payload));
        assert!(!header.verify_checksum(b"tampered"));
    }

    #[test]
    fn sender_id_is_derived_once() {
        let call_id = uuid::Uuid::new_v4();
        let a = SenderId::derive_from(call_id);
        let b = SenderId::derive_from(call_id);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 16);
    }

    #[test]
    fn envelope_roundtrips() {
        let payload_bytes = rmp_serde::to_vec_named(&"hello").unwrap();
        let header = RequestHeader::new("master-1", "sender-abc", "build-42", &payload_bytes);
        let envelope = Envelope {
            header: header.clone(),
            payload_bytes: payload_bytes.clone(),
        };

        let encoded = envelope.encode();
        let decoded = Envelope::decode(&encoded).unwrap();
        assert_eq!(decoded.header, header);
        assert_eq!(decoded.payload_bytes, payload_bytes);
    }

    #[test]
    fn envelope_decode_rejects_truncated_bytes() {
        assert!(matches!(Envelope::decode(&[0, 0]), Err(EnvelopeError::Truncated)));
    }

    #[test]
    fn header_serializes_with_msgpack() {
        let header = RequestHeader::new("m", "s", "b", b"x");
        let bytes = rmp_serde::to_vec_named(&header).unwrap();
        let recovered: RequestHeader = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(header, recovered);
    }
}
