//! Binary frame format.
//!
//! Frame layout (length prefix + 8-byte fixed header + variable fields):
//!
//! ```text
//! +-----------+--------+--------+------------+---------------------+
//! | total_len | mtype  | idlen  | id         | body                |
//! |  4 bytes  | 4 bytes| 4 bytes| idlen bytes| total_len-8-idlen   |
//! +-----------+--------+--------+------------+---------------------+
//! ```
//!
//! All integers are big-endian. `total_len` counts everything after itself.

use crate::error::ProtocolError;
use crate::message::MType;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Bytes occupied by the length prefix itself.
pub const LEN_FIELD_SIZE: usize = 4;

/// Bytes of the mtype and idlen fields inside the framed region.
pub const FRAME_FIXED_SIZE: usize = 8;

/// Ceiling on a single frame and on buffered-but-undecodable input (64 KiB).
/// A connection exceeding it without decode progress is shut down.
pub const MAX_PENDING_BYTES: usize = 64 * 1024;

/// A parsed wire frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Message type tag.
    pub mtype: MType,
    /// Request id, raw UTF-8.
    pub rid: String,
    /// JSON body bytes.
    pub payload: Bytes,
}

impl Frame {
    pub fn new(mtype: MType, rid: impl Into<String>, payload: Bytes) -> Self {
        Self {
            mtype,
            rid: rid.into(),
            payload,
        }
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let total = FRAME_FIXED_SIZE + self.rid.len() + self.payload.len();
        if LEN_FIELD_SIZE + total > MAX_PENDING_BYTES {
            return Err(ProtocolError::FrameTooLarge {
                size: LEN_FIELD_SIZE + total,
                max: MAX_PENDING_BYTES,
            });
        }

        let mut buf = BytesMut::with_capacity(LEN_FIELD_SIZE + total);
        buf.put_u32(total as u32);
        buf.put_u32(self.mtype as u32);
        buf.put_u32(self.rid.len() as u32);
        buf.put_slice(self.rid.as_bytes());
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Decodes one frame from `buf`.
    ///
    /// Returns `Ok(Some(frame))` and consumes exactly one frame if the buffer
    /// holds a complete one, `Ok(None)` without consuming anything if more
    /// data is needed, or `Err` on protocol violations.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < LEN_FIELD_SIZE {
            return Ok(None);
        }

        // Peek at the header without consuming.
        let total = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if LEN_FIELD_SIZE + total > MAX_PENDING_BYTES {
            return Err(ProtocolError::FrameTooLarge {
                size: LEN_FIELD_SIZE + total,
                max: MAX_PENDING_BYTES,
            });
        }
        if total < FRAME_FIXED_SIZE {
            return Err(ProtocolError::TruncatedFrame { idlen: 0, total });
        }
        if buf.len() < LEN_FIELD_SIZE + total {
            return Ok(None);
        }

        let mtype_raw = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let mtype = MType::from_u32(mtype_raw)
            .ok_or(ProtocolError::UnknownMessageType(mtype_raw))?;

        let idlen = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize;
        if FRAME_FIXED_SIZE + idlen > total {
            return Err(ProtocolError::TruncatedFrame { idlen, total });
        }

        buf.advance(LEN_FIELD_SIZE + FRAME_FIXED_SIZE);
        let id = buf.split_to(idlen);
        let rid =
            String::from_utf8(id.to_vec()).map_err(|_| ProtocolError::InvalidRequestId)?;
        let payload = buf.split_to(total - FRAME_FIXED_SIZE - idlen).freeze();

        Ok(Some(Self {
            mtype,
            rid,
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let payload = Bytes::from(r#"{"method":"Add","parameters":{"num1":1,"num2":2}}"#);
        let frame = Frame::new(MType::ReqRpc, "req-1", payload.clone());

        let mut buf = frame.encode().unwrap();
        let decoded = Frame::decode(&mut buf).unwrap().unwrap();

        assert_eq!(decoded.mtype, MType::ReqRpc);
        assert_eq!(decoded.rid, "req-1");
        assert_eq!(decoded.payload, payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_does_not_advance() {
        let frame = Frame::new(MType::ReqTopic, "req-2", Bytes::from(r#"{"k":1}"#));
        let encoded = frame.encode().unwrap();

        let mut buf = BytesMut::from(&encoded[..encoded.len() - 3]);
        let before = buf.len();
        assert!(Frame::decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), before);

        buf.extend_from_slice(&encoded[encoded.len() - 3..]);
        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.rid, "req-2");
    }

    #[test]
    fn test_unknown_mtype_rejected() {
        let frame = Frame::new(MType::ReqRpc, "x", Bytes::from("{}"));
        let mut buf = frame.encode().unwrap();
        // Overwrite the mtype field with an out-of-range tag.
        buf[4..8].copy_from_slice(&99u32.to_be_bytes());

        let result = Frame::decode(&mut buf);
        assert!(matches!(
            result,
            Err(ProtocolError::UnknownMessageType(99))
        ));
    }

    #[test]
    fn test_oversized_frame_rejected_early() {
        // Header declares a frame larger than the cap; only the prefix is
        // buffered, yet decode must fail immediately.
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_PENDING_BYTES as u32);
        let result = Frame::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let frame = Frame::new(
            MType::ReqTopic,
            "x",
            Bytes::from(vec![b'a'; MAX_PENDING_BYTES]),
        );
        assert!(matches!(
            frame.encode(),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_idlen_exceeding_frame_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(10); // total: mtype + idlen + 2 bytes
        buf.put_u32(0); // mtype
        buf.put_u32(100); // idlen larger than the framed region
        buf.put_slice(b"xx");
        let result = Frame::decode(&mut buf);
        assert!(matches!(
            result,
            Err(ProtocolError::TruncatedFrame { idlen: 100, .. })
        ));
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let f1 = Frame::new(MType::ReqRpc, "a", Bytes::from(r#"{"m":1}"#));
        let f2 = Frame::new(MType::RspRpc, "b", Bytes::from(r#"{"m":2}"#));

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&f1.encode().unwrap());
        buf.extend_from_slice(&f2.encode().unwrap());

        assert_eq!(Frame::decode(&mut buf).unwrap().unwrap().rid, "a");
        assert_eq!(Frame::decode(&mut buf).unwrap().unwrap().rid, "b");
        assert!(Frame::decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_minimal_body() {
        let frame = Frame::new(MType::RspTopic, "r", Bytes::from(r#"{"rcode":0}"#));
        let mut buf = frame.encode().unwrap();
        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.payload.as_ref(), br#"{"rcode":0}"#);
    }
}
