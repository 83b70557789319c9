//! Value Codec
//!
//! Every stored value carries a one-byte tag:
//!
//! ```text
//! 0x01 <raw bytes>     opaque payload, stored verbatim
//! 0x02 <msgpack>       any serde-serializable value
//! ```
//!
//! The tag keeps raw blobs cheap (no MessagePack framing) while structured
//! values round-trip through `rmp-serde`.

use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Tag for raw byte payloads.
pub const TAG_RAW: u8 = 0x01;

/// Tag for MessagePack-encoded values.
pub const TAG_MSGPACK: u8 = 0x02;

/// Encodes a structured value.
pub fn encode_value<V: Serialize>(value: &V) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(32);
    buf.put_u8(TAG_MSGPACK);
    let mut writer = buf.writer();
    rmp_serde::encode::write_named(&mut writer, value)?;
    Ok(writer.into_inner().freeze())
}

/// Decodes a structured value written by [`encode_value`].
pub fn decode_value<V: DeserializeOwned>(buf: &[u8]) -> Result<V> {
    match buf.split_first() {
        Some((&TAG_MSGPACK, body)) => Ok(rmp_serde::from_slice(body)?),
        Some((&TAG_RAW, _)) => Err(Error::Decode(rmp_serde::decode::Error::Uncategorized(
            "value was stored as raw bytes".into(),
        ))),
        Some((tag, _)) => Err(Error::Decode(rmp_serde::decode::Error::Uncategorized(
            format!("unknown value tag {tag:#04x}"),
        ))),
        None => Err(Error::Decode(rmp_serde::decode::Error::Uncategorized(
            "empty value".into(),
        ))),
    }
}

/// Wraps a raw byte payload.
pub fn encode_bytes(raw: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(raw.len() + 1);
    buf.put_u8(TAG_RAW);
    buf.put_slice(raw);
    buf.freeze()
}

/// Unwraps a payload written by [`encode_bytes`] without copying.
pub fn decode_bytes(buf: &Bytes) -> Result<Bytes> {
    match buf.first() {
        Some(&TAG_RAW) => Ok(buf.slice(1..)),
        Some(&TAG_MSGPACK) => Err(Error::Decode(rmp_serde::decode::Error::Uncategorized(
            "value was stored as a structured value".into(),
        ))),
        _ => Err(Error::Decode(rmp_serde::decode::Error::Uncategorized(
            "unknown value tag".into(),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Session {
        user: String,
        visits: u32,
    }

    #[test]
    fn test_structured_value() {
        let session = Session {
            user: "hexa1".into(),
            visits: 3,
        };
        let encoded = encode_value(&session).unwrap();
        assert_eq!(encoded[0], TAG_MSGPACK);
        assert_eq!(decode_value::<Session>(&encoded).unwrap(), session);
    }

    #[test]
    fn test_map_value() {
        let mut map = HashMap::new();
        map.insert("user".to_string(), "hexa2".to_string());
        let encoded = encode_value(&map).unwrap();
        let decoded: HashMap<String, String> = decode_value(&encoded).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn test_raw_bytes_are_verbatim() {
        let encoded = encode_bytes(b"\x00\xffabc");
        assert_eq!(&encoded[..], b"\x01\x00\xffabc");
        assert_eq!(&decode_bytes(&encoded).unwrap()[..], b"\x00\xffabc");
    }

    #[test]
    fn test_tag_mismatch() {
        let raw = encode_bytes(b"abc");
        assert!(decode_value::<String>(&raw).is_err());

        let structured = encode_value(&42u32).unwrap();
        assert!(decode_bytes(&structured).is_err());
    }

    #[test]
    fn test_unknown_tag_and_empty() {
        assert!(decode_value::<u32>(&[0x7f, 0x01]).is_err());
        assert!(decode_value::<u32>(&[]).is_err());
        assert!(decode_bytes(&Bytes::new()).is_err());
    }
}
