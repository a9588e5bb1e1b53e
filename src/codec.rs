use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::constants::SERIAL_VERSION;
use crate::error::{Error, Result};

/// A raw record: serialized key bytes and serialized value bytes
pub type KeyValue = (Vec<u8>, Vec<u8>);

/// Types usable as database keys.
///
/// The engine compares keys bytewise, so every impl keeps lexicographic
/// byte order consistent with the natural order of the type and keeps
/// prefixes stable: the encoding of `"a"` is a prefix of the encoding of
/// `"a1"`. Values go through [`encode_value`] instead; that framing is not
/// prefix-stable and must never be used for keys.
pub trait EncodeKey {
    /// Append the encoded key to `out`
    fn encode_key(&self, out: &mut Vec<u8>);
}

/// Key types that can be rebuilt from their encoded form.
///
/// Decoding consumes the whole buffer; fixed-width impls reject buffers of
/// the wrong length.
pub trait DecodeKey: Sized {
    fn decode_key(bytes: &[u8]) -> Result<Self>;
}

/// Encode a key into a fresh buffer
pub fn key_bytes<K: EncodeKey + ?Sized>(key: &K) -> Vec<u8> {
    let mut out = Vec::new();
    key.encode_key(&mut out);
    out
}

impl<T: EncodeKey + ?Sized> EncodeKey for &T {
    fn encode_key(&self, out: &mut Vec<u8>) {
        (**self).encode_key(out)
    }
}

impl EncodeKey for str {
    fn encode_key(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }
}

impl EncodeKey for String {
    fn encode_key(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }
}

impl EncodeKey for [u8] {
    fn encode_key(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl EncodeKey for Vec<u8> {
    fn encode_key(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl<const N: usize> EncodeKey for [u8; N] {
    fn encode_key(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl EncodeKey for u32 {
    fn encode_key(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }
}

impl EncodeKey for u64 {
    fn encode_key(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }
}

impl EncodeKey for i32 {
    fn encode_key(&self, out: &mut Vec<u8>) {
        // Sign bit flipped so byte order matches numeric order
        out.extend_from_slice(&((*self as u32) ^ 0x8000_0000).to_be_bytes());
    }
}

impl EncodeKey for i64 {
    fn encode_key(&self, out: &mut Vec<u8>) {
        // Sign bit flipped so byte order matches numeric order
        out.extend_from_slice(&((*self as u64) ^ 0x8000_0000_0000_0000).to_be_bytes());
    }
}

/// Composite keys concatenate their parts. Encode-only: a variable-width
/// first part cannot be split back apart on decode.
impl<A: EncodeKey, B: EncodeKey> EncodeKey for (A, B) {
    fn encode_key(&self, out: &mut Vec<u8>) {
        self.0.encode_key(out);
        self.1.encode_key(out);
    }
}

impl DecodeKey for String {
    fn decode_key(bytes: &[u8]) -> Result<Self> {
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::Decode("key is not valid utf-8".into()))
    }
}

impl DecodeKey for Vec<u8> {
    fn decode_key(bytes: &[u8]) -> Result<Self> {
        Ok(bytes.to_vec())
    }
}

impl DecodeKey for u32 {
    fn decode_key(bytes: &[u8]) -> Result<Self> {
        Ok(u32::from_be_bytes(fixed_width(bytes)?))
    }
}

impl DecodeKey for u64 {
    fn decode_key(bytes: &[u8]) -> Result<Self> {
        Ok(u64::from_be_bytes(fixed_width(bytes)?))
    }
}

impl DecodeKey for i32 {
    fn decode_key(bytes: &[u8]) -> Result<Self> {
        Ok((u32::from_be_bytes(fixed_width(bytes)?) ^ 0x8000_0000) as i32)
    }
}

impl DecodeKey for i64 {
    fn decode_key(bytes: &[u8]) -> Result<Self> {
        Ok((u64::from_be_bytes(fixed_width(bytes)?) ^ 0x8000_0000_0000_0000) as i64)
    }
}

fn fixed_width<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| Error::Decode(format!("expected {N} key bytes, got {}", bytes.len())))
}

/// Serialize a value, framed with the crate's format tag.
pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut out = SERIAL_VERSION.to_le_bytes().to_vec();
    let body = bincode::serialize(value).map_err(|e| Error::Decode(e.to_string()))?;
    out.extend_from_slice(&body);
    Ok(out)
}

/// Deserialize a value produced by [`encode_value`], checking its format tag.
pub fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.len() < 4 {
        return Err(Error::Decode("value shorter than its format tag".into()));
    }
    let mut tag = [0u8; 4];
    tag.copy_from_slice(&bytes[..4]);
    let tag = u32::from_le_bytes(tag);
    if tag != SERIAL_VERSION {
        return Err(Error::Decode(format!("unsupported value format {tag}")));
    }
    bincode::deserialize(&bytes[4..]).map_err(|e| Error::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn string_keys_are_prefix_stable() {
        let prefix = key_bytes("a");
        assert!(key_bytes("a1").starts_with(&prefix));
        assert!(key_bytes("a2").starts_with(&prefix));
        assert!(!key_bytes("b1").starts_with(&prefix));
    }

    #[test]
    fn unsigned_keys_sort_numerically() {
        let values = [0u32, 1, 2, 255, 256, 65_536, u32::MAX];
        let mut encoded: Vec<Vec<u8>> = values.iter().map(|v| key_bytes(v)).collect();
        encoded.sort();
        let decoded: Vec<u32> = encoded.iter().map(|b| u32::decode_key(b).unwrap()).collect();
        assert_eq!(decoded, values);
    }

    #[test]
    fn signed_keys_sort_numerically() {
        let values = [i64::MIN, -5, -1, 0, 1, 5, i64::MAX];
        let mut encoded: Vec<Vec<u8>> = values.iter().map(|v| key_bytes(v)).collect();
        encoded.sort();
        let decoded: Vec<i64> = encoded.iter().map(|b| i64::decode_key(b).unwrap()).collect();
        assert_eq!(decoded, values);
    }

    #[test]
    fn keys_round_trip() {
        assert_eq!(String::decode_key(&key_bytes("hello")).unwrap(), "hello");
        assert_eq!(u64::decode_key(&key_bytes(&42u64)).unwrap(), 42);
        assert_eq!(i32::decode_key(&key_bytes(&-7i32)).unwrap(), -7);
        assert_eq!(
            Vec::<u8>::decode_key(&key_bytes(&[1u8, 2, 3][..])).unwrap(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn fixed_width_keys_reject_wrong_length() {
        assert!(u32::decode_key(&[1, 2, 3]).is_err());
        assert!(u64::decode_key(&key_bytes(&1u32)).is_err());
    }

    #[test]
    fn composite_keys_concatenate() {
        let encoded = key_bytes(&("pool", 7u32));
        let mut expected = b"pool".to_vec();
        expected.extend_from_slice(&7u32.to_be_bytes());
        assert_eq!(encoded, expected);
        assert!(encoded.starts_with(&key_bytes("pool")));
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Entry {
        height: u64,
        label: String,
        payload: Vec<u8>,
    }

    #[test]
    fn values_round_trip() {
        let entry = Entry {
            height: 812,
            label: "tip".into(),
            payload: vec![0xde, 0xad],
        };
        let bytes = encode_value(&entry).unwrap();
        assert_eq!(decode_value::<Entry>(&bytes).unwrap(), entry);

        let n = encode_value(&99u32).unwrap();
        assert_eq!(decode_value::<u32>(&n).unwrap(), 99);
    }

    #[test]
    fn values_reject_unknown_format_tag() {
        let mut bytes = encode_value(&5u8).unwrap();
        bytes[0] = 0xFF;
        assert!(matches!(decode_value::<u8>(&bytes), Err(Error::Decode(_))));
    }

    #[test]
    fn values_reject_truncated_buffers() {
        assert!(decode_value::<u32>(&[1, 0]).is_err());
        let bytes = encode_value(&"text").unwrap();
        assert!(decode_value::<String>(&bytes[..bytes.len() - 2]).is_err());
    }
}
