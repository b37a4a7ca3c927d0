//! Codec seam between the byte-oriented engine and typed payloads.
//!
//! The engine is codec-agnostic: it moves [`Bytes`](bytes::Bytes) through the
//! cache and the transport and only touches payload structure at the edges.
//! [`Codec`] is the dyn-compatible surface a format plugs into; the erased
//! callback API mirrors how serialization formats are selected at runtime
//! elsewhere in the workspace. Call sites use the typed [`CodecExt`] facade.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Error;

/// A serialization format usable through a trait object.
///
/// Implementations encode any [`serde::Serialize`] carrier and drive a
/// visitor over an erased deserializer. Decoding failures must surface as
/// [`Error::DecodingFailed`] without leaking format-specific error types.
pub trait Codec: Send + Sync + std::fmt::Debug {
    /// Media type advertised for bodies produced by this codec.
    fn media_type(&self) -> &str;

    /// Encode an erased value into bytes.
    fn encode_erased(&self, value: &dyn erased_serde::Serialize) -> Result<Bytes, Error>;

    /// Run `visit` over an erased deserializer for `data`.
    fn decode_with(
        &self,
        data: &[u8],
        visit: &mut dyn FnMut(&mut dyn erased_serde::Deserializer) -> Result<(), erased_serde::Error>,
    ) -> Result<(), Error>;
}

/// Typed convenience layer over [`Codec`].
///
/// Automatically implemented for every codec, including trait objects.
pub trait CodecExt: Codec {
    /// Encode a typed value.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes, Error> {
        self.encode_erased(value)
    }

    /// Decode a typed value.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, Error> {
        let mut decoded: Option<T> = None;
        self.decode_with(data, &mut |deserializer| {
            decoded = Some(erased_serde::deserialize::<T>(deserializer)?);
            Ok(())
        })?;
        decoded.ok_or_else(|| Error::DecodingFailed("deserializer produced no value".into()))
    }
}

impl<C: Codec + ?Sized> CodecExt for C {}

/// JSON codec (default).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn media_type(&self) -> &str {
        "application/json"
    }

    fn encode_erased(&self, value: &dyn erased_serde::Serialize) -> Result<Bytes, Error> {
        let mut buf = Vec::new();
        let mut serializer = serde_json::Serializer::new(&mut buf);
        let mut erased = <dyn erased_serde::Serializer>::erase(&mut serializer);
        value
            .erased_serialize(&mut erased)
            .map_err(|e| Error::EncodingFailed(e.to_string()))?;
        Ok(Bytes::from(buf))
    }

    fn decode_with(
        &self,
        data: &[u8],
        visit: &mut dyn FnMut(&mut dyn erased_serde::Deserializer) -> Result<(), erased_serde::Error>,
    ) -> Result<(), Error> {
        let mut deserializer = serde_json::Deserializer::from_slice(data);
        let mut erased = <dyn erased_serde::Deserializer>::erase(&mut deserializer);
        visit(&mut erased).map_err(|e| Error::DecodingFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct User {
        id: u64,
        name: String,
    }

    #[test]
    fn json_round_trip() {
        let codec = JsonCodec;
        let user = User {
            id: 1,
            name: "A".into(),
        };
        let bytes = codec.encode(&user).unwrap();
        let back: User = codec.decode(&bytes).unwrap();
        assert_eq!(back, user);
    }

    #[test]
    fn json_decode_failure_is_classified() {
        let codec = JsonCodec;
        let err = codec.decode::<User>(b"not json").unwrap_err();
        assert!(matches!(err, Error::DecodingFailed(_)));
    }

    #[test]
    fn works_as_trait_object() {
        let codec: &dyn Codec = &JsonCodec;
        let bytes = codec.encode(&User { id: 7, name: "B".into() }).unwrap();
        let back: User = codec.decode(&bytes).unwrap();
        assert_eq!(back.id, 7);
    }
}
