//! Request body variants and the body encoder.
//!
//! A body is described structurally and encoded exactly once, at wire-request
//! assembly time. Encoding is deterministic except for the multipart
//! boundary, which is freshly generated per encode so two encodes of the same
//! body never collide on the wire.

use std::fmt;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;
use serde::Serialize;

use crate::codec::{Codec, JsonCodec};
use crate::error::Error;

/// A fully encoded body: the bytes to send and the media type describing them.
#[derive(Debug, Clone)]
pub struct EncodedBody {
    /// Bytes to place on the wire.
    pub bytes: Bytes,
    /// Value for the `Content-Type` header unless the endpoint overrides it.
    pub media_type: String,
}

/// One part of a multipart body, in encode order.
#[derive(Debug, Clone)]
pub struct MultipartPart {
    /// Field name.
    pub name: String,
    /// Part content.
    pub bytes: Bytes,
    /// Optional file name for file parts.
    pub filename: Option<String>,
    /// Optional per-part media type.
    pub media_type: Option<String>,
}

impl MultipartPart {
    /// A plain field part.
    pub fn field(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        MultipartPart {
            name: name.into(),
            bytes: bytes.into(),
            filename: None,
            media_type: None,
        }
    }

    /// A file part with a filename and media type.
    pub fn file(
        name: impl Into<String>,
        filename: impl Into<String>,
        media_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        MultipartPart {
            name: name.into(),
            bytes: bytes.into(),
            filename: Some(filename.into()),
            media_type: Some(media_type.into()),
        }
    }
}

/// The body of an outgoing request.
///
/// `Structured` carries a type-erased serializable value together with the
/// codec that knows how to encode it; the `Send + Sync` bound is part of the
/// type, so a non-sendable carrier is rejected at compile time.
pub enum RequestBody {
    /// A typed value plus the codec that encodes it.
    Structured {
        /// The erased carrier.
        value: Box<dyn erased_serde::Serialize + Send + Sync>,
        /// Format used for encoding and the default content type.
        codec: Arc<dyn Codec>,
    },
    /// Pre-encoded bytes with an explicit media type.
    Raw {
        /// Bytes to send as-is.
        bytes: Bytes,
        /// Media type describing them.
        media_type: String,
    },
    /// `application/x-www-form-urlencoded` fields, in insertion order.
    FormUrlEncoded(Vec<(String, String)>),
    /// RFC 7578 multipart body, parts in insertion order.
    Multipart(Vec<MultipartPart>),
}

impl RequestBody {
    /// A structured body using an explicit codec.
    pub fn structured<T>(value: T, codec: Arc<dyn Codec>) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        RequestBody::Structured {
            value: Box::new(value),
            codec,
        }
    }

    /// A structured body encoded as JSON.
    pub fn json<T>(value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        RequestBody::structured(value, Arc::new(JsonCodec))
    }

    /// A raw body with an explicit media type.
    pub fn raw(bytes: impl Into<Bytes>, media_type: impl Into<String>) -> Self {
        RequestBody::Raw {
            bytes: bytes.into(),
            media_type: media_type.into(),
        }
    }

    /// A form-url-encoded body.
    pub fn form<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        RequestBody::FormUrlEncoded(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// A multipart body.
    pub fn multipart(parts: Vec<MultipartPart>) -> Self {
        RequestBody::Multipart(parts)
    }

    /// Encode the body into wire bytes plus the default media type.
    pub fn encode(&self) -> Result<EncodedBody, Error> {
        match self {
            RequestBody::Structured { value, codec } => {
                let bytes = codec.encode_erased(&**value)?;
                Ok(EncodedBody {
                    bytes,
                    media_type: codec.media_type().to_owned(),
                })
            }
            RequestBody::Raw { bytes, media_type } => Ok(EncodedBody {
                bytes: bytes.clone(),
                media_type: media_type.clone(),
            }),
            RequestBody::FormUrlEncoded(fields) => {
                let encoded = serde_urlencoded::to_string(fields)
                    .map_err(|e| Error::EncodingFailed(e.to_string()))?;
                Ok(EncodedBody {
                    bytes: Bytes::from(encoded),
                    media_type: "application/x-www-form-urlencoded".to_owned(),
                })
            }
            RequestBody::Multipart(parts) => {
                let boundary = random_boundary();
                let bytes = encode_multipart(parts, &boundary);
                Ok(EncodedBody {
                    bytes,
                    media_type: format!("multipart/form-data; boundary={boundary}"),
                })
            }
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Structured { codec, .. } => f
                .debug_struct("Structured")
                .field("codec", codec)
                .finish_non_exhaustive(),
            RequestBody::Raw { bytes, media_type } => f
                .debug_struct("Raw")
                .field("len", &bytes.len())
                .field("media_type", media_type)
                .finish(),
            RequestBody::FormUrlEncoded(fields) => {
                f.debug_tuple("FormUrlEncoded").field(&fields.len()).finish()
            }
            RequestBody::Multipart(parts) => {
                f.debug_tuple("Multipart").field(&parts.len()).finish()
            }
        }
    }
}

/// A boundary that cannot collide with one from another encode invocation.
fn random_boundary() -> String {
    let mut raw = [0u8; 16];
    rand::rng().fill(&mut raw[..]);
    format!("----{}", hex::encode(raw))
}

fn encode_multipart(parts: &[MultipartPart], boundary: &str) -> Bytes {
    let mut buf = BytesMut::new();
    for part in parts {
        buf.put_slice(b"--");
        buf.put_slice(boundary.as_bytes());
        buf.put_slice(b"\r\n");
        buf.put_slice(b"Content-Disposition: form-data; name=\"");
        buf.put_slice(part.name.as_bytes());
        buf.put_slice(b"\"");
        if let Some(filename) = &part.filename {
            buf.put_slice(b"; filename=\"");
            buf.put_slice(filename.as_bytes());
            buf.put_slice(b"\"");
        }
        buf.put_slice(b"\r\n");
        if let Some(media_type) = &part.media_type {
            buf.put_slice(b"Content-Type: ");
            buf.put_slice(media_type.as_bytes());
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(b"\r\n");
        buf.put_slice(&part.bytes);
        buf.put_slice(b"\r\n");
    }
    buf.put_slice(b"--");
    buf.put_slice(boundary.as_bytes());
    buf.put_slice(b"--\r\n");
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize)]
    struct Payload {
        name: String,
    }

    #[test]
    fn structured_body_uses_codec_media_type() {
        let body = RequestBody::json(Payload { name: "A".into() });
        let encoded = body.encode().unwrap();
        assert_eq!(encoded.media_type, "application/json");
        assert_eq!(&encoded.bytes[..], br#"{"name":"A"}"#);
    }

    #[test]
    fn form_body_percent_encodes_names_and_values() {
        let body = RequestBody::form([("a b", "c&d"), ("x", "1=2")]);
        let encoded = body.encode().unwrap();
        assert_eq!(encoded.media_type, "application/x-www-form-urlencoded");
        assert_eq!(&encoded.bytes[..], b"a+b=c%26d&x=1%3D2");
    }

    #[test]
    fn multipart_boundary_is_fresh_per_encode() {
        let body = RequestBody::multipart(vec![MultipartPart::field("f", "v")]);
        let first = body.encode().unwrap();
        let second = body.encode().unwrap();
        assert_ne!(first.media_type, second.media_type);
    }

    /// Minimal RFC 7578 reader used to verify the encoder output.
    fn parse_multipart(bytes: &[u8], boundary: &str) -> Vec<(String, Option<String>, Vec<u8>)> {
        let text = bytes;
        let delim = format!("--{boundary}");
        let mut parts = Vec::new();
        let mut rest = text;
        loop {
            let start = rest
                .windows(delim.len())
                .position(|w| w == delim.as_bytes())
                .unwrap();
            rest = &rest[start + delim.len()..];
            if rest.starts_with(b"--") {
                break;
            }
            rest = &rest[2..]; // CRLF after the delimiter
            let header_end = rest.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
            let headers = String::from_utf8_lossy(&rest[..header_end]).to_string();
            let body_start = header_end + 4;
            let body_end = rest[body_start..]
                .windows(delim.len() + 2)
                .position(|w| &w[..2] == b"\r\n" && &w[2..] == delim.as_bytes())
                .unwrap();
            let body = rest[body_start..body_start + body_end].to_vec();
            let name = headers
                .split("name=\"")
                .nth(1)
                .and_then(|s| s.split('"').next())
                .unwrap()
                .to_string();
            let filename = headers
                .split("filename=\"")
                .nth(1)
                .and_then(|s| s.split('"').next())
                .map(str::to_string);
            parts.push((name, filename, body));
            rest = &rest[body_start + body_end..];
        }
        parts
    }

    #[test]
    fn multipart_round_trips_parts_in_order() {
        let body = RequestBody::multipart(vec![
            MultipartPart::field("first", "alpha"),
            MultipartPart::file("upload", "data.bin", "application/octet-stream", vec![0u8, 1, 2]),
            MultipartPart::field("last", "omega"),
        ]);
        let encoded = body.encode().unwrap();
        let boundary = encoded
            .media_type
            .split("boundary=")
            .nth(1)
            .unwrap()
            .to_string();
        let parts = parse_multipart(&encoded.bytes, &boundary);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].0, "first");
        assert_eq!(parts[0].2, b"alpha");
        assert_eq!(parts[1].0, "upload");
        assert_eq!(parts[1].1.as_deref(), Some("data.bin"));
        assert_eq!(parts[1].2, vec![0u8, 1, 2]);
        assert_eq!(parts[2].0, "last");
        assert_eq!(parts[2].2, b"omega");
    }
}
