//! Core types for the volley request-execution engine.
//!
//! This crate holds the vocabulary shared by every other workspace member:
//! the closed [`Error`] taxonomy, the [`Endpoint`] request model and its
//! wire-request assembly, request bodies and the codec seam, cache keys and
//! entries, retry and cache policies, and the typed [`Response`] envelope.
//!
//! Nothing here performs I/O; the engine, cache tiers and queue build on
//! these values.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod body;
pub mod codec;
pub mod context;
pub mod endpoint;
pub mod entry;
pub mod error;
pub mod key;
pub mod policy;
pub mod response;

pub use body::{EncodedBody, MultipartPart, RequestBody};
pub use codec::{Codec, CodecExt, JsonCodec};
pub use context::{NO_REQUEUE_TAG, RequestContext};
pub use endpoint::{Endpoint, EndpointBuilder, MethodExt, WireRequest};
pub use entry::CacheEntry;
pub use error::Error;
pub use key::CacheKey;
pub use policy::{Backoff, CachePolicy, CacheSettings, Jitter, RetryPolicy};
pub use response::{Response, ResponseMetadata};

/// Raw byte payload type used throughout the engine.
/// `Bytes` gives cheap reference-counted cloning across tiers and tasks.
pub type Raw = bytes::Bytes;
