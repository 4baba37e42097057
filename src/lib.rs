#![cfg_attr(nightly, feature(doc_cfg))]
//! Streaming `multipart/form-data` transcoding for proxying large uploads.
//!
//! Two symmetric, pull-based transforms, neither of which ever holds the
//! whole payload in memory:
//!
//! - [`MultipartEncoder`] wraps a stream of raw file bytes into a framed
//!   multipart body, optionally followed by simple key/value form fields.
//! - [`FieldExtractor`] parses an inbound multipart body incrementally and
//!   yields only the raw content of one named field, dropping framing and
//!   every other part on the fly.
//!
//! Both implement [`Stream`](futures_util::stream::Stream) over
//! [`Bytes`](bytes::Bytes) chunks and accept any fallible byte-chunk stream
//! as their source, so an HTTP request body can be re-emitted as a
//! multipart upload (or unwrapped from one) while it is still arriving.
//!
//! # Examples
//!
//! Round-tripping a payload through both transforms:
//!
//! ```
//! use std::convert::Infallible;
//!
//! use bytes::Bytes;
//! use futures_util::stream::once;
//! use multipart_relay::{FieldDescriptor, FieldExtractor, MultipartEncoder};
//!
//! # async fn run() {
//! let file = once(async { Result::<Bytes, Infallible>::Ok(Bytes::from("file data")) });
//! let descriptor = FieldDescriptor::new("file", "data.bin", mime::APPLICATION_OCTET_STREAM);
//!
//! let encoder = MultipartEncoder::new(file, "X-BOUNDARY", descriptor);
//! let extractor = FieldExtractor::new(encoder, "X-BOUNDARY", "file");
//!
//! assert_eq!(extractor.bytes().await.unwrap(), Bytes::from("file data"));
//! # }
//! # tokio::runtime::Runtime::new().unwrap().block_on(run());
//! ```
//!
//! Rejecting a request before constructing an extractor:
//!
//! ```
//! let boundary = multipart_relay::parse_boundary("multipart/form-data; boundary=ABCDEFG").unwrap();
//! assert_eq!(boundary, "ABCDEFG");
//!
//! // Maps to an unsupported-media-type response at the HTTP layer.
//! assert!(multipart_relay::parse_boundary("text/plain").is_err());
//! ```

use std::pin::Pin;

use bytes::Bytes;
use futures_util::stream::Stream;

pub use encoder::MultipartEncoder;
pub use error::Error;
pub use extractor::FieldExtractor;
pub use fields::{AdditionalFields, FieldDescriptor};
pub use tokenizer::{MultipartTokenizer, TokenSink};

mod buffer;
mod constants;
mod encoder;
mod error;
mod extractor;
mod fields;
mod helpers;
mod tokenizer;

/// A Result type often returned from methods that can have `multipart-relay`
/// errors.
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) type BytesStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Parses the `Content-Type` header to extract the boundary value.
pub fn parse_boundary<T: AsRef<str>>(content_type: T) -> crate::Result<String> {
    let m = content_type
        .as_ref()
        .parse::<mime::Mime>()
        .map_err(crate::Error::DecodeContentType)?;

    if !(m.type_() == mime::MULTIPART_FORM_DATA.type_() && m.subtype() == mime::MULTIPART_FORM_DATA.subtype()) {
        return Err(crate::Error::NoMultipart);
    }

    m.get_param(mime::BOUNDARY)
        .map(|name| name.as_str().to_owned())
        .ok_or(crate::Error::NoBoundary)
}
