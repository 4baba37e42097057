use std::borrow::Cow;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use encoding_rs::{Encoding, UTF_8};
use futures_util::stream::{Stream, TryStreamExt};
use http::header::{self, HeaderName, HeaderValue};
#[cfg(feature = "json")]
use serde::de::DeserializeOwned;
#[cfg(feature = "tokio-io")]
use tokio_util::io::ReaderStream;

use crate::tokenizer::{MultipartTokenizer, TokenSink};
use crate::{constants, BytesStream};

/// Isolates one named field's raw content out of an inbound
/// `multipart/form-data` stream, lazily.
///
/// Each poll drains bytes already confirmed to belong to the target field
/// before pulling another chunk from the underlying stream, so a slow
/// consumer throttles the source and no unbounded buffering occurs.
/// Framing, headers and every other part are stripped on the fly.
///
/// Dropping the extractor before the end of the stream drops the underlying
/// stream with it, releasing whatever resources back it.
///
/// # Examples
///
/// ```
/// use std::convert::Infallible;
///
/// use bytes::Bytes;
/// use futures_util::stream::once;
/// use multipart_relay::FieldExtractor;
///
/// # async fn run() {
/// let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.bin\"\r\nContent-Type: application/octet-stream\r\n\r\nfile data\r\n--X-BOUNDARY--\r\n";
/// let stream = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });
///
/// let extractor = FieldExtractor::new(stream, "X-BOUNDARY", "file");
/// let content = extractor.bytes().await.unwrap();
///
/// assert_eq!(content, Bytes::from("file data"));
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(run());
/// ```
pub struct FieldExtractor {
    stream: BytesStream,
    tokenizer: MultipartTokenizer,
    sink: TargetFieldSink,
    source_eof: bool,
    done: bool,
}

impl FieldExtractor {
    /// Creates an extractor for the given boundary and target field name.
    ///
    /// The field name matches on exact equality with the part's
    /// `Content-Disposition` name.
    pub fn new<S, O, E, B, F>(stream: S, boundary: B, field_name: F) -> FieldExtractor
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
        B: Into<String>,
        F: Into<String>,
    {
        let stream = stream
            .map_ok(|b| b.into())
            .map_err(|err| crate::Error::StreamReadFailed(err.into()));

        FieldExtractor {
            stream: Box::pin(stream),
            tokenizer: MultipartTokenizer::new(boundary),
            sink: TargetFieldSink::new(field_name.into()),
            source_eof: false,
            done: false,
        }
    }

    /// Creates an extractor reading the multipart body from an
    /// [`AsyncRead`](tokio::io::AsyncRead) reader.
    ///
    /// # Optional
    ///
    /// This requires the optional `tokio-io` feature to be enabled.
    #[cfg(feature = "tokio-io")]
    #[cfg_attr(nightly, doc(cfg(feature = "tokio-io")))]
    pub fn with_reader<R, B, F>(reader: R, boundary: B, field_name: F) -> FieldExtractor
    where
        R: tokio::io::AsyncRead + Send + 'static,
        B: Into<String>,
        F: Into<String>,
    {
        let stream = ReaderStream::new(reader);
        FieldExtractor::new(stream, boundary, field_name)
    }

    /// Yields the next chunk of the target field's content, if any.
    pub async fn chunk(&mut self) -> crate::Result<Option<Bytes>> {
        self.try_next().await
    }

    /// Reads the whole target field content into one buffer.
    ///
    /// Prefer streaming via [`chunk()`](FieldExtractor::chunk) or the
    /// [`Stream`] impl when the field can be large.
    pub async fn bytes(mut self) -> crate::Result<Bytes> {
        let mut buf = BytesMut::new();

        while let Some(bytes) = self.chunk().await? {
            buf.extend_from_slice(&bytes);
        }

        Ok(buf.freeze())
    }

    /// Reads the whole target field content as UTF-8 text.
    pub async fn text(self) -> crate::Result<String> {
        self.text_with_charset("utf-8").await
    }

    /// Reads the whole target field content as text in the given charset.
    pub async fn text_with_charset(self, charset: &str) -> crate::Result<String> {
        let encoding = Encoding::for_label(charset.as_bytes()).unwrap_or(UTF_8);

        let bytes = self.bytes().await?;

        let (text, _, _) = encoding.decode(&bytes);

        match text {
            Cow::Owned(s) => Ok(s),
            Cow::Borrowed(s) => Ok(String::from(s)),
        }
    }

    /// Reads the whole target field content and deserializes it as JSON.
    ///
    /// # Optional
    ///
    /// This requires the optional `json` feature to be enabled.
    #[cfg(feature = "json")]
    #[cfg_attr(nightly, doc(cfg(feature = "json")))]
    pub async fn json<T: DeserializeOwned>(self) -> crate::Result<T> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(crate::Error::DecodeJson)
    }
}

impl Stream for FieldExtractor {
    type Item = Result<Bytes, crate::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if !this.sink.pending.is_empty() {
                return Poll::Ready(Some(Ok(this.sink.pending.split().freeze())));
            }

            if this.done {
                return Poll::Ready(None);
            }

            if this.source_eof {
                this.done = true;
                if let Err(err) = this.tokenizer.finish(&mut this.sink) {
                    return Poll::Ready(Some(Err(err)));
                }
                continue;
            }

            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    if let Err(err) = this.tokenizer.feed(&chunk, &mut this.sink) {
                        this.done = true;
                        return Poll::Ready(Some(Err(err)));
                    }
                }
                Poll::Ready(Some(Err(err))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    this.source_eof = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Tracks which part the tokenizer is currently inside and collects only
/// the target field's content.
///
/// The pending buffer never holds more than the output of processing a
/// single upstream chunk; the extractor drains it before feeding another.
struct TargetFieldSink {
    field_name: String,
    is_in_target_field: bool,
    has_started_content: bool,
    pending: BytesMut,
}

impl TargetFieldSink {
    fn new(field_name: String) -> TargetFieldSink {
        TargetFieldSink {
            field_name,
            is_in_target_field: false,
            has_started_content: false,
            pending: BytesMut::new(),
        }
    }
}

impl TokenSink for TargetFieldSink {
    fn on_header(&mut self, name: &HeaderName, value: &HeaderValue) {
        if *name != header::CONTENT_DISPOSITION {
            return;
        }

        // Re-armed on every part, so at most one contiguous run of body
        // bytes is collected per matching part. Exact name equality: a
        // target of `file` must not match a part named `file2`.
        self.is_in_target_field = constants::CONTENT_DISPOSITION_FIELD_NAME_RE
            .captures(value.as_bytes())
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_bytes() == self.field_name.as_bytes())
            .unwrap_or(false);
        self.has_started_content = false;

        #[cfg(feature = "log")]
        if self.is_in_target_field {
            log::trace!("target field {:?} matched", self.field_name);
        }
    }

    fn on_body(&mut self, mut fragment: Bytes) {
        if !self.is_in_target_field {
            return;
        }

        if !self.has_started_content {
            // The first body byte of every part is the tokenizer's
            // header/body separator, stripped exactly once per part.
            if fragment.first() == Some(&constants::LF) {
                fragment.advance(1);
            }
            self.has_started_content = true;
        }

        self.pending.extend_from_slice(&fragment);
    }

    fn on_part_complete(&mut self) {
        self.is_in_target_field = false;
        self.has_started_content = false;
    }
}
