use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::{Stream, TryStreamExt};
#[cfg(feature = "tokio-io")]
use tokio_util::io::ReaderStream;

use crate::fields::{self, AdditionalFields, FieldDescriptor};
use crate::{constants, BytesStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncodingStage {
    FileHeader,
    FileContent,
    FileFooter,
    AdditionalFields,
    Finished,
}

/// Wraps a stream of raw file bytes into a well-formed `multipart/form-data`
/// body, lazily.
///
/// Framing bytes are synthesized per stage while the file content is passed
/// through chunk by chunk, so memory use stays bounded by one chunk no
/// matter how large the upload is. The file part always comes first; when
/// additional fields are configured they follow it as a single blob that
/// carries the closing boundary.
///
/// The boundary is assumed not to occur inside the file content; this is
/// not validated.
///
/// # Examples
///
/// ```
/// use std::convert::Infallible;
///
/// use bytes::Bytes;
/// use futures_util::stream::{once, TryStreamExt};
/// use multipart_relay::{FieldDescriptor, MultipartEncoder};
///
/// # async fn run() {
/// let file = once(async { Result::<Bytes, Infallible>::Ok(Bytes::from("file data")) });
/// let descriptor = FieldDescriptor::new("file", "data.bin", mime::APPLICATION_OCTET_STREAM);
/// let mut encoder = MultipartEncoder::new(file, "X-BOUNDARY", descriptor);
///
/// let mut body = Vec::new();
/// while let Some(chunk) = encoder.try_next().await.unwrap() {
///     body.extend_from_slice(&chunk);
/// }
///
/// assert!(body.ends_with(b"\r\n--X-BOUNDARY--\r\n"));
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(run());
/// ```
pub struct MultipartEncoder {
    stream: BytesStream,
    boundary: String,
    descriptor: FieldDescriptor,
    additional_fields: Option<AdditionalFields>,
    stage: EncodingStage,
}

impl MultipartEncoder {
    /// Creates an encoder producing a body with the file part only.
    pub fn new<S, O, E, B>(stream: S, boundary: B, descriptor: FieldDescriptor) -> MultipartEncoder
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
        B: Into<String>,
    {
        let stream = stream
            .map_ok(|b| b.into())
            .map_err(|err| crate::Error::StreamReadFailed(err.into()));

        MultipartEncoder {
            stream: Box::pin(stream),
            boundary: boundary.into(),
            descriptor,
            additional_fields: None,
            stage: EncodingStage::FileHeader,
        }
    }

    /// Creates an encoder that appends the given fields after the file part.
    pub fn new_with_fields<S, O, E, B>(
        stream: S,
        boundary: B,
        descriptor: FieldDescriptor,
        additional_fields: AdditionalFields,
    ) -> MultipartEncoder
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
        B: Into<String>,
    {
        let mut encoder = MultipartEncoder::new(stream, boundary, descriptor);
        encoder.additional_fields = Some(additional_fields);
        encoder
    }

    /// Creates an encoder reading the file content from an
    /// [`AsyncRead`](tokio::io::AsyncRead) reader.
    ///
    /// # Optional
    ///
    /// This requires the optional `tokio-io` feature to be enabled.
    #[cfg(feature = "tokio-io")]
    #[cfg_attr(nightly, doc(cfg(feature = "tokio-io")))]
    pub fn with_reader<R, B>(reader: R, boundary: B, descriptor: FieldDescriptor) -> MultipartEncoder
    where
        R: tokio::io::AsyncRead + Send + 'static,
        B: Into<String>,
    {
        let stream = ReaderStream::new(reader);
        MultipartEncoder::new(stream, boundary, descriptor)
    }

    /// Creates an encoder reading the file content from an
    /// [`AsyncRead`](tokio::io::AsyncRead) reader, appending the given
    /// fields after the file part.
    ///
    /// # Optional
    ///
    /// This requires the optional `tokio-io` feature to be enabled.
    #[cfg(feature = "tokio-io")]
    #[cfg_attr(nightly, doc(cfg(feature = "tokio-io")))]
    pub fn with_reader_with_fields<R, B>(
        reader: R,
        boundary: B,
        descriptor: FieldDescriptor,
        additional_fields: AdditionalFields,
    ) -> MultipartEncoder
    where
        R: tokio::io::AsyncRead + Send + 'static,
        B: Into<String>,
    {
        let stream = ReaderStream::new(reader);
        MultipartEncoder::new_with_fields(stream, boundary, descriptor, additional_fields)
    }

    /// The boundary token this encoder frames with.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// The value for the outbound request's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    fn file_header(&self) -> Bytes {
        let header = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
            self.boundary,
            self.descriptor.name(),
            self.descriptor.filename(),
            self.descriptor.content_type()
        );

        Bytes::from(header)
    }
}

impl Stream for MultipartEncoder {
    type Item = Result<Bytes, crate::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match this.stage {
                EncodingStage::FileHeader => {
                    this.stage = EncodingStage::FileContent;

                    #[cfg(feature = "log")]
                    log::trace!("boundary {}: file part header emitted", this.boundary);

                    return Poll::Ready(Some(Ok(this.file_header())));
                }
                EncodingStage::FileContent => match this.stream.as_mut().poll_next(cx) {
                    Poll::Ready(Some(Ok(chunk))) => {
                        // Empty chunks are skipped here rather than yielded,
                        // and exhaustion falls through to the footer stage
                        // within this same loop.
                        if chunk.is_empty() {
                            continue;
                        }
                        return Poll::Ready(Some(Ok(chunk)));
                    }
                    Poll::Ready(Some(Err(err))) => {
                        this.stage = EncodingStage::Finished;
                        return Poll::Ready(Some(Err(err)));
                    }
                    Poll::Ready(None) => {
                        this.stage = EncodingStage::FileFooter;
                    }
                    Poll::Pending => return Poll::Pending,
                },
                EncodingStage::FileFooter => {
                    #[cfg(feature = "log")]
                    log::trace!("boundary {}: file part footer emitted", this.boundary);

                    if this.additional_fields.is_some() {
                        this.stage = EncodingStage::AdditionalFields;
                        return Poll::Ready(Some(Ok(Bytes::from_static(constants::CRLF.as_bytes()))));
                    }

                    this.stage = EncodingStage::Finished;
                    let closing = format!("{}--{}--{}", constants::CRLF, this.boundary, constants::CRLF);
                    return Poll::Ready(Some(Ok(Bytes::from(closing))));
                }
                EncodingStage::AdditionalFields => {
                    this.stage = EncodingStage::Finished;

                    let additional_fields = match this.additional_fields.take() {
                        Some(additional_fields) => additional_fields,
                        None => return Poll::Ready(None),
                    };

                    return match fields::encode_additional_fields(&additional_fields, &this.boundary) {
                        Ok(blob) => Poll::Ready(Some(Ok(blob))),
                        Err(err) => Poll::Ready(Some(Err(err))),
                    };
                }
                EncodingStage::Finished => return Poll::Ready(None),
            }
        }
    }
}
