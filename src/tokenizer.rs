use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};

use crate::buffer::TokenBuffer;
use crate::{constants, helpers};

/// Receives the tokens produced by [`MultipartTokenizer`].
///
/// Modeled as a trait rather than captured closures so the consumer's state
/// machine stays independently testable and free of shared mutable state.
pub trait TokenSink {
    /// A single part header, invoked once per header line.
    fn on_header(&mut self, name: &HeaderName, value: &HeaderValue);

    /// A fragment of the current part's body. The first fragment of every
    /// part starts with the line-feed byte left over from the header block
    /// terminator; see [`MultipartTokenizer`].
    fn on_body(&mut self, fragment: Bytes);

    /// The current part's body ended at a boundary.
    fn on_part_complete(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenizingStage {
    FindingFirstBoundary,
    DeterminingBoundaryType,
    ReadingPartHeaders,
    ReadingPartBody,
    Eof,
}

/// An incremental `multipart/form-data` parser.
///
/// Raw bytes are pushed in via [`feed`](MultipartTokenizer::feed) in
/// arbitrary fragments; header lines, body fragments and part completions
/// are reported synchronously through a [`TokenSink`]. No buffer of the
/// full body is ever retained: only the bytes that could still belong to a
/// split delimiter are held between feeds.
///
/// Part boundary convention: the `\r\n\r\n` terminating a part's header
/// block is consumed only up to its third byte, so the final `\n` is
/// delivered as the first body byte of the part. Consumers that want the
/// exact part content strip that single leading byte once per part.
pub struct MultipartTokenizer {
    buffer: TokenBuffer,
    stage: TokenizingStage,
    open_delimiter: String,
    body_delimiter: String,
}

impl MultipartTokenizer {
    /// Creates a tokenizer for the given boundary token.
    ///
    /// The boundary is assumed not to occur inside any part's content; this
    /// is not validated.
    pub fn new<B: Into<String>>(boundary: B) -> MultipartTokenizer {
        let boundary = boundary.into();

        MultipartTokenizer {
            buffer: TokenBuffer::new(),
            stage: TokenizingStage::FindingFirstBoundary,
            open_delimiter: format!("{}{}", constants::BOUNDARY_EXT, boundary),
            body_delimiter: format!("{}{}{}", constants::CRLF, constants::BOUNDARY_EXT, boundary),
        }
    }

    /// Feeds a fragment of the multipart stream, synchronously invoking the
    /// sink zero or more times.
    pub fn feed<S: TokenSink>(&mut self, data: &[u8], sink: &mut S) -> crate::Result<()> {
        self.buffer.extend(data);
        self.process(sink)
    }

    /// Signals end of input. Fails with
    /// [`IncompleteStream`](crate::Error::IncompleteStream) unless the
    /// closing boundary has been seen.
    pub fn finish<S: TokenSink>(&mut self, sink: &mut S) -> crate::Result<()> {
        self.process(sink)?;

        if self.stage == TokenizingStage::Eof {
            Ok(())
        } else {
            Err(crate::Error::IncompleteStream)
        }
    }

    fn process<S: TokenSink>(&mut self, sink: &mut S) -> crate::Result<()> {
        loop {
            match self.stage {
                TokenizingStage::FindingFirstBoundary => {
                    match self.buffer.find(self.open_delimiter.as_bytes()) {
                        Some(idx) => {
                            self.buffer.advance(idx + self.open_delimiter.len());
                            self.stage = TokenizingStage::DeterminingBoundaryType;
                        }
                        None => {
                            // Discard preamble bytes that can no longer be
                            // part of the first boundary.
                            let keep = self.open_delimiter.len() - 1;
                            if self.buffer.len() > keep {
                                let discard = self.buffer.len() - keep;
                                self.buffer.advance(discard);
                            }
                            return Ok(());
                        }
                    }
                }
                TokenizingStage::DeterminingBoundaryType => {
                    let ext = match self.buffer.read_exact(constants::BOUNDARY_EXT.len()) {
                        Some(bytes) => bytes,
                        None => return Ok(()),
                    };

                    if &ext[..] == constants::BOUNDARY_EXT.as_bytes() {
                        self.stage = TokenizingStage::Eof;
                    } else if &ext[..] == constants::CRLF.as_bytes() {
                        self.stage = TokenizingStage::ReadingPartHeaders;
                    } else {
                        return Err(crate::Error::IncompleteStream);
                    }
                }
                TokenizingStage::ReadingPartHeaders => {
                    let idx = match self.buffer.find(constants::CRLF_CRLF.as_bytes()) {
                        Some(idx) => idx,
                        None => return Ok(()),
                    };

                    let header_len = idx + constants::CRLF_CRLF.len();
                    let mut headers = [httparse::EMPTY_HEADER; constants::MAX_HEADERS];

                    match httparse::parse_headers(&self.buffer.peek()[..header_len], &mut headers) {
                        Ok(httparse::Status::Complete((_, raw_headers))) => {
                            for raw_header in raw_headers {
                                let (name, value) = helpers::convert_raw_header(raw_header)?;
                                sink.on_header(&name, &value);
                            }
                        }
                        Ok(httparse::Status::Partial) => {
                            return Err(crate::Error::IncompleteHeaders);
                        }
                        Err(err) => {
                            return Err(crate::Error::ReadHeaderFailed(err));
                        }
                    }

                    // Keep the final LF of the terminator: it reaches the
                    // sink as the first body byte of the part.
                    self.buffer.advance(header_len - 1);
                    self.stage = TokenizingStage::ReadingPartBody;
                }
                TokenizingStage::ReadingPartBody => {
                    let (done, bytes) = self.buffer.read_body_data(self.body_delimiter.as_bytes());

                    if !bytes.is_empty() {
                        sink.on_body(bytes);
                    }

                    if done {
                        sink.on_part_complete();
                        self.stage = TokenizingStage::DeterminingBoundaryType;
                    } else {
                        return Ok(());
                    }
                }
                TokenizingStage::Eof => {
                    // Epilogue bytes after the closing boundary are dropped.
                    let len = self.buffer.len();
                    self.buffer.advance(len);
                    return Ok(());
                }
            }
        }
    }
}
