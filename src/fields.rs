use bytes::{Bytes, BytesMut};

use crate::constants;

/// Describes the single file part framed by the encoder.
///
/// Constructed once per request and owned by the encoder for its whole
/// lifetime. The name and filename are written into the part's
/// `Content-Disposition` header verbatim; callers are expected not to put
/// quotes or CRLF in them.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    name: String,
    filename: String,
    content_type: mime::Mime,
}

impl FieldDescriptor {
    pub fn new<N, F>(name: N, filename: F, content_type: mime::Mime) -> FieldDescriptor
    where
        N: Into<String>,
        F: Into<String>,
    {
        FieldDescriptor {
            name: name.into(),
            filename: filename.into(),
            content_type,
        }
    }

    /// The form field name, e.g. `file`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The filename advertised in the `Content-Disposition` header.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The `Content-Type` of the file part.
    pub fn content_type(&self) -> &mime::Mime {
        &self.content_type
    }
}

/// Simple string key/value form fields appended after the file part, in
/// insertion order.
#[derive(Debug, Clone, Default)]
pub struct AdditionalFields {
    fields: Vec<(String, String)>,
}

impl AdditionalFields {
    pub fn new() -> AdditionalFields {
        AdditionalFields::default()
    }

    /// Appends a field; duplicate names are kept, in order.
    pub fn append<N, V>(&mut self, name: N, value: V)
    where
        N: Into<String>,
        V: Into<String>,
    {
        self.fields.push((name.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

/// Encodes all additional fields into one blob, terminated with the closing
/// boundary. The encoder emits this as its final chunk.
pub(crate) fn encode_additional_fields(fields: &AdditionalFields, boundary: &str) -> crate::Result<Bytes> {
    let mut buf = BytesMut::new();

    for (name, value) in fields.iter() {
        if name.contains('"') || name.contains('\r') || name.contains('\n') {
            return Err(crate::Error::FieldEncodeFailed {
                field_name: name.to_owned(),
            });
        }

        let part_header = format!(
            "{}{}{}Content-Disposition: form-data; name=\"{}\"{}",
            constants::BOUNDARY_EXT,
            boundary,
            constants::CRLF,
            name,
            constants::CRLF_CRLF
        );

        buf.extend_from_slice(part_header.as_bytes());
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(constants::CRLF.as_bytes());
    }

    let closing = format!("{}{}{}{}", constants::BOUNDARY_EXT, boundary, constants::BOUNDARY_EXT, constants::CRLF);
    buf.extend_from_slice(closing.as_bytes());

    Ok(buf.freeze())
}
