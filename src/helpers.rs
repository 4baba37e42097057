use std::convert::TryFrom;

use http::header::{HeaderName, HeaderValue};
use httparse::Header;

pub(crate) fn convert_raw_header(raw_header: &Header) -> crate::Result<(HeaderName, HeaderValue)> {
    let name = HeaderName::try_from(raw_header.name).map_err(|err| crate::Error::DecodeHeaderName {
        name: raw_header.name.to_owned(),
        cause: err.into(),
    })?;

    let value = HeaderValue::try_from(raw_header.value).map_err(|err| crate::Error::DecodeHeaderValue {
        value: raw_header.value.to_owned(),
        cause: err.into(),
    })?;

    Ok((name, value))
}
