use base64::{
    Engine,
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use bytes::Bytes;
use percent_encoding::percent_decode_str;
use tracing::warn;

use crate::{
    error::{NetError, NetResult},
    operation::Operation,
    traits::{OnProgress, Transport},
    types::{Headers, Request, RequestType, Response},
};

// Accepts both padded and unpadded input; URL-safe characters are mapped
// onto the standard alphabet before decoding.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decoded `data:` URI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataUri {
    /// MIME part, possibly empty.
    pub content_type: String,
    pub data: Bytes,
}

/// Parses `data:[<mime>][;<encoding>],<payload>`.
///
/// # Errors
///
/// `MalformedDataUri` when the scheme or the `,` separator is missing, or the
/// payload does not decode; `UnknownDataUriEncoding` for any encoding other
/// than `base64`.
pub fn parse_data_uri(uri: &str) -> NetResult<DataUri> {
    let path = match uri.split_once(':') {
        Some((scheme, path)) if scheme.eq_ignore_ascii_case(DataUriTransport::SCHEME) => path,
        _ => {
            warn!(uri, "bad data URI, failed to parse scheme");
            return Err(NetError::malformed_data_uri(uri));
        }
    };

    let Some((info, payload)) = path.split_once(',') else {
        warn!(uri, "bad data URI, failed to extract encoding and MIME type");
        return Err(NetError::malformed_data_uri(uri));
    };

    let payload = percent_decode_str(payload).decode_utf8().map_err(|_| {
        warn!(uri, "bad data URI, payload is not valid percent-encoded UTF-8");
        NetError::malformed_data_uri(uri)
    })?;

    let mut params = info.split(';');
    let content_type = params.next().unwrap_or_default().to_string();

    let data = match params.next() {
        Some("base64") => {
            let normalized: String = payload
                .chars()
                .map(|c| match c {
                    '-' => '+',
                    '_' => '/',
                    other => other,
                })
                .collect();
            BASE64.decode(normalized).map_err(|error| {
                warn!(uri, %error, "bad data URI, invalid base64 payload");
                NetError::malformed_data_uri(uri)
            })?
        }
        Some(_) => {
            warn!(uri, "bad data URI, unknown encoding");
            return Err(NetError::unknown_data_uri_encoding(uri));
        }
        None => payload.into_owned().into_bytes(),
    };

    Ok(DataUri {
        content_type,
        data: Bytes::from(data),
    })
}

/// Transport for `data:` URIs. Settles synchronously.
#[derive(Clone, Copy, Debug, Default)]
pub struct DataUriTransport;

impl DataUriTransport {
    pub const SCHEME: &'static str = "data";
}

impl Transport for DataUriTransport {
    fn fetch(
        &self,
        uri: &str,
        _request: &Request,
        _request_type: RequestType,
        _on_progress: OnProgress,
    ) -> Operation<Response> {
        match parse_data_uri(uri) {
            Ok(parsed) => Operation::completed(Response {
                uri: uri.to_string(),
                original_uri: uri.to_string(),
                data: parsed.data,
                headers: Headers::from_iter([("content-type", parsed.content_type)]),
                from_cache: false,
                time: None,
            }),
            Err(error) => Operation::failed(error),
        }
    }
}
