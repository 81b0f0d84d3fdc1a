//! Data-URI encoding for embedded file contents.
//!
//! Ignition carries file contents inline as data URIs. Plain-text
//! contents are percent-encoded so the result is a valid URI component;
//! credentials are carried as base64.

use base64::Engine;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Everything outside the URI "unreserved" set gets escaped.
const DATA_URI_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Encode text as a percent-encoded plain-text data URI.
pub fn plain_text_uri(content: &str) -> String {
    format!(
        "data:text/plain,{}",
        utf8_percent_encode(content, DATA_URI_SET)
    )
}

/// Encode bytes as a base64 data URI.
pub fn base64_uri(content: &[u8]) -> String {
    format!(
        "data:;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(content)
    )
}
