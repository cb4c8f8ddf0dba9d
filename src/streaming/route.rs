//! Delivery locators and synthesized response metadata.
//!
//! A transfer is addressed as `.../{prefix}/{id}`; anything else is not ours
//! and must fall through to normal handling.

use crate::streaming::transfer::{TransferId, TransferMetadata};
use http::header::{
    CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS,
};
use http::{HeaderMap, HeaderValue};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters left alone by RFC 5987 `ext-value` encoding (same set as
/// `encodeURIComponent`).
const FILENAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Extract the transfer id from a request path.
///
/// Query strings and fragments are ignored. Returns `None` when the prefix
/// segment is absent or not followed by a non-empty segment.
pub fn transfer_id_from_path(path: &str, prefix: &str) -> Option<TransferId> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let mut segments = path.split('/');
    segments.find(|s| *s == prefix)?;
    segments
        .next()
        .filter(|s| !s.is_empty())
        .map(TransferId::from)
}

/// Build the locator for a transfer id.
pub fn delivery_path(prefix: &str, id: &TransferId) -> String {
    format!("/{}/{}", prefix, id)
}

/// Header values for the synthesized response.
///
/// Every value is a valid [`HeaderValue`]; producer-supplied text that is not
/// (control characters, line breaks) never reaches a response head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMetadata {
    pub content_type: HeaderValue,
    pub content_length: Option<u64>,
    pub content_disposition: HeaderValue,
}

impl ResponseMetadata {
    pub fn from_metadata(metadata: &TransferMetadata, default_content_type: &str) -> Self {
        let content_type = metadata
            .content_type
            .as_deref()
            .filter(|ct| !ct.is_empty())
            .and_then(|ct| match HeaderValue::from_str(ct) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(
                        "Rejecting content type {:?}, using {}",
                        ct,
                        default_content_type
                    );
                    None
                }
            })
            .or_else(|| HeaderValue::from_str(default_content_type).ok())
            .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));

        let content_disposition = HeaderValue::from_str(&content_disposition(&metadata.filename))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

        Self {
            content_type,
            // A zero size is treated as unknown.
            content_length: metadata.size.filter(|&size| size > 0),
            content_disposition,
        }
    }

    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, self.content_type.clone());
        headers.insert(CONTENT_DISPOSITION, self.content_disposition.clone());
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        if let Some(len) = self.content_length {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        }
        headers
    }
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 UTF-8 name.
pub fn content_disposition(filename: &str) -> String {
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii_filename(filename),
        utf8_percent_encode(filename, FILENAME_ENCODE_SET)
    )
}

/// Quotes, backslashes and control characters are dropped; other non-ASCII
/// characters become `_`.
fn ascii_filename(filename: &str) -> String {
    filename
        .chars()
        .filter(|c| !matches!(c, '"' | '\\') && !c.is_control())
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_id_from_path() {
        let prefix = "stream-download";
        assert_eq!(
            transfer_id_from_path("/stream-download/abc-123", prefix),
            Some(TransferId::from("abc-123"))
        );
        assert_eq!(
            transfer_id_from_path("/app/stream-download/xyz/extra?x=1", prefix),
            Some(TransferId::from("xyz"))
        );
        assert_eq!(
            transfer_id_from_path("/stream-download/q?dl=1", prefix),
            Some(TransferId::from("q"))
        );
        assert_eq!(transfer_id_from_path("/stream-download/", prefix), None);
        assert_eq!(transfer_id_from_path("/stream-download", prefix), None);
        assert_eq!(transfer_id_from_path("/other/abc", prefix), None);
        assert_eq!(transfer_id_from_path("/stream-downloads/abc", prefix), None);
    }

    #[test]
    fn test_delivery_path_round_trips() {
        let id = TransferId::from("A");
        let path = delivery_path("dl", &id);
        assert_eq!(path, "/dl/A");
        assert_eq!(transfer_id_from_path(&path, "dl"), Some(id));
    }

    #[test]
    fn test_content_disposition_unicode() {
        assert_eq!(
            content_disposition("résumé \"final\".pdf"),
            "attachment; filename=\"r_sum_ final.pdf\"; \
             filename*=UTF-8''r%C3%A9sum%C3%A9%20%22final%22.pdf"
        );
    }

    #[test]
    fn test_response_metadata_defaults() {
        let meta = ResponseMetadata::from_metadata(
            &TransferMetadata::new("report.pdf"),
            "application/octet-stream",
        );
        assert_eq!(meta.content_type, "application/octet-stream");
        assert_eq!(meta.content_length, None);

        let headers = meta.headers();
        assert!(headers.get(CONTENT_LENGTH).is_none());
        assert_eq!(headers[CACHE_CONTROL], "no-cache");
        assert_eq!(headers[X_CONTENT_TYPE_OPTIONS], "nosniff");
    }

    #[test]
    fn test_response_metadata_with_size_and_type() {
        let meta = ResponseMetadata::from_metadata(
            &TransferMetadata::new("report.pdf")
                .with_content_type("application/pdf")
                .with_size(10),
            "application/octet-stream",
        );
        assert_eq!(meta.content_type, "application/pdf");
        assert_eq!(meta.content_length, Some(10));
        assert_eq!(meta.headers()[CONTENT_LENGTH], "10");
    }

    #[test]
    fn test_zero_size_omits_length() {
        let meta = ResponseMetadata::from_metadata(
            &TransferMetadata::new("empty").with_size(0),
            "application/octet-stream",
        );
        assert_eq!(meta.content_length, None);
    }

    #[test]
    fn test_content_type_with_line_break_falls_back() {
        let meta = ResponseMetadata::from_metadata(
            &TransferMetadata::new("a.txt").with_content_type("text/plain\r\nSet-Cookie: x=1"),
            "application/octet-stream",
        );
        assert_eq!(meta.content_type, "application/octet-stream");

        let headers = meta.headers();
        assert!(headers.get("set-cookie").is_none());
        assert_eq!(headers.len(), 4);
    }

    #[test]
    fn test_filename_control_characters_stay_out_of_header() {
        let meta = ResponseMetadata::from_metadata(
            &TransferMetadata::new("evil\r\nX-Injected: 1.txt"),
            "application/octet-stream",
        );
        assert_eq!(
            meta.content_disposition,
            "attachment; filename=\"evilX-Injected: 1.txt\"; \
             filename*=UTF-8''evil%0D%0AX-Injected%3A%201.txt"
        );
    }
}
