//! `data:` URI decoding for task attachments.
//!
//! Attachments arrive as `data:[<mime>][;base64],<payload>`. Decoding lets
//! the prompt describe the media type and size and preview text content.
//! Anything that does not parse is passed through as an opaque URL.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;

/// Media type assumed when a data URI omits one.
pub const DEFAULT_MEDIA_TYPE: &str = "text/plain";

/// A decoded `data:` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    /// Media type without parameters, lower-cased.
    pub media_type: String,
    /// Whether the payload was base64-encoded.
    pub base64: bool,
    /// Decoded bytes.
    pub data: Vec<u8>,
}

impl DataUri {
    /// Parses a `data:` URI. Returns `None` for other schemes or bad payloads.
    pub fn parse(uri: &str) -> Option<Self> {
        let rest = uri
            .get(..5)
            .filter(|scheme| scheme.eq_ignore_ascii_case("data:"))
            .map(|_| &uri[5..])?;
        let (meta, payload) = rest.split_once(',')?;

        let mut params = meta.split(';');
        let media_type = params
            .next()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MEDIA_TYPE)
            .to_ascii_lowercase();
        let base64 = params.any(|p| p.trim().eq_ignore_ascii_case("base64"));

        let data = if base64 {
            decode_base64(payload)?
        } else {
            urlencoding::decode_binary(payload.as_bytes()).into_owned()
        };

        Some(Self {
            media_type,
            base64,
            data,
        })
    }

    /// Whether the payload is meant to be read as text.
    pub fn is_textual(&self) -> bool {
        let media = self.media_type.as_str();
        media.starts_with("text/")
            || media.ends_with("+json")
            || media.ends_with("+xml")
            || matches!(
                media,
                "application/json" | "application/xml" | "application/javascript"
            )
    }

    /// Decoded text, if the payload is textual and valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        if !self.is_textual() {
            return None;
        }
        std::str::from_utf8(&self.data).ok()
    }

    /// Decoded size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the decoded payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn decode_base64(payload: &str) -> Option<Vec<u8>> {
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(&compact)
        .or_else(|_| STANDARD_NO_PAD.decode(compact.trim_end_matches('=')))
        .ok()
}
