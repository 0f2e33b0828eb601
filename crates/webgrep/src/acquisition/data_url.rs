//! Inline `data:` URLs (RFC 2397), decoded without touching the network.

use super::http_client::FetchResponse;
use crate::errors::FetchError;
use base64::Engine;

/// Decode `data:[<mediatype>][;base64],<data>`.
pub fn decode(url: &str) -> Result<FetchResponse, FetchError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| FetchError::InvalidDataUrl("missing data: prefix".to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| FetchError::InvalidDataUrl("missing ','".to_string()))?;

    let (media, is_base64) = match meta.strip_suffix(";base64") {
        Some(m) => (m, true),
        None => (meta, false),
    };

    let bytes = if is_base64 {
        let cleaned: Vec<u8> = urlencoding::decode_binary(payload.as_bytes())
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        base64::engine::general_purpose::STANDARD
            .decode(&cleaned)
            .map_err(|e| FetchError::InvalidDataUrl(e.to_string()))?
    } else {
        urlencoding::decode_binary(payload.as_bytes()).into_owned()
    };

    let content_type = if media.is_empty() {
        Some("text/plain".to_string())
    } else {
        Some(media.to_string())
    };

    Ok(FetchResponse {
        bytes,
        content_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64() {
        let resp = decode("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(resp.bytes, b"hello");
        assert_eq!(resp.content_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_decode_percent_encoded_text() {
        let resp = decode("data:,var%20x%3D1").unwrap();
        assert_eq!(resp.bytes, b"var x=1");
        assert_eq!(resp.content_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_decode_leaves_bad_escapes_alone() {
        let resp = decode("data:text/plain,%41%zz%4").unwrap();
        assert_eq!(resp.bytes, b"A%zz%4");
        let resp = decode("data:image/png;base64,aGVs%0AbG8%3D").unwrap();
        assert_eq!(resp.bytes, b"hello");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode("data:image/png;base64").is_err());
        assert!(decode("data:image/png;base64,@@@").is_err());
    }
}
