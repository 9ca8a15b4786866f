//! Decoding of the input photo sent with a job.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;

use crate::errors::{Error, Result};
use crate::gateway::InlineMedia;
use crate::object_store::is_raster_image;

fn invalid(message: &str) -> Error {
    Error::BadRequest {
        message: message.to_string(),
    }
}

/// Parse a `data:image/<type>;base64,<payload>` URI into inline media of at most `max_bytes`.
pub fn parse_data_uri(uri: &str, max_bytes: usize) -> Result<InlineMedia> {
    let rest = uri
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| invalid("image must be a data URI"))?;
    let (meta, payload) = rest.split_once(',').ok_or_else(|| invalid("image data URI has no payload"))?;
    let mime_type = meta
        .strip_suffix(";base64")
        .ok_or_else(|| invalid("image data URI must be base64 encoded"))?
        .to_ascii_lowercase();

    if !is_raster_image(&mime_type) {
        return Err(invalid("image must be a PNG, JPEG, WebP, GIF or HEIC photo"));
    }

    let payload: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if payload.is_empty() {
        return Err(invalid("image is empty"));
    }
    // Reject oversized payloads before spending time decoding them
    if payload.len() / 4 * 3 > max_bytes + 2 {
        return Err(Error::BadRequest {
            message: format!("image must be at most {max_bytes} bytes"),
        });
    }

    let data = STANDARD
        .decode(payload.as_bytes())
        .map_err(|_| invalid("image is not valid base64"))?;
    if data.len() > max_bytes {
        return Err(Error::BadRequest {
            message: format!("image must be at most {max_bytes} bytes"),
        });
    }

    Ok(InlineMedia {
        mime_type,
        data: Bytes::from(data),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_png_data_uri() {
        let media = parse_data_uri("data:image/png;base64,iVBORw0KGgo=", 1024).unwrap();
        assert_eq!(media.mime_type, "image/png");
        assert_eq!(&media.data[..], &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]);
    }

    #[test]
    fn tolerates_line_breaks_and_uppercase_types() {
        let media = parse_data_uri("data:IMAGE/JPEG;base64,/9j/\n4AAQ", 1024).unwrap();
        assert_eq!(media.mime_type, "image/jpeg");
        assert_eq!(media.data.len(), 6);
    }

    #[test]
    fn rejects_malformed_inputs() {
        for uri in [
            "iVBORw0KGgo=",
            "data:image/png,iVBORw0KGgo=",
            "data:text/plain;base64,aGVsbG8=",
            "data:image/;base64,aGVsbG8=",
            "data:image/svg+xml;base64,PHN2Zy8+",
            "data:image/png;base64,",
            "data:image/png;base64,!!!!",
        ] {
            let err = parse_data_uri(uri, 1024).unwrap_err();
            assert!(matches!(err, Error::BadRequest { .. }), "{uri} should be rejected");
        }
    }

    #[test]
    fn enforces_size_limit() {
        let err = parse_data_uri("data:image/png;base64,iVBORw0KGgo=", 4).unwrap_err();
        assert!(matches!(err, Error::BadRequest { ref message } if message.contains("at most 4 bytes")));
    }
}
