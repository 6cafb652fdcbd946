//! Flattening inline documents for providers without document blocks.

use std::panic::{self, AssertUnwindSafe};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, warn};

const TEXTUAL_MIME_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/x-yaml",
    "application/yaml",
    "application/toml",
    "application/javascript",
];

/// Whether `mime` names a format we can decode as plain UTF-8 text.
pub fn is_textual(mime: &str) -> bool {
    let mime = mime.split(';').next().unwrap_or(mime).trim().to_ascii_lowercase();
    mime.starts_with("text/") || TEXTUAL_MIME_TYPES.contains(&mime.as_str())
}

fn is_pdf(mime: &str) -> bool {
    mime.split(';')
        .next()
        .is_some_and(|m| m.trim().eq_ignore_ascii_case("application/pdf"))
}

/// Text extracted from a base64 document, or a placeholder when the format
/// has no text extraction or the payload does not decode.
pub fn extract_text(mime: &str, data: &str, name: Option<&str>) -> String {
    let label = name.unwrap_or("document");
    let Ok(bytes) = STANDARD.decode(data.trim()) else {
        debug!(document = label, "Document payload is not valid base64");
        return placeholder(label, mime);
    };

    let text = if is_textual(mime) {
        String::from_utf8(bytes).ok()
    } else if is_pdf(mime) {
        pdf_text(label, &bytes)
    } else {
        None
    };

    match text {
        Some(text) => format!("[Document: {label}]\n{text}"),
        None => placeholder(label, mime),
    }
}

/// Plain text of every page, or `None` for scanned, encrypted or malformed
/// files. The extractor panics on some malformed fonts, so that is contained
/// here too.
fn pdf_text(label: &str, bytes: &[u8]) -> Option<String> {
    let extracted = panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes)));
    match extracted {
        Ok(Ok(text)) => {
            let text = text.trim();
            if text.is_empty() {
                debug!(document = label, "PDF has no extractable text");
                None
            } else {
                Some(text.to_string())
            }
        }
        Ok(Err(e)) => {
            warn!(document = label, error = %e, "PDF text extraction failed");
            None
        }
        Err(_) => {
            warn!(document = label, "PDF text extraction panicked");
            None
        }
    }
}

pub fn placeholder(label: &str, mime: &str) -> String {
    format!("[Document: {label} ({mime}): content not available]")
}

/// `data:` URI for an inline image.
pub fn data_uri(mime: &str, data: &str) -> String {
    format!("data:{mime};base64,{data}")
}

/// Split a `data:<mime>;base64,<data>` URI back into its parts.
pub fn parse_data_uri(uri: &str) -> Option<(String, String)> {
    let rest = uri.strip_prefix("data:")?;
    let (mime, data) = rest.split_once(";base64,")?;
    Some((mime.to_string(), data.to_string()))
}
