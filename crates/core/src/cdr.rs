//! Envelope sniffing for confirmation receipts (CDR).
//!
//! Gateways return the CDR in whatever wrapping their backend happens to
//! produce: plain XML, base64 of XML, base64 of a ZIP holding the XML, or
//! base64 applied twice. The detectors below run in a fixed order and the
//! first match wins; the order is a heuristic tuned to observed payloads,
//! not a format contract.

use base64::{engine::general_purpose::STANDARD, Engine};
use std::io::{Cursor, Read};
use thiserror::Error;

const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

/// Which detector produced the XML. Surfaced so callers can log how a
/// payload was recognized when the downstream parse later fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMethod {
    PlainXml,
    Base64Xml,
    Base64Zip,
    DoubleBase64Xml,
    DoubleBase64Zip,
    /// Last-resort match: the payload merely contained `<` and `>`.
    TagHeuristic,
}

#[derive(Debug)]
pub struct Decoded {
    pub xml: Vec<u8>,
    pub method: DecodeMethod,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("receipt payload is empty")]
    Empty,
    #[error("receipt archive contains no entries")]
    EmptyArchive,
    #[error("could not read receipt archive: {0}")]
    Archive(String),
    #[error("unrecognized receipt payload ({len} bytes, head {head_hex})")]
    Unrecognized { len: usize, head_hex: String },
}

impl DecodeError {
    fn unrecognized(bytes: &[u8]) -> Self {
        let head = &bytes[..bytes.len().min(10)];
        DecodeError::Unrecognized {
            len: bytes.len(),
            head_hex: hex::encode(head),
        }
    }
}

fn is_zip(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && &bytes[..4] == ZIP_MAGIC
}

/// XML prefix test after skipping a UTF-8 BOM and leading whitespace. The
/// recognized roots match what the authority and the delegated providers
/// actually emit.
fn looks_like_xml(bytes: &[u8]) -> bool {
    let trimmed = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes);
    let start = trimmed
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(trimmed.len());
    let body = &trimmed[start..];
    body.starts_with(b"<?xml")
        || body.starts_with(b"<ar:ApplicationResponse")
        || body.starts_with(b"<ApplicationResponse")
}

/// Strict base64 decode. Embedded newlines are common in gateway payloads,
/// so ASCII whitespace is stripped before the strict pass.
fn decode_base64(raw: &[u8]) -> Option<Vec<u8>> {
    let compact: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if compact.is_empty() {
        return None;
    }
    STANDARD.decode(&compact).ok()
}

/// Extract the receipt XML from a ZIP archive: first entry named `*.xml`
/// (case-insensitive), else the first entry at all.
fn unzip_receipt(bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| DecodeError::Archive(e.to_string()))?;
    if archive.is_empty() {
        return Err(DecodeError::EmptyArchive);
    }

    let mut pick = 0;
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| DecodeError::Archive(e.to_string()))?;
        if entry.name().to_ascii_lowercase().ends_with(".xml") {
            pick = i;
            break;
        }
    }

    let mut entry = archive
        .by_index(pick)
        .map_err(|e| DecodeError::Archive(e.to_string()))?;
    let mut content = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut content)
        .map_err(|e| DecodeError::Archive(e.to_string()))?;
    Ok(content)
}

/// Reduce a raw CDR payload to its XML body. See the module docs for the
/// detector ordering. Errors are diagnostic values, never panics; the
/// caller treats them as "no receipt available".
pub fn decode_envelope(raw: &[u8]) -> Result<Decoded, DecodeError> {
    if raw.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(DecodeError::Empty);
    }

    let decoded = match decode_base64(raw) {
        Some(decoded) => decoded,
        None => {
            // Not base64 at all; some providers hand back bare XML.
            if looks_like_xml(raw) {
                return Ok(Decoded {
                    xml: raw.to_vec(),
                    method: DecodeMethod::PlainXml,
                });
            }
            return Err(DecodeError::unrecognized(raw));
        }
    };

    if is_zip(&decoded) {
        return Ok(Decoded {
            xml: unzip_receipt(&decoded)?,
            method: DecodeMethod::Base64Zip,
        });
    }

    if looks_like_xml(&decoded) {
        return Ok(Decoded {
            xml: decoded,
            method: DecodeMethod::Base64Xml,
        });
    }

    // Rare case: the gateway base64-encodes an already-encoded payload.
    if let Some(twice) = decode_base64(&decoded) {
        if looks_like_xml(&twice) {
            return Ok(Decoded {
                xml: twice,
                method: DecodeMethod::DoubleBase64Xml,
            });
        }
        if is_zip(&twice) {
            return Ok(Decoded {
                xml: unzip_receipt(&twice)?,
                method: DecodeMethod::DoubleBase64Zip,
            });
        }
    }

    // Last resort. A misclassified binary payload fails soft at the XML
    // parse stage, so this cannot crash the poll flow.
    if decoded.contains(&b'<') && decoded.contains(&b'>') {
        return Ok(Decoded {
            xml: decoded,
            method: DecodeMethod::TagHeuristic,
        });
    }

    Err(DecodeError::unrecognized(&decoded))
}
