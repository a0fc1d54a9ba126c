//! Parsing of the decoded ApplicationResponse receipt.

/// Structured view of a confirmation receipt. Produced from the XML body
/// that [`crate::cdr::decode_envelope`] extracts and consumed immediately by
/// the orchestrator; the raw bytes live in document storage, not here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Receipt {
    pub code: Option<String>,
    pub message: Option<String>,
    /// Verification URL carried in DocumentReference/DocumentDescription.
    pub qr_url: Option<String>,
    pub notes: Vec<String>,
}

fn find_element<'a, 'input: 'a>(
    node: roxmltree::Node<'a, 'input>,
    path: &[&str],
) -> Option<roxmltree::Node<'a, 'input>> {
    if path.is_empty() {
        return Some(node);
    }
    for child in node.children() {
        if child.is_element() && child.tag_name().name() == path[0] {
            if path.len() == 1 {
                return Some(child);
            }
            if let Some(found) = find_element(child, &path[1..]) {
                return Some(found);
            }
        }
    }
    None
}

fn get_text_at_path(root: roxmltree::Node, path: &[&str]) -> Option<String> {
    find_element(root, path)
        .and_then(|n| n.text())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parse a receipt document. Authorities occasionally return malformed or
/// truncated XML; this returns `None` in that case so a corrupt receipt can
/// never abort the polling flow.
pub fn parse_receipt(xml: &[u8]) -> Option<Receipt> {
    let text = std::str::from_utf8(xml).ok()?;
    let doc = roxmltree::Document::parse(text).ok()?;
    let root = doc.root_element();

    // Namespace prefixes vary between providers (ar:, none at all), so
    // matching is by local tag name only.
    let code = get_text_at_path(root, &["DocumentResponse", "Response", "ResponseCode"]);
    let message = get_text_at_path(root, &["DocumentResponse", "Response", "Description"]);
    let qr_url = get_text_at_path(
        root,
        &["DocumentResponse", "DocumentReference", "DocumentDescription"],
    );

    let notes = root
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "Note")
        .filter_map(|n| n.text())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    Some(Receipt {
        code,
        message,
        qr_url,
        notes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCEPTED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ar:ApplicationResponse
    xmlns:ar="urn:oasis:names:specification:ubl:schema:xsd:ApplicationResponse-2"
    xmlns:cac="urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2"
    xmlns:cbc="urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2">
  <cbc:Note>OK</cbc:Note>
  <cac:DocumentResponse>
    <cac:Response>
      <cbc:ResponseCode>0</cbc:ResponseCode>
      <cbc:Description>Aceptado</cbc:Description>
    </cac:Response>
    <cac:DocumentReference>
      <cbc:ID>T001-123</cbc:ID>
      <cbc:DocumentDescription>https://e.example.gob/verify?id=T001-123</cbc:DocumentDescription>
    </cac:DocumentReference>
  </cac:DocumentResponse>
</ar:ApplicationResponse>"#;

    #[test]
    fn accepted_receipt_fields() {
        let receipt = parse_receipt(ACCEPTED.as_bytes()).unwrap();
        assert_eq!(receipt.code.as_deref(), Some("0"));
        assert_eq!(receipt.message.as_deref(), Some("Aceptado"));
        assert_eq!(
            receipt.qr_url.as_deref(),
            Some("https://e.example.gob/verify?id=T001-123")
        );
        assert_eq!(receipt.notes, vec!["OK".to_string()]);
    }

    #[test]
    fn malformed_xml_returns_none() {
        assert!(parse_receipt(b"<?xml version=\"1.0\"?><ar:Application").is_none());
        assert!(parse_receipt(b"not xml at all").is_none());
        assert!(parse_receipt(&[0xff, 0xfe, 0x00]).is_none());
    }

    #[test]
    fn missing_sections_degrade_to_empty_fields() {
        let xml = r#"<?xml version="1.0"?><ApplicationResponse><Other/></ApplicationResponse>"#;
        let receipt = parse_receipt(xml.as_bytes()).unwrap();
        assert_eq!(receipt, Receipt::default());
    }

    #[test]
    fn multiple_notes_keep_document_order() {
        let xml = r#"<?xml version="1.0"?>
<ApplicationResponse>
  <Note>first</Note>
  <Note>second</Note>
</ApplicationResponse>"#;
        let receipt = parse_receipt(xml.as_bytes()).unwrap();
        assert_eq!(receipt.notes, vec!["first", "second"]);
    }
}
