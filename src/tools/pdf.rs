//! PDF text extraction backed by lopdf

use super::{Tool, ToolCall, ToolError, ToolKind, ToolOutput};
use tracing::{debug, info_span};

/// Extracts page text from PDF bytes on the blocking thread pool.
///
/// Output is deterministic for equal bytes: pages are emitted in page-number
/// order, each preceded by a `--- Page N ---` marker.
pub struct PdfTextTool;

impl PdfTextTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PdfTextTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Tool for PdfTextTool {
    fn kind(&self) -> ToolKind {
        ToolKind::ExtractText
    }

    fn name(&self) -> &'static str {
        "pdf_text"
    }

    fn description(&self) -> &'static str {
        "Read and extract text content from PDF financial documents"
    }

    async fn call(&self, call: ToolCall) -> Result<ToolOutput, ToolError> {
        let ToolCall::ExtractText { document } = call else {
            return Err(ToolError::invalid_input("pdf_text only handles extract_text calls"));
        };

        let text = tokio::task::spawn_blocking(move || extract_text(document.bytes()))
            .await
            .map_err(|e| ToolError::unavailable(format!("PDF extraction task failed: {}", e)))??;

        Ok(ToolOutput::Text(text))
    }
}

/// Pull text out of every page, normalizing whitespace.
pub fn extract_text(bytes: &[u8]) -> Result<String, ToolError> {
    let _span = info_span!("tool.pdf_text", size = bytes.len()).entered();

    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| ToolError::invalid_input(format!("Failed to load PDF: {}", e)))?;

    let mut report = String::new();
    for (page_num, _) in doc.get_pages() {
        let content = match doc.extract_text(&[page_num]) {
            Ok(text) => normalize(&text),
            Err(e) => {
                debug!(page = page_num, error = %e, "Page has no extractable text");
                continue;
            }
        };

        if content.is_empty() {
            continue;
        }

        report.push_str(&format!("\n--- Page {} ---\n", page_num));
        report.push_str(&content);
        report.push('\n');
    }

    Ok(report.trim().to_string())
}

fn normalize(text: &str) -> String {
    let mut out = text.replace("\r\n", "\n");
    while out.contains("\n\n\n") {
        out = out.replace("\n\n\n", "\n\n");
    }
    while out.contains("  ") {
        out = out.replace("  ", " ");
    }
    out.trim().to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    /// Build a PDF with one page per entry of `pages`.
    pub(crate) fn build_pdf(pages: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for text in pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_extracts_pages_in_order() {
        let bytes = build_pdf(&["Revenue grew strongly", "Debt remained low"]);
        let text = extract_text(&bytes).unwrap();

        let first = text.find("--- Page 1 ---").unwrap();
        let second = text.find("--- Page 2 ---").unwrap();
        assert!(first < second);
        assert!(text.contains("Revenue"));
        assert!(text.contains("Debt"));
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let bytes = build_pdf(&["Net income and cash flow"]);
        assert_eq!(extract_text(&bytes).unwrap(), extract_text(&bytes).unwrap());
    }

    #[test]
    fn test_corrupt_bytes_are_invalid_input() {
        let err = extract_text(b"this is not a pdf").unwrap_err();
        assert_eq!(err.kind, super::super::ToolErrorKind::InvalidInput);
    }

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize("a  b\n\n\n\nc  "), "a b\n\nc");
    }
}
