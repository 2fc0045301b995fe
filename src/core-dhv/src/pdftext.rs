//! First-page text extraction for classification prompts.

use crate::Error;

/// The classifier only needs an excerpt; anything longer bloats the prompt.
const MAX_EXCERPT_CHARS: usize = 4_000;

/// Extracts the text of the first page of a PDF. Returns an error for
/// documents lopdf cannot parse (scanned/image-only PDFs yield an empty
/// string, not an error).
pub fn first_page_text(pdf_bytes: &[u8]) -> Result<String, Error> {
    let doc = lopdf::Document::load_mem(pdf_bytes)
        .map_err(|e| Error::PdfText(format!("Failed to parse PDF: {}", e)))?;

    let first_page = match doc.get_pages().keys().next() {
        Some(page_num) => *page_num,
        None => return Ok(String::new()),
    };

    let text = doc
        .extract_text(&[first_page])
        .map_err(|e| Error::PdfText(format!("Failed to extract text: {}", e)))?;

    let mut excerpt: String = text.chars().take(MAX_EXCERPT_CHARS).collect();
    let trimmed = excerpt.trim();
    if trimmed.len() != excerpt.len() {
        excerpt = trimmed.to_string();
    }
    Ok(excerpt)
}
