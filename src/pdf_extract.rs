//! Text-layer extraction for PDF invoices. Scanned documents are detected
//! and rejected; there is no OCR stage.

use lopdf::{Dictionary, Document};
use tracing::{debug, info, warn};

use crate::error::{AuditError, Result};
use crate::heuristics::{self, InvoiceData};

#[derive(Debug)]
pub enum PdfText {
    /// Usable text layer.
    Text(String),
    /// Image-only pages, or too little text to work with.
    Scanned,
    /// Not a PDF we can parse.
    Unreadable(String),
}

/// Fewer non-whitespace characters than this counts as scanned.
const MIN_TEXT_CHARS: usize = 30;

/// Share of image-only pages at which the document counts as scanned.
const SCANNED_PAGE_RATIO: f64 = 0.8;

pub fn extract_text_from_pdf(pdf_bytes: &[u8]) -> PdfText {
    let doc = match Document::load_mem(pdf_bytes) {
        Ok(d) => d,
        Err(e) => return PdfText::Unreadable(format!("Failed to parse PDF: {e}")),
    };

    if looks_like_scanned(&doc) {
        info!("Invoice PDF has no text layer on most pages");
        return PdfText::Scanned;
    }

    let text = match pdf_extract::extract_text_from_mem(pdf_bytes) {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "Text extraction failed, treating PDF as scanned");
            return PdfText::Scanned;
        }
    };

    let chars = text.chars().filter(|c| !c.is_whitespace()).count();
    if chars < MIN_TEXT_CHARS {
        info!(chars, "Text layer too thin, treating PDF as scanned");
        return PdfText::Scanned;
    }
    debug!(chars, "Text layer extracted");
    PdfText::Text(text)
}

fn page_resources<'a>(doc: &'a Document, page: &'a Dictionary) -> Option<&'a Dictionary> {
    let (_, resolved) = doc.dereference(page.get(b"Resources").ok()?).ok()?;
    resolved.as_dict().ok()
}

fn has_entries(doc: &Document, resources: &Dictionary, key: &[u8]) -> bool {
    resources
        .get(key)
        .ok()
        .and_then(|o| doc.dereference(o).ok())
        .and_then(|(_, resolved)| resolved.as_dict().ok())
        .is_some_and(|d| !d.is_empty())
}

/// Pages that carry images (XObjects) but no fonts are taken to be scans.
fn looks_like_scanned(doc: &Document) -> bool {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return false;
    }

    let scanned = pages
        .values()
        .filter_map(|&id| doc.get_object(id).ok()?.as_dict().ok())
        .filter_map(|page| page_resources(doc, page))
        .filter(|res| has_entries(doc, res, b"XObject") && !has_entries(doc, res, b"Font"))
        .count();

    let ratio = scanned as f64 / pages.len() as f64;
    debug!(pages = pages.len(), scanned, ratio, "Page scan check");
    ratio >= SCANNED_PAGE_RATIO
}

/// Read a text-layer PDF invoice and run the heuristic field extraction.
pub fn invoice_from_pdf(pdf_bytes: &[u8]) -> Result<InvoiceData> {
    match extract_text_from_pdf(pdf_bytes) {
        PdfText::Text(text) => {
            let invoice = heuristics::extract_invoice(&text);
            let (filled, total) = invoice.coverage();
            info!(filled, total, invoice_number = ?invoice.invoice_number, "Fields extracted from PDF");
            Ok(invoice)
        }
        PdfText::Scanned => Err(AuditError::Pdf(
            "scanned/image-only PDF, run OCR before auditing".to_string(),
        )),
        PdfText::Unreadable(e) => Err(AuditError::Pdf(e)),
    }
}
