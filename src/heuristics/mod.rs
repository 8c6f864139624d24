mod generic;

use serde::{Deserialize, Serialize};

/// A single invoice line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    #[serde(default, alias = "hsnCode")]
    pub hsn_code: Option<String>,
    pub qty: f64,
    pub rate: f64,
    pub amount: f64,
}

/// Structured invoice fields every check works from.
///
/// Field aliases accept the camelCase shape produced by upstream OCR services.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceData {
    #[serde(default, alias = "invoiceNumber")]
    pub invoice_number: Option<String>,
    #[serde(default, alias = "vendorName")]
    pub vendor_name: Option<String>,
    #[serde(default, alias = "invoiceDate")]
    pub invoice_date: Option<String>,
    #[serde(default, alias = "totalAmount")]
    pub total_amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default, alias = "gstNumbers")]
    pub gst_numbers: Vec<String>,
    #[serde(default, alias = "lineItems")]
    pub line_items: Vec<LineItem>,
}

impl InvoiceData {
    /// How many scalar fields were extracted, out of how many.
    pub fn coverage(&self) -> (usize, usize) {
        let total = 6;
        let filled = [
            self.invoice_number.is_some(),
            self.vendor_name.is_some(),
            self.invoice_date.is_some(),
            self.total_amount.is_some(),
            self.currency.is_some(),
            !self.gst_numbers.is_empty(),
        ]
        .iter()
        .filter(|&&v| v)
        .count();
        (filled, total)
    }

    pub fn has_gst(&self, placeholders: &[String]) -> bool {
        !crate::gstin::is_missing(&self.gst_numbers, placeholders)
    }

    pub fn display_number(&self) -> &str {
        self.invoice_number.as_deref().unwrap_or("Unknown")
    }

    pub fn display_vendor(&self) -> &str {
        self.vendor_name.as_deref().unwrap_or("Unknown")
    }
}

/// Extract structured invoice data from raw invoice text.
pub fn extract_invoice(text: &str) -> InvoiceData {
    generic::extract(text)
}
