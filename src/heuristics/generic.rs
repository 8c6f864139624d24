use super::{InvoiceData, LineItem};
use regex::Regex;

/// Main extraction entry point: keyword-anchored regex patterns tuned for
/// Indian tax invoices.
pub fn extract(text: &str) -> InvoiceData {
    InvoiceData {
        invoice_number: extract_invoice_number(text),
        vendor_name: extract_vendor(text),
        invoice_date: extract_invoice_date(text),
        total_amount: extract_total_amount(text),
        currency: extract_currency(text),
        gst_numbers: extract_gst_numbers(text),
        line_items: extract_line_items(text),
    }
}

// ---------------------------------------------------------------------------
// Scalar field extractors
// ---------------------------------------------------------------------------

fn extract_invoice_number(text: &str) -> Option<String> {
    let re = Regex::new(
        r"(?i)(?:Invoice|Bill)\s*(?:No\.?|Number|#)\s*[:\-]?\s*([A-Za-z0-9][A-Za-z0-9\-/]*)",
    )
    .ok()?;
    re.captures(text).map(|c| c[1].trim().to_string())
}

fn extract_invoice_date(text: &str) -> Option<String> {
    // 16/02/2026, 16-02-26, 16-Feb-2026, 16 February 2026, February 16, 2026
    let re = Regex::new(
        r"(?i)(?:Invoice\s+Date|Dated|Date)\s*[:\-]?\s*(\d{1,2}[/\-.]\d{1,2}[/\-.]\d{2,4}|\d{1,2}[\-\s][A-Za-z]{3,9}[\-\s]\d{2,4}|[A-Za-z]{3,9}\s+\d{1,2},?\s+\d{4})",
    )
    .ok()?;
    re.captures(text).map(|c| c[1].trim().to_string())
}

fn extract_currency(text: &str) -> Option<String> {
    let re = Regex::new(r"(?i)(₹|\bRs\.?|\bINR\b)").ok()?;
    re.is_match(text).then(|| "INR".to_string())
}

fn extract_total_amount(text: &str) -> Option<f64> {
    // Prefer explicit grand-total labels; a bare "Total" also matches
    // sub-totals and tax totals, so it is only the fallback.
    let grand = r"(?i)(?:Grand\s+Total|Total\s+Amount|Invoice\s+Total|Amount\s+Payable|Net\s+Payable)\s*(?:\([^)\n]*\))?\s*[:\-]?\s*(?:₹|Rs\.?|INR)?\s*(\d[\d,]*(?:\.\d{1,2})?)";
    let bare = r"(?i)\bTotal\s*[:\-]?\s*(?:₹|Rs\.?|INR)?\s*(\d[\d,]*(?:\.\d{1,2})?)";

    last_amount(text, grand).or_else(|| last_amount(text, bare))
}

/// Value of the last match of `pattern`, whose first group is a number with
/// optional (Indian or western) thousands separators.
fn last_amount(text: &str, pattern: &str) -> Option<f64> {
    let re = Regex::new(pattern).ok()?;
    re.captures_iter(text)
        .filter_map(|c| parse_amount(&c[1]))
        .last()
}

fn parse_amount(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse::<f64>().ok()
}

fn extract_gst_numbers(text: &str) -> Vec<String> {
    let Ok(re) = Regex::new(r"\b(\d{2}[A-Z]{5}\d{4}[A-Z][0-9A-Z]Z[0-9A-Z])\b") else {
        return Vec::new();
    };
    let upper = text.to_uppercase();
    let mut found: Vec<String> = Vec::new();
    for cap in re.captures_iter(&upper) {
        let g = cap[1].to_string();
        if !found.contains(&g) {
            found.push(g);
        }
    }
    found
}

fn extract_vendor(text: &str) -> Option<String> {
    let labelled = Regex::new(
        r"(?im)^\s*(?:M/s\.?|Seller|Sold\s+By|Supplier|From)\s*[:\-]?\s*([A-Za-z][^\n]*?)\s*$",
    )
    .ok()?;
    if let Some(c) = labelled.captures(text) {
        return Some(c[1].trim().to_string());
    }

    // Fall back to the first line that reads like a company name.
    let company = Regex::new(
        r"(?im)^\s*([A-Za-z][A-Za-z0-9&.,'\s]*?(?:Pvt\.?\s*Ltd\.?|Private\s+Limited|Limited|Ltd\.?|LLP|Enterprises|Traders|Industries))\s*$",
    )
    .ok()?;
    company.captures(text).map(|c| c[1].trim().to_string())
}

// ---------------------------------------------------------------------------
// Line items extraction
// ---------------------------------------------------------------------------

fn extract_line_items(text: &str) -> Vec<LineItem> {
    // [sr no] description  HSN  qty  [unit]  rate  amount
    let Ok(row_re) = Regex::new(
        r"(?m)^\s*(?:\d+[.)]?\s+)?(?P<desc>[A-Za-z][^\n]*?)\s+(?P<hsn>\d{4,8})\s+(?P<qty>\d+(?:\.\d+)?)\s+(?:[A-Za-z]+\.?\s+)?(?P<rate>\d[\d,]*(?:\.\d+)?)\s+(?P<amount>\d[\d,]*(?:\.\d+)?)\s*$",
    ) else {
        return Vec::new();
    };

    row_re
        .captures_iter(text)
        .filter_map(|cap| {
            Some(LineItem {
                description: cap["desc"].trim().to_string(),
                hsn_code: Some(cap["hsn"].to_string()),
                qty: cap["qty"].parse().ok()?,
                rate: parse_amount(&cap["rate"])?,
                amount: parse_amount(&cap["amount"])?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "TAX INVOICE
Sold By: Shree Ganesh Steel Traders
GSTIN: 27AAPFU0939F1ZV
Invoice No: SGT/2024-25/0142
Invoice Date: 08/11/2024
Bill To: Fintel Logistics Pvt Ltd
Buyer GSTIN: 24aaacc1206d1zm

Sr Description HSN Qty Unit Rate Amount
1 TMT Steel Bars 7214 10 Nos 4,500.00 45,000.00
2 Binding Wire 7217 5 Kg 120.50 602.50

Sub Total 45,602.50
CGST @9% 4,104.23
SGST @9% 4,104.23
Grand Total: Rs. 53,810.96
";

    #[test]
    fn test_scalar_fields() {
        let inv = extract(SAMPLE);
        assert_eq!(inv.invoice_number.as_deref(), Some("SGT/2024-25/0142"));
        assert_eq!(inv.invoice_date.as_deref(), Some("08/11/2024"));
        assert_eq!(inv.vendor_name.as_deref(), Some("Shree Ganesh Steel Traders"));
        assert_eq!(inv.total_amount, Some(53810.96));
        assert_eq!(inv.currency.as_deref(), Some("INR"));
        assert_eq!(inv.coverage(), (6, 6));
    }

    #[test]
    fn test_gst_numbers_deduplicated_and_uppercased() {
        let text = format!("{SAMPLE}\nSeller GSTIN 27AAPFU0939F1ZV again");
        let inv = extract(&text);
        assert_eq!(inv.gst_numbers, vec!["27AAPFU0939F1ZV", "24AAACC1206D1ZM"]);
    }

    #[test]
    fn test_line_items() {
        let inv = extract(SAMPLE);
        assert_eq!(inv.line_items.len(), 2);
        let first = &inv.line_items[0];
        assert_eq!(first.description, "TMT Steel Bars");
        assert_eq!(first.hsn_code.as_deref(), Some("7214"));
        assert_eq!(first.qty, 10.0);
        assert_eq!(first.rate, 4500.0);
        assert_eq!(first.amount, 45000.0);
        assert_eq!(inv.line_items[1].amount, 602.50);
    }

    #[test]
    fn test_indian_digit_grouping() {
        assert_eq!(
            extract_total_amount("Total Amount (INR): 1,25,000.00"),
            Some(125000.0)
        );
    }

    #[test]
    fn test_bare_total_fallback() {
        assert_eq!(extract_total_amount("Total ₹ 999"), Some(999.0));
        assert_eq!(extract_total_amount("no figures here"), None);
    }

    #[test]
    fn test_company_line_fallback() {
        let text = "Acme Industries\nInvoice # A-17\n";
        let inv = extract(text);
        assert_eq!(inv.vendor_name.as_deref(), Some("Acme Industries"));
        assert_eq!(inv.invoice_number.as_deref(), Some("A-17"));
        assert!(inv.gst_numbers.is_empty());
        assert!(inv.currency.is_none());
    }
}
