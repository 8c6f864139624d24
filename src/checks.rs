//! The individual anomaly rules.
//!
//! Every rule reads stored history only; none of them writes. The pipeline
//! runs them before the invoice under review is persisted.

use serde::Serialize;
use tracing::{info, warn};

use crate::anomaly::{Anomaly, AnomalyKind};
use crate::config::DetectionConfig;
use crate::error::Result;
use crate::gstin;
use crate::heuristics::InvoiceData;
use crate::invoice_db::InvoiceStore;
use crate::registry::{GstRegistry, GstVerification};

/// The vendor name, unless it is absent or blank.
fn known_vendor(invoice: &InvoiceData) -> Option<&str> {
    invoice
        .vendor_name
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Duplicate invoice number
// ---------------------------------------------------------------------------

pub fn check_duplicate(store: &InvoiceStore, invoice: &InvoiceData) -> Result<Option<Anomaly>> {
    let Some(number) = invoice.invoice_number.as_deref().filter(|n| !n.trim().is_empty()) else {
        info!("No invoice number, skipping duplicate check");
        return Ok(None);
    };

    let Some(existing) = store.find_by_invoice_number(number)? else {
        return Ok(None);
    };

    warn!(invoice_number = %number, first_uid = %existing.uid, "Duplicate invoice number");
    Ok(Some(Anomaly::new(
        AnomalyKind::DuplicateInvoice,
        format!(
            "Duplicate invoice: {number} already exists from {}",
            existing.upload_date
        ),
    )))
}

// ---------------------------------------------------------------------------
// GST validity
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Serialize)]
pub struct GstCheck {
    pub verifications: Vec<GstVerification>,
    pub anomalies: Vec<Anomaly>,
}

pub async fn check_gst(
    registry: &dyn GstRegistry,
    invoice: &InvoiceData,
    placeholders: &[String],
) -> GstCheck {
    let mut out = GstCheck::default();

    if !invoice.has_gst(placeholders) {
        warn!(vendor = %invoice.display_vendor(), "No GST number on invoice");
        out.anomalies.push(Anomaly::new(
            AnomalyKind::MissingGst,
            format!(
                "Invoice missing GST number - Vendor: {}",
                invoice.display_vendor()
            ),
        ));
        return out;
    }

    for raw in gstin::distinct(&invoice.gst_numbers, placeholders) {
        let number = match gstin::validate(&raw) {
            Ok(g) => g,
            Err(e) => {
                warn!(gstin = %raw, error = %e, "Malformed GSTIN");
                out.anomalies.push(Anomaly::new(
                    AnomalyKind::InvalidGst,
                    format!("Invalid GST: {raw} ({e})"),
                ));
                continue;
            }
        };

        match registry.verify(number.as_str()).await {
            Ok(v) => {
                if !v.is_valid {
                    out.anomalies.push(Anomaly::new(
                        AnomalyKind::InvalidGst,
                        format!("Invalid GST: {number} (not found in registry)"),
                    ));
                } else if !v.is_active {
                    out.anomalies.push(Anomaly::new(
                        AnomalyKind::InactiveGst,
                        format!(
                            "GST {number} is registered but not active (status: {})",
                            v.status.as_deref().unwrap_or("unknown")
                        ),
                    ));
                }
                out.verifications.push(v);
            }
            Err(e) => {
                warn!(gstin = %number, error = %e, "Registry lookup failed");
                out.anomalies.push(Anomaly::new(
                    AnomalyKind::UnverifiedGst,
                    format!("Could not verify GST {number}: {e}"),
                ));
            }
        }
    }

    out
}

// ---------------------------------------------------------------------------
// Amount vs vendor history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AmountStats {
    pub count: usize,
    pub average: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AmountVerdict {
    NoHistory,
    Normal,
    Elevated,
    Unusual,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AmountAssessment {
    pub amount: f64,
    pub stats: Option<AmountStats>,
    pub verdict: AmountVerdict,
}

impl AmountAssessment {
    pub fn anomaly(&self, vendor: &str, cfg: &DetectionConfig) -> Option<Anomaly> {
        let stats = self.stats?;
        (self.verdict == AmountVerdict::Unusual).then(|| {
            Anomaly::new(
                AnomalyKind::UnusualAmount,
                format!(
                    "Amount ₹{:.2} is more than {}x the average ₹{:.2} for {vendor} ({} prior invoices)",
                    self.amount, cfg.unusual_multiplier, stats.average, stats.count
                ),
            )
        })
    }
}

/// Compare `amount` with the vendor's history.
pub fn assess_amount(history: &[f64], amount: f64, cfg: &DetectionConfig) -> AmountAssessment {
    if history.is_empty() {
        return AmountAssessment {
            amount,
            stats: None,
            verdict: AmountVerdict::NoHistory,
        };
    }

    let average = history.iter().sum::<f64>() / history.len() as f64;
    let stats = AmountStats {
        count: history.len(),
        average,
        min: history.iter().copied().fold(f64::INFINITY, f64::min),
        max: history.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    };

    let verdict = if amount > average * cfg.unusual_multiplier {
        AmountVerdict::Unusual
    } else if amount > average * cfg.elevated_multiplier {
        AmountVerdict::Elevated
    } else {
        AmountVerdict::Normal
    };

    AmountAssessment {
        amount,
        stats: Some(stats),
        verdict,
    }
}

/// Run [`assess_amount`] against stored history. `None` when the invoice has
/// no vendor or no amount to compare.
pub fn check_amount(
    store: &InvoiceStore,
    invoice: &InvoiceData,
    cfg: &DetectionConfig,
) -> Result<Option<AmountAssessment>> {
    let (Some(vendor), Some(amount)) = (known_vendor(invoice), invoice.total_amount) else {
        info!("Vendor or amount unknown, skipping amount check");
        return Ok(None);
    };

    let history = store.vendor_amounts(vendor)?;
    let assessment = assess_amount(&history, amount, cfg);
    match assessment.verdict {
        AmountVerdict::Unusual => warn!(vendor = %vendor, amount, "Unusual amount"),
        AmountVerdict::Elevated => warn!(vendor = %vendor, amount, "Amount above the elevated threshold"),
        _ => info!(vendor = %vendor, amount, verdict = ?assessment.verdict, "Amount check"),
    }
    Ok(Some(assessment))
}

// ---------------------------------------------------------------------------
// GST reused by another vendor
// ---------------------------------------------------------------------------

pub fn check_gst_vendor_match(
    store: &InvoiceStore,
    invoice: &InvoiceData,
    placeholders: &[String],
) -> Result<Vec<Anomaly>> {
    let Some(vendor) = known_vendor(invoice) else {
        return Ok(Vec::new());
    };

    let mut anomalies = Vec::new();
    for number in gstin::distinct(&invoice.gst_numbers, placeholders) {
        if let Some(other) = store.find_gst_vendor_conflict(&number, vendor)? {
            warn!(gstin = %number, previous = %other, current = %vendor, "GST reused by another vendor");
            anomalies.push(Anomaly::new(
                AnomalyKind::GstVendorMismatch,
                format!("GST {number} was previously used by {other}, now showing as {vendor}"),
            ));
        }
    }
    Ok(anomalies)
}
