use tracing::info;

use crate::anomaly::{Anomaly, AnomalyKind};
use crate::error::Result;
use crate::gstin;
use crate::invoice_db::{InvoiceStore, StoredAnomaly};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackfillSummary {
    pub scanned: usize,
    pub missing: usize,
    pub created: usize,
    pub already_present: usize,
}

/// Create a MISSING_GST anomaly for every stored invoice that lacks a GSTIN
/// and does not have one yet. Safe to re-run.
pub fn backfill_missing_gst(store: &InvoiceStore, placeholders: &[String]) -> Result<BackfillSummary> {
    let invoices = store.all_invoices()?;
    let mut summary = BackfillSummary {
        scanned: invoices.len(),
        ..Default::default()
    };
    info!(total = invoices.len(), "Scanning invoices for missing GST");

    for invoice in &invoices {
        if !gstin::is_missing(&invoice.gst_numbers, placeholders) {
            continue;
        }
        summary.missing += 1;

        if store.anomaly_exists(&invoice.uid, AnomalyKind::MissingGst)? {
            info!(invoice_number = ?invoice.invoice_number, "Anomaly already exists");
            summary.already_present += 1;
            continue;
        }

        let anomaly = Anomaly::new(
            AnomalyKind::MissingGst,
            format!(
                "Invoice missing GST number - Vendor: {}",
                invoice.vendor_name.as_deref().unwrap_or("Unknown")
            ),
        );
        // Dated at upload so trend charts place it where it happened.
        let stored = StoredAnomaly::from_anomaly(&anomaly, invoice, &invoice.upload_date);
        if store.record_anomaly(&stored)? {
            summary.created += 1;
            info!(invoice_number = ?invoice.invoice_number, "Created MISSING_GST anomaly");
        }
    }

    info!(
        scanned = summary.scanned,
        missing = summary.missing,
        created = summary.created,
        already_present = summary.already_present,
        "Backfill complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionConfig;
    use crate::invoice_db::StoredInvoice;

    fn stored(uid: &str, gst: &[&str]) -> StoredInvoice {
        StoredInvoice {
            uid: uid.to_string(),
            invoice_number: Some(format!("INV-{uid}")),
            vendor_name: Some("Acme".to_string()),
            invoice_date: None,
            total_amount: Some(10.0),
            currency: None,
            gst_numbers: gst.iter().map(|g| g.to_string()).collect(),
            upload_date: "2024-09-30T12:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_backfill_is_idempotent() {
        let db = InvoiceStore::open_in_memory().unwrap();
        db.insert_invoice(&stored("a", &[])).unwrap();
        db.insert_invoice(&stored("b", &["Unknown"])).unwrap();
        db.insert_invoice(&stored("c", &["27AAPFU0939F1ZV"])).unwrap();
        let placeholders = DetectionConfig::default().missing_gst_placeholders;

        let first = backfill_missing_gst(&db, &placeholders).unwrap();
        assert_eq!(
            first,
            BackfillSummary {
                scanned: 3,
                missing: 2,
                created: 2,
                already_present: 0
            }
        );

        let second = backfill_missing_gst(&db, &placeholders).unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.already_present, 2);

        let listed = db.anomalies_for_invoice("a").unwrap();
        assert_eq!(listed[0].detected_at, "2024-09-30T12:00:00Z");
        assert_eq!(db.anomaly_breakdown().unwrap(), vec![("MISSING_GST".to_string(), 2)]);
    }
}
