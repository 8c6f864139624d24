//! Sequential composition of the checks into one audit run.
//!
//! ```text
//! validate_gst -> detect_anomalies --(anomalies && use_ai)--> ai_analysis -> report
//!                                  \------------(otherwise)-------------/
//! ```

use std::fmt;

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{Instrument, info, info_span, warn};

use crate::anomaly::{Anomaly, Severity};
use crate::checks::{self, AmountAssessment};
use crate::config::DetectionConfig;
use crate::error::Result;
use crate::gstin;
use crate::heuristics::InvoiceData;
use crate::invoice_db::{InvoiceStore, StoredAnomaly, StoredInvoice};
use crate::llm_analysis::{RiskAnalyst, RiskNarrative};
use crate::registry::{GstRegistry, GstVerification};

#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyzeOptions {
    /// Escalate to the LLM analyst when anomalies were found.
    pub use_ai: bool,
    /// Store the invoice and its anomalies once the checks have run.
    pub persist: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub uid: String,
    pub analyzed_at: String,
    pub invoice: InvoiceData,
    pub anomalies: Vec<Anomaly>,
    pub gst_verifications: Vec<GstVerification>,
    pub amount: Option<AmountAssessment>,
    pub ai_analysis: Option<RiskNarrative>,
    pub ai_error: Option<String>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.anomalies.iter().map(|a| a.severity).max()
    }
}

const RULE: &str = "═══════════════════════════════════════";

impl fmt::Display for AuditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{RULE}")?;
        writeln!(f, "Invoice Analysis Report")?;
        writeln!(f, "{RULE}")?;
        writeln!(f)?;
        writeln!(f, "Invoice Number: {}", self.invoice.display_number())?;
        writeln!(f, "Vendor: {}", self.invoice.display_vendor())?;
        match self.invoice.total_amount {
            Some(amount) => writeln!(f, "Amount: ₹{amount:.2}")?,
            None => writeln!(f, "Amount: Unknown")?,
        }
        writeln!(f)?;
        writeln!(f, "ANOMALIES DETECTED: {}", self.anomalies.len())?;

        for (i, anomaly) in self.anomalies.iter().enumerate() {
            writeln!(f)?;
            writeln!(f, "{}. [{}] {}", i + 1, anomaly.severity, anomaly.kind)?;
            writeln!(f, "   {}", anomaly.description)?;
        }

        if let Some(ai) = &self.ai_analysis {
            writeln!(f)?;
            writeln!(f, "AI ANALYSIS:")?;
            writeln!(f, "{}", ai.text)?;
        } else if let Some(err) = &self.ai_error {
            writeln!(f)?;
            writeln!(f, "AI ANALYSIS FAILED: {err}")?;
        }

        writeln!(f)?;
        write!(f, "{RULE}")
    }
}

pub struct AuditPipeline<'a> {
    store: &'a InvoiceStore,
    registry: &'a dyn GstRegistry,
    analyst: Option<&'a dyn RiskAnalyst>,
    detection: DetectionConfig,
}

impl<'a> AuditPipeline<'a> {
    pub fn new(
        store: &'a InvoiceStore,
        registry: &'a dyn GstRegistry,
        detection: DetectionConfig,
    ) -> Self {
        Self {
            store,
            registry,
            analyst: None,
            detection,
        }
    }

    pub fn with_analyst(mut self, analyst: &'a dyn RiskAnalyst) -> Self {
        self.analyst = Some(analyst);
        self
    }

    pub async fn analyze(&self, invoice: InvoiceData, opts: AnalyzeOptions) -> Result<AuditReport> {
        let analyzed_at = OffsetDateTime::now_utc().format(&Rfc3339)?;
        let mut uid = InvoiceStore::generate_uid(
            invoice.invoice_number.as_deref().unwrap_or(&analyzed_at),
            invoice.vendor_name.as_deref().unwrap_or(""),
            invoice.invoice_date.as_deref().unwrap_or(""),
        );
        // Stored invoices are immutable; a re-submission gets its own row.
        if self.store.contains_invoice(&uid)? {
            uid = InvoiceStore::resubmission_uid(&uid, &analyzed_at);
            info!(uid = %uid, "Same invoice content already stored, auditing as a new upload");
        }
        info!(
            uid = %uid,
            invoice_number = %invoice.display_number(),
            vendor = %invoice.display_vendor(),
            "Auditing invoice"
        );

        let placeholders = &self.detection.missing_gst_placeholders;

        let gst = checks::check_gst(self.registry, &invoice, placeholders)
            .instrument(info_span!("validate_gst", uid = %uid))
            .await;
        let mut anomalies = gst.anomalies;

        let amount = {
            let span = info_span!("detect_anomalies", uid = %uid);
            let _guard = span.enter();

            if let Some(dup) = checks::check_duplicate(self.store, &invoice)? {
                anomalies.push(dup);
            }
            let amount = checks::check_amount(self.store, &invoice, &self.detection)?;
            if let Some(a) = amount.and_then(|a| a.anomaly(invoice.display_vendor(), &self.detection)) {
                anomalies.push(a);
            }
            anomalies.extend(checks::check_gst_vendor_match(self.store, &invoice, placeholders)?);
            amount
        };

        let (mut ai_analysis, mut ai_error) = (None, None);
        // Escalate only when asked to and there is something to explain.
        if let Some(analyst) = self.analyst.filter(|_| opts.use_ai && !anomalies.is_empty()) {
            match analyst
                .assess(&invoice, &anomalies)
                .instrument(info_span!("ai_analysis", uid = %uid))
                .await
            {
                Ok(narrative) => ai_analysis = Some(narrative),
                Err(e) => {
                    warn!(error = %e, "AI analysis failed, keeping rule-based result");
                    ai_error = Some(e.to_string());
                }
            }
        }

        let report = AuditReport {
            uid,
            analyzed_at,
            invoice,
            anomalies,
            gst_verifications: gst.verifications,
            amount,
            ai_analysis,
            ai_error,
        };

        if opts.persist {
            self.persist(&report)?;
        }

        info!(
            uid = %report.uid,
            anomalies = report.anomalies.len(),
            highest = ?report.highest_severity(),
            ai = report.ai_analysis.is_some(),
            "Audit complete"
        );
        Ok(report)
    }

    fn persist(&self, report: &AuditReport) -> Result<()> {
        let invoice = &report.invoice;
        let stored = StoredInvoice {
            uid: report.uid.clone(),
            invoice_number: invoice.invoice_number.clone(),
            vendor_name: invoice
                .vendor_name
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            invoice_date: invoice.invoice_date.clone(),
            total_amount: invoice.total_amount,
            currency: invoice.currency.clone(),
            gst_numbers: gstin::distinct(&invoice.gst_numbers, &self.detection.missing_gst_placeholders),
            upload_date: report.analyzed_at.clone(),
        };
        let anomalies: Vec<StoredAnomaly> = report
            .anomalies
            .iter()
            .map(|a| StoredAnomaly::from_anomaly(a, &stored, &report.analyzed_at))
            .collect();

        if self.store.persist_audit(&stored, &anomalies)?.is_none() {
            warn!(uid = %stored.uid, "Upload already stored, nothing persisted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::AnomalyKind;
    use crate::error::AuditError;
    use crate::registry::OfflineRegistry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAnalyst {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingAnalyst {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl RiskAnalyst for CountingAnalyst {
        async fn assess(&self, _invoice: &InvoiceData, anomalies: &[Anomaly]) -> Result<RiskNarrative> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AuditError::Llm("model overloaded".into()));
            }
            Ok(RiskNarrative::parse(&format!(
                "Risk assessment: HIGH\nConcerns: {} findings\nConfidence: 90%",
                anomalies.len()
            )))
        }
    }

    fn invoice(number: &str, amount: f64, gst: &[&str]) -> InvoiceData {
        InvoiceData {
            invoice_number: Some(number.to_string()),
            vendor_name: Some("Acme Traders".to_string()),
            invoice_date: Some("2024-11-08".to_string()),
            total_amount: Some(amount),
            currency: Some("INR".to_string()),
            gst_numbers: gst.iter().map(|g| g.to_string()).collect(),
            line_items: Vec::new(),
        }
    }

    const PERSIST: AnalyzeOptions = AnalyzeOptions {
        use_ai: false,
        persist: true,
    };

    #[tokio::test]
    async fn test_clean_invoice_skips_ai() {
        let store = InvoiceStore::open_in_memory().unwrap();
        let analyst = CountingAnalyst::new(false);
        let pipeline = AuditPipeline::new(&store, &OfflineRegistry, DetectionConfig::default())
            .with_analyst(&analyst);

        let report = pipeline
            .analyze(
                invoice("INV-1", 1000.0, &["27AAPFU0939F1ZV"]),
                AnalyzeOptions { use_ai: true, persist: true },
            )
            .await
            .unwrap();

        assert!(report.is_clean());
        assert_eq!(report.highest_severity(), None);
        assert_eq!(analyst.calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.gst_verifications.len(), 1);
        assert_eq!(store.get_counts().unwrap().invoices, 1);
    }

    #[tokio::test]
    async fn test_anomalies_escalate_to_ai() {
        let store = InvoiceStore::open_in_memory().unwrap();
        let analyst = CountingAnalyst::new(false);
        let pipeline = AuditPipeline::new(&store, &OfflineRegistry, DetectionConfig::default())
            .with_analyst(&analyst);

        let report = pipeline
            .analyze(invoice("INV-1", 1000.0, &[]), AnalyzeOptions { use_ai: true, persist: false })
            .await
            .unwrap();

        assert_eq!(report.anomalies[0].kind, AnomalyKind::MissingGst);
        assert_eq!(analyst.calls.load(Ordering::SeqCst), 1);
        let ai = report.ai_analysis.as_ref().unwrap();
        assert_eq!(ai.risk_level, Some(Severity::High));
        assert!(report.to_string().contains("AI ANALYSIS:"));
        assert_eq!(store.get_counts().unwrap().invoices, 0);
    }

    #[tokio::test]
    async fn test_ai_not_used_unless_requested() {
        let store = InvoiceStore::open_in_memory().unwrap();
        let analyst = CountingAnalyst::new(false);
        let pipeline = AuditPipeline::new(&store, &OfflineRegistry, DetectionConfig::default())
            .with_analyst(&analyst);

        let report = pipeline.analyze(invoice("INV-1", 1.0, &[]), PERSIST).await.unwrap();
        assert!(!report.is_clean());
        assert!(report.ai_analysis.is_none());
        assert_eq!(analyst.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ai_failure_is_recorded_not_raised() {
        let store = InvoiceStore::open_in_memory().unwrap();
        let analyst = CountingAnalyst::new(true);
        let pipeline = AuditPipeline::new(&store, &OfflineRegistry, DetectionConfig::default())
            .with_analyst(&analyst);

        let report = pipeline
            .analyze(invoice("INV-1", 1.0, &[]), AnalyzeOptions { use_ai: true, persist: true })
            .await
            .unwrap();
        assert!(report.ai_analysis.is_none());
        assert!(report.ai_error.as_deref().unwrap().contains("model overloaded"));
        assert!(report.to_string().contains("AI ANALYSIS FAILED"));
    }

    #[tokio::test]
    async fn test_resubmission_leaves_original_untouched() {
        let store = InvoiceStore::open_in_memory().unwrap();
        let pipeline = AuditPipeline::new(&store, &OfflineRegistry, DetectionConfig::default());

        let first = pipeline
            .analyze(invoice("INV-7", 1000.0, &["27AAPFU0939F1ZV"]), PERSIST)
            .await
            .unwrap();
        assert!(first.is_clean());

        let second = pipeline
            .analyze(invoice("INV-7", 9000.0, &["27AAPFU0939F1ZV"]), PERSIST)
            .await
            .unwrap();
        assert_ne!(second.uid, first.uid);
        let kinds: Vec<_> = second.anomalies.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AnomalyKind::DuplicateInvoice, AnomalyKind::UnusualAmount]);
        assert_eq!(second.highest_severity(), Some(Severity::High));

        let original = store.get_invoice(&first.uid).unwrap().unwrap();
        assert_eq!(original.total_amount, Some(1000.0));
        assert!(store.anomalies_for_invoice(&first.uid).unwrap().is_empty());

        let stored: Vec<_> = store
            .anomalies_for_invoice(&second.uid)
            .unwrap()
            .into_iter()
            .map(|a| a.anomaly_type)
            .collect();
        assert_eq!(stored, vec!["DUPLICATE_INVOICE", "UNUSUAL_AMOUNT"]);

        let mut history = store.vendor_amounts("Acme Traders").unwrap();
        history.sort_by(f64::total_cmp);
        assert_eq!(history, vec![1000.0, 9000.0]);
        assert_eq!(store.get_counts().unwrap().invoices, 2);
    }

    #[tokio::test]
    async fn test_repeated_gstin_reported_and_stored_once() {
        let store = InvoiceStore::open_in_memory().unwrap();
        let pipeline = AuditPipeline::new(&store, &OfflineRegistry, DetectionConfig::default());

        let report = pipeline
            .analyze(invoice("INV-8", 100.0, &["29ABCDE1234F1Z5", "29abcde1234f1z5"]), PERSIST)
            .await
            .unwrap();
        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(store.anomalies_for_invoice(&report.uid).unwrap().len(), 1);
        assert_eq!(
            store.get_invoice(&report.uid).unwrap().unwrap().gst_numbers,
            vec!["29ABCDE1234F1Z5"]
        );
    }

    #[tokio::test]
    async fn test_report_rendering() {
        let store = InvoiceStore::open_in_memory().unwrap();
        let pipeline = AuditPipeline::new(&store, &OfflineRegistry, DetectionConfig::default());
        let report = pipeline
            .analyze(invoice("INV-3", 2500.0, &["29ABCDE1234F1Z5"]), PERSIST)
            .await
            .unwrap();

        let text = report.to_string();
        assert!(text.contains("Invoice Number: INV-3"));
        assert!(text.contains("Vendor: Acme Traders"));
        assert!(text.contains("Amount: ₹2500.00"));
        assert!(text.contains("ANOMALIES DETECTED: 1"));
        assert!(text.contains("1. [HIGH] INVALID_GST"));
        assert!(!text.contains("AI ANALYSIS"));
    }
}
