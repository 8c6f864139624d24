use async_trait::async_trait;
use invoice_audit::backfill::backfill_missing_gst;
use invoice_audit::config::DetectionConfig;
use invoice_audit::invoice_db::StoredInvoice;
use invoice_audit::llm_analysis::{RiskAnalyst, RiskNarrative};
use invoice_audit::registry::{GstRegistry, GstVerification, OfflineRegistry};
use invoice_audit::{
    Anomaly, AnalyzeOptions, AnomalyKind, AuditPipeline, InvoiceData, InvoiceStore, Result,
    Severity,
};

const ACME_GST: &str = "27AAPFU0939F1ZV";

fn invoice(number: &str, vendor: &str, amount: f64, gst: &[&str]) -> InvoiceData {
    InvoiceData {
        invoice_number: Some(number.to_string()),
        vendor_name: Some(vendor.to_string()),
        invoice_date: Some("2024-09-30".to_string()),
        total_amount: Some(amount),
        currency: Some("INR".to_string()),
        gst_numbers: gst.iter().map(|g| g.to_string()).collect(),
        ..Default::default()
    }
}

fn persist() -> AnalyzeOptions {
    AnalyzeOptions {
        use_ai: false,
        persist: true,
    }
}

fn kinds(anomalies: &[Anomaly]) -> Vec<AnomalyKind> {
    anomalies.iter().map(|a| a.kind).collect()
}

/// Registry that reports every well-formed GSTIN as registered but cancelled.
struct CancelledRegistry;

#[async_trait]
impl GstRegistry for CancelledRegistry {
    async fn verify(&self, gstin: &str) -> Result<GstVerification> {
        let mut v = OfflineRegistry.verify(gstin).await?;
        v.is_active = false;
        v.status = Some("Cancelled".to_string());
        Ok(v)
    }
}

struct EchoAnalyst;

#[async_trait]
impl RiskAnalyst for EchoAnalyst {
    async fn assess(&self, invoice: &InvoiceData, anomalies: &[Anomaly]) -> Result<RiskNarrative> {
        Ok(RiskNarrative::parse(&format!(
            "Risk assessment: MEDIUM\nConcerns: {} finding(s) on {}\nConfidence: 70%",
            anomalies.len(),
            invoice.display_number()
        )))
    }
}

#[tokio::test]
async fn unusual_amount_flagged_against_vendor_history() {
    let dir = tempfile::tempdir().unwrap();
    let store = InvoiceStore::new(dir.path().join("invoices.db")).unwrap();
    let pipeline = AuditPipeline::new(&store, &OfflineRegistry, DetectionConfig::default());

    for (i, amount) in [1000.0, 1200.0, 800.0].into_iter().enumerate() {
        let report = pipeline
            .analyze(invoice(&format!("INV-{i}"), "Acme Traders", amount, &[ACME_GST]), persist())
            .await
            .unwrap();
        assert!(report.is_clean(), "unexpected anomalies: {:?}", report.anomalies);
    }

    // Vendor lookup ignores case and surrounding whitespace.
    let report = pipeline
        .analyze(invoice("INV-9", " acme traders ", 5000.0, &[ACME_GST]), persist())
        .await
        .unwrap();
    assert_eq!(kinds(&report.anomalies), vec![AnomalyKind::UnusualAmount]);
    assert_eq!(report.highest_severity(), Some(Severity::Medium));

    let stats = report.amount.and_then(|a| a.stats).unwrap();
    assert_eq!(stats.count, 3);
    assert!((stats.average - 1000.0).abs() < 1e-9);

    let counts = store.get_counts().unwrap();
    assert_eq!(counts.invoices, 4);
    assert_eq!(counts.anomalies, 1);
    assert_eq!(counts.open_anomalies, 1);
}

#[tokio::test]
async fn gst_reused_by_another_vendor() {
    let store = InvoiceStore::open_in_memory().unwrap();
    let pipeline = AuditPipeline::new(&store, &OfflineRegistry, DetectionConfig::default());

    pipeline
        .analyze(invoice("A-1", "Acme Traders", 500.0, &[ACME_GST]), persist())
        .await
        .unwrap();
    let report = pipeline
        .analyze(invoice("B-1", "Shadow Supplies", 500.0, &[ACME_GST]), persist())
        .await
        .unwrap();

    assert_eq!(kinds(&report.anomalies), vec![AnomalyKind::GstVendorMismatch]);
    assert!(report.anomalies[0].description.contains("Acme Traders"));
    assert_eq!(
        store.anomalies_for_invoice(&report.uid).unwrap()[0].anomaly_type,
        "GST_VENDOR_MISMATCH"
    );
}

#[tokio::test]
async fn inactive_registration_and_ai_escalation() {
    let store = InvoiceStore::open_in_memory().unwrap();
    let analyst = EchoAnalyst;
    let pipeline = AuditPipeline::new(&store, &CancelledRegistry, DetectionConfig::default())
        .with_analyst(&analyst);

    let report = pipeline
        .analyze(
            invoice("C-7", "Acme Traders", 100.0, &[ACME_GST]),
            AnalyzeOptions {
                use_ai: true,
                persist: false,
            },
        )
        .await
        .unwrap();

    assert_eq!(kinds(&report.anomalies), vec![AnomalyKind::InactiveGst]);
    let ai = report.ai_analysis.as_ref().unwrap();
    assert_eq!(ai.risk_level, Some(Severity::Medium));
    assert!(ai.text.contains("C-7"));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["anomalies"][0]["type"], "INACTIVE_GST");
    assert_eq!(json["anomalies"][0]["severity"], "MEDIUM");

    // persist: false leaves the store untouched
    assert_eq!(store.get_counts().unwrap().invoices, 0);
}

#[tokio::test]
async fn backfill_after_analyze_only_fills_gaps() {
    let store = InvoiceStore::open_in_memory().unwrap();
    let cfg = DetectionConfig::default();
    let pipeline = AuditPipeline::new(&store, &OfflineRegistry, cfg.clone());

    let report = pipeline
        .analyze(invoice("N-1", "No Tax Co", 250.0, &["N/A"]), persist())
        .await
        .unwrap();
    assert_eq!(kinds(&report.anomalies), vec![AnomalyKind::MissingGst]);

    // Stored before the missing-GST rule existed.
    store
        .insert_invoice(&StoredInvoice {
            uid: "legacy".to_string(),
            invoice_number: Some("OLD-1".to_string()),
            vendor_name: Some("Legacy Vendor".to_string()),
            invoice_date: None,
            total_amount: Some(90.0),
            currency: None,
            gst_numbers: Vec::new(),
            upload_date: "2024-01-15T09:00:00Z".to_string(),
        })
        .unwrap();

    let summary = backfill_missing_gst(&store, &cfg.missing_gst_placeholders).unwrap();
    assert_eq!(summary.scanned, 2);
    assert_eq!(summary.missing, 2);
    assert_eq!(summary.created, 1);
    assert_eq!(summary.already_present, 1);

    let legacy = store.anomalies_for_invoice("legacy").unwrap();
    assert_eq!(legacy.len(), 1);
    assert_eq!(legacy[0].severity, "HIGH");
    assert_eq!(legacy[0].detected_at, "2024-01-15T09:00:00Z");
}

#[tokio::test]
async fn store_survives_reopen_and_detects_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("invoices.db");

    {
        let store = InvoiceStore::new(&path).unwrap();
        let pipeline = AuditPipeline::new(&store, &OfflineRegistry, DetectionConfig::default());
        let report = pipeline
            .analyze(invoice("DUP-42", "Acme Traders", 300.0, &[ACME_GST]), persist())
            .await
            .unwrap();
        assert!(report.is_clean());
    }

    let store = InvoiceStore::new(&path).unwrap();
    assert_eq!(store.get_counts().unwrap().invoices, 1);

    let pipeline = AuditPipeline::new(&store, &OfflineRegistry, DetectionConfig::default());
    let mut resubmitted = invoice("DUP-42", "Acme Traders", 300.0, &[ACME_GST]);
    resubmitted.invoice_date = Some("2024-10-02".to_string());
    let report = pipeline.analyze(resubmitted, persist()).await.unwrap();

    assert_eq!(kinds(&report.anomalies), vec![AnomalyKind::DuplicateInvoice]);
    assert!(report.to_string().contains("1. [HIGH] DUPLICATE_INVOICE"));
    assert_eq!(store.get_counts().unwrap().invoices, 2);
}
