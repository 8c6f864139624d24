//! Rule-based anomaly detection for GST invoices.
//!
//! An invoice goes through GSTIN validation, a duplicate-number check, an
//! amount check against the vendor's history and a GSTIN/vendor consistency
//! check; invoices with findings can optionally be escalated to an LLM for a
//! written risk assessment. See [`pipeline::AuditPipeline`].

pub mod anomaly;
pub mod backfill;
pub mod checks;
pub mod config;
pub mod error;
pub mod gstin;
pub mod heuristics;
pub mod invoice_db;
pub mod llm_analysis;
pub mod pdf_extract;
pub mod pipeline;
pub mod registry;

pub use anomaly::{Anomaly, AnomalyKind, Severity};
pub use config::Config;
pub use error::{AuditError, Result};
pub use heuristics::InvoiceData;
pub use invoice_db::InvoiceStore;
pub use pipeline::{AnalyzeOptions, AuditPipeline, AuditReport};
