use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            other => Err(format!("unknown severity {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyKind {
    DuplicateInvoice,
    MissingGst,
    InvalidGst,
    InactiveGst,
    UnverifiedGst,
    GstVendorMismatch,
    UnusualAmount,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::DuplicateInvoice => "DUPLICATE_INVOICE",
            AnomalyKind::MissingGst => "MISSING_GST",
            AnomalyKind::InvalidGst => "INVALID_GST",
            AnomalyKind::InactiveGst => "INACTIVE_GST",
            AnomalyKind::UnverifiedGst => "UNVERIFIED_GST",
            AnomalyKind::GstVendorMismatch => "GST_VENDOR_MISMATCH",
            AnomalyKind::UnusualAmount => "UNUSUAL_AMOUNT",
        }
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            AnomalyKind::DuplicateInvoice
            | AnomalyKind::MissingGst
            | AnomalyKind::InvalidGst
            | AnomalyKind::GstVendorMismatch => Severity::High,
            AnomalyKind::InactiveGst | AnomalyKind::UnusualAmount => Severity::Medium,
            AnomalyKind::UnverifiedGst => Severity::Low,
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single finding raised by one of the checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub description: String,
}

impl Anomaly {
    pub fn new(kind: AnomalyKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            description: description.into(),
        }
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.kind, self.description)
    }
}
