use rusqlite::{Connection, OptionalExtension, Result as SqliteResult, params};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{info, warn};

use crate::anomaly::{Anomaly, AnomalyKind};

pub struct InvoiceStore {
    conn: Connection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredInvoice {
    pub uid: String,
    pub invoice_number: Option<String>,
    pub vendor_name: Option<String>,
    pub invoice_date: Option<String>,
    pub total_amount: Option<f64>,
    pub currency: Option<String>,
    pub gst_numbers: Vec<String>,
    /// RFC 3339 timestamp of the upload.
    pub upload_date: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredAnomaly {
    pub id: Option<i64>,
    pub invoice_uid: String,
    pub invoice_number: Option<String>,
    pub anomaly_type: String,
    pub severity: String,
    pub description: String,
    /// "OPEN" until someone reviews it.
    pub status: String,
    pub vendor_name: Option<String>,
    pub detected_at: String,
}

impl StoredAnomaly {
    pub fn from_anomaly(anomaly: &Anomaly, invoice: &StoredInvoice, detected_at: &str) -> Self {
        Self {
            id: None,
            invoice_uid: invoice.uid.clone(),
            invoice_number: invoice.invoice_number.clone(),
            anomaly_type: anomaly.kind.as_str().to_string(),
            severity: anomaly.severity.as_str().to_string(),
            description: anomaly.description.clone(),
            status: "OPEN".to_string(),
            vendor_name: invoice.vendor_name.clone(),
            detected_at: detected_at.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreCounts {
    pub invoices: usize,
    pub anomalies: usize,
    pub open_anomalies: usize,
}

const INVOICE_COLUMNS: &str =
    "uid, invoice_number, vendor_name, invoice_date, total_amount, currency, upload_date";

const ANOMALY_COLUMNS: &str = "id, invoice_uid, invoice_number, anomaly_type, severity, description, status, vendor_name, detected_at";

impl InvoiceStore {
    /// Open (or create) the invoice store with SQLite backend
    pub fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> SqliteResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SqliteResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS invoices (
                uid TEXT PRIMARY KEY,
                invoice_number TEXT,
                vendor_name TEXT,
                invoice_date TEXT,
                total_amount REAL,
                currency TEXT,
                upload_date TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS invoice_gstins (
                invoice_uid TEXT NOT NULL,
                gstin TEXT NOT NULL,
                PRIMARY KEY (invoice_uid, gstin),
                FOREIGN KEY (invoice_uid) REFERENCES invoices(uid) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS anomalies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                invoice_uid TEXT NOT NULL,
                invoice_number TEXT,
                anomaly_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                description TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'OPEN',
                vendor_name TEXT,
                detected_at TEXT NOT NULL,
                UNIQUE (invoice_uid, anomaly_type),
                FOREIGN KEY (invoice_uid) REFERENCES invoices(uid) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_invoices_number ON invoices(invoice_number);
            CREATE INDEX IF NOT EXISTS idx_invoices_vendor ON invoices(vendor_name COLLATE NOCASE);
            CREATE INDEX IF NOT EXISTS idx_invoice_gstins_gstin ON invoice_gstins(gstin);
            CREATE INDEX IF NOT EXISTS idx_anomalies_type ON anomalies(anomaly_type);",
        )?;

        info!("Database initialized successfully");
        Ok(Self { conn })
    }

    /// Stable id from the fields that identify an invoice.
    pub fn generate_uid(invoice_number: &str, vendor_name: &str, invoice_date: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(invoice_number.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(vendor_name.trim().to_lowercase().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(invoice_date.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Id for a re-submission of an invoice whose content uid is already
    /// stored, so each upload keeps its own row.
    pub fn resubmission_uid(content_uid: &str, uploaded_at: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content_uid.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(uploaded_at.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn contains_invoice(&self, uid: &str) -> SqliteResult<bool> {
        self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM invoices WHERE uid = ?1)",
            params![uid],
            |row| row.get(0),
        )
    }

    /// Store an invoice with its GSTINs. A stored invoice is never modified:
    /// returns false and writes nothing when the uid already exists.
    pub fn insert_invoice(&self, inv: &StoredInvoice) -> SqliteResult<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let inserted = insert_invoice_row(&tx, inv)?;
        tx.commit()?;
        Ok(inserted)
    }

    /// Store one audited invoice and its anomalies atomically. Returns the
    /// number of anomalies recorded, or `None` if the uid was already stored.
    pub fn persist_audit(
        &self,
        inv: &StoredInvoice,
        anomalies: &[StoredAnomaly],
    ) -> SqliteResult<Option<usize>> {
        let tx = self.conn.unchecked_transaction()?;
        if !insert_invoice_row(&tx, inv)? {
            return Ok(None);
        }
        let mut recorded = 0;
        for anomaly in anomalies {
            if insert_anomaly_row(&tx, anomaly)? {
                recorded += 1;
            }
        }
        tx.commit()?;
        info!(uid = %inv.uid, anomalies = recorded, "Audit persisted");
        Ok(Some(recorded))
    }

    fn gstins_for(&self, uid: &str) -> SqliteResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT gstin FROM invoice_gstins WHERE invoice_uid = ?1 ORDER BY rowid")?;
        let rows = stmt.query_map(params![uid], |row| row.get(0))?;
        rows.collect()
    }

    /// Helper: map a row with the invoice projection; GSTINs are loaded separately.
    fn row_to_invoice(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredInvoice> {
        Ok(StoredInvoice {
            uid: row.get(0)?,
            invoice_number: row.get(1)?,
            vendor_name: row.get(2)?,
            invoice_date: row.get(3)?,
            total_amount: row.get(4)?,
            currency: row.get(5)?,
            gst_numbers: Vec::new(),
            upload_date: row.get(6)?,
        })
    }

    fn with_gstins(&self, mut inv: StoredInvoice) -> SqliteResult<StoredInvoice> {
        inv.gst_numbers = self.gstins_for(&inv.uid)?;
        Ok(inv)
    }

    /// Earliest stored invoice carrying this invoice number.
    pub fn find_by_invoice_number(&self, number: &str) -> SqliteResult<Option<StoredInvoice>> {
        let inv = self
            .conn
            .query_row(
                &format!(
                    "SELECT {INVOICE_COLUMNS} FROM invoices
                     WHERE invoice_number = ?1
                     ORDER BY upload_date ASC LIMIT 1"
                ),
                params![number],
                Self::row_to_invoice,
            )
            .optional()?;
        inv.map(|i| self.with_gstins(i)).transpose()
    }

    pub fn get_invoice(&self, uid: &str) -> SqliteResult<Option<StoredInvoice>> {
        let inv = self
            .conn
            .query_row(
                &format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE uid = ?1"),
                params![uid],
                Self::row_to_invoice,
            )
            .optional()?;
        inv.map(|i| self.with_gstins(i)).transpose()
    }

    /// Historical totals for a vendor (case-insensitive), skipping unknown amounts.
    pub fn vendor_amounts(&self, vendor_name: &str) -> SqliteResult<Vec<f64>> {
        let mut stmt = self.conn.prepare(
            "SELECT total_amount FROM invoices
             WHERE vendor_name = ?1 COLLATE NOCASE AND total_amount IS NOT NULL",
        )?;
        let rows = stmt.query_map(params![vendor_name.trim()], |row| row.get(0))?;
        rows.collect()
    }

    /// Another vendor that has already used `gstin`, if any.
    pub fn find_gst_vendor_conflict(
        &self,
        gstin: &str,
        vendor_name: &str,
    ) -> SqliteResult<Option<String>> {
        self.conn
            .query_row(
                "SELECT i.vendor_name FROM invoice_gstins g
                 JOIN invoices i ON i.uid = g.invoice_uid
                 WHERE g.gstin = ?1
                   AND TRIM(i.vendor_name) <> ''
                   AND i.vendor_name <> ?2 COLLATE NOCASE
                 ORDER BY i.upload_date ASC LIMIT 1",
                params![gstin, vendor_name.trim()],
                |row| row.get(0),
            )
            .optional()
    }

    pub fn all_invoices(&self) -> SqliteResult<Vec<StoredInvoice>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices ORDER BY upload_date ASC"
        ))?;
        let rows = stmt.query_map([], Self::row_to_invoice)?;
        rows.map(|r| r.and_then(|i| self.with_gstins(i)))
            .collect()
    }

    pub fn latest_invoice(&self) -> SqliteResult<Option<StoredInvoice>> {
        let inv = self
            .conn
            .query_row(
                &format!(
                    "SELECT {INVOICE_COLUMNS} FROM invoices
                     ORDER BY upload_date DESC, rowid DESC LIMIT 1"
                ),
                [],
                Self::row_to_invoice,
            )
            .optional()?;
        inv.map(|i| self.with_gstins(i)).transpose()
    }

    /// Record an anomaly; returns false if this invoice already has one of that type.
    pub fn record_anomaly(&self, anomaly: &StoredAnomaly) -> SqliteResult<bool> {
        insert_anomaly_row(&self.conn, anomaly)
    }

    pub fn anomaly_exists(&self, invoice_uid: &str, kind: AnomalyKind) -> SqliteResult<bool> {
        self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM anomalies WHERE invoice_uid = ?1 AND anomaly_type = ?2)",
            params![invoice_uid, kind.as_str()],
            |row| row.get(0),
        )
    }

    pub fn anomalies_for_invoice(&self, invoice_uid: &str) -> SqliteResult<Vec<StoredAnomaly>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ANOMALY_COLUMNS} FROM anomalies WHERE invoice_uid = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![invoice_uid], |row| {
            Ok(StoredAnomaly {
                id: Some(row.get(0)?),
                invoice_uid: row.get(1)?,
                invoice_number: row.get(2)?,
                anomaly_type: row.get(3)?,
                severity: row.get(4)?,
                description: row.get(5)?,
                status: row.get(6)?,
                vendor_name: row.get(7)?,
                detected_at: row.get(8)?,
            })
        })?;
        rows.collect()
    }

    /// Anomaly counts grouped by type, most frequent first.
    pub fn anomaly_breakdown(&self) -> SqliteResult<Vec<(String, usize)>> {
        let mut stmt = self.conn.prepare(
            "SELECT anomaly_type, COUNT(*) AS n FROM anomalies
             GROUP BY anomaly_type ORDER BY n DESC, anomaly_type ASC",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect()
    }

    pub fn get_counts(&self) -> SqliteResult<StoreCounts> {
        let invoices: usize =
            self.conn
                .query_row("SELECT COUNT(*) FROM invoices", [], |row| row.get(0))?;
        let anomalies: usize =
            self.conn
                .query_row("SELECT COUNT(*) FROM anomalies", [], |row| row.get(0))?;
        let open_anomalies: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM anomalies WHERE status = 'OPEN'",
            [],
            |row| row.get(0),
        )?;

        Ok(StoreCounts {
            invoices,
            anomalies,
            open_anomalies,
        })
    }
}

fn insert_invoice_row(conn: &Connection, inv: &StoredInvoice) -> SqliteResult<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO invoices
            (uid, invoice_number, vendor_name, invoice_date, total_amount, currency, upload_date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            inv.uid,
            inv.invoice_number,
            inv.vendor_name,
            inv.invoice_date,
            inv.total_amount,
            inv.currency,
            inv.upload_date,
        ],
    )?;
    if inserted == 0 {
        warn!(uid = %inv.uid, "Invoice already stored, leaving it unchanged");
        return Ok(false);
    }

    for gstin in &inv.gst_numbers {
        conn.execute(
            "INSERT OR IGNORE INTO invoice_gstins (invoice_uid, gstin) VALUES (?1, ?2)",
            params![inv.uid, gstin],
        )?;
    }
    info!(uid = %inv.uid, invoice_number = ?inv.invoice_number, "Invoice stored");
    Ok(true)
}

fn insert_anomaly_row(conn: &Connection, anomaly: &StoredAnomaly) -> SqliteResult<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO anomalies
            (invoice_uid, invoice_number, anomaly_type, severity, description, status, vendor_name, detected_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            anomaly.invoice_uid,
            anomaly.invoice_number,
            anomaly.anomaly_type,
            anomaly.severity,
            anomaly.description,
            anomaly.status,
            anomaly.vendor_name,
            anomaly.detected_at,
        ],
    )?;
    if inserted > 0 {
        info!(
            invoice_uid = %anomaly.invoice_uid,
            anomaly_type = %anomaly.anomaly_type,
            severity = %anomaly.severity,
            "Anomaly recorded"
        );
    }
    Ok(inserted > 0)
}
