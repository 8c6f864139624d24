use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use invoice_audit::backfill::backfill_missing_gst;
use invoice_audit::llm_analysis::{ChatAnalyst, RiskAnalyst};
use invoice_audit::{AnalyzeOptions, AuditPipeline, Config, InvoiceData, InvoiceStore};
use invoice_audit::{gstin, heuristics, pdf_extract, registry};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "invoice_audit", about = "Rule-based anomaly checks for GST invoices")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Audit one invoice (.json fields, .pdf with a text layer, or plain text)
    Analyze {
        file: PathBuf,
        /// Ask the configured LLM for a risk narrative when anomalies are found
        #[arg(long)]
        ai: bool,
        /// Do not store the invoice or its anomalies
        #[arg(long)]
        no_persist: bool,
        /// Print the report as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Validate a GSTIN locally and against the registry
    VerifyGst { gstin: String },
    /// Create MISSING_GST anomalies for stored invoices that lack one
    BackfillMissingGst,
    /// Show store counts and the anomaly breakdown
    Stats,
}

fn load_invoice(path: &Path) -> anyhow::Result<InvoiceData> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("json") => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
        }
        Some("pdf") => {
            let bytes =
                std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            Ok(pdf_extract::invoice_from_pdf(&bytes)?)
        }
        _ => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            Ok(heuristics::extract_invoice(&text))
        }
    }
}

fn open_store(cfg: &Config) -> anyhow::Result<InvoiceStore> {
    if let Some(parent) = Path::new(&cfg.db_path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    InvoiceStore::new(&cfg.db_path).with_context(|| format!("opening {}", cfg.db_path))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = Config::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Command::Analyze {
            file,
            ai,
            no_persist,
            json,
        } => {
            let invoice = load_invoice(&file)?;
            let (filled, total) = invoice.coverage();
            info!(file = %file.display(), filled, total, "Invoice loaded");

            let store = open_store(&cfg)?;
            let registry = registry::from_config(&cfg.gst)?;

            let analyst = if ai {
                match ChatAnalyst::from_config(&cfg.llm).await {
                    Ok(a) => Some(a),
                    Err(e) => {
                        warn!(error = %e, "AI analysis unavailable, continuing rule-based only");
                        None
                    }
                }
            } else {
                None
            };

            let mut pipeline = AuditPipeline::new(&store, registry.as_ref(), cfg.detection.clone());
            if let Some(a) = &analyst {
                pipeline = pipeline.with_analyst(a as &dyn RiskAnalyst);
            }

            let report = pipeline
                .analyze(
                    invoice,
                    AnalyzeOptions {
                        use_ai: ai,
                        persist: !no_persist,
                    },
                )
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{report}");
            }
        }
        Command::VerifyGst { gstin: raw } => {
            let number = match gstin::validate(&raw) {
                Ok(g) => g,
                Err(e) => bail!("{raw} is not a valid GSTIN: {e}"),
            };
            println!("Checksum OK: {number} (state {}, PAN {})", number.state_code(), number.pan());

            let registry = registry::from_config(&cfg.gst)?;
            let v = registry.verify(number.as_str()).await?;
            println!("{}", serde_json::to_string_pretty(&v)?);
            match (v.is_valid, v.is_active) {
                (true, true) => println!("GST IS VALID AND ACTIVE"),
                (true, false) => println!("GST IS VALID BUT NOT ACTIVE"),
                _ => println!("GST IS INVALID"),
            }
        }
        Command::BackfillMissingGst => {
            let store = open_store(&cfg)?;
            let summary = backfill_missing_gst(&store, &cfg.detection.missing_gst_placeholders)?;
            println!("Invoices scanned:         {}", summary.scanned);
            println!("Missing GST:              {}", summary.missing);
            println!("New anomalies created:    {}", summary.created);
            println!("Anomalies already there:  {}", summary.already_present);
            print_breakdown(&store)?;
        }
        Command::Stats => {
            let store = open_store(&cfg)?;
            let counts = store.get_counts()?;
            println!("Invoices:        {}", counts.invoices);
            println!("Anomalies:       {}", counts.anomalies);
            println!("Open anomalies:  {}", counts.open_anomalies);
            if let Some(latest) = store.latest_invoice()? {
                println!(
                    "Latest invoice:  {} from {} at {}",
                    latest.invoice_number.as_deref().unwrap_or("Unknown"),
                    latest.vendor_name.as_deref().unwrap_or("Unknown"),
                    latest.upload_date
                );
            }
            print_breakdown(&store)?;
        }
    }

    Ok(())
}

fn print_breakdown(store: &InvoiceStore) -> anyhow::Result<()> {
    println!("\nAnomaly breakdown:");
    for (kind, count) in store.anomaly_breakdown()? {
        println!("  {kind}: {count}");
    }
    Ok(())
}
