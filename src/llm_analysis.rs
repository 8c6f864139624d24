// src/llm_analysis.rs

use crate::anomaly::{Anomaly, Severity};
use crate::config::{LlmBackend, LlmSection};
use crate::error::{AuditError, Result};
use crate::heuristics::InvoiceData;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// The prompt that frames the model as a fraud analyst.
const SYSTEM_PROMPT: &str = r#"You are an expert fraud detection analyst reviewing Indian GST invoices.
You receive the structured invoice fields and the anomalies raised by rule-based checks.

Respond in plain text with exactly these sections:
Risk assessment: HIGH, MEDIUM or LOW
Concerns: a detailed explanation of what looks wrong and why
Recommended actions: concrete next steps for the accounts team
Confidence: a percentage

Do not invent anomalies that are not supported by the data."#;

/// Qualitative read of an invoice's anomalies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskNarrative {
    pub risk_level: Option<Severity>,
    pub confidence: Option<String>,
    pub text: String,
}

impl RiskNarrative {
    /// Pull the risk level and confidence out of a free-text reply.
    pub fn parse(text: &str) -> Self {
        let risk_level = Regex::new(r"(?i)risk\s+(?:assessment|level)[^A-Za-z\n]*\**\s*(HIGH|MEDIUM|LOW)\b")
            .ok()
            .and_then(|re| re.captures(text))
            .and_then(|c| c[1].parse().ok());

        let confidence = Regex::new(r"(?i)confidence(?:\s+level)?[^A-Za-z0-9\n]*([0-9]{1,3}\s*%|high|medium|low)")
            .ok()
            .and_then(|re| re.captures(text))
            .map(|c| c[1].replace(' ', ""));

        Self {
            risk_level,
            confidence,
            text: text.trim().to_string(),
        }
    }
}

#[async_trait]
pub trait RiskAnalyst: Send + Sync {
    async fn assess(&self, invoice: &InvoiceData, anomalies: &[Anomaly]) -> Result<RiskNarrative>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Resolved endpoint configuration ready to make API calls.
#[derive(Debug, Clone)]
struct ResolvedEndpoint {
    base_url: String,
    model: String,
    api_key: String,
}

/// Resolve the LLM config section into a concrete endpoint.
fn resolve_endpoint(llm: &LlmSection) -> Result<ResolvedEndpoint> {
    match llm.backend {
        LlmBackend::Ollama => {
            info!(url = %llm.ollama.base_url, model = %llm.ollama.model, "Using Ollama (local) backend");
            Ok(ResolvedEndpoint {
                base_url: llm.ollama.base_url.clone(),
                model: llm.ollama.model.clone(),
                api_key: "ollama".to_string(), // required by API but ignored
            })
        }
        LlmBackend::Remote => {
            let api_key =
                std::env::var("LLM_API_KEY").map_err(|_| AuditError::MissingEnv("LLM_API_KEY"))?;
            info!(url = %llm.remote.base_url, model = %llm.remote.model, "Using remote API backend");
            Ok(ResolvedEndpoint {
                base_url: llm.remote.base_url.clone(),
                model: llm.remote.model.clone(),
                api_key,
            })
        }
        LlmBackend::Disabled => Err(AuditError::Llm("LLM backend is disabled".to_string())),
    }
}

/// Check if the Ollama server is reachable.
async fn check_ollama_health(client: &Client, base_url: &str) -> bool {
    // Ollama's health endpoint is at the root (not under /v1)
    let health_url = base_url.trim_end_matches('/').trim_end_matches("/v1");

    match client
        .get(health_url)
        .timeout(std::time::Duration::from_secs(3))
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => true,
        Ok(resp) => {
            warn!(status = %resp.status(), "Ollama server returned non-OK status");
            false
        }
        Err(e) => {
            warn!(error = %e, "Ollama server not reachable");
            false
        }
    }
}

/// Render the user turn: invoice fields plus the rule findings.
fn build_user_prompt(invoice: &InvoiceData, anomalies: &[Anomaly]) -> String {
    let mut prompt = format!(
        "Invoice Number: {}\nVendor Name: {}\nDate: {}\nAmount: ₹{:.2}\nGST Numbers: {}\n\nDetected Anomalies:\n",
        invoice.display_number(),
        invoice.display_vendor(),
        invoice.invoice_date.as_deref().unwrap_or("Unknown"),
        invoice.total_amount.unwrap_or(0.0),
        if invoice.gst_numbers.is_empty() {
            "none".to_string()
        } else {
            invoice.gst_numbers.join(", ")
        },
    );
    for (i, a) in anomalies.iter().enumerate() {
        prompt.push_str(&format!("{}. {a}\n", i + 1));
    }
    prompt
}

/// OpenAI-compatible chat-completions analyst (Ollama or a hosted endpoint).
pub struct ChatAnalyst {
    client: Client,
    endpoint: ResolvedEndpoint,
}

impl ChatAnalyst {
    /// Build from config; for Ollama the server must pass a health check.
    pub async fn from_config(llm: &LlmSection) -> Result<Self> {
        let endpoint = resolve_endpoint(llm)?;
        let client = Client::new();

        if llm.backend == LlmBackend::Ollama && !check_ollama_health(&client, &endpoint.base_url).await {
            return Err(AuditError::Llm(format!(
                "Ollama is not running at {}. Start it with: ollama serve",
                endpoint.base_url
            )));
        }

        Ok(Self { client, endpoint })
    }

    /// Point at any OpenAI-compatible `base_url` directly, skipping config.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: ResolvedEndpoint {
                base_url: base_url.into(),
                model: model.into(),
                api_key: api_key.into(),
            },
        }
    }
}

#[async_trait]
impl RiskAnalyst for ChatAnalyst {
    async fn assess(&self, invoice: &InvoiceData, anomalies: &[Anomaly]) -> Result<RiskNarrative> {
        let request = ChatRequest {
            model: self.endpoint.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: build_user_prompt(invoice, anomalies),
                },
            ],
            temperature: 0.0,
        };

        let url = format!("{}/chat/completions", self.endpoint.base_url.trim_end_matches('/'));
        info!(url = %url, model = %self.endpoint.model, anomalies = anomalies.len(), "Requesting risk narrative");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.endpoint.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuditError::Llm(format!("LLM API error {status}: {body}")));
        }

        let chat_response: ChatResponse = response.json().await?;
        let content = chat_response
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| AuditError::Llm("Empty response from LLM".to_string()))?;

        let narrative = RiskNarrative::parse(strip_thinking(content));
        info!(risk = ?narrative.risk_level, confidence = ?narrative.confidence, "Risk narrative received");
        Ok(narrative)
    }
}

/// Drop a leading `<think>...</think>` block some local models emit.
fn strip_thinking(content: &str) -> &str {
    match content.find("</think>") {
        Some(end) => &content[end + "</think>".len()..],
        None => content,
    }
}
