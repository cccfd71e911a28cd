// OpenAI-compatible chat completions categorizer.
//
// Receipts: one JSON object (response_format = json_object).
// SMS screenshots: one JSON object per transaction, separated by "***".

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    Categorization, CategorizationOutcome, CategorizationRequest, CategorizeError, Categorizer, DocumentKind,
};
use crate::entities::Sector;
use crate::extractor::{detect_currency, parse_amount, parse_date};

const TRANSACTION_SEPARATOR: &str = "***";

pub struct OpenAiCategorizer {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    default_currency: String,
}

impl OpenAiCategorizer {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        timeout: Duration,
        default_currency: &str,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(OpenAiCategorizer {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            default_currency: default_currency.to_uppercase(),
        })
    }

    async fn complete(&self, system: &str, user: String, json_mode: bool) -> Result<String, CategorizeError> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user,
                },
            ],
            temperature: 0.0,
            response_format: json_mode.then(|| ResponseFormat {
                kind: "json_object".to_string(),
            }),
        };

        debug!(model = %self.model, json_mode, "Sending chat completion request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CategorizeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response.json().await?;
        chat.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| CategorizeError::Format("empty completion".to_string()))
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[async_trait]
impl Categorizer for OpenAiCategorizer {
    fn name(&self) -> &str {
        "openai"
    }

    async fn categorize(&self, request: &CategorizationRequest) -> Result<CategorizationOutcome, CategorizeError> {
        let (system, json_mode) = match request.kind {
            DocumentKind::Receipt => (
                "You read shop receipts. Respond with ONLY one valid JSON object, no other text.",
                true,
            ),
            DocumentKind::Sms => (
                "You read bank transaction notifications. Respond with one JSON object per transaction, separated by '***'.",
                false,
            ),
        };

        let raw = self.complete(system, build_prompt(request, &self.default_currency), json_mode).await?;
        let categorizations = parse_llm_response(&raw, request.kind)?;

        Ok(CategorizationOutcome {
            categorizations,
            raw_response: Some(raw),
        })
    }

    async fn same_vendor(&self, candidate: &str, existing: &str) -> Result<bool, CategorizeError> {
        let prompt = format!(
            "Do these two names refer to the same business?\n\
             Name 1: {candidate}\n\
             Name 2: {existing}\n\
             Ignore differences in case, punctuation, legal suffixes and branch or location names.\n\
             Answer with only 'true' or 'false'."
        );

        let answer = self
            .complete("You match vendor names. Answer only 'true' or 'false'.", prompt, false)
            .await?;

        Ok(answer.trim().trim_end_matches('.').eq_ignore_ascii_case("true"))
    }
}

// ============================================================================
// PROMPTS
// ============================================================================

fn build_prompt(request: &CategorizationRequest, default_currency: &str) -> String {
    let hints = request.fields.description();
    let hints = if hints.is_empty() {
        "(none)".to_string()
    } else {
        hints
    };

    let task = match request.kind {
        DocumentKind::Receipt => "The text below was read from a shop receipt.",
        DocumentKind::Sms => {
            "The text below was read from a screenshot of bank notification messages. \
             It may describe more than one transaction."
        }
    };

    let output = match request.kind {
        DocumentKind::Receipt => "Respond with ONLY one JSON object.",
        DocumentKind::Sms => {
            "Respond with one JSON object per transaction. Separate objects with a line containing only ***. \
             No other text."
        }
    };

    format!(
        "{task}\n\n\
         Text:\n{text}\n\n\
         Fields detected so far:\n{hints}\n\n\
         For each transaction find:\n\
         1. vendor: the business name, cleaned up (no transaction codes, ids, URL parts or location codes)\n\
         2. date: the transaction date as YYYY-MM-DD\n\
         3. total: the total amount paid, as a number\n\
         4. currency: the 3 letter currency code; use {default_currency} when none is shown\n\
         5. sector: exactly one of {sectors}\n\
         6. uncertain_category: true when you are not confident about the sector\n\n\
         When unsure of the sector, make an educated guess from the vendor and items, set \
         uncertain_category to true, and fall back to \"Miscellaneous\".\n\n\
         {output} Structure:\n\
         {{\"vendor\": \"...\", \"date\": \"YYYY-MM-DD\", \"total\": 0.0, \"currency\": \"{default_currency}\", \
         \"sector\": \"...\", \"uncertain_category\": false}}\n\
         Use only information present in the text.",
        task = task,
        text = request.ocr_text,
        hints = hints,
        sectors = Sector::prompt_list(),
        output = output,
        default_currency = default_currency,
    )
}

// ============================================================================
// RESPONSE PARSING
// ============================================================================

#[derive(Debug, Deserialize)]
struct LlmTransaction {
    vendor: Option<String>,
    date: Option<String>,
    total: Option<serde_json::Value>,
    currency: Option<String>,
    sector: Option<String>,
    #[serde(default)]
    uncertain_category: Option<bool>,
}

impl LlmTransaction {
    fn into_categorization(self) -> Categorization {
        let (sector, guessed) = Sector::resolve(self.sector.as_deref().unwrap_or_default());

        let total = match self.total {
            Some(serde_json::Value::Number(n)) => n.as_f64().filter(|v| v.is_finite() && *v >= 0.0),
            Some(serde_json::Value::String(s)) => parse_amount(&s),
            _ => None,
        };

        Categorization {
            vendor: non_empty(self.vendor),
            date: self.date.as_deref().and_then(parse_date),
            total,
            currency: non_empty(self.currency).and_then(|c| normalize_currency(&c)),
            sector,
            uncertain_category: self.uncertain_category.unwrap_or(false) || guessed,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Currency as a 3-letter code.
/// Short forms and symbols map through `detect_currency` ("BD" → "BHD", "$" → "USD").
/// Anything that is not 3 ASCII letters is dropped.
fn normalize_currency(value: &str) -> Option<String> {
    if value.len() == 3 && value.chars().all(|c| c.is_ascii_alphabetic()) {
        return Some(value.to_ascii_uppercase());
    }

    detect_currency(value).filter(|_| value.chars().count() < 3)
}

fn strip_code_fence(chunk: &str) -> &str {
    let chunk = chunk.trim();
    let chunk = chunk
        .strip_prefix("```json")
        .or_else(|| chunk.strip_prefix("```"))
        .unwrap_or(chunk);
    chunk.strip_suffix("```").unwrap_or(chunk).trim()
}

/// Parse model output into categorizations.
///
/// Unparsable chunks are skipped; it is an error only when none parse.
/// A receipt keeps only its first categorization.
pub fn parse_llm_response(raw: &str, kind: DocumentKind) -> Result<Vec<Categorization>, CategorizeError> {
    let mut categorizations = Vec::new();

    for (index, chunk) in strip_code_fence(raw).split(TRANSACTION_SEPARATOR).enumerate() {
        let chunk = strip_code_fence(chunk);
        if chunk.is_empty() {
            continue;
        }

        match serde_json::from_str::<LlmTransaction>(chunk) {
            Ok(parsed) => categorizations.push(parsed.into_categorization()),
            Err(e) => warn!(chunk = index, error = %e, "Skipping unparsable categorizer output"),
        }
    }

    if categorizations.is_empty() {
        return Err(CategorizeError::Format(format!(
            "no transaction could be parsed from: {}",
            raw.chars().take(200).collect::<String>()
        )));
    }

    if kind == DocumentKind::Receipt {
        categorizations.truncate(1);
    }

    Ok(categorizations)
}
