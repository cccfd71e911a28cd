//! Categorization adapter.
//!
//! A [`Categorizer`] reads OCR text (plus whatever the extractor already
//! found) and returns one or more categorizations, each carrying exactly one
//! [`Sector`] from the fixed set. Receipts yield one categorization; an SMS
//! screenshot may list several transactions.
//!
//! - [`OpenAiCategorizer`] - OpenAI-compatible chat completions
//! - [`RuleCategorizer`] - keyword rules, used when no API key is configured

pub mod openai;
pub mod rules;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::config::LlmConfig;
use crate::entities::Sector;
use crate::extractor::ExtractedFields;
use crate::rules::RuleEngine;

pub use openai::{parse_llm_response, OpenAiCategorizer};
pub use rules::RuleCategorizer;

// ============================================================================
// DOCUMENT / TRANSACTION KINDS
// ============================================================================

/// What the uploaded image shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Receipt,
    Sms,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Receipt => "receipt",
            DocumentKind::Sms => "sms",
        }
    }

    pub fn transaction_type(&self) -> TransactionType {
        match self {
            DocumentKind::Receipt => TransactionType::Receipt,
            DocumentKind::Sms => TransactionType::Sms,
        }
    }
}

/// How a stored transaction was created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Receipt,
    Sms,
    Manual,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Receipt => "receipt",
            TransactionType::Sms => "sms",
            TransactionType::Manual => "manual",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "receipt" => Ok(TransactionType::Receipt),
            "sms" => Ok(TransactionType::Sms),
            "manual" => Ok(TransactionType::Manual),
            other => anyhow::bail!("unknown transaction type: {}", other),
        }
    }
}

// ============================================================================
// REQUEST / RESULT
// ============================================================================

#[derive(Debug, Clone)]
pub struct CategorizationRequest {
    pub kind: DocumentKind,
    pub ocr_text: String,
    /// Fields the extractor already found (hints, may be empty)
    pub fields: ExtractedFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Categorization {
    pub vendor: Option<String>,
    pub date: Option<NaiveDate>,
    pub total: Option<f64>,
    pub currency: Option<String>,
    pub sector: Sector,
    pub uncertain_category: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategorizationOutcome {
    /// Never empty on success
    pub categorizations: Vec<Categorization>,
    /// Raw model output, stored with the OCR record
    pub raw_response: Option<String>,
}

#[derive(Debug, Error)]
pub enum CategorizeError {
    #[error("categorizer request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("categorizer returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("categorizer returned an unusable response: {0}")]
    Format(String),
}

// ============================================================================
// CATEGORIZER TRAIT
// ============================================================================

#[async_trait]
pub trait Categorizer: Send + Sync {
    fn name(&self) -> &str;

    async fn categorize(&self, request: &CategorizationRequest) -> Result<CategorizationOutcome, CategorizeError>;

    /// Whether two vendor names refer to the same business
    async fn same_vendor(&self, candidate: &str, existing: &str) -> Result<bool, CategorizeError>;
}

/// OpenAI categorizer when an API key is configured, keyword rules otherwise.
///
/// `default_currency` is what the model is told to assume when a document
/// shows no currency.
pub fn build_categorizer(config: &LlmConfig, default_currency: &str) -> anyhow::Result<Arc<dyn Categorizer>> {
    if let Some(key) = config.api_key.as_deref().filter(|key| !key.trim().is_empty()) {
        info!(model = %config.model, base_url = %config.base_url, "Using OpenAI categorizer");
        return Ok(Arc::new(OpenAiCategorizer::new(
            key,
            &config.base_url,
            &config.model,
            config.timeout,
            default_currency,
        )?));
    }

    match &config.rules_path {
        Some(path) => {
            let engine = RuleEngine::from_file(path)
                .with_context(|| format!("Failed to load categorizer rules from {}", path.display()))?;
            info!(path = %path.display(), rules = engine.rule_count(), "No LLM API key configured, using rules file");
            Ok(Arc::new(RuleCategorizer::with_engine(engine)))
        }
        None => {
            info!("No LLM API key configured, using rule-based categorizer");
            Ok(Arc::new(RuleCategorizer::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn llm_config(api_key: Option<&str>) -> LlmConfig {
        LlmConfig {
            api_key: api_key.map(str::to_string),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(30),
            rules_path: None,
        }
    }

    #[test]
    fn test_build_categorizer_selects_implementation() {
        assert_eq!(build_categorizer(&llm_config(None), "BHD").unwrap().name(), "rules");
        assert_eq!(build_categorizer(&llm_config(Some("  ")), "BHD").unwrap().name(), "rules");
        assert_eq!(build_categorizer(&llm_config(Some("sk-test")), "BHD").unwrap().name(), "openai");
    }

    #[tokio::test]
    async fn test_build_categorizer_loads_rules_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"[{"id": "gym", "pattern": "fitness", "sector": "Entertainment & Leisure", "confidence": 0.9, "priority": 5}]"#,
        )
        .unwrap();

        let mut config = llm_config(None);
        config.rules_path = Some(path);
        let categorizer = build_categorizer(&config, "BHD").unwrap();

        let request = CategorizationRequest {
            kind: DocumentKind::Receipt,
            ocr_text: "FITNESS FIRST\nTOTAL 25.000".to_string(),
            fields: ExtractedFields {
                vendor: Some("Fitness First".to_string()),
                ..Default::default()
            },
        };
        let outcome = categorizer.categorize(&request).await.unwrap();

        assert_eq!(outcome.categorizations[0].sector, Sector::Entertainment);
        assert!(!outcome.categorizations[0].uncertain_category);

        // Built-in rules are replaced, so a supermarket is no longer recognised
        let request = CategorizationRequest {
            kind: DocumentKind::Receipt,
            ocr_text: "LULU HYPERMARKET".to_string(),
            fields: ExtractedFields {
                vendor: Some("LuLu Hypermarket".to_string()),
                ..Default::default()
            },
        };
        let outcome = categorizer.categorize(&request).await.unwrap();
        assert_eq!(outcome.categorizations[0].sector, Sector::Miscellaneous);
    }

    #[test]
    fn test_build_categorizer_missing_rules_file() {
        let mut config = llm_config(None);
        config.rules_path = Some("/nonexistent/rules.json".into());

        let err = build_categorizer(&config, "BHD").err().unwrap();
        assert!(err.to_string().contains("rules"));
    }

    #[test]
    fn test_transaction_type_round_trip() {
        for kind in [TransactionType::Receipt, TransactionType::Sms, TransactionType::Manual] {
            assert_eq!(kind.as_str().parse::<TransactionType>().unwrap(), kind);
        }
        assert!("bank".parse::<TransactionType>().is_err());
        assert_eq!(DocumentKind::Sms.transaction_type(), TransactionType::Sms);
    }
}
