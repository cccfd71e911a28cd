// Offline categorizer backed by the keyword rule engine.
//
// The vendor name is classified first; a hit there is trusted. A hit only in
// the wider OCR text is flagged uncertain, and no hit at all lands in
// Miscellaneous, also uncertain.

use async_trait::async_trait;
use tracing::debug;

use super::{Categorization, CategorizationOutcome, CategorizationRequest, CategorizeError, Categorizer};
use crate::rules::RuleEngine;

pub struct RuleCategorizer {
    engine: RuleEngine,
}

impl RuleCategorizer {
    pub fn new() -> Self {
        RuleCategorizer {
            engine: RuleEngine::with_defaults(),
        }
    }

    pub fn with_engine(engine: RuleEngine) -> Self {
        RuleCategorizer { engine }
    }
}

impl Default for RuleCategorizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Categorizer for RuleCategorizer {
    fn name(&self) -> &str {
        "rules"
    }

    async fn categorize(&self, request: &CategorizationRequest) -> Result<CategorizationOutcome, CategorizeError> {
        let fields = &request.fields;

        let by_vendor = fields
            .vendor
            .as_deref()
            .map(|vendor| self.engine.classify(vendor))
            .filter(|result| result.is_match());

        let (result, uncertain) = match by_vendor {
            Some(result) => (result, false),
            None => (self.engine.classify(&request.ocr_text), true),
        };

        debug!(
            sector = %result.sector,
            rule = result.rule_id.as_deref().unwrap_or("none"),
            uncertain,
            "Rule categorization"
        );

        Ok(CategorizationOutcome {
            categorizations: vec![Categorization {
                vendor: fields.vendor.clone(),
                date: fields.date,
                total: fields.total,
                currency: fields.currency.clone(),
                sector: result.sector,
                uncertain_category: uncertain,
            }],
            raw_response: None,
        })
    }

    async fn same_vendor(&self, _candidate: &str, _existing: &str) -> Result<bool, CategorizeError> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categorize::DocumentKind;
    use crate::entities::Sector;
    use crate::extractor::ExtractedFields;

    fn request(vendor: Option<&str>, text: &str) -> CategorizationRequest {
        CategorizationRequest {
            kind: DocumentKind::Receipt,
            ocr_text: text.to_string(),
            fields: ExtractedFields {
                vendor: vendor.map(str::to_string),
                total: Some(3.37),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_vendor_match_is_certain() {
        let outcome = RuleCategorizer::new()
            .categorize(&request(Some("LuLu Hypermarket"), "LuLu Hypermarket\nTOTAL 3.370"))
            .await
            .unwrap();

        let categorization = &outcome.categorizations[0];
        assert_eq!(categorization.sector, Sector::Groceries);
        assert!(!categorization.uncertain_category);
        assert_eq!(categorization.total, Some(3.37));
        assert_eq!(outcome.raw_response, None);
    }

    #[tokio::test]
    async fn test_text_match_is_uncertain() {
        let outcome = RuleCategorizer::new()
            .categorize(&request(Some("Al Jazira 77"), "Al Jazira 77\nPanadol 24 tabs\nPHARMACY COUNTER"))
            .await
            .unwrap();

        assert_eq!(outcome.categorizations[0].sector, Sector::Health);
        assert!(outcome.categorizations[0].uncertain_category);
    }

    #[tokio::test]
    async fn test_no_match_is_miscellaneous() {
        let outcome = RuleCategorizer::new()
            .categorize(&request(None, "XYZ 4471"))
            .await
            .unwrap();

        assert_eq!(outcome.categorizations[0].sector, Sector::Miscellaneous);
        assert!(outcome.categorizations[0].uncertain_category);
    }

    #[tokio::test]
    async fn test_never_claims_same_vendor() {
        assert!(!RuleCategorizer::new().same_vendor("Lulu", "LuLu").await.unwrap());
    }
}
