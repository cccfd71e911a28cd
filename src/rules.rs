// 🏷️ Sector Rules - Rules as Data
// Keyword patterns that map vendor names and receipt text to a sector.
// Used as the offline categorizer when no language model is configured.

use crate::entities::Sector;
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorRule {
    /// Rule ID for tracking
    pub id: String,

    /// Pattern to match (supports wildcards with *)
    pub pattern: String,

    /// Sector to assign
    pub sector: Sector,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f64,

    /// Priority (higher = applied first)
    #[serde(default)]
    pub priority: i32,
}

impl SectorRule {
    fn new(id: &str, pattern: &str, sector: Sector, confidence: f64, priority: i32) -> Self {
        SectorRule {
            id: id.to_string(),
            pattern: pattern.to_string(),
            sector,
            confidence,
            priority,
        }
    }

    /// Check if pattern matches the given text
    pub fn matches(&self, text: &str) -> bool {
        let pattern_lower = self.pattern.to_lowercase();
        let text_lower = text.to_lowercase();

        if pattern_lower.contains('*') {
            let parts: Vec<&str> = pattern_lower.split('*').collect();

            // Text must start with the first part and end with the last part
            let first = parts[0];
            let last = parts[parts.len() - 1];
            if !text_lower.starts_with(first) || !text_lower.ends_with(last) {
                return false;
            }

            // Middle parts appear in order
            let mut current_pos = first.len();
            for part in &parts[1..parts.len() - 1] {
                if part.is_empty() {
                    continue;
                }
                match text_lower[current_pos..].find(part) {
                    Some(pos) => current_pos += pos + part.len(),
                    None => return false,
                }
            }

            current_pos <= text_lower.len() - last.len() || last.is_empty()
        } else {
            contains_word(&text_lower, &pattern_lower)
        }
    }
}

/// Substring match that must start on a word boundary
fn contains_word(text: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }

    text.match_indices(needle).any(|(pos, _)| {
        pos == 0
            || text[..pos]
                .chars()
                .next_back()
                .map(|c| !c.is_alphanumeric())
                .unwrap_or(true)
    })
}

// ============================================================================
// CLASSIFICATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub sector: Sector,
    pub confidence: f64,
    pub rule_id: Option<String>,
}

impl Default for ClassificationResult {
    fn default() -> Self {
        ClassificationResult {
            sector: Sector::Miscellaneous,
            confidence: 0.0,
            rule_id: None,
        }
    }
}

impl ClassificationResult {
    pub fn is_match(&self) -> bool {
        self.rule_id.is_some()
    }
}

// ============================================================================
// RULE ENGINE
// ============================================================================

pub struct RuleEngine {
    rules: Vec<SectorRule>,
}

impl RuleEngine {
    /// Create a new empty rule engine
    pub fn new() -> Self {
        RuleEngine { rules: Vec::new() }
    }

    /// Load rules from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read rules file: {:?}", path.as_ref()))?;

        let rules: Vec<SectorRule> =
            serde_json::from_str(&content).context("Failed to parse rules JSON")?;

        Ok(RuleEngine::from_rules(rules))
    }

    /// Create engine from a list of rules
    pub fn from_rules(mut rules: Vec<SectorRule>) -> Self {
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        RuleEngine { rules }
    }

    /// Engine with the built-in keyword rules
    pub fn with_defaults() -> Self {
        let mut rules = Vec::new();

        let keywords: [(Sector, &[&str]); 14] = [
            (
                Sector::Groceries,
                &["supermarket", "hypermarket", "grocery", "groceries", "carrefour", "lulu", "spinneys", "mart", "bakery"],
            ),
            (
                Sector::Dining,
                &["cafe", "café", "coffee", "restaurant", "starbucks", "mcdonald", "kfc", "pizza", "burger", "talabat", "costa", "grill"],
            ),
            (
                Sector::Utilities,
                &["electricity", "ewa", "water authority", "telecom", "batelco", "zain", "stc", "internet", "utility"],
            ),
            (
                Sector::Transportation,
                &["uber", "careem", "taxi", "petrol", "fuel", "bapco", "parking", "metro", "bus"],
            ),
            (
                Sector::Auto,
                &["garage", "tyre", "tire", "car wash", "auto parts", "motors", "service center"],
            ),
            (
                Sector::Health,
                &["pharmacy", "clinic", "hospital", "medical", "dental", "boots"],
            ),
            (
                Sector::PersonalCare,
                &["salon", "barber", "spa", "beauty", "cosmetics", "perfume"],
            ),
            (
                Sector::Entertainment,
                &["cinema", "netflix", "spotify", "playstation", "steam", "bowling", "theatre"],
            ),
            (
                Sector::Education,
                &["bookstore", "books", "school", "university", "course", "tuition", "jashanmal"],
            ),
            (
                Sector::Apparel,
                &["fashion", "apparel", "clothing", "zara", "h&m", "shoes", "footwear"],
            ),
            (
                Sector::Electronics,
                &["electronics", "sharaf dg", "apple store", "samsung", "appliances", "computer"],
            ),
            (
                Sector::Home,
                &["ikea", "furniture", "home centre", "home center", "pan emirates", "homes r us"],
            ),
            (
                Sector::Travel,
                &["airline", "airways", "hotel", "booking.com", "airbnb", "expedia", "resort"],
            ),
            (
                Sector::Finance,
                &["insurance", "takaful", "loan", "bank charge", "finance charge"],
            ),
        ];

        for (sector, patterns) in keywords {
            for pattern in patterns {
                let id = format!("{}:{}", sector.short_label().to_lowercase(), pattern);
                rules.push(SectorRule::new(&id, pattern, sector, 0.6, 0));
            }
        }

        // Longer phrases are more specific than single words
        for rule in &mut rules {
            rule.priority = rule.pattern.len() as i32;
        }

        RuleEngine::from_rules(rules)
    }

    /// Add a single rule
    pub fn add_rule(&mut self, rule: SectorRule) {
        self.rules.push(rule);
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Apply rules to classify a vendor name or free text
    pub fn classify(&self, text: &str) -> ClassificationResult {
        self.rules
            .iter()
            .find(|rule| rule.matches(text))
            .map(|rule| ClassificationResult {
                sector: rule.sector,
                confidence: rule.confidence,
                rule_id: Some(rule.id.clone()),
            })
            .unwrap_or_default()
    }

    /// Get number of rules loaded
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ============================================================================
// TESTS
// ============================================================================
